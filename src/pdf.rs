use headless_chrome::browser::default_executable;
#[cfg(feature = "chromium-download")]
use headless_chrome::browser::FetcherOptions;
use headless_chrome::protocol::cdp::Emulation;
use headless_chrome::types::PrintToPdfOptions;
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::io::Write;
use std::thread;
use std::time::Duration;
use url::Url;

const POINTS_PER_INCH: f64 = 72.0;

/// Largest page edge Chromium's print backend will accept, in points.
const MAX_PAGE_POINTS: f64 = 200.0 * POINTS_PER_INCH;

/// Pause around navigation so print-media style recalculation and
/// post-load layout shifts settle before printing.
const SETTLE_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum PageFormat {
    A2,
    A3,
    A4,
    Letter,
    Legal,
}

impl PageFormat {
    /// Paper size in inches, matching Chromium's named print formats.
    fn size_inches(self) -> (f64, f64) {
        match self {
            PageFormat::A2 => (16.54, 23.4),
            PageFormat::A3 => (11.7, 16.54),
            PageFormat::A4 => (8.27, 11.7),
            PageFormat::Letter => (8.5, 11.0),
            PageFormat::Legal => (8.5, 14.0),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub html: String,
    /// `None` sizes the page to the rendered content.
    pub page_format: Option<PageFormat>,
    pub allow_chromium_download: bool,
    pub disable_sandbox: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error(
        "this build does not support downloading Chromium; rebuild with the \
         `chromium-download` feature or install Chrome/Chromium manually"
    )]
    EngineMissing,
    #[error(
        "no Chrome or Chromium executable was found; pass --allow-chromium-download \
         to fetch one, or install it manually"
    )]
    BrowserUnavailable,
    #[error("failed to launch the browser process: {0}")]
    LaunchFailed(anyhow::Error),
    #[error("browser session failed: {0}")]
    Session(anyhow::Error),
    #[error("navigating to the rendered document did not complete: {0}")]
    NavigationTimeout(anyhow::Error),
    #[error("printing the page to PDF did not complete: {0}")]
    RenderTimeout(anyhow::Error),
    #[error("failed to stage the document for printing: {0}")]
    Io(#[from] std::io::Error),
    #[error("the render worker thread panicked")]
    WorkerPanic,
}

/// Renders `request.html` to PDF bytes in a headless browser.
///
/// The browser control sequence runs on a dedicated worker thread and the
/// caller blocks until it finishes. Each call owns its own browser process
/// and temporary file, so concurrent calls do not interact.
pub fn render(request: ConversionRequest) -> Result<Vec<u8>, RenderError> {
    let worker = thread::Builder::new()
        .name("pdf-render".to_string())
        .spawn(move || render_on_worker(&request))?;

    match worker.join() {
        Ok(result) => result,
        Err(_) => Err(RenderError::WorkerPanic),
    }
}

fn render_on_worker(request: &ConversionRequest) -> Result<Vec<u8>, RenderError> {
    // The temp file must outlive the browser session; Drop deletes it on
    // every exit path.
    let mut temp_file = tempfile::Builder::new()
        .prefix("nb-webpdf-")
        .suffix(".html")
        .tempfile()?;
    temp_file.write_all(request.html.as_bytes())?;
    temp_file.flush()?;

    let file_url = Url::from_file_path(temp_file.path())
        .map_err(|_| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "temporary file path is not absolute",
            )
        })?
        .to_string();

    let browser = launch_browser(request)?;
    let tab = browser.new_tab().map_err(RenderError::Session)?;

    tab.call_method(Emulation::SetEmulatedMedia {
        media: Some("print".to_string()),
        features: None,
    })
    .map_err(RenderError::Session)?;
    thread::sleep(SETTLE_DELAY);

    tracing::debug!(url = %file_url, "navigating to rendered document");
    tab.navigate_to(&file_url)
        .map_err(RenderError::NavigationTimeout)?;
    tab.wait_until_navigated()
        .map_err(RenderError::NavigationTimeout)?;
    thread::sleep(SETTLE_DELAY);

    let (width, height) = match request.page_format {
        Some(format) => format.size_inches(),
        None => {
            let width = measure_body(&tab, "width")?;
            let height = measure_body(&tab, "height")?;
            auto_page_size(width, height)
        }
    };

    tracing::debug!(width, height, "printing to PDF");
    let pdf = tab
        .print_to_pdf(Some(print_options(width, height)))
        .map_err(RenderError::RenderTimeout)?;

    Ok(pdf)
}

fn launch_browser(request: &ConversionRequest) -> Result<Browser, RenderError> {
    let mut builder = LaunchOptions::default_builder();
    builder.sandbox(!request.disable_sandbox);

    match default_executable() {
        Ok(path) => {
            builder.path(Some(path));
        }
        Err(_) if request.allow_chromium_download => {
            #[cfg(feature = "chromium-download")]
            {
                tracing::info!("no local browser found, downloading a Chromium build");
                builder.fetcher_options(FetcherOptions::default().with_allow_download(true));
            }
            #[cfg(not(feature = "chromium-download"))]
            return Err(RenderError::EngineMissing);
        }
        Err(_) => return Err(RenderError::BrowserUnavailable),
    }

    let options = builder
        .build()
        .map_err(|err| RenderError::LaunchFailed(anyhow::anyhow!(err)))?;
    Browser::new(options).map_err(RenderError::LaunchFailed)
}

fn measure_body(tab: &Tab, edge: &str) -> Result<f64, RenderError> {
    let expression = format!(
        "Math.ceil(document.body.getBoundingClientRect().{}) + 1",
        edge
    );
    let result = tab
        .evaluate(&expression, false)
        .map_err(RenderError::Session)?;
    result
        .value
        .as_ref()
        .and_then(serde_json::Value::as_f64)
        .ok_or_else(|| RenderError::Session(anyhow::anyhow!("body measurement was not a number")))
}

/// Converts a measured content size (points) to paper dimensions in inches,
/// clamping each edge to 200 in.
fn auto_page_size(width: f64, height: f64) -> (f64, f64) {
    (
        width.min(MAX_PAGE_POINTS) / POINTS_PER_INCH,
        height.min(MAX_PAGE_POINTS) / POINTS_PER_INCH,
    )
}

fn print_options(paper_width: f64, paper_height: f64) -> PrintToPdfOptions {
    PrintToPdfOptions {
        print_background: Some(true),
        paper_width: Some(paper_width),
        paper_height: Some(paper_height),
        margin_top: Some(0.0),
        margin_bottom: Some(0.0),
        margin_left: Some(0.0),
        margin_right: Some(0.0),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_page_size() {
        let (width, height) = auto_page_size(5001.0, 11.0);
        assert!((width - 5001.0 / 72.0).abs() < 1e-9);
        assert!((height - 11.0 / 72.0).abs() < 1e-9);
    }

    #[test]
    fn test_auto_page_size_clamps_to_200_inches() {
        let (width, height) = auto_page_size(20000.0, 15000.0);
        assert!((width - 200.0).abs() < 1e-9);
        assert!((height - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_format_sizes() {
        assert_eq!(PageFormat::A4.size_inches(), (8.27, 11.7));
        assert_eq!(PageFormat::Letter.size_inches(), (8.5, 11.0));
        assert_eq!(PageFormat::Legal.size_inches(), (8.5, 14.0));
    }

    #[test]
    fn test_print_options() {
        let options = print_options(8.27, 11.7);
        assert_eq!(options.print_background, Some(true));
        assert_eq!(options.paper_width, Some(8.27));
        assert_eq!(options.paper_height, Some(11.7));
        assert_eq!(options.margin_top, Some(0.0));
        assert_eq!(options.margin_left, Some(0.0));
    }

    #[test]
    fn test_error_messages_carry_remediation_hints() {
        assert!(RenderError::BrowserUnavailable
            .to_string()
            .contains("--allow-chromium-download"));
        assert!(RenderError::EngineMissing
            .to_string()
            .contains("chromium-download"));
    }

    #[test]
    #[ignore = "requires a Chrome or Chromium install"]
    fn test_render_fixed_format() {
        let request = ConversionRequest {
            html: "<html><body>Hi</body></html>".to_string(),
            page_format: Some(PageFormat::A4),
            allow_chromium_download: false,
            disable_sandbox: true,
        };
        let pdf = render(request).unwrap();
        assert!(pdf.starts_with(b"%PDF-"));
    }

    #[test]
    #[ignore = "requires a Chrome or Chromium install"]
    fn test_render_auto_size() {
        let request = ConversionRequest {
            html: "<html><body><div style='width:5000px;height:10px'></div></body></html>"
                .to_string(),
            page_format: None,
            allow_chromium_download: false,
            disable_sandbox: true,
        };
        let pdf = render(request).unwrap();
        assert!(pdf.starts_with(b"%PDF-"));
    }
}
