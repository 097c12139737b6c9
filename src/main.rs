use anyhow::Context;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

mod exporter;
mod pdf;

use crate::pdf::{ConversionRequest, PageFormat};

#[derive(Debug, clap::Parser)]
struct Options {
    /// Notebook files to export.
    #[arg(required = true)]
    notebooks: Vec<PathBuf>,
    /// Paper size for the printed pages; pages are sized to the rendered
    /// content when omitted.
    #[arg(long, value_enum)]
    page_format: Option<PageFormat>,
    /// Directory to write PDFs to. Defaults to each notebook's directory.
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// Allow downloading a compatible Chromium build if none is installed.
    #[arg(long)]
    allow_chromium_download: bool,
    /// Launch the browser with its sandbox disabled.
    #[arg(long)]
    no_sandbox: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let opts: Options = clap::Parser::parse();
    for notebook in &opts.notebooks {
        let pdf_path = convert_notebook(&opts, notebook)
            .with_context(|| format!("failed to convert {}", notebook.display()))?;
        println!("Wrote {}", pdf_path.display());
    }
    Ok(())
}

fn convert_notebook(opts: &Options, notebook: &Path) -> anyhow::Result<PathBuf> {
    if !notebook.exists() {
        anyhow::bail!("notebook not found: {}", notebook.display());
    }

    let stem = notebook
        .file_stem()
        .and_then(OsStr::to_str)
        .unwrap_or("notebook");

    let notebook_json = fs::read_to_string(notebook)?;
    let html = exporter::export_html(&notebook_json, stem)?;

    let pdf_bytes = pdf::render(ConversionRequest {
        html,
        page_format: opts.page_format,
        allow_chromium_download: opts.allow_chromium_download,
        disable_sandbox: opts.no_sandbox,
    })?;

    let target_dir = match &opts.output_dir {
        Some(dir) => dir.clone(),
        None => notebook
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf(),
    };
    fs::create_dir_all(&target_dir)?;

    let pdf_path = target_dir.join(format!("{}.pdf", stem));
    fs::write(&pdf_path, pdf_bytes)?;
    Ok(pdf_path)
}
