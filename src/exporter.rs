use anyhow::Context;
use minijinja::{context, AutoEscape, Environment};
use serde::Deserialize;
use std::collections::HashMap;

const TEMPLATE: &str = include_str!("../assets/notebook.jinja");

#[derive(Debug, Deserialize)]
struct Notebook {
    #[serde(default)]
    cells: Vec<Cell>,
}

#[derive(Debug, Deserialize)]
struct Cell {
    cell_type: String,
    #[serde(default, deserialize_with = "deserialize_multiline")]
    source: String,
    #[serde(default)]
    execution_count: Option<u32>,
    #[serde(default)]
    outputs: Vec<Output>,
}

#[derive(Debug, Deserialize)]
struct Output {
    output_type: String,
    #[serde(default, deserialize_with = "deserialize_multiline")]
    text: String,
    #[serde(default)]
    data: HashMap<String, serde_json::Value>,
    #[serde(default)]
    ename: String,
    #[serde(default)]
    evalue: String,
    #[serde(default)]
    traceback: Vec<String>,
}

// nbformat stores multiline strings either as one string or as a list of
// line fragments.
fn deserialize_multiline<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Multiline {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Multiline::deserialize(deserializer)? {
        Multiline::One(text) => text,
        Multiline::Many(parts) => parts.concat(),
    })
}

#[derive(Debug, serde::Serialize)]
struct RenderedCell<'a> {
    cell_type: &'a str,
    source: &'a str,
    execution_count: Option<u32>,
    outputs: Vec<RenderedOutput>,
}

#[derive(Debug, serde::Serialize)]
struct RenderedOutput {
    kind: &'static str,
    content: String,
}

impl RenderedOutput {
    fn from_raw(raw: &Output) -> Option<RenderedOutput> {
        match raw.output_type.as_str() {
            "stream" => Some(RenderedOutput {
                kind: "stream",
                content: raw.text.clone(),
            }),
            "error" => {
                let content = if raw.traceback.is_empty() {
                    format!("{}: {}", raw.ename, raw.evalue)
                } else {
                    strip_ansi(&raw.traceback.join("\n"))
                };
                Some(RenderedOutput {
                    kind: "error",
                    content,
                })
            }
            "execute_result" | "display_data" => {
                if let Some(html) = raw.data.get("text/html") {
                    Some(RenderedOutput {
                        kind: "html",
                        content: mime_text(html),
                    })
                } else if let Some(svg) = raw.data.get("image/svg+xml") {
                    Some(RenderedOutput {
                        kind: "html",
                        content: mime_text(svg),
                    })
                } else if let Some(png) = raw.data.get("image/png") {
                    // base64 payloads may contain embedded newlines, which
                    // are not valid inside a data URI
                    let content = mime_text(png).chars().filter(|c| !c.is_whitespace()).collect();
                    Some(RenderedOutput {
                        kind: "image",
                        content,
                    })
                } else if let Some(text) = raw.data.get("text/plain") {
                    Some(RenderedOutput {
                        kind: "text",
                        content: mime_text(text),
                    })
                } else {
                    None
                }
            }
            _ => None,
        }
    }
}

fn mime_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(text) => text.clone(),
        serde_json::Value::Array(parts) => {
            parts.iter().filter_map(serde_json::Value::as_str).collect()
        }
        _ => String::new(),
    }
}

fn strip_ansi(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == '\u{1b}' {
            if chars.clone().next() == Some('[') {
                chars.next();
                for c in chars.by_ref() {
                    if ('\u{40}'..='\u{7e}').contains(&c) {
                        break;
                    }
                }
            }
            continue;
        }
        out.push(c);
    }
    out
}

/// Renders a notebook's JSON into a standalone HTML document with an
/// embedded print stylesheet.
pub fn export_html(notebook_json: &str, title: &str) -> anyhow::Result<String> {
    let notebook: Notebook =
        serde_json::from_str(notebook_json).context("failed to parse notebook JSON")?;

    let cells = notebook
        .cells
        .iter()
        .map(|cell| RenderedCell {
            cell_type: &cell.cell_type,
            source: &cell.source,
            execution_count: cell.execution_count,
            outputs: cell.outputs.iter().filter_map(RenderedOutput::from_raw).collect(),
        })
        .collect::<Vec<_>>();

    let mut env = Environment::new();
    env.set_auto_escape_callback(|_| AutoEscape::Html);
    let template = env.template_from_str(TEMPLATE)?;
    let html = template.render(context! { title, cells })?;
    Ok(html)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multiline_source_is_joined() {
        let cell: Cell =
            serde_json::from_str(r#"{"cell_type": "markdown", "source": ["a\n", "b"]}"#).unwrap();
        assert_eq!(cell.source, "a\nb");

        let cell: Cell =
            serde_json::from_str(r#"{"cell_type": "markdown", "source": "plain"}"#).unwrap();
        assert_eq!(cell.source, "plain");
    }

    #[test]
    fn test_output_prefers_html_over_plain_text() {
        let output: Output = serde_json::from_str(
            r#"{
                "output_type": "execute_result",
                "data": {"text/html": "<b>bold</b>", "text/plain": "bold"}
            }"#,
        )
        .unwrap();

        let rendered = RenderedOutput::from_raw(&output).unwrap();
        assert_eq!(rendered.kind, "html");
        assert_eq!(rendered.content, "<b>bold</b>");
    }

    #[test]
    fn test_png_payload_is_stripped_of_whitespace() {
        let output: Output = serde_json::from_str(
            r#"{
                "output_type": "display_data",
                "data": {"image/png": "aGVs\nbG8=\n"}
            }"#,
        )
        .unwrap();

        let rendered = RenderedOutput::from_raw(&output).unwrap();
        assert_eq!(rendered.kind, "image");
        assert_eq!(rendered.content, "aGVsbG8=");
    }

    #[test]
    fn test_strip_ansi() {
        assert_eq!(strip_ansi("\u{1b}[0;31mboom\u{1b}[0m"), "boom");
        assert_eq!(strip_ansi("no escapes"), "no escapes");
    }

    #[test]
    fn test_error_output_without_traceback() {
        let output: Output = serde_json::from_str(
            r#"{"output_type": "error", "ename": "ValueError", "evalue": "bad input"}"#,
        )
        .unwrap();

        let rendered = RenderedOutput::from_raw(&output).unwrap();
        assert_eq!(rendered.kind, "error");
        assert_eq!(rendered.content, "ValueError: bad input");
    }

    #[test]
    fn test_export_escapes_cell_sources() {
        let notebook = r#"{
            "cells": [{"cell_type": "code", "source": "print(1 < 2)", "outputs": []}]
        }"#;
        let html = export_html(notebook, "escapes").unwrap();
        assert!(html.contains("print(1 &lt; 2)"));
    }
}
