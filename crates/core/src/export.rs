//! Lesson export.

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use std::path::PathBuf;
use std::sync::LazyLock;
use tracing::info;

static CURSOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<span class="blinking-cursor"[^>]*></span>"#).unwrap());
static BUTTON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<button\b[^>]*>.*?</button>").unwrap());

/// Turns a rendered HTML fragment into a portable document.
#[async_trait]
pub trait DocumentExporter: Send + Sync {
    /// Returns where the document was written.
    async fn export_document(
        &self,
        html_fragment: &str,
        suggested_file_name: &str,
    ) -> Result<PathBuf>;
}

/// Removes streaming cursors and buttons from lesson markup before export.
pub fn strip_interactive_chrome(markup: &str) -> String {
    let html = CURSOR.replace_all(markup, "");
    BUTTON.replace_all(&html, "").into_owned()
}

/// Keeps a file name to a single path component.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim().trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        "lesson.html".to_string()
    } else {
        cleaned
    }
}

/// Writes a standalone, print-ready HTML document into a directory.
pub struct HtmlDocumentExporter {
    dir: PathBuf,
}

impl HtmlDocumentExporter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl DocumentExporter for HtmlDocumentExporter {
    async fn export_document(
        &self,
        html_fragment: &str,
        suggested_file_name: &str,
    ) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create export directory {:?}", self.dir))?;

        let file_name = sanitize_file_name(suggested_file_name);
        let title = file_name.trim_end_matches(".html");
        let document = format!(
            concat!(
                "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n",
                "<title>{title}</title>\n",
                "<style>@page {{ size: A4; margin: 10mm; }} ",
                "body {{ font-family: sans-serif; max-width: 190mm; margin: auto; }}</style>\n",
                "</head>\n<body>\n{body}\n</body>\n</html>\n"
            ),
            title = title,
            body = html_fragment,
        );

        let path = self.dir.join(&file_name);
        tokio::fs::write(&path, document)
            .await
            .with_context(|| format!("Failed to write {:?}", path))?;
        info!(path = %path.display(), "Lesson exported");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_interactive_chrome() {
        let markup = concat!(
            r#"<div class="page-content pt-12"><h2>Intro</h2></div>"#,
            r#"<span class="blinking-cursor"></span>"#,
            r#"<button id="download-pdf-btn">Download<br>PDF</button>"#
        );
        assert_eq!(
            strip_interactive_chrome(markup),
            r#"<div class="page-content pt-12"><h2>Intro</h2></div>"#
        );
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("Ownership.html"), "Ownership.html");
        assert_eq!(sanitize_file_name("I/O: Files?.html"), "I_O_ Files_.html");
        assert_eq!(sanitize_file_name("../secret"), "_secret");
        assert_eq!(sanitize_file_name("  "), "lesson.html");
    }

    #[tokio::test]
    async fn test_html_exporter_writes_document() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = HtmlDocumentExporter::new(dir.path().join("out"));

        let path = exporter
            .export_document("<h2>Intro</h2>", "Ownership.html")
            .await
            .unwrap();

        assert_eq!(path, dir.path().join("out").join("Ownership.html"));
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("<!DOCTYPE html>"));
        assert!(written.contains("<title>Ownership</title>"));
        assert!(written.contains("<h2>Intro</h2>"));
    }
}
