use crate::error::Result;
use scraper::Html;
use std::fs;
use std::path::Path;

/// How plain text is obtained from a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Read as-is.
    Text,
    /// XML or HTML with tags removed; `script` and `style` bodies are dropped.
    MarkupStripped,
    /// Binary document decoded by a dedicated backend (PDF).
    Extracted,
}

impl Format {
    pub fn detect(path: &Path) -> Option<Format> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "txt" | "md" => Some(Format::Text),
            "xml" | "xhtml" | "html" | "htm" => Some(Format::MarkupStripped),
            "pdf" => Some(Format::Extracted),
            _ => None,
        }
    }
}

/// Turns a file into the plain text the index is built from.
pub trait Extractor: Send + Sync {
    /// Whether `path` has a format this extractor understands.
    fn supports(&self, path: &Path) -> bool;

    /// Plain text of `path`. Unsupported files yield empty text.
    fn extract(&self, path: &Path) -> Result<String>;
}

/// Extractor dispatching on file extension.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileExtractor;

impl Extractor for FileExtractor {
    fn supports(&self, path: &Path) -> bool {
        match Format::detect(path) {
            Some(Format::Extracted) => cfg!(feature = "pdf"),
            Some(_) => true,
            None => false,
        }
    }

    fn extract(&self, path: &Path) -> Result<String> {
        match Format::detect(path) {
            Some(Format::Text) => Ok(String::from_utf8_lossy(&fs::read(path)?).into_owned()),
            Some(Format::MarkupStripped) => {
                let raw = String::from_utf8_lossy(&fs::read(path)?).into_owned();
                Ok(strip_markup(&raw))
            }
            Some(Format::Extracted) => extract_pdf(path),
            None => {
                tracing::info!(path = %path.display(), "unsupported file type, ignored");
                Ok(String::new())
            }
        }
    }
}

/// Text nodes of a markup document, one per line, skipping `script` and `style`.
pub fn strip_markup(raw: &str) -> String {
    let doc = Html::parse_document(raw);
    let mut out = String::new();
    for node in doc.root_element().descendants() {
        let Some(text) = node.value().as_text() else { continue };
        let hidden = node.ancestors().any(|a| {
            a.value().as_element().is_some_and(|e| matches!(e.name(), "script" | "style"))
        });
        let text = text.trim();
        if hidden || text.is_empty() {
            continue;
        }
        out.push_str(text);
        out.push('\n');
    }
    out
}

#[cfg(feature = "pdf")]
fn extract_pdf(path: &Path) -> Result<String> {
    pdf_extract::extract_text(path).map_err(|e| crate::error::Error::Extract {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

#[cfg(not(feature = "pdf"))]
fn extract_pdf(path: &Path) -> Result<String> {
    tracing::info!(path = %path.display(), "built without pdf support, ignored");
    Ok(String::new())
}
