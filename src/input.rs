//! Input resolution: normalise a user-supplied path or URL to a [`Document`].
//!
//! The core consumes plain UTF-8 text regardless of where the document came
//! from. Local files are validated for existence, readability, and UTF-8;
//! URL bodies are fetched straight into memory. Formats that need decoding
//! (DOCX, PDF) are recognised by extension and rejected with a pointed error -
//! extracting their text is a collaborator's job, and pretending a zip
//! container is text only produces garbage units.

use crate::error::PipelineError;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// The full input text plus where it came from. Immutable once read.
#[derive(Debug, Clone)]
pub struct Document {
    /// Raw document text, exactly as read (sanitisation happens in the
    /// chunker, not here).
    pub text: String,
    /// Source format tag, derived from the extension or URL.
    pub format: SourceFormat,
}

impl Document {
    /// Wrap already-extracted text, e.g. output of a format-specific reader.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            format: SourceFormat::PlainText,
        }
    }

    /// Number of whitespace-separated words.
    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}

/// Where the document text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    PlainText,
    Markdown,
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve `input` (local path or HTTP/HTTPS URL) to a [`Document`].
pub async fn read_document(input: &str, timeout_secs: u64) -> Result<Document, PipelineError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        read_local(input).await
    }
}

/// Read a local text file, validating existence, permission, and encoding.
async fn read_local(path_str: &str) -> Result<Document, PipelineError> {
    let path = PathBuf::from(path_str);

    if !path.exists() {
        return Err(PipelineError::FileNotFound { path });
    }
    if let Some(ext) = binary_extension(&path) {
        return Err(PipelineError::UnsupportedFormat { path, ext });
    }

    let text = match tokio::fs::read_to_string(&path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(PipelineError::PermissionDenied { path });
        }
        Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
            return Err(PipelineError::NotText { path });
        }
        Err(_) => {
            return Err(PipelineError::FileNotFound { path });
        }
    };

    debug!("Read {} bytes from '{}'", text.len(), path.display());
    Ok(Document {
        text,
        format: format_tag(&path),
    })
}

/// Download a URL and return its body as a document.
async fn download_url(url: &str, timeout_secs: u64) -> Result<Document, PipelineError> {
    info!("Downloading document from: {url}");

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| PipelineError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            PipelineError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            PipelineError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(PipelineError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let format = url_format_tag(url);
    let text = response
        .text()
        .await
        .map_err(|e| PipelineError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    info!("Downloaded {} bytes", text.len());
    Ok(Document { text, format })
}

/// Extensions the crate knows it must not read as text.
fn binary_extension(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_string_lossy().to_lowercase();
    matches!(ext.as_str(), "docx" | "doc" | "pdf" | "odt" | "rtf").then_some(ext)
}

fn format_tag(path: &Path) -> SourceFormat {
    match path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .as_deref()
    {
        Some("md") | Some("markdown") => SourceFormat::Markdown,
        _ => SourceFormat::PlainText,
    }
}

fn url_format_tag(url: &str) -> SourceFormat {
    if url.trim_end_matches('/').ends_with(".md") {
        SourceFormat::Markdown
    } else {
        SourceFormat::PlainText
    }
}
