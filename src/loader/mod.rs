//! Document Loader
//!
//! Reads every supported file in a directory and turns it into [`TextUnit`]s
//! carrying provenance. Per-file failures are collected in the
//! [`LoadReport`] and never abort the batch.


pub mod extractor;
pub mod pdf;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::errors::PipelineError;

/// Length of the identifiers assigned to stored documents
pub const DOCUMENT_ID_LEN: usize = 8;

/// Supported source document formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Pdf,
    Html,
    Text,
    Markdown,
}

impl DocumentKind {
    /// Recognize a file extension, ignoring ASCII case
    #[inline]
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "html" | "htm" => Some(Self::Html),
            "txt" => Some(Self::Text),
            "md" | "markdown" => Some(Self::Markdown),
            _ => None,
        }
    }

    #[inline]
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }

    /// Canonical extension used when staging documents
    #[inline]
    pub fn extension(&self) -> &'static str {
        match *self {
            Self::Pdf => "pdf",
            Self::Html => "html",
            Self::Text => "txt",
            Self::Markdown => "md",
        }
    }
}

impl std::fmt::Display for DocumentKind {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.extension())
    }
}

/// Where a piece of text came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    /// File name inside the loaded directory
    pub source: String,
    /// Stored document id, when the file name carries one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    /// 1-based page number for paged formats
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl Provenance {
    #[inline]
    pub fn for_file(path: &Path) -> Self {
        Self {
            source: path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            document_id: document_id_from_path(path),
            page: None,
            title: None,
        }
    }
}

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.source)?;
        if let Some(page) = self.page {
            write!(f, " (page {page})")?;
        }
        Ok(())
    }
}

/// A contiguous piece of extracted text with its provenance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextUnit {
    pub text: String,
    pub provenance: Provenance,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadFailure {
    pub path: PathBuf,
    pub message: String,
}

/// Everything the loader found in one directory
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub units: Vec<TextUnit>,
    pub failures: Vec<LoadFailure>,
    /// Entries ignored because of their type or extension
    pub skipped: Vec<PathBuf>,
    /// Number of recognized files that were attempted
    pub files_seen: usize,
}

impl LoadReport {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

/// Whether `value` has the shape of a stored document id
#[inline]
pub fn is_document_id(value: &str) -> bool {
    value.len() == DOCUMENT_ID_LEN
        && value
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
}

fn document_id_from_path(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| is_document_id(stem))
        .map(str::to_string)
}

/// Load all supported documents from `dir`
///
/// Files are visited in lexical file-name order. Unsupported extensions and
/// subdirectories land in [`LoadReport::skipped`]; unreadable or malformed
/// files land in [`LoadReport::failures`].
#[inline]
pub fn load_documents(dir: &Path) -> Result<LoadReport, PipelineError> {
    let entries = fs::read_dir(dir).map_err(|source| PipelineError::DirectoryUnreadable {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| PipelineError::DirectoryUnreadable {
            path: dir.to_path_buf(),
            source,
        })?;
        paths.push(entry.path());
    }
    paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    let mut report = LoadReport::default();
    for path in paths {
        if !path.is_file() {
            report.skipped.push(path);
            continue;
        }

        let Some(kind) = DocumentKind::from_path(&path) else {
            debug!("Skipping unsupported file: {}", path.display());
            report.skipped.push(path);
            continue;
        };

        report.files_seen += 1;
        match load_file(&path, kind) {
            Ok(units) => {
                debug!("Loaded {} text units from {}", units.len(), path.display());
                report.units.extend(units);
            }
            Err(e) => {
                warn!("Failed to load {}: {:#}", path.display(), e);
                report.failures.push(LoadFailure {
                    path,
                    message: format!("{e:#}"),
                });
            }
        }
    }

    info!(
        "Loaded {} text units from {} files in {} ({} failed, {} skipped)",
        report.units.len(),
        report.files_seen,
        dir.display(),
        report.failures.len(),
        report.skipped.len()
    );

    Ok(report)
}

/// Extract the non-blank text units of a single file
#[inline]
pub fn load_file(path: &Path, kind: DocumentKind) -> Result<Vec<TextUnit>> {
    let provenance = Provenance::for_file(path);

    let units = match kind {
        DocumentKind::Pdf => pdf::extract_pages(path)?
            .into_iter()
            .map(|page| TextUnit {
                text: page.text,
                provenance: Provenance {
                    page: Some(page.page_number),
                    ..provenance.clone()
                },
            })
            .collect(),
        DocumentKind::Html => {
            let html = read_utf8(path)?;
            let extracted = extractor::extract_html(&html)?;
            vec![TextUnit {
                text: extracted.text,
                provenance: Provenance {
                    title: extracted.title,
                    ..provenance
                },
            }]
        }
        DocumentKind::Markdown => {
            let markdown = read_utf8(path)?;
            let extracted = extractor::extract_markdown(&markdown);
            vec![TextUnit {
                text: extracted.text,
                provenance: Provenance {
                    title: extracted.title,
                    ..provenance
                },
            }]
        }
        DocumentKind::Text => vec![TextUnit {
            text: read_utf8(path)?,
            provenance,
        }],
    };

    Ok(units
        .into_iter()
        .filter(|unit| !unit.text.trim().is_empty())
        .collect())
}

/// Read a file as strict UTF-8; invalid sequences are an error, not replaced
fn read_utf8(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let text = String::from_utf8(bytes).map_err(|e| {
        anyhow!(
            "{} is not valid UTF-8 (invalid byte at offset {})",
            path.display(),
            e.utf8_error().valid_up_to()
        )
    })?;

    Ok(match text.strip_prefix('\u{feff}') {
        Some(stripped) => stripped.to_string(),
        None => text,
    })
}
