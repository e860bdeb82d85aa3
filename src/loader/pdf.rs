use anyhow::{Result, anyhow};
use pdf_oxide::converters::ConversionOptions;
use std::path::Path;
use tracing::debug;

use super::extractor::extract_markdown;

/// Text of one PDF page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfPageText {
    /// 1-based
    pub page_number: usize,
    pub text: String,
}

fn conversion_options() -> ConversionOptions {
    ConversionOptions {
        include_images: false,
        ..ConversionOptions::default()
    }
}

/// Extract the plain text of every page that has any
pub fn extract_pages(path: &Path) -> Result<Vec<PdfPageText>> {
    let path_str = path.to_string_lossy();
    let mut doc = pdf_oxide::PdfDocument::open(path_str.as_ref())
        .map_err(|e| anyhow!("Failed to open PDF {}: {}", path.display(), e))?;
    let page_count = doc
        .page_count()
        .map_err(|e| anyhow!("Failed to read page count of {}: {}", path.display(), e))?;
    let options = conversion_options();

    let mut pages = Vec::new();
    for page_index in 0..page_count {
        let markdown = doc
            .to_markdown(page_index, &options)
            .map_err(|e| anyhow!("Failed to extract page {}: {}", page_index + 1, e))?;
        let text = extract_markdown(&markdown).text;
        if !text.trim().is_empty() {
            pages.push(PdfPageText {
                page_number: page_index + 1,
                text,
            });
        }
    }

    debug!(
        "Extracted {} of {} pages from {}",
        pages.len(),
        page_count,
        path.display()
    );

    Ok(pages)
}
