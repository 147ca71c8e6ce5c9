pub mod pdf;

use bytes::Bytes;
use common::error::AppError;

/// Text recovered from one page. Flat formats report a single page numbered 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    pub page_number: u32,
    pub text: String,
}

/// Dispatches on the media type. PDFs are read page by page, any `text/*` type is taken as
/// UTF-8 (lossy), everything else is rejected.
pub async fn extract_pages(bytes: Bytes, mime_type: &str) -> Result<Vec<PageText>, AppError> {
    let parsed: Option<mime::Mime> = mime_type.trim().parse().ok();

    match parsed {
        Some(m) if m.type_() == mime::APPLICATION && m.subtype() == mime::PDF => {
            pdf::extract_pages(bytes).await
        }
        Some(m) if m.type_() == mime::TEXT => Ok(flat_text(&bytes)),
        _ => Err(AppError::Validation(format!(
            "unsupported file type: {mime_type}"
        ))),
    }
}

fn flat_text(bytes: &[u8]) -> Vec<PageText> {
    let text = clean_text(&String::from_utf8_lossy(bytes));
    if text.is_empty() {
        return Vec::new();
    }
    vec![PageText {
        page_number: 1,
        text,
    }]
}

/// Collapses runs of three or more newlines to two and trims the result.
pub fn clean_text(text: &str) -> String {
    let mut cleaned = text.to_string();
    while cleaned.contains("\n\n\n") {
        cleaned = cleaned.replace("\n\n\n", "\n\n");
    }
    cleaned.trim().to_string()
}
