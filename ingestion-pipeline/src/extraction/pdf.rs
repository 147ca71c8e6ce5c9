use bytes::Bytes;
use lopdf::Document;
use tracing::debug;

use common::error::AppError;

use super::{clean_text, PageText};

pub const NO_TEXT_MESSAGE: &str = "no text found in PDF (possibly image-based or scanned document)";

/// Extracts the text layer of every page. Pages that fail to decode or carry no text are
/// skipped; a document with no usable page is a data integrity error.
pub async fn extract_pages(bytes: Bytes) -> Result<Vec<PageText>, AppError> {
    tokio::task::spawn_blocking(move || extract_blocking(&bytes)).await?
}

fn extract_blocking(bytes: &[u8]) -> Result<Vec<PageText>, AppError> {
    let document = Document::load_mem(bytes)
        .map_err(|err| AppError::Validation(format!("failed to parse PDF: {err}")))?;

    let page_numbers: Vec<u32> = document.get_pages().keys().copied().collect();
    let mut pages = Vec::with_capacity(page_numbers.len());

    for page_number in page_numbers {
        match document.extract_text(&[page_number]) {
            Ok(raw) => {
                let text = clean_text(&raw);
                if text.is_empty() {
                    debug!(page_number, "Skipping PDF page without text");
                    continue;
                }
                pages.push(PageText { page_number, text });
            }
            Err(err) => {
                debug!(page_number, error = %err, "Skipping unreadable PDF page");
            }
        }
    }

    if pages.is_empty() {
        return Err(AppError::DataIntegrity(NO_TEXT_MESSAGE.into()));
    }

    Ok(pages)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use lopdf::{
        content::{Content, Operation},
        dictionary, Object, Stream,
    };

    /// Builds a PDF with one page per entry. `None` produces a page without a text layer.
    pub fn pdf_with_pages(pages: &[Option<&str>]) -> Vec<u8> {
        let mut doc = lopdf::Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids: Vec<Object> = Vec::new();
        for page in pages {
            let operations = match page {
                Some(text) => vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 12.into()]),
                    Operation::new("Td", vec![72.into(), 720.into()]),
                    Operation::new("Tj", vec![Object::string_literal(*text)]),
                    Operation::new("ET", vec![]),
                ],
                None => Vec::new(),
            };
            let content = Content { operations };
            let content_id = doc.add_object(Stream::new(
                dictionary! {},
                content.encode().expect("encode content"),
            ));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(page_id.into());
        }

        let count = i64::try_from(kids.len()).expect("page count");
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut buffer = Vec::new();
        doc.save_to(&mut buffer).expect("save pdf");
        buffer
    }
}
