use crate::error::IngestError;
use crate::models::PageImage;
use base64::{engine::general_purpose::STANDARD, Engine};
use lopdf::{Dictionary, Document, Object, ObjectId};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

/// Text and image payloads of one 1-based page.
#[derive(Debug, Clone)]
pub struct PageText {
    pub number: u32,
    pub text: String,
    pub images: Vec<PageImage>,
}

#[derive(Debug, Clone, Serialize)]
struct LlmOcrRequest {
    pdf_base64: String,
    source_path: String,
}

#[derive(Debug, Clone, Deserialize)]
struct LlmOcrResponse {
    pages: Option<Vec<LlmOcrPage>>,
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct LlmOcrPage {
    #[serde(default)]
    page: Option<u32>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OcrEndpointConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
}

pub trait PdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError>;
}

#[derive(Default)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
        let document = Document::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, page_id) in document.get_pages() {
            let text = match document.extract_text(&[page_no]) {
                Ok(text) => text,
                Err(error) => {
                    debug!(page = page_no, %error, "page has no decodable text layer");
                    String::new()
                }
            };
            let images = page_images(&document, page_no, page_id);

            if !text.trim().is_empty() || !images.is_empty() {
                pages.push(PageText {
                    number: page_no,
                    text,
                    images,
                });
            }
        }

        if pages.is_empty() {
            return Err(IngestError::PdfParse(format!(
                "pdf had no readable page text or images: {}",
                path.display()
            )));
        }

        Ok(pages)
    }
}

const MAX_PARENT_DEPTH: usize = 32;

fn resolve<'a>(document: &'a Document, object: &'a Object) -> Option<&'a Object> {
    match object {
        Object::Reference(id) => document.get_object(*id).ok(),
        other => Some(other),
    }
}

fn resolve_dict<'a>(document: &'a Document, object: &'a Object) -> Option<&'a Dictionary> {
    match resolve(document, object)? {
        Object::Dictionary(dictionary) => Some(dictionary),
        _ => None,
    }
}

/// Resources may be inherited from an ancestor page-tree node.
fn page_resources(document: &Document, page_id: ObjectId) -> Option<&Dictionary> {
    let mut node = document.get_dictionary(page_id).ok()?;
    for _ in 0..MAX_PARENT_DEPTH {
        if let Some(resources) = node
            .get(b"Resources")
            .ok()
            .and_then(|object| resolve_dict(document, object))
        {
            return Some(resources);
        }
        node = node
            .get(b"Parent")
            .ok()
            .and_then(|object| resolve_dict(document, object))?;
    }
    None
}

fn stream_filter(dictionary: &Dictionary) -> Option<String> {
    match dictionary.get(b"Filter").ok()? {
        Object::Name(name) => Some(String::from_utf8_lossy(name).into_owned()),
        Object::Array(filters) => filters.iter().rev().find_map(|filter| match filter {
            Object::Name(name) => Some(String::from_utf8_lossy(name).into_owned()),
            _ => None,
        }),
        _ => None,
    }
}

/// Image XObjects referenced directly by a page, as raw stream bytes.
fn page_images(document: &Document, page_no: u32, page_id: ObjectId) -> Vec<PageImage> {
    let Some(xobjects) = page_resources(document, page_id)
        .and_then(|resources| resources.get(b"XObject").ok())
        .and_then(|object| resolve_dict(document, object))
    else {
        return Vec::new();
    };

    xobjects
        .iter()
        .filter_map(|(_, object)| match resolve(document, object)? {
            Object::Stream(stream) => Some(stream),
            _ => None,
        })
        .filter(|stream| {
            matches!(stream.dict.get(b"Subtype"), Ok(Object::Name(name)) if name.as_slice() == b"Image")
        })
        .map(|stream| PageImage {
            page: page_no,
            filter: stream_filter(&stream.dict),
            data: stream.content.clone(),
        })
        .collect()
}

/// Extract with lopdf, falling back to the remote OCR endpoint (when
/// configured) for documents without a text layer.
///
/// Blocking: call from `spawn_blocking` when inside an async runtime.
pub fn extract_page_texts(path: &Path) -> Result<Vec<PageText>, IngestError> {
    extract_document(path, OcrEndpointConfig::from_env().as_ref())
}

pub fn extract_document(
    path: &Path,
    ocr: Option<&OcrEndpointConfig>,
) -> Result<Vec<PageText>, IngestError> {
    let extracted = LopdfExtractor::default().extract_pages(path);

    match extracted {
        Ok(pages) if pages.iter().any(|page| !page.text.trim().is_empty()) => Ok(pages),
        Ok(image_pages) => match extract_with_llm_ocr(path, ocr) {
            Ok(Some(pages)) => Ok(attach_images(pages, image_pages)),
            Ok(None) => Ok(image_pages),
            Err(ocr_error) => {
                warn!(path = %path.display(), %ocr_error, "OCR fallback failed for image-only pdf");
                Ok(image_pages)
            }
        },
        Err(IngestError::PdfParse(parse_error)) => {
            warn!(path = %path.display(), %parse_error, "text extraction failed, trying OCR fallback");
            match extract_with_llm_ocr(path, ocr) {
                Ok(Some(pages)) => Ok(pages),
                Ok(None) => Err(IngestError::PdfParse(parse_error)),
                Err(ocr_error) => Err(IngestError::PdfParse(format!(
                    "{parse_error}; multimodal OCR fallback failed: {ocr_error}"
                ))),
            }
        }
        Err(error) => Err(error),
    }
}

/// Carry page images over to OCR'd pages with the same number.
fn attach_images(mut pages: Vec<PageText>, image_pages: Vec<PageText>) -> Vec<PageText> {
    for image_page in image_pages {
        match pages.iter_mut().find(|page| page.number == image_page.number) {
            Some(page) => page.images.extend(image_page.images),
            None => pages.push(image_page),
        }
    }
    pages.sort_by_key(|page| page.number);
    pages
}

impl OcrEndpointConfig {
    /// Read `LLM_OCR_ENDPOINT` / `LLM_OCR_API_KEY`; `None` when no endpoint is set.
    pub fn from_env() -> Option<Self> {
        let endpoint = non_blank(std::env::var("LLM_OCR_ENDPOINT").ok())?;
        let api_key = non_blank(std::env::var("LLM_OCR_API_KEY").ok());
        Some(Self { endpoint, api_key })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn extract_with_llm_ocr(
    path: &Path,
    ocr: Option<&OcrEndpointConfig>,
) -> Result<Option<Vec<PageText>>, IngestError> {
    let Some(cfg) = ocr else {
        return Ok(None);
    };

    let pdf = std::fs::read(path).map_err(IngestError::Io)?;
    let payload = LlmOcrRequest {
        pdf_base64: STANDARD.encode(pdf),
        source_path: path.to_string_lossy().to_string(),
    };

    let mut request = Client::new()
        .post(&cfg.endpoint)
        .header("content-type", "application/json")
        .json(&payload);

    if let Some(api_key) = &cfg.api_key {
        request = request.bearer_auth(api_key);
    }

    let response = request.send()?;

    if !response.status().is_success() {
        return Err(IngestError::OcrFailed(format!(
            "multimodal OCR request to {} returned {}",
            cfg.endpoint,
            response.status()
        )));
    }

    let payload: LlmOcrResponse = response.json()?;
    let pages = payload_to_pages(&payload, path)?;

    if pages.is_empty() {
        return Err(IngestError::OcrFailed(format!(
            "multimodal OCR response has no readable text: {}",
            path.display()
        )));
    }

    Ok(Some(pages))
}

fn payload_to_pages(payload: &LlmOcrResponse, path: &Path) -> Result<Vec<PageText>, IngestError> {
    if let Some(listed) = &payload.pages {
        let listed = listed
            .iter()
            .filter_map(|page| {
                let text = page.text.as_ref().map(|value| value.trim().to_string());
                text.and_then(|normalized| {
                    if normalized.is_empty() {
                        None
                    } else {
                        let page_number = page.page.unwrap_or(1).max(1);
                        Some(PageText {
                            number: page_number,
                            text: normalized,
                            images: Vec::new(),
                        })
                    }
                })
            })
            .collect::<Vec<_>>();

        if !listed.is_empty() {
            return Ok(listed);
        }
    }

    if let Some(raw_text) = &payload.text {
        let pages = raw_text
            .split('\u{000c}')
            .enumerate()
            .filter_map(|(index, chunk)| {
                let normalized = chunk.trim().to_string();
                if normalized.is_empty() {
                    None
                } else {
                    Some(PageText {
                        number: (index + 1) as u32,
                        text: normalized,
                        images: Vec::new(),
                    })
                }
            })
            .collect::<Vec<_>>();

        if !pages.is_empty() {
            return Ok(pages);
        }
    }

    Err(IngestError::OcrFailed(format!(
        "multimodal OCR response was empty for {}",
        path.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::{attach_images, payload_to_pages, LlmOcrPage, LlmOcrResponse, PageText};
    use crate::models::PageImage;
    use std::path::Path;

    #[test]
    fn ocr_pages_keep_images_from_the_scan() {
        let ocr = vec![PageText {
            number: 1,
            text: "Scanned invoice".to_string(),
            images: Vec::new(),
        }];
        let scanned = vec![
            PageText {
                number: 1,
                text: String::new(),
                images: vec![PageImage {
                    page: 1,
                    filter: Some("DCTDecode".to_string()),
                    data: vec![1, 2, 3],
                }],
            },
            PageText {
                number: 2,
                text: String::new(),
                images: vec![PageImage {
                    page: 2,
                    filter: None,
                    data: vec![4],
                }],
            },
        ];

        let merged = attach_images(ocr, scanned);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].text, "Scanned invoice");
        assert_eq!(merged[0].images.len(), 1);
        assert_eq!(merged[1].number, 2);
    }

    #[test]
    fn ocr_payload_with_pages_converts_only_nonempty_text() {
        let response = LlmOcrResponse {
            pages: Some(vec![
                LlmOcrPage {
                    page: Some(2),
                    text: Some("  ".to_string()),
                },
                LlmOcrPage {
                    page: Some(3),
                    text: Some("Page 3".to_string()),
                },
            ]),
            text: None,
        };

        let pages = payload_to_pages(&response, Path::new("x.pdf"))
            .expect("multimodal response should be parsed");

        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].number, 3);
        assert_eq!(pages[0].text, "Page 3");
    }

    #[test]
    fn ocr_payload_fallback_text_split_by_form_feed() {
        let response = LlmOcrResponse {
            pages: None,
            text: Some("First\u{000C}Second\n".to_string()),
        };

        let pages = payload_to_pages(&response, Path::new("x.pdf"))
            .expect("multimodal response should be parsed");

        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].number, 1);
        assert_eq!(pages[0].text, "First");
        assert_eq!(pages[1].number, 2);
        assert_eq!(pages[1].text, "Second");
    }
}
