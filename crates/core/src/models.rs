use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentFingerprint {
    pub document_id: String,
    pub document_title: String,
    pub source_path: String,
    pub checksum: String,
    pub ingested_at: DateTime<Utc>,
}

/// An image XObject lifted from a PDF page. The bytes are the raw stream
/// content; `filter` names the PDF encoding (`DCTDecode` is a JPEG, etc.).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageImage {
    pub page: u32,
    pub filter: Option<String>,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

impl PageImage {
    /// MIME type for payloads a vision model can consume directly.
    pub fn mime_type(&self) -> Option<&'static str> {
        match self.filter.as_deref() {
            Some("DCTDecode") => Some("image/jpeg"),
            Some("JPXDecode") => Some("image/jp2"),
            _ => None,
        }
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// A contiguous span of one page's text. Immutable once built; its position in
/// the index metadata is the join key to its embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub page: u32,
    #[serde(default)]
    pub has_images: bool,
}

impl Chunk {
    pub fn new(text: impl Into<String>, page: u32) -> Self {
        Self {
            text: text.into(),
            page,
            has_images: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub page: u32,
    pub text: String,
    pub distance: f32,
    /// `1 / (1 + distance)`, so it falls in `(0, 1]` and orders like the distance.
    pub score: f32,
    pub has_images: bool,
}

/// A cited page in an answer. Only `page` and `distance` reach the interaction log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub page: u32,
    pub distance: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default)]
    pub has_images: bool,
}

/// Which exit of the answer pipeline produced an [`Answer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerRoute {
    EmptyQuestion,
    NoIndex,
    NoResults,
    Entity,
    BelowRelevance,
    Generated,
    GenerationFailed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub answer: String,
    pub sources: Vec<SourceRef>,
    pub confidence: f32,
    #[serde(default)]
    pub used_vision: bool,
    pub route: AnswerRoute,
}

impl Answer {
    pub(crate) fn canned(answer: &str, route: AnswerRoute) -> Self {
        Self {
            answer: answer.to_string(),
            sources: Vec::new(),
            confidence: 0.0,
            used_vision: false,
            route,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggedSource {
    pub page: u32,
    pub distance: f32,
}

impl From<&SourceRef> for LoggedSource {
    fn from(source: &SourceRef) -> Self {
        Self {
            page: source.page,
            distance: (source.distance * 10_000.0).round() / 10_000.0,
        }
    }
}

/// One question/answer turn in the append-only interaction log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub timestamp: DateTime<Utc>,
    pub question: String,
    pub answer: String,
    pub sources: Vec<LoggedSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}
