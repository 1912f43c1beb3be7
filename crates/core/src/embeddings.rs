use crate::config::EmbeddingConfig;
use crate::error::EmbeddingError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

const DEFAULT: usize = 256;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;

/// Batch text embedder. The same instance (same `model_id`) must be used to
/// build an index and to query it.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn model_id(&self) -> String;
    fn dimensions(&self) -> usize;
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// Check that `matrix` holds exactly `expected` non-empty rows of one width
/// and return that width.
pub fn matrix_dimensions(matrix: &[Vec<f32>], expected: usize) -> Result<usize, EmbeddingError> {
    if matrix.len() != expected {
        return Err(EmbeddingError::CountMismatch {
            expected,
            got: matrix.len(),
        });
    }

    let width = matrix.first().map(Vec::len).unwrap_or(0);
    if width == 0 {
        return Err(EmbeddingError::Degenerate(
            "embedding rows are empty".to_string(),
        ));
    }

    if let Some((row, vector)) = matrix
        .iter()
        .enumerate()
        .find(|(_, vector)| vector.len() != width)
    {
        return Err(EmbeddingError::Degenerate(format!(
            "row {row} has {} values, expected {width}",
            vector.len()
        )));
    }

    if matrix.iter().flatten().any(|value| !value.is_finite()) {
        return Err(EmbeddingError::Degenerate(
            "embedding contains non-finite values".to_string(),
        ));
    }

    Ok(width)
}

const WORD_WEIGHT: f32 = 2.0;

const STOPWORDS: &[&str] = &[
    "a", "about", "all", "an", "and", "any", "are", "as", "at", "be", "been", "being", "by",
    "can", "did", "do", "does", "for", "from", "has", "have", "how", "i", "in", "into", "is",
    "it", "its", "many", "may", "me", "most", "much", "my", "of", "on", "or", "our", "over",
    "per", "the", "their", "there", "these", "they", "this", "those", "to", "under", "up",
    "us", "was", "we", "what", "when", "where", "which", "who", "why", "will", "with",
    "within", "you", "your",
];

fn fnv1a(token: &str) -> u64 {
    let mut hash = 1469598103934665603u64;
    for byte in token.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(1099511628211);
    }
    hash
}

/// Deterministic local embedder: hashed trigrams of space-padded content
/// words plus a weighted whole-word feature, L2-normalised. Stopwords are
/// dropped unless a text has nothing else.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let words: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|word| !word.is_empty())
            .collect();
        let content: Vec<&str> = words
            .iter()
            .copied()
            .filter(|word| word.chars().count() > 1 && !STOPWORDS.contains(word))
            .collect();
        let words = if content.is_empty() { words } else { content };

        let buckets = vector.len() as u64;
        for word in words {
            let padded: Vec<char> = format!(" {word} ").chars().collect();
            for window in padded.windows(3) {
                let trigram = window.iter().collect::<String>();
                vector[(fnv1a(&trigram) % buckets) as usize] += 1.0;
            }
            vector[(fnv1a(word) % buckets) as usize] += WORD_WEIGHT;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn model_id(&self) -> String {
        format!("word-trigram-{}", self.dimensions.max(1))
    }

    fn dimensions(&self) -> usize {
        self.dimensions.max(1)
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|text| self.embed_one(text)).collect())
    }
}

/// Client for OpenAI-compatible `/embeddings` endpoints.
pub struct HttpEmbedder {
    config: EmbeddingConfig,
    client: Client,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    dimensions: usize,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

impl HttpEmbedder {
    pub fn new(config: EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self { config, client })
    }

    fn endpoint(&self) -> String {
        format!("{}/embeddings", self.config.base_url.trim_end_matches('/'))
    }
}

fn into_ordered_matrix(response: EmbeddingResponse) -> Vec<Vec<f32>> {
    let mut data = response.data;
    if data.iter().all(|datum| datum.index.is_some()) {
        data.sort_by_key(|datum| datum.index);
    }
    data.into_iter().map(|datum| datum.embedding).collect()
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn model_id(&self) -> String {
        format!("{}@{}", self.config.model, self.config.dimensions)
    }

    fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let payload = EmbeddingRequest {
            model: &self.config.model,
            input: texts,
            dimensions: self.config.dimensions,
        };

        let mut request = self
            .client
            .post(self.endpoint())
            .header("content-type", "application/json")
            .json(&payload);
        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::BackendResponse {
                backend: "embeddings".to_string(),
                details: format!("{status}: {body}"),
            });
        }

        let parsed: EmbeddingResponse = response.json().await?;
        Ok(into_ordered_matrix(parsed))
    }
}
