use crate::embeddings::Embedder;
use crate::error::{EmbeddingError, GenerationError};
use crate::generation::{GenerationRequest, GenerationService};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

/// One axis per keyword plus a final "unknown" axis for texts that mention
/// none of them. Matching texts sit at distance 0; disjoint ones at 2.0.
pub struct KeywordEmbedder {
    keywords: Vec<String>,
}

impl KeywordEmbedder {
    pub fn new(keywords: &[&str]) -> Self {
        Self {
            keywords: keywords.iter().map(|word| word.to_lowercase()).collect(),
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let lowered = text.to_lowercase();
        let mut vector = vec![0f32; self.keywords.len() + 1];
        for (axis, keyword) in self.keywords.iter().enumerate() {
            if lowered.contains(keyword.as_str()) {
                vector[axis] = 1.0;
            }
        }
        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude == 0.0 {
            vector[self.keywords.len()] = 1.0;
        } else {
            vector.iter_mut().for_each(|value| *value /= magnitude);
        }
        vector
    }
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn model_id(&self) -> String {
        format!("keywords:{}", self.keywords.join(","))
    }

    fn dimensions(&self) -> usize {
        self.keywords.len() + 1
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|text| self.embed_one(text)).collect())
    }
}

/// Exact text to vector lookup, for tests that need precise distances.
pub struct MapEmbedder {
    vectors: HashMap<String, Vec<f32>>,
    fallback: Vec<f32>,
}

impl MapEmbedder {
    pub fn new(entries: &[(&str, Vec<f32>)], fallback: Vec<f32>) -> Self {
        Self {
            vectors: entries
                .iter()
                .map(|(text, vector)| (text.to_string(), vector.clone()))
                .collect(),
            fallback,
        }
    }
}

#[async_trait]
impl Embedder for MapEmbedder {
    fn model_id(&self) -> String {
        "map".to_string()
    }

    fn dimensions(&self) -> usize {
        self.fallback.len()
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts
            .iter()
            .map(|text| self.vectors.get(text).unwrap_or(&self.fallback).clone())
            .collect())
    }
}

/// Embeds like [`KeywordEmbedder`] until `start_failing` is called, then
/// every call is a backend error.
pub struct FlakyEmbedder {
    inner: KeywordEmbedder,
    failing: AtomicBool,
}

impl FlakyEmbedder {
    pub fn new(keywords: &[&str]) -> Self {
        Self {
            inner: KeywordEmbedder::new(keywords),
            failing: AtomicBool::new(false),
        }
    }

    pub fn start_failing(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Embedder for FlakyEmbedder {
    fn model_id(&self) -> String {
        self.inner.model_id()
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(EmbeddingError::BackendResponse {
                backend: "flaky".to_string(),
                details: "503 Service Unavailable".to_string(),
            });
        }
        self.inner.embed(texts).await
    }
}

/// Returns rows of differing widths.
pub struct RaggedEmbedder;

#[async_trait]
impl Embedder for RaggedEmbedder {
    fn model_id(&self) -> String {
        "ragged".to_string()
    }

    fn dimensions(&self) -> usize {
        2
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts
            .iter()
            .enumerate()
            .map(|(row, _)| vec![1.0; row + 1])
            .collect())
    }
}

/// Plays back scripted outcomes, then repeats `fallback`. Counts calls and
/// records the last request.
pub struct ScriptedGenerator {
    script: Mutex<VecDeque<Result<String, GenerationError>>>,
    fallback: fn() -> Result<String, GenerationError>,
    calls: AtomicU32,
    last_request: Mutex<Option<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new(
        script: Vec<Result<String, GenerationError>>,
        fallback: fn() -> Result<String, GenerationError>,
    ) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            calls: AtomicU32::new(0),
            last_request: Mutex::new(None),
        }
    }

    pub fn answering(text: &'static str) -> Self {
        Self::new(vec![Ok(text.to_string())], connection_refused)
    }

    pub fn always_failing() -> Self {
        Self::new(Vec::new(), connection_refused)
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<GenerationRequest> {
        self.last_request.lock().ok().and_then(|guard| guard.clone())
    }
}

pub fn connection_refused() -> Result<String, GenerationError> {
    Err(GenerationError::Connection {
        service: "scripted".to_string(),
        details: "connection refused".to_string(),
    })
}

#[async_trait]
impl GenerationService for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_request.lock() {
            *last = Some(request.clone());
        }
        let next = self
            .script
            .lock()
            .ok()
            .and_then(|mut script| script.pop_front());
        next.unwrap_or_else(self.fallback)
    }
}
