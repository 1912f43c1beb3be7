use crate::error::ConfigError;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use std::time::Duration;

pub const DEFAULT_TOP_K: usize = 4;
pub const DEFAULT_MAX_CONTEXT_CHARS: usize = 3_800;
/// Squared-L2 cut-off measured for the local word-trigram embedder: on-topic
/// questions land at or below about 1.38, off-topic ones at 1.44 or more.
/// Its vectors are non-negative and unit length, so distances stay in `[0, 2]`.
/// Recalibrate when swapping the embedder.
pub const DEFAULT_RELEVANCE_THRESHOLD: f32 = 1.4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QaConfig {
    pub top_k: usize,
    pub max_context_chars: usize,
    /// Best-hit distance above which generation is skipped. `None` disables the gate.
    pub relevance_threshold: Option<f32>,
    pub retry: RetryPolicy,
}

impl Default for QaConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            max_context_chars: DEFAULT_MAX_CONTEXT_CHARS,
            relevance_threshold: Some(DEFAULT_RELEVANCE_THRESHOLD),
            retry: RetryPolicy::default(),
        }
    }
}

impl QaConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.top_k == 0 {
            return Err(ConfigError::Invalid {
                field: "top_k",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.max_context_chars == 0 {
            return Err(ConfigError::Invalid {
                field: "max_context_chars",
                reason: "must be greater than zero".to_string(),
            });
        }
        if let Some(threshold) = self.relevance_threshold {
            if !threshold.is_finite() || threshold < 0.0 {
                return Err(ConfigError::Invalid {
                    field: "relevance_threshold",
                    reason: format!("{threshold} is not a finite, non-negative distance"),
                });
            }
        }
        self.retry.validate()
    }
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub base_url: String,
    pub model: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub request_timeout: Duration,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.groq.com/openai/v1".to_string(),
            model: "llama-3.3-70b-versatile".to_string(),
            api_key: None,
            temperature: 0.2,
            max_tokens: 400,
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub model: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub dimensions: usize,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub request_timeout: Duration,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "text-embedding-3-small".to_string(),
            api_key: None,
            dimensions: 384,
            request_timeout: Duration::from_secs(30),
        }
    }
}
