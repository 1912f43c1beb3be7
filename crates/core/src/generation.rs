use crate::config::GenerationConfig;
use crate::error::GenerationError;
use crate::models::PageImage;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::Client;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use url::Url;

/// Prompt plus optional page images for vision-capable models.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub images: Vec<PageImage>,
}

impl GenerationRequest {
    pub fn text(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            images: Vec::new(),
        }
    }
}

/// Finite, non-restartable sequence of completion fragments.
pub type FragmentStream = mpsc::Receiver<Result<String, GenerationError>>;

#[async_trait]
pub trait GenerationService: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError>;

    /// Services without native streaming deliver the whole completion as one fragment.
    async fn stream(&self, request: &GenerationRequest) -> Result<FragmentStream, GenerationError> {
        let text = self.generate(request).await?;
        let (sender, receiver) = mpsc::channel(1);
        // capacity 1 and a live receiver: this send cannot fail
        let _ = sender.send(Ok(text)).await;
        Ok(receiver)
    }
}

/// Client for OpenAI-compatible `/chat/completions` endpoints (Groq by default).
pub struct ChatCompletionsClient {
    config: GenerationConfig,
    endpoint: Url,
    client: Client,
}

impl ChatCompletionsClient {
    pub fn new(config: GenerationConfig) -> Result<Self, GenerationError> {
        let endpoint = completions_endpoint(&config.base_url)?;
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|error| GenerationError::from_reqwest("chat", error, config.request_timeout))?;
        Ok(Self {
            config,
            endpoint,
            client,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

fn completions_endpoint(base_url: &str) -> Result<Url, GenerationError> {
    let base = format!("{}/", base_url.trim_end_matches('/'));
    Ok(Url::parse(&base)?.join("chat/completions")?)
}

fn chat_body(config: &GenerationConfig, request: &GenerationRequest) -> Value {
    let vision_parts: Vec<Value> = request
        .images
        .iter()
        .filter_map(|image| {
            let mime = image.mime_type()?;
            Some(json!({
                "type": "image_url",
                "image_url": { "url": format!("data:{mime};base64,{}", STANDARD.encode(&image.data)) },
            }))
        })
        .collect();

    let content = if vision_parts.is_empty() {
        json!(request.prompt)
    } else {
        let mut parts = vec![json!({ "type": "text", "text": request.prompt })];
        parts.extend(vision_parts);
        Value::Array(parts)
    };

    json!({
        "model": config.model,
        "messages": [{ "role": "user", "content": content }],
        "temperature": config.temperature,
        "max_tokens": config.max_tokens,
        "stream": false,
    })
}

fn parse_completion(service: &str, payload: &Value) -> Result<String, GenerationError> {
    let content = payload
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .ok_or_else(|| GenerationError::Malformed {
            service: service.to_string(),
            details: "response has no choices[0].message.content".to_string(),
        })?;

    if content.trim().is_empty() {
        return Err(GenerationError::Empty {
            service: service.to_string(),
        });
    }
    Ok(content.trim().to_string())
}

#[async_trait]
impl GenerationService for ChatCompletionsClient {
    fn name(&self) -> &str {
        &self.config.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let timeout = self.config.request_timeout;
        let mut call = self
            .client
            .post(self.endpoint.clone())
            .header("content-type", "application/json")
            .json(&chat_body(&self.config, request));
        if let Some(api_key) = &self.config.api_key {
            call = call.bearer_auth(api_key);
        }

        let response = call
            .send()
            .await
            .map_err(|error| GenerationError::from_reqwest(self.name(), error, timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Status {
                service: self.name().to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|error| GenerationError::from_reqwest(self.name(), error, timeout))?;
        parse_completion(self.name(), &payload)
    }
}
