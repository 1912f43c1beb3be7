use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("no extractable content in {}", path.display())]
    NoContentExtracted { path: PathBuf },

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("multimodal OCR failed: {0}")]
    OcrFailed(String),

    #[error("index build failed: {0}")]
    Index(#[from] IndexError),
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("degenerate embedding matrix: {0}")]
    Degenerate(String),

    #[error("embedder returned {got} vectors for {expected} inputs")]
    CountMismatch { expected: usize, got: usize },
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("cannot build an index from zero chunks")]
    EmptyInput,

    #[error("no index found at {}", path.display())]
    IndexNotFound { path: PathBuf },

    #[error("corrupt index at {}: {reason}", path.display())]
    CorruptIndex { path: PathBuf, reason: String },

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("vector dimension {got} does not match index dimension {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("index was built with embedder `{indexed}` but queried with `{query}`")]
    ModelMismatch { indexed: String, query: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl IndexError {
    /// Errors that mean "there is no usable index here yet".
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            IndexError::IndexNotFound { .. }
                | IndexError::CorruptIndex { .. }
                | IndexError::ModelMismatch { .. }
                | IndexError::DimensionMismatch { .. }
        )
    }
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("connection to {service} failed: {details}")]
    Connection { service: String, details: String },

    #[error("{service} did not answer within {timeout_ms} ms")]
    Timeout { service: String, timeout_ms: u128 },

    #[error("{service} returned {status}: {body}")]
    Status {
        service: String,
        status: u16,
        body: String,
    },

    #[error("malformed response from {service}: {details}")]
    Malformed { service: String, details: String },

    #[error("{service} returned an empty completion")]
    Empty { service: String },

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
}

impl GenerationError {
    /// Connection failures, timeouts, throttling and server-side faults are worth
    /// another attempt. A well-formed client error never is.
    pub fn is_transient(&self) -> bool {
        match self {
            GenerationError::Connection { .. } | GenerationError::Timeout { .. } => true,
            GenerationError::Status { status, .. } => *status == 429 || *status >= 500,
            GenerationError::Malformed { .. }
            | GenerationError::Empty { .. }
            | GenerationError::Url(_) => false,
        }
    }

    pub(crate) fn from_reqwest(service: &str, error: reqwest::Error, timeout: Duration) -> Self {
        if error.is_timeout() {
            GenerationError::Timeout {
                service: service.to_string(),
                timeout_ms: timeout.as_millis(),
            }
        } else if error.is_decode() {
            GenerationError::Malformed {
                service: service.to_string(),
                details: error.to_string(),
            }
        } else {
            GenerationError::Connection {
                service: service.to_string(),
                details: error.to_string(),
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("unknown session {0}")]
    UnknownSession(uuid::Uuid),
}
