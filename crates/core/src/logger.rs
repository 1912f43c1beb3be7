use crate::models::{Interaction, LoggedSource, SourceRef};
use chrono::Utc;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub const DEFAULT_LOG_FILE: &str = "interactions.json";

/// Writes are serialized through one mutex so concurrent answers never lose
/// each other's records in the read-modify-replace cycle.
#[derive(Debug)]
pub struct InteractionLogger {
    path: PathBuf,
    lock: Mutex<()>,
}

impl InteractionLogger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record one turn. Failures are reported through `tracing` only.
    pub async fn append(
        &self,
        question: &str,
        answer: &str,
        sources: &[SourceRef],
        confidence: Option<f32>,
    ) {
        let record = Interaction {
            timestamp: Utc::now(),
            question: question.to_string(),
            answer: answer.to_string(),
            sources: sources.iter().map(LoggedSource::from).collect(),
            confidence,
        };

        let _guard = self.lock.lock().await;
        let path = self.path.clone();
        let written = tokio::task::spawn_blocking(move || append_record(&path, record)).await;

        match written {
            Ok(Ok(count)) => debug!(path = %self.path.display(), records = count, "logged interaction"),
            Ok(Err(error)) => {
                warn!(path = %self.path.display(), %error, "failed to write interaction log")
            }
            Err(error) => {
                warn!(path = %self.path.display(), %error, "interaction log task failed")
            }
        }
    }

    /// Every record currently in the log; empty when absent or unreadable.
    pub async fn read_all(&self) -> Vec<Interaction> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || read_records(&path))
            .await
            .unwrap_or_default()
    }
}

fn read_records(path: &Path) -> Vec<Interaction> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(error) => {
            warn!(path = %path.display(), %error, "cannot read interaction log, starting fresh");
            return Vec::new();
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(records) => records,
        Err(error) => {
            warn!(path = %path.display(), %error, "interaction log is not a JSON array, starting fresh");
            Vec::new()
        }
    }
}

fn append_record(path: &Path, record: Interaction) -> std::io::Result<usize> {
    let mut records = read_records(path);
    records.push(record);

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;

    let mut staged = NamedTempFile::new_in(&dir)?;
    serde_json::to_writer_pretty(&mut staged, &records)?;
    staged.write_all(b"\n")?;
    staged.as_file().sync_all()?;
    staged.persist(path).map_err(|error| error.error)?;
    Ok(records.len())
}
