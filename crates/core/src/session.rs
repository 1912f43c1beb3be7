use crate::error::SessionError;
use crate::models::Answer;
use crate::qa::QaEngine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub name: String,
    pub index_path: PathBuf,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, name: impl Into<String>, index_path: impl Into<PathBuf>) -> Uuid {
        let session = Session {
            id: Uuid::new_v4(),
            name: name.into(),
            index_path: index_path.into(),
            messages: Vec::new(),
            created_at: Utc::now(),
        };
        let id = session.id;
        self.sessions.write().await.insert(id, session);
        id
    }

    /// Snapshot of a session.
    pub async fn get(&self, id: Uuid) -> Option<Session> {
        self.sessions.read().await.get(&id).cloned()
    }

    pub async fn list(&self) -> Vec<Session> {
        let mut sessions: Vec<_> = self.sessions.read().await.values().cloned().collect();
        sessions.sort_by_key(|session| session.created_at);
        sessions
    }

    pub async fn remove(&self, id: Uuid) -> Option<Session> {
        self.sessions.write().await.remove(&id)
    }

    /// Point a session at a rebuilt index; its history is kept.
    pub async fn attach_index(&self, id: Uuid, index_path: &Path) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&id)
            .ok_or(SessionError::UnknownSession(id))?;
        session.index_path = index_path.to_path_buf();
        Ok(())
    }

    /// Answer `question` against the session's index and record both turns.
    /// The registry lock is not held while the engine runs.
    pub async fn ask(
        &self,
        engine: &QaEngine,
        id: Uuid,
        question: &str,
    ) -> Result<Answer, SessionError> {
        let index_path = self
            .sessions
            .read()
            .await
            .get(&id)
            .map(|session| session.index_path.clone())
            .ok_or(SessionError::UnknownSession(id))?;

        let asked_at = Utc::now();
        let answer = engine.answer(question, &index_path).await;

        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&id)
            .ok_or(SessionError::UnknownSession(id))?;
        session.messages.push(Message {
            role: Role::User,
            content: question.to_string(),
            at: asked_at,
        });
        session.messages.push(Message {
            role: Role::Assistant,
            content: answer.answer.clone(),
            at: Utc::now(),
        });
        Ok(answer)
    }
}
