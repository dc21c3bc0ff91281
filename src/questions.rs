//! Question source for level initialisation.
//!
//! The question catalogue itself is managed elsewhere; the game only needs
//! a uniformly random pick from the active pool.

use crate::types::Question;
use async_trait::async_trait;
use rand::seq::IndexedRandom;
use std::path::Path;
use tokio::sync::RwLock;

#[derive(Debug, thiserror::Error)]
pub enum QuestionError {
    #[error("question pool is empty")]
    EmptyPool,

    #[error("failed to load questions: {0}")]
    Load(String),
}

#[async_trait]
pub trait QuestionSource: Send + Sync {
    async fn pick_random(&self) -> Result<Question, QuestionError>;

    fn name(&self) -> &str;
}

const BUILTIN_QUESTIONS: &[&str] = &[
    "How much do you like this food? (1 = hate it, 100 = could eat it every day)",
    "How scary is this animal?",
    "How useful is this item on a desert island?",
    "How famous is this person?",
    "How strong is this fictional character?",
    "How much would you pay for this at a flea market?",
    "How embarrassing is this situation?",
    "How popular is this hobby?",
    "How hard is this job?",
    "How relaxing is this holiday destination?",
    "How loud is this sound?",
    "How tasty is this ice cream flavour?",
];

/// In-memory pool of active questions
pub struct QuestionPool {
    questions: RwLock<Vec<Question>>,
}

impl QuestionPool {
    pub fn new(questions: Vec<Question>) -> Self {
        Self {
            questions: RwLock::new(questions),
        }
    }

    pub fn builtin() -> Self {
        Self::new(
            BUILTIN_QUESTIONS
                .iter()
                .enumerate()
                .map(|(i, text)| Question {
                    id: format!("builtin-{}", i + 1),
                    text: text.to_string(),
                })
                .collect(),
        )
    }

    /// Load a JSON array of `{ "id": ..., "text": ... }`
    pub async fn from_file(path: &Path) -> Result<Self, QuestionError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| QuestionError::Load(format!("{}: {}", path.display(), e)))?;
        let questions: Vec<Question> = serde_json::from_slice(&bytes)
            .map_err(|e| QuestionError::Load(format!("{}: {}", path.display(), e)))?;
        if questions.is_empty() {
            return Err(QuestionError::EmptyPool);
        }
        Ok(Self::new(questions))
    }

    /// Use ITO_QUESTIONS_FILE when set, the built-in pool otherwise
    pub async fn from_env() -> Self {
        match std::env::var("ITO_QUESTIONS_FILE") {
            Ok(path) if !path.trim().is_empty() => match Self::from_file(Path::new(&path)).await {
                Ok(pool) => {
                    let count = pool.len().await;
                    tracing::info!(path = %path, count, "Question pool loaded");
                    pool
                }
                Err(e) => {
                    tracing::warn!("{}. Falling back to built-in questions.", e);
                    Self::builtin()
                }
            },
            _ => Self::builtin(),
        }
    }

    pub async fn len(&self) -> usize {
        self.questions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.questions.read().await.is_empty()
    }
}

#[async_trait]
impl QuestionSource for QuestionPool {
    async fn pick_random(&self) -> Result<Question, QuestionError> {
        let questions = self.questions.read().await;
        questions
            .choose(&mut rand::rng())
            .cloned()
            .ok_or(QuestionError::EmptyPool)
    }

    fn name(&self) -> &str {
        "pool"
    }
}
