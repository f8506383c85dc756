use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An answered question, kept for the account's chat history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Conversation {
    pub id: Uuid,
    pub account_id: Uuid,
    /// Child profile the question was about, when the client names one.
    pub baby_id: Option<Uuid>,
    pub question: String,
    pub answer: String,
    pub tokens_used: Option<i32>,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(
        account_id: Uuid,
        baby_id: Option<Uuid>,
        question: String,
        answer: String,
        tokens_used: Option<u32>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id,
            baby_id,
            question,
            answer,
            tokens_used: tokens_used.map(|t| i32::try_from(t).unwrap_or(i32::MAX)),
            created_at: Utc::now(),
        }
    }
}
