use crate::application::entitlement::{Decision, DenialReason, EntitlementError, EntitlementGate, Grant};
use crate::domain::{Account, ActionKind, Conversation};
use crate::infrastructure::{
    with_storage_timeout, CompletionClient, CompletionError, ConversationRepository,
    RepositoryError, UsageRepository,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

pub const MAX_QUESTION_CHARS: usize = 2000;
/// Upper bound for one page of conversation history.
pub const MAX_HISTORY_ENTRIES: i64 = 50;

#[derive(Error, Debug)]
pub enum QuestionError {
    #[error("Question must not be empty")]
    EmptyPrompt,
    #[error("Question exceeds {} characters", MAX_QUESTION_CHARS)]
    PromptTooLong,
    #[error(transparent)]
    Entitlement(#[from] EntitlementError),
    #[error("Completion failed: {0}")]
    Completion(#[from] CompletionError),
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub text: String,
    pub tokens_used: Option<u32>,
    pub grant: Grant,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QuestionOutcome {
    Answered(Answer),
    Denied(DenialReason),
}

/// Metered AI questions: one unit of question quota per attempt.
pub struct QuestionService<U, C, R>
where
    U: UsageRepository,
    C: CompletionClient,
    R: ConversationRepository,
{
    gate: Arc<EntitlementGate<U>>,
    completions: Arc<C>,
    conversations: Arc<R>,
    storage_timeout: Duration,
}

impl<U, C, R> QuestionService<U, C, R>
where
    U: UsageRepository,
    C: CompletionClient,
    R: ConversationRepository,
{
    pub fn new(
        gate: Arc<EntitlementGate<U>>,
        completions: Arc<C>,
        conversations: Arc<R>,
        storage_timeout: Duration,
    ) -> Self {
        Self {
            gate,
            completions,
            conversations,
            storage_timeout,
        }
    }

    pub async fn ask(
        &self,
        account: &Account,
        question: &str,
        baby_id: Option<Uuid>,
    ) -> Result<QuestionOutcome, QuestionError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(QuestionError::EmptyPrompt);
        }
        if question.chars().count() > MAX_QUESTION_CHARS {
            return Err(QuestionError::PromptTooLong);
        }

        let grant = match self
            .gate
            .authorize(account, ActionKind::Question, Utc::now())
            .await?
        {
            Decision::Granted(grant) => grant,
            Decision::Denied(reason) => return Ok(QuestionOutcome::Denied(reason)),
        };

        // The unit stays consumed when the completion fails.
        let completion = self.completions.complete(question).await.map_err(|e| {
            warn!(
                account_id = %account.id,
                used = grant.used,
                "Completion failed after quota was consumed: {}",
                e
            );
            e
        })?;

        info!(
            account_id = %account.id,
            remaining = grant.remaining,
            tokens = completion.tokens_used.unwrap_or(0),
            "Question answered"
        );

        // Best effort: the answer is returned even when the log write fails.
        let conversation = Conversation::new(
            account.id,
            baby_id,
            question.to_string(),
            completion.text.clone(),
            completion.tokens_used,
        );
        if let Err(e) =
            with_storage_timeout(self.storage_timeout, self.conversations.record(&conversation))
                .await
        {
            warn!(account_id = %account.id, "Failed to save conversation: {}", e);
        }

        Ok(QuestionOutcome::Answered(Answer {
            text: completion.text,
            tokens_used: completion.tokens_used,
            grant,
        }))
    }

    /// Most recent answered questions, newest first.
    pub async fn history(
        &self,
        account: &Account,
        limit: i64,
    ) -> Result<Vec<Conversation>, QuestionError> {
        let limit = limit.clamp(1, MAX_HISTORY_ENTRIES);
        Ok(with_storage_timeout(
            self.storage_timeout,
            self.conversations.recent(account.id, limit),
        )
        .await?)
    }
}
