use crate::domain::Conversation;
use crate::infrastructure::{ConversationRepository, RepositoryError};
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

pub struct PostgresConversationRepository {
    pool: PgPool,
}

impl PostgresConversationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConversationRepository for PostgresConversationRepository {
    async fn record(&self, conversation: &Conversation) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO conversations (id, account_id, baby_id, question, answer, tokens_used,
                                       created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(conversation.id)
        .bind(conversation.account_id)
        .bind(conversation.baby_id)
        .bind(&conversation.question)
        .bind(&conversation.answer)
        .bind(conversation.tokens_used)
        .bind(conversation.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn recent(
        &self,
        account_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Conversation>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, account_id, baby_id, question, answer, tokens_used, created_at
            FROM conversations
            WHERE account_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(account_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_conversation).collect()
    }
}

fn row_to_conversation(row: &sqlx::postgres::PgRow) -> Result<Conversation, RepositoryError> {
    Ok(Conversation {
        id: row.try_get("id")?,
        account_id: row.try_get("account_id")?,
        baby_id: row.try_get("baby_id")?,
        question: row.try_get("question")?,
        answer: row.try_get("answer")?,
        tokens_used: row.try_get("tokens_used")?,
        created_at: row.try_get("created_at")?,
    })
}
