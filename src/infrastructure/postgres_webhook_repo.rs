use crate::domain::{AppliedTransition, ProcessedEvent};
use crate::infrastructure::{CommitEffect, CommitOutcome, RepositoryError, WebhookRepository};
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;
use uuid::Uuid;

pub struct PostgresWebhookRepository {
    pool: PgPool,
}

impl PostgresWebhookRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WebhookRepository for PostgresWebhookRepository {
    async fn is_processed(&self, provider_event_id: &str) -> Result<bool, RepositoryError> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(SELECT 1 FROM webhook_events WHERE provider_event_id = $1)
            "#,
        )
        .bind(provider_event_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn commit(
        &self,
        event: &ProcessedEvent,
        effect: CommitEffect<'_>,
    ) -> Result<CommitOutcome, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        // Claiming the event id first serialises concurrent deliveries of the same event:
        // the second insert blocks on the unique index until the first transaction ends.
        let claimed = sqlx::query(
            r#"
            INSERT INTO webhook_events (provider_event_id, event_type, account_id, outcome, processed_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (provider_event_id) DO NOTHING
            "#,
        )
        .bind(&event.provider_event_id)
        .bind(&event.event_type)
        .bind(event.account_id)
        .bind(&event.outcome)
        .bind(event.processed_at)
        .execute(&mut *tx)
        .await?;

        if claimed.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(CommitOutcome::Duplicate);
        }

        let current = match effect {
            CommitEffect::RecordOnly => true,
            CommitEffect::Unchanged {
                account_id,
                version,
            } => lock_if_current(&mut tx, account_id, version).await?,
            CommitEffect::Apply(t) => update_if_current(&mut tx, t).await?,
        };

        if !current {
            tx.rollback().await?;
            return Ok(CommitOutcome::VersionConflict);
        }

        tx.commit().await?;
        Ok(CommitOutcome::Committed)
    }
}

/// Row-lock the account when it is still at `version`, so a skip decision commits against the
/// state it was made on.
async fn lock_if_current(
    tx: &mut Transaction<'_, Postgres>,
    account_id: Uuid,
    version: i64,
) -> Result<bool, RepositoryError> {
    let row: Option<Uuid> = sqlx::query_scalar(
        r#"
        SELECT id FROM accounts WHERE id = $1 AND version = $2 FOR UPDATE
        "#,
    )
    .bind(account_id)
    .bind(version)
    .fetch_optional(&mut **tx)
    .await?;

    if row.is_none() {
        debug!(
            account_id = %account_id,
            expected_version = version,
            "Account version moved before no-op commit"
        );
    }
    Ok(row.is_some())
}

async fn update_if_current(
    tx: &mut Transaction<'_, Postgres>,
    t: &AppliedTransition,
) -> Result<bool, RepositoryError> {
    let account = &t.account;
    let updated = sqlx::query(
        r#"
        UPDATE accounts
        SET status = $1,
            payment_status = $2,
            billing_customer_ref = COALESCE(billing_customer_ref, $3),
            billing_subscription_ref = $4,
            period_start = $5,
            period_end = $6,
            activated_at = $7,
            cancelled_at = $8,
            updated_at = $9,
            version = version + 1
        WHERE id = $10 AND version = $11
        "#,
    )
    .bind(account.status.to_string())
    .bind(account.payment_status.to_string())
    .bind(&account.billing_customer_ref)
    .bind(&account.billing_subscription_ref)
    .bind(account.period_start)
    .bind(account.period_end)
    .bind(account.activated_at)
    .bind(account.cancelled_at)
    .bind(account.updated_at)
    .bind(account.id)
    .bind(account.version)
    .execute(&mut **tx)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(ref db) if db.is_unique_violation() => {
            RepositoryError::AlreadyExists(format!(
                "Billing customer {:?}",
                account.billing_customer_ref
            ))
        }
        _ => RepositoryError::DatabaseError(e),
    })?;

    if updated.rows_affected() == 0 {
        debug!(
            account_id = %account.id,
            expected_version = account.version,
            "Account version moved, rolling back webhook commit"
        );
        return Ok(false);
    }
    Ok(true)
}
