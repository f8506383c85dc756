use crate::domain::{
    Account, AccountStatus, AppliedTransition, Conversation, IncrementResult, PaymentStatus, ProcessedEvent,
    UsageCounter, UsageField,
};
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Already exists: {0}")]
    AlreadyExists(String),
    #[error("Invalid data: {0}")]
    InvalidData(String),
    #[error("Storage timeout")]
    Timeout,
}

impl RepositoryError {
    /// Errors a caller may retry without changing the request.
    pub fn is_transient(&self) -> bool {
        matches!(self, RepositoryError::DatabaseError(_) | RepositoryError::Timeout)
    }
}

/// Run a storage operation under a deadline. Elapsed deadlines surface as `Timeout`.
pub async fn with_storage_timeout<T, F>(timeout: Duration, op: F) -> Result<T, RepositoryError>
where
    F: Future<Output = Result<T, RepositoryError>>,
{
    tokio::time::timeout(timeout, op)
        .await
        .map_err(|_| RepositoryError::Timeout)?
}

/// Result of committing a processed webhook event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// The event id was already in the dedup ledger; nothing was written.
    Duplicate,
    /// The account changed since it was read; nothing was written.
    VersionConflict,
}

/// What a webhook commit does to the account the event resolved to.
#[derive(Debug, Clone, Copy)]
pub enum CommitEffect<'a> {
    /// No account involved, e.g. an event type the service does not handle.
    RecordOnly,
    /// The event was a no-op for the account as read at `version`.
    /// Committed only while that version is still current.
    Unchanged { account_id: Uuid, version: i64 },
    /// Persist the transition, conditional on `account.version` still matching.
    Apply(&'a AppliedTransition),
}

#[async_trait]
pub trait AccountRepository: Send + Sync {
    #[must_use]
    async fn create(&self, account: &Account) -> Result<(), RepositoryError>;
    #[must_use]
    async fn get_by_id(&self, id: Uuid) -> Result<Account, RepositoryError>;
    #[must_use]
    async fn get_by_email(&self, email: &str) -> Result<Option<Account>, RepositoryError>;
    #[must_use]
    async fn get_by_customer_ref(
        &self,
        customer_ref: &str,
    ) -> Result<Option<Account>, RepositoryError>;
    /// Removes the account and, by cascade, its usage counters.
    #[must_use]
    async fn delete(&self, id: Uuid) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait UsageRepository: Send + Sync {
    /// Existing counter for the period, or a zeroed one created by upsert.
    #[must_use]
    async fn get_or_create(
        &self,
        account_id: Uuid,
        period_key: &str,
    ) -> Result<UsageCounter, RepositoryError>;
    /// Atomically increment `field` when it is below `limit`.
    /// On denial the counter is unchanged and `used_after` is its current value.
    #[must_use]
    async fn increment_if_under_limit(
        &self,
        account_id: Uuid,
        period_key: &str,
        field: UsageField,
        limit: i32,
    ) -> Result<IncrementResult, RepositoryError>;
    /// Open a zeroed counter for a new period. Counters of earlier periods are kept.
    #[must_use]
    async fn reset(
        &self,
        account_id: Uuid,
        new_period_key: &str,
    ) -> Result<UsageCounter, RepositoryError>;
    /// All counters for the account, newest first.
    #[must_use]
    async fn history(&self, account_id: Uuid) -> Result<Vec<UsageCounter>, RepositoryError>;
}

#[async_trait]
pub trait WebhookRepository: Send + Sync {
    #[must_use]
    async fn is_processed(&self, provider_event_id: &str) -> Result<bool, RepositoryError>;
    /// Record `event` in the dedup ledger and persist `effect` in one transaction.
    ///
    /// Any effect bound to an account yields `VersionConflict` when the stored version has
    /// moved, and nothing is written.
    #[must_use]
    async fn commit(
        &self,
        event: &ProcessedEvent,
        effect: CommitEffect<'_>,
    ) -> Result<CommitOutcome, RepositoryError>;
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    #[must_use]
    async fn record(&self, conversation: &Conversation) -> Result<(), RepositoryError>;
    /// Newest first, at most `limit` entries.
    #[must_use]
    async fn recent(
        &self,
        account_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Conversation>, RepositoryError>;
}

pub struct PostgresAccountRepository {
    pool: PgPool,
}

impl PostgresAccountRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

pub(crate) const ACCOUNT_COLUMNS: &str = r#"
    id, email, name, phone, plan_id, status, payment_status,
    billing_customer_ref, billing_subscription_ref, period_start, period_end,
    created_at, updated_at, activated_at, cancelled_at, version
"#;

#[async_trait]
impl AccountRepository for PostgresAccountRepository {
    async fn create(&self, account: &Account) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO accounts (id, email, name, phone, plan_id, status, payment_status,
                                  billing_customer_ref, billing_subscription_ref,
                                  period_start, period_end, created_at, updated_at,
                                  activated_at, cancelled_at, version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(account.id)
        .bind(&account.email)
        .bind(&account.name)
        .bind(&account.phone)
        .bind(&account.plan_id)
        .bind(account.status.to_string())
        .bind(account.payment_status.to_string())
        .bind(&account.billing_customer_ref)
        .bind(&account.billing_subscription_ref)
        .bind(account.period_start)
        .bind(account.period_end)
        .bind(account.created_at)
        .bind(account.updated_at)
        .bind(account.activated_at)
        .bind(account.cancelled_at)
        .bind(account.version)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                RepositoryError::AlreadyExists(format!("Account {}", account.email))
            }
            _ => RepositoryError::DatabaseError(e),
        })?;

        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Account, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM accounts WHERE id = $1",
            ACCOUNT_COLUMNS
        ))
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => RepositoryError::NotFound(format!("Account {}", id)),
            _ => RepositoryError::DatabaseError(e),
        })?;

        row_to_account(&row)
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<Account>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM accounts WHERE lower(email) = lower($1)",
            ACCOUNT_COLUMNS
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_account).transpose()
    }

    async fn get_by_customer_ref(
        &self,
        customer_ref: &str,
    ) -> Result<Option<Account>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM accounts WHERE billing_customer_ref = $1",
            ACCOUNT_COLUMNS
        ))
        .bind(customer_ref)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_account).transpose()
    }

    async fn delete(&self, id: Uuid) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            DELETE FROM accounts
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

// Status enums use strum's Display/EnumString with snake_case, matching the
// CHECK constraints in the migrations.

pub(crate) fn row_to_account(row: &sqlx::postgres::PgRow) -> Result<Account, RepositoryError> {
    let status_str: String = row.try_get("status")?;
    let payment_status_str: String = row.try_get("payment_status")?;

    Ok(Account {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        name: row.try_get("name")?,
        phone: row.try_get("phone")?,
        plan_id: row.try_get("plan_id")?,
        status: AccountStatus::from_str(&status_str)
            .map_err(|_| RepositoryError::InvalidData(format!("Unknown status: {}", status_str)))?,
        payment_status: PaymentStatus::from_str(&payment_status_str).map_err(|_| {
            RepositoryError::InvalidData(format!("Unknown payment status: {}", payment_status_str))
        })?,
        billing_customer_ref: row.try_get("billing_customer_ref")?,
        billing_subscription_ref: row.try_get("billing_subscription_ref")?,
        period_start: row.try_get("period_start")?,
        period_end: row.try_get("period_end")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        activated_at: row.try_get("activated_at")?,
        cancelled_at: row.try_get("cancelled_at")?,
        version: row.try_get("version")?,
    })
}
