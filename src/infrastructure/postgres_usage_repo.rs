use crate::domain::{IncrementResult, UsageCounter, UsageField};
use crate::infrastructure::{RepositoryError, UsageRepository};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};
use uuid::Uuid;

pub struct PostgresUsageRepository {
    pool: PgPool,
}

impl PostgresUsageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn column(field: UsageField) -> &'static str {
    match field {
        UsageField::QuestionsUsed => "questions_used",
        UsageField::ReportsUsed => "reports_used",
    }
}

#[async_trait]
impl UsageRepository for PostgresUsageRepository {
    async fn get_or_create(
        &self,
        account_id: Uuid,
        period_key: &str,
    ) -> Result<UsageCounter, RepositoryError> {
        // The no-op DO UPDATE makes RETURNING yield the existing row on conflict.
        let row = sqlx::query(
            r#"
            INSERT INTO usage_counters (account_id, period_key, questions_used, reports_used,
                                        created_at, updated_at)
            VALUES ($1, $2, 0, 0, $3, $3)
            ON CONFLICT (account_id, period_key)
            DO UPDATE SET account_id = EXCLUDED.account_id
            RETURNING account_id, period_key, questions_used, reports_used, created_at, updated_at
            "#,
        )
        .bind(account_id)
        .bind(period_key)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        row_to_counter(&row)
    }

    async fn increment_if_under_limit(
        &self,
        account_id: Uuid,
        period_key: &str,
        field: UsageField,
        limit: i32,
    ) -> Result<IncrementResult, RepositoryError> {
        self.get_or_create(account_id, period_key).await?;

        let col = column(field);
        let granted: Option<i32> = sqlx::query_scalar(&format!(
            r#"
            UPDATE usage_counters
            SET {col} = {col} + 1, updated_at = $4
            WHERE account_id = $1 AND period_key = $2 AND {col} < $3
            RETURNING {col}
            "#,
        ))
        .bind(account_id)
        .bind(period_key)
        .bind(limit)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        if let Some(used_after) = granted {
            return Ok(IncrementResult {
                granted: true,
                used_after,
            });
        }

        let used: i32 = sqlx::query_scalar(&format!(
            "SELECT {col} FROM usage_counters WHERE account_id = $1 AND period_key = $2"
        ))
        .bind(account_id)
        .bind(period_key)
        .fetch_one(&self.pool)
        .await?;

        Ok(IncrementResult {
            granted: false,
            used_after: used,
        })
    }

    async fn reset(
        &self,
        account_id: Uuid,
        new_period_key: &str,
    ) -> Result<UsageCounter, RepositoryError> {
        // Fresh period keys never collide with an older period, so this never zeroes
        // a counter that already has usage.
        self.get_or_create(account_id, new_period_key).await
    }

    async fn history(&self, account_id: Uuid) -> Result<Vec<UsageCounter>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT account_id, period_key, questions_used, reports_used, created_at, updated_at
            FROM usage_counters
            WHERE account_id = $1
            ORDER BY period_key DESC
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_counter).collect()
    }
}

fn row_to_counter(row: &sqlx::postgres::PgRow) -> Result<UsageCounter, RepositoryError> {
    Ok(UsageCounter {
        account_id: row.try_get("account_id")?,
        period_key: row.try_get("period_key")?,
        questions_used: row.try_get("questions_used")?,
        reports_used: row.try_get("reports_used")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::column;
    use crate::domain::ActionKind;

    #[test]
    fn every_action_has_a_counter_column() {
        assert_eq!(column(ActionKind::Question.field()), "questions_used");
        assert_eq!(column(ActionKind::Report.field()), "reports_used");
    }
}
