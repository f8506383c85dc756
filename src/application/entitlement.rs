use crate::domain::{Account, AccountStatus, ActionKind, PlanCatalog, UsageCounter};
use crate::infrastructure::{with_storage_timeout, RepositoryError, UsageRepository};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};

#[derive(Error, Debug)]
pub enum EntitlementError {
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Grant {
    pub action: ActionKind,
    pub used: i32,
    pub limit: i32,
    pub remaining: i32,
}

/// Why a metered action was refused. Every variant names the plan so clients can offer an upgrade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DenialReason {
    NotActive {
        status: AccountStatus,
        plan_id: String,
    },
    PeriodExpired {
        period_end: DateTime<Utc>,
        plan_id: String,
    },
    PlanMisconfigured {
        plan_id: String,
    },
    QuotaExceeded {
        used: i32,
        limit: i32,
        plan_id: String,
    },
}

impl DenialReason {
    pub fn plan_id(&self) -> &str {
        match self {
            DenialReason::NotActive { plan_id, .. }
            | DenialReason::PeriodExpired { plan_id, .. }
            | DenialReason::PlanMisconfigured { plan_id }
            | DenialReason::QuotaExceeded { plan_id, .. } => plan_id,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            DenialReason::NotActive { .. } => "NOT_ACTIVE",
            DenialReason::PeriodExpired { .. } => "PERIOD_EXPIRED",
            DenialReason::PlanMisconfigured { .. } => "PLAN_MISCONFIGURED",
            DenialReason::QuotaExceeded { .. } => "QUOTA_EXCEEDED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Granted(Grant),
    Denied(DenialReason),
}

/// Remaining allowance for one action kind in the current period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Allowance {
    pub used: i32,
    pub limit: i32,
    pub remaining: i32,
}

impl Allowance {
    fn new(used: i32, limit: i32) -> Self {
        Self {
            used,
            limit,
            remaining: (limit - used).max(0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageSummary {
    pub period_key: String,
    pub questions: Allowance,
    pub reports: Allowance,
}

pub struct EntitlementGate<U>
where
    U: UsageRepository,
{
    usage_repo: Arc<U>,
    catalog: Arc<PlanCatalog>,
    storage_timeout: Duration,
}

impl<U> EntitlementGate<U>
where
    U: UsageRepository,
{
    pub fn new(usage_repo: Arc<U>, catalog: Arc<PlanCatalog>, storage_timeout: Duration) -> Self {
        Self {
            usage_repo,
            catalog,
            storage_timeout,
        }
    }

    /// Decide whether `account` may perform `action` now, consuming one unit when granted.
    ///
    /// Never changes account status. Consumption is not rolled back if the caller's
    /// downstream work fails.
    pub async fn authorize(
        &self,
        account: &Account,
        action: ActionKind,
        now: DateTime<Utc>,
    ) -> Result<Decision, EntitlementError> {
        if account.status != AccountStatus::Active {
            return Ok(Decision::Denied(DenialReason::NotActive {
                status: account.status,
                plan_id: account.plan_id.clone(),
            }));
        }

        if !account.is_within_period(now) {
            return Ok(Decision::Denied(DenialReason::PeriodExpired {
                period_end: account.period_end,
                plan_id: account.plan_id.clone(),
            }));
        }

        let plan = match self.catalog.lookup(&account.plan_id) {
            Ok(plan) => plan,
            Err(e) => {
                error!(
                    account_id = %account.id,
                    plan_id = %account.plan_id,
                    "Account references a plan missing from the catalog: {}",
                    e
                );
                return Ok(Decision::Denied(DenialReason::PlanMisconfigured {
                    plan_id: account.plan_id.clone(),
                }));
            }
        };

        let limit = plan.limit_for(action);
        let period_key = account.current_period_key();

        let result = with_storage_timeout(
            self.storage_timeout,
            self.usage_repo
                .increment_if_under_limit(account.id, &period_key, action.field(), limit),
        )
        .await?;

        if result.granted {
            Ok(Decision::Granted(Grant {
                action,
                used: result.used_after,
                limit,
                remaining: limit - result.used_after,
            }))
        } else {
            info!(
                account_id = %account.id,
                action = %action,
                used = result.used_after,
                limit,
                "Quota exhausted"
            );
            Ok(Decision::Denied(DenialReason::QuotaExceeded {
                used: result.used_after,
                limit,
                plan_id: plan.id.clone(),
            }))
        }
    }

    /// Usage in the account's current period, without consuming anything.
    pub async fn usage_summary(&self, account: &Account) -> Result<UsageSummary, EntitlementError> {
        let period_key = account.current_period_key();
        let counter = with_storage_timeout(
            self.storage_timeout,
            self.usage_repo.get_or_create(account.id, &period_key),
        )
        .await?;

        Ok(self.summarize(account, &counter))
    }

    fn summarize(&self, account: &Account, counter: &UsageCounter) -> UsageSummary {
        let (question_limit, report_limit) = match self.catalog.lookup(&account.plan_id) {
            Ok(plan) => (
                plan.limit_for(ActionKind::Question),
                plan.limit_for(ActionKind::Report),
            ),
            Err(_) => (0, 0),
        };

        UsageSummary {
            period_key: counter.period_key.clone(),
            questions: Allowance::new(counter.questions_used, question_limit),
            reports: Allowance::new(counter.reports_used, report_limit),
        }
    }
}
