use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum::{Display, EnumString};
use thiserror::Error;

use super::usage::ActionKind;

#[derive(Error, Debug, PartialEq)]
pub enum PlanCatalogError {
    #[error("Plan not found: {0}")]
    NotFound(String),
    #[error("Plan catalog is empty")]
    Empty,
    #[error("Duplicate plan id: {0}")]
    DuplicateId(String),
    #[error("Invalid plan {id}: {reason}")]
    InvalidPlan { id: String, reason: String },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BillingPeriodLength {
    Monthly,
    Annual,
}

impl BillingPeriodLength {
    pub fn duration(&self) -> Duration {
        match self {
            BillingPeriodLength::Monthly => Duration::days(30),
            BillingPeriodLength::Annual => Duration::days(365),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Plan {
    pub id: String,
    pub display_name: String,
    /// Price in cents (BRL).
    pub price: i64,
    /// Billing provider price identifier used for checkout sessions.
    pub price_ref: String,
    pub question_quota: i32,
    pub report_quota: i32,
    pub profile_quota: i32,
    pub billing_period_length: BillingPeriodLength,
}

impl Plan {
    pub fn limit_for(&self, action: ActionKind) -> i32 {
        match action {
            ActionKind::Question => self.question_quota,
            ActionKind::Report => self.report_quota,
        }
    }

    fn validate(&self) -> Result<(), PlanCatalogError> {
        let invalid = |reason: &str| PlanCatalogError::InvalidPlan {
            id: self.id.clone(),
            reason: reason.to_string(),
        };

        if self.id.trim().is_empty() {
            return Err(invalid("id must not be empty"));
        }
        if self.price < 0 {
            return Err(invalid("price must not be negative"));
        }
        if self.question_quota < 0 || self.report_quota < 0 || self.profile_quota < 0 {
            return Err(invalid("quotas must not be negative"));
        }
        Ok(())
    }
}

/// Immutable plan lookup table, built once at startup.
#[derive(Debug, Clone)]
pub struct PlanCatalog {
    plans: HashMap<String, Plan>,
}

impl PlanCatalog {
    pub fn new(plans: Vec<Plan>) -> Result<Self, PlanCatalogError> {
        if plans.is_empty() {
            return Err(PlanCatalogError::Empty);
        }

        let mut by_id = HashMap::with_capacity(plans.len());
        for plan in plans {
            plan.validate()?;
            if by_id.contains_key(&plan.id) {
                return Err(PlanCatalogError::DuplicateId(plan.id));
            }
            by_id.insert(plan.id.clone(), plan);
        }

        Ok(Self { plans: by_id })
    }

    /// Catalog shipped with the service when configuration provides no plans.
    pub fn builtin() -> Self {
        Self {
            plans: builtin_plans()
                .into_iter()
                .map(|p| (p.id.clone(), p))
                .collect(),
        }
    }

    pub fn lookup(&self, plan_id: &str) -> Result<&Plan, PlanCatalogError> {
        self.plans
            .get(plan_id)
            .ok_or_else(|| PlanCatalogError::NotFound(plan_id.to_string()))
    }

    /// All plans, ordered by id.
    pub fn plans(&self) -> Vec<&Plan> {
        let mut plans: Vec<&Plan> = self.plans.values().collect();
        plans.sort_by(|a, b| a.id.cmp(&b.id));
        plans
    }
}

pub fn builtin_plans() -> Vec<Plan> {
    vec![
        Plan {
            id: "essencial".to_string(),
            display_name: "Aurora IA Essencial".to_string(),
            price: 1990,
            price_ref: "price_essencial_monthly".to_string(),
            question_quota: 20,
            report_quota: 1,
            profile_quota: 2,
            billing_period_length: BillingPeriodLength::Monthly,
        },
        Plan {
            id: "completo".to_string(),
            display_name: "Aurora IA Completo".to_string(),
            price: 3490,
            price_ref: "price_completo_monthly".to_string(),
            question_quota: 60,
            report_quota: 4,
            profile_quota: 5,
            billing_period_length: BillingPeriodLength::Monthly,
        },
    ]
}
