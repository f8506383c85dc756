use crate::application::notifications::NotificationDispatcher;
use crate::domain::{
    Account, BillingEvent, PlanCatalog, ProcessedEvent, Transition, TransitionEffect, WebhookEvent,
};
use crate::infrastructure::{
    with_storage_timeout, AccountRepository, CommitEffect, CommitOutcome, Notifier,
    RepositoryError, UsageRepository, WebhookRepository,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Attempts at applying a transition before giving up on a contended account.
pub const MAX_CAS_ATTEMPTS: u32 = 3;

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Account {0} kept changing during reconciliation")]
    Contention(uuid::Uuid),
}

impl ReconcileError {
    /// The provider should redeliver the event later.
    pub fn is_transient(&self) -> bool {
        match self {
            ReconcileError::Repository(e) => e.is_transient(),
            ReconcileError::Contention(_) => true,
            ReconcileError::Configuration(_) => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    UnknownCustomer,
    CustomerConflict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Event recorded. `effect` is `None` when it was a no-op for the account.
    Applied { effect: Option<TransitionEffect> },
    Duplicate,
    /// Not recorded, so a redelivery can still apply once the cause is resolved.
    Rejected(RejectReason),
}

enum Resolution {
    Found(Account),
    Rejected(RejectReason),
}

pub struct WebhookReconciler<A, U, W, N>
where
    A: AccountRepository,
    U: UsageRepository,
    W: WebhookRepository,
    N: Notifier + 'static,
{
    account_repo: Arc<A>,
    usage_repo: Arc<U>,
    webhook_repo: Arc<W>,
    notifications: Arc<NotificationDispatcher<N>>,
    catalog: Arc<PlanCatalog>,
    storage_timeout: Duration,
}

impl<A, U, W, N> WebhookReconciler<A, U, W, N>
where
    A: AccountRepository,
    U: UsageRepository,
    W: WebhookRepository,
    N: Notifier + 'static,
{
    pub fn new(
        account_repo: Arc<A>,
        usage_repo: Arc<U>,
        webhook_repo: Arc<W>,
        notifications: Arc<NotificationDispatcher<N>>,
        catalog: Arc<PlanCatalog>,
        storage_timeout: Duration,
    ) -> Self {
        Self {
            account_repo,
            usage_repo,
            webhook_repo,
            notifications,
            catalog,
            storage_timeout,
        }
    }

    pub async fn apply(&self, event: &WebhookEvent) -> Result<ReconcileOutcome, ReconcileError> {
        self.apply_at(event, Utc::now()).await
    }

    /// Apply a verified provider event at time `now`. Safe to call repeatedly with the same event.
    pub async fn apply_at(
        &self,
        event: &WebhookEvent,
        now: DateTime<Utc>,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let event_id = event.provider_event_id.as_str();

        if self
            .storage(self.webhook_repo.is_processed(event_id))
            .await?
        {
            debug!(event_id, "Duplicate webhook event");
            return Ok(ReconcileOutcome::Duplicate);
        }

        let Some(billing_event) = event.billing_event() else {
            info!(event_id, event_type = event.kind.as_str(), "Unhandled event type");
            let record = processed(event, None, "ignored_event_type", now);
            return self.record_only(&record).await;
        };

        let mut contended = None;
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let account = match self.resolve(event, &billing_event).await? {
                Resolution::Found(account) => account,
                Resolution::Rejected(reason) => {
                    warn!(
                        event_id,
                        customer_ref = event.customer_ref.as_deref().unwrap_or(""),
                        reason = ?reason,
                        "Rejected webhook event"
                    );
                    return Ok(ReconcileOutcome::Rejected(reason));
                }
            };

            let plan = self.catalog.lookup(&account.plan_id).map_err(|e| {
                error!(account_id = %account.id, "Account plan missing from catalog: {}", e);
                ReconcileError::Configuration(e.to_string())
            })?;

            let transition = account.transition(&billing_event, plan.billing_period_length, now);

            let (record, effect) = match &transition {
                Transition::Apply(t) => (
                    processed(event, Some(&account), &t.effect.to_string(), now),
                    CommitEffect::Apply(t),
                ),
                Transition::Ignore(reason) => {
                    info!(
                        event_id,
                        account_id = %account.id,
                        status = %account.status,
                        "Event ignored: {}",
                        reason
                    );
                    // The skip only holds for the version it was decided on.
                    (
                        processed(event, Some(&account), "ignored", now),
                        CommitEffect::Unchanged {
                            account_id: account.id,
                            version: account.version,
                        },
                    )
                }
            };

            let outcome = match self.storage(self.webhook_repo.commit(&record, effect)).await {
                Ok(outcome) => outcome,
                Err(RepositoryError::AlreadyExists(detail)) => {
                    warn!(event_id, account_id = %account.id, "Customer already linked: {}", detail);
                    return Ok(ReconcileOutcome::Rejected(RejectReason::CustomerConflict));
                }
                Err(e) => return Err(e.into()),
            };

            match outcome {
                CommitOutcome::Committed => {
                    let CommitEffect::Apply(t) = effect else {
                        return Ok(ReconcileOutcome::Applied { effect: None });
                    };

                    info!(
                        event_id,
                        account_id = %account.id,
                        effect = %t.effect,
                        status = %t.account.status,
                        "Billing transition applied"
                    );

                    if let Some(period_key) = &t.new_period_key {
                        // Reads open the counter on demand, so a failed reset only delays it.
                        if let Err(e) = self
                            .storage(self.usage_repo.reset(account.id, period_key))
                            .await
                        {
                            warn!(account_id = %account.id, period_key = %period_key, "Usage reset failed: {}", e);
                        }
                    }

                    self.notifications.dispatch(&t.account, Some(plan), t.effect);
                    return Ok(ReconcileOutcome::Applied {
                        effect: Some(t.effect),
                    });
                }
                CommitOutcome::Duplicate => {
                    debug!(event_id, "Event committed concurrently");
                    return Ok(ReconcileOutcome::Duplicate);
                }
                CommitOutcome::VersionConflict => {
                    contended = Some(account.id);
                    debug!(
                        event_id,
                        account_id = %account.id,
                        attempt,
                        "Account changed concurrently, retrying"
                    );
                }
            }
        }

        let account_id = contended.unwrap_or_default();
        warn!(event_id, account_id = %account_id, "Giving up after repeated version conflicts");
        Err(ReconcileError::Contention(account_id))
    }

    async fn record_only(&self, record: &ProcessedEvent) -> Result<ReconcileOutcome, ReconcileError> {
        match self.storage(self.webhook_repo.commit(record, CommitEffect::RecordOnly)).await? {
            CommitOutcome::Duplicate => Ok(ReconcileOutcome::Duplicate),
            _ => Ok(ReconcileOutcome::Applied { effect: None }),
        }
    }

    /// Find the account an event refers to.
    ///
    /// Checkout is the only event that may carry our own account id, since it is what links the
    /// billing customer. Every later event must name a customer that is already linked.
    async fn resolve(
        &self,
        event: &WebhookEvent,
        billing_event: &BillingEvent,
    ) -> Result<Resolution, ReconcileError> {
        let by_customer = match &event.customer_ref {
            Some(customer_ref) => {
                self.storage(self.account_repo.get_by_customer_ref(customer_ref))
                    .await?
            }
            None => None,
        };

        let BillingEvent::CheckoutCompleted { customer_ref, .. } = billing_event else {
            return Ok(match by_customer {
                Some(account) => Resolution::Found(account),
                None => Resolution::Rejected(RejectReason::UnknownCustomer),
            });
        };

        let by_ref = match event.account_ref {
            Some(id) => match self.storage(self.account_repo.get_by_id(id)).await {
                Ok(account) => Some(account),
                Err(RepositoryError::NotFound(_)) => None,
                Err(e) => return Err(e.into()),
            },
            None => None,
        };

        let account = match (by_ref, by_customer) {
            (Some(account), Some(linked)) if linked.id != account.id => {
                return Ok(Resolution::Rejected(RejectReason::CustomerConflict));
            }
            (Some(account), _) => account,
            (None, Some(linked)) => linked,
            (None, None) => return Ok(Resolution::Rejected(RejectReason::UnknownCustomer)),
        };

        if account
            .billing_customer_ref
            .as_ref()
            .is_some_and(|existing| existing != customer_ref)
        {
            return Ok(Resolution::Rejected(RejectReason::CustomerConflict));
        }

        Ok(Resolution::Found(account))
    }

    async fn storage<T, F>(&self, op: F) -> Result<T, RepositoryError>
    where
        F: std::future::Future<Output = Result<T, RepositoryError>>,
    {
        with_storage_timeout(self.storage_timeout, op).await
    }
}

fn processed(
    event: &WebhookEvent,
    account: Option<&Account>,
    outcome: &str,
    now: DateTime<Utc>,
) -> ProcessedEvent {
    ProcessedEvent {
        provider_event_id: event.provider_event_id.clone(),
        event_type: event.kind.as_str().to_string(),
        account_id: account.map(|a| a.id),
        outcome: outcome.to_string(),
        processed_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contention_and_storage_failures_are_transient() {
        assert!(ReconcileError::Contention(uuid::Uuid::new_v4()).is_transient());
        assert!(ReconcileError::Repository(RepositoryError::Timeout).is_transient());
        assert!(!ReconcileError::Configuration("plan".to_string()).is_transient());
        assert!(
            !ReconcileError::Repository(RepositoryError::NotFound("x".to_string())).is_transient()
        );
    }
}
