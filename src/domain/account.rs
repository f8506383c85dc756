use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};
use uuid::Uuid;

use super::plan::{BillingPeriodLength, Plan};
use super::usage::period_key;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub phone: Option<String>,
    pub plan_id: String,
    pub status: AccountStatus,
    pub payment_status: PaymentStatus,
    pub billing_customer_ref: Option<String>,
    pub billing_subscription_ref: Option<String>,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency token, bumped by storage on every persisted transition.
    pub version: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString, EnumIter)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AccountStatus {
    PendingPayment,
    Active,
    PaymentFailed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Cancelled,
}

/// Provider event, reduced to what the account state machine needs.
#[derive(Debug, Clone, PartialEq)]
pub enum BillingEvent {
    CheckoutCompleted {
        customer_ref: String,
        subscription_ref: Option<String>,
    },
    /// `renewal` is false for the first invoice of a subscription, which checkout already covers.
    PaymentSucceeded { renewal: bool },
    PaymentFailed,
    SubscriptionCancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum TransitionEffect {
    Activated,
    Renewed,
    PaymentFailed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppliedTransition {
    /// Account after the transition. `version` still holds the version it was derived from.
    pub account: Account,
    pub effect: TransitionEffect,
    /// Set when the transition opened a new billing period.
    pub new_period_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Apply(AppliedTransition),
    Ignore(&'static str),
}

impl Account {
    pub fn new(
        id: Uuid,
        email: String,
        name: String,
        phone: Option<String>,
        plan: &Plan,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            email,
            name,
            phone,
            plan_id: plan.id.clone(),
            status: AccountStatus::PendingPayment,
            payment_status: PaymentStatus::Pending,
            billing_customer_ref: None,
            billing_subscription_ref: None,
            period_start: now,
            period_end: now + plan.billing_period_length.duration(),
            created_at: now,
            updated_at: now,
            activated_at: None,
            cancelled_at: None,
            version: 0,
        }
    }

    pub fn current_period_key(&self) -> String {
        period_key(self.period_start)
    }

    pub fn is_within_period(&self, now: DateTime<Utc>) -> bool {
        now <= self.period_end
    }

    /// Evaluate `event` against the transition table.
    ///
    /// Pure: the caller persists the result. Pairs outside the table yield `Transition::Ignore`
    /// and leave the account untouched.
    pub fn transition(
        &self,
        event: &BillingEvent,
        period_length: BillingPeriodLength,
        now: DateTime<Utc>,
    ) -> Transition {
        use AccountStatus::*;

        match (self.status, event) {
            (
                PendingPayment,
                BillingEvent::CheckoutCompleted {
                    customer_ref,
                    subscription_ref,
                },
            ) => {
                if let Some(existing) = &self.billing_customer_ref {
                    if existing != customer_ref {
                        return Transition::Ignore("account already linked to another customer");
                    }
                }

                let mut next = self.clone();
                next.status = Active;
                next.payment_status = PaymentStatus::Paid;
                next.billing_customer_ref = Some(customer_ref.clone());
                next.billing_subscription_ref = subscription_ref.clone();
                next.activated_at = Some(now);
                next.period_start = now;
                next.period_end = now + period_length.duration();
                next.updated_at = now;
                Self::applied(next, TransitionEffect::Activated, true)
            }
            (Active, BillingEvent::PaymentSucceeded { renewal: false }) => {
                Transition::Ignore("initial invoice already covered by checkout")
            }
            (Active | PaymentFailed, BillingEvent::PaymentSucceeded { .. }) => {
                let mut next = self.clone();
                let (start, end) = self.next_period(period_length, now);
                next.status = Active;
                next.payment_status = PaymentStatus::Paid;
                next.period_start = start;
                next.period_end = end;
                next.updated_at = now;
                Self::applied(next, TransitionEffect::Renewed, true)
            }
            (Active, BillingEvent::PaymentFailed) => {
                let mut next = self.clone();
                next.status = PaymentFailed;
                next.payment_status = PaymentStatus::Failed;
                next.updated_at = now;
                Self::applied(next, TransitionEffect::PaymentFailed, false)
            }
            (Active | PaymentFailed, BillingEvent::SubscriptionCancelled) => {
                let mut next = self.clone();
                next.status = Cancelled;
                next.payment_status = PaymentStatus::Cancelled;
                next.cancelled_at = Some(now);
                next.updated_at = now;
                Self::applied(next, TransitionEffect::Cancelled, false)
            }
            (PendingPayment, BillingEvent::PaymentFailed | BillingEvent::SubscriptionCancelled) => {
                Transition::Ignore("account was never activated")
            }
            (PendingPayment, BillingEvent::PaymentSucceeded { .. }) => {
                Transition::Ignore("payment before checkout completion")
            }
            (Active | PaymentFailed, BillingEvent::CheckoutCompleted { .. }) => {
                Transition::Ignore("account already activated")
            }
            (PaymentFailed, BillingEvent::PaymentFailed) => {
                Transition::Ignore("payment already failed")
            }
            (Cancelled, _) => Transition::Ignore("account is cancelled"),
        }
    }

    fn applied(account: Account, effect: TransitionEffect, new_period: bool) -> Transition {
        let new_period_key = new_period.then(|| account.current_period_key());
        Transition::Apply(AppliedTransition {
            account,
            effect,
            new_period_key,
        })
    }

    /// Next window after the current one; rebased on `now` when that window is already over.
    fn next_period(
        &self,
        period_length: BillingPeriodLength,
        now: DateTime<Utc>,
    ) -> (DateTime<Utc>, DateTime<Utc>) {
        let length = period_length.duration();
        let start = self.period_end;
        let end = start + length;
        if end <= now {
            (now, now + length)
        } else {
            (start, end)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::plan::PlanCatalog;
    use chrono::Duration;
    use strum::IntoEnumIterator;

    fn pending_account() -> Account {
        let catalog = PlanCatalog::builtin();
        let plan = catalog.lookup("essencial").unwrap();
        Account::new(
            Uuid::new_v4(),
            "mae@example.com".to_string(),
            "Ana".to_string(),
            Some("5511999990000".to_string()),
            plan,
        )
    }

    fn checkout() -> BillingEvent {
        BillingEvent::CheckoutCompleted {
            customer_ref: "cus_123".to_string(),
            subscription_ref: Some("sub_123".to_string()),
        }
    }

    fn all_events() -> Vec<BillingEvent> {
        vec![
            checkout(),
            BillingEvent::PaymentSucceeded { renewal: true },
            BillingEvent::PaymentSucceeded { renewal: false },
            BillingEvent::PaymentFailed,
            BillingEvent::SubscriptionCancelled,
        ]
    }

    fn applied(transition: Transition) -> AppliedTransition {
        match transition {
            Transition::Apply(t) => t,
            Transition::Ignore(reason) => panic!("expected transition, ignored: {}", reason),
        }
    }

    fn with_status(status: AccountStatus) -> Account {
        let mut account = pending_account();
        account.status = status;
        if status != AccountStatus::PendingPayment {
            account.billing_customer_ref = Some("cus_123".to_string());
            account.activated_at = Some(account.created_at);
        }
        account
    }

    #[test]
    fn checkout_activates_pending_account() {
        let account = pending_account();
        let now = Utc::now();

        let t = applied(account.transition(&checkout(), BillingPeriodLength::Monthly, now));

        assert_eq!(t.effect, TransitionEffect::Activated);
        assert_eq!(t.account.status, AccountStatus::Active);
        assert_eq!(t.account.payment_status, PaymentStatus::Paid);
        assert_eq!(t.account.activated_at, Some(now));
        assert_eq!(t.account.billing_customer_ref.as_deref(), Some("cus_123"));
        assert_eq!(t.account.billing_subscription_ref.as_deref(), Some("sub_123"));
        assert_eq!(t.account.period_start, now);
        assert_eq!(t.account.period_end, now + Duration::days(30));
        assert_eq!(t.new_period_key, Some(period_key(now)));
        assert_eq!(t.account.version, account.version);
    }

    #[test]
    fn renewal_rolls_period_forward_from_previous_end() {
        let account = with_status(AccountStatus::Active);
        let now = account.period_start + Duration::days(10);

        let t = applied(account.transition(
            &BillingEvent::PaymentSucceeded { renewal: true },
            BillingPeriodLength::Monthly,
            now,
        ));

        assert_eq!(t.effect, TransitionEffect::Renewed);
        assert_eq!(t.account.period_start, account.period_end);
        assert_eq!(t.account.period_end, account.period_end + Duration::days(30));
        assert_ne!(t.new_period_key, Some(account.current_period_key()));
    }

    #[test]
    fn recovery_after_long_lapse_rebases_period_on_now() {
        let account = with_status(AccountStatus::PaymentFailed);
        let now = account.period_end + Duration::days(90);

        let t = applied(account.transition(
            &BillingEvent::PaymentSucceeded { renewal: true },
            BillingPeriodLength::Monthly,
            now,
        ));

        assert_eq!(t.account.status, AccountStatus::Active);
        assert_eq!(t.account.period_start, now);
        assert_eq!(t.account.period_end, now + Duration::days(30));
    }

    #[test]
    fn first_invoice_does_not_roll_active_period() {
        let account = with_status(AccountStatus::Active);
        let t = account.transition(
            &BillingEvent::PaymentSucceeded { renewal: false },
            BillingPeriodLength::Monthly,
            Utc::now(),
        );
        assert!(matches!(t, Transition::Ignore(_)));
    }

    #[test]
    fn payment_failure_suspends_without_new_period() {
        let account = with_status(AccountStatus::Active);
        let t = applied(account.transition(
            &BillingEvent::PaymentFailed,
            BillingPeriodLength::Monthly,
            Utc::now(),
        ));

        assert_eq!(t.account.status, AccountStatus::PaymentFailed);
        assert_eq!(t.account.payment_status, PaymentStatus::Failed);
        assert_eq!(t.new_period_key, None);
        assert_eq!(t.account.period_start, account.period_start);
    }

    #[test]
    fn cancellation_sets_cancelled_at() {
        for status in [AccountStatus::Active, AccountStatus::PaymentFailed] {
            let account = with_status(status);
            let now = Utc::now();
            let t = applied(account.transition(
                &BillingEvent::SubscriptionCancelled,
                BillingPeriodLength::Monthly,
                now,
            ));
            assert_eq!(t.account.status, AccountStatus::Cancelled);
            assert_eq!(t.account.cancelled_at, Some(now));
            assert_eq!(t.new_period_key, None);
        }
    }

    #[test]
    fn cancelled_is_terminal() {
        let account = with_status(AccountStatus::Cancelled);
        for event in all_events() {
            assert_eq!(
                account.transition(&event, BillingPeriodLength::Monthly, Utc::now()),
                Transition::Ignore("account is cancelled")
            );
        }
    }

    #[test]
    fn pending_account_ignores_failure_and_cancellation() {
        let account = pending_account();
        for event in [BillingEvent::PaymentFailed, BillingEvent::SubscriptionCancelled] {
            assert_eq!(
                account.transition(&event, BillingPeriodLength::Monthly, Utc::now()),
                Transition::Ignore("account was never activated")
            );
        }
    }

    #[test]
    fn checkout_with_different_customer_is_ignored() {
        let mut account = pending_account();
        account.billing_customer_ref = Some("cus_other".to_string());

        let t = account.transition(&checkout(), BillingPeriodLength::Monthly, Utc::now());
        assert!(matches!(t, Transition::Ignore(_)));
    }

    #[test]
    fn transition_table_is_total_and_deterministic() {
        let now = Utc::now();
        for status in AccountStatus::iter() {
            let account = with_status(status);
            for event in all_events() {
                let first = account.transition(&event, BillingPeriodLength::Monthly, now);
                let second = account.transition(&event, BillingPeriodLength::Monthly, now);
                assert_eq!(first, second, "{:?} x {:?}", status, event);

                if let Transition::Apply(t) = first {
                    assert!(t.account.period_end > t.account.period_start);
                    if t.account.status == AccountStatus::Active {
                        assert!(t.account.activated_at.is_some());
                    }
                    assert!(t.account.billing_customer_ref.is_some());
                }
            }
        }
    }

    #[test]
    fn status_round_trips_through_strings() {
        use std::str::FromStr;
        assert_eq!(AccountStatus::PendingPayment.to_string(), "pending_payment");
        assert_eq!(
            AccountStatus::from_str("payment_failed").unwrap(),
            AccountStatus::PaymentFailed
        );
        assert_eq!(PaymentStatus::Paid.to_string(), "paid");
    }
}
