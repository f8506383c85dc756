use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use super::account::BillingEvent;

#[derive(Error, Debug, PartialEq)]
pub enum WebhookParseError {
    #[error("Malformed event payload: {0}")]
    Malformed(String),
    #[error("Missing field: {0}")]
    MissingField(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEventKind {
    CheckoutCompleted,
    PaymentSucceeded,
    PaymentFailed,
    SubscriptionCancelled,
    Other(String),
}

impl WebhookEventKind {
    pub fn from_provider_type(event_type: &str) -> Self {
        match event_type {
            "checkout.session.completed" => WebhookEventKind::CheckoutCompleted,
            "invoice.payment_succeeded" => WebhookEventKind::PaymentSucceeded,
            "invoice.payment_failed" => WebhookEventKind::PaymentFailed,
            "customer.subscription.deleted" => WebhookEventKind::SubscriptionCancelled,
            other => WebhookEventKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            WebhookEventKind::CheckoutCompleted => "checkout_completed",
            WebhookEventKind::PaymentSucceeded => "payment_succeeded",
            WebhookEventKind::PaymentFailed => "payment_failed",
            WebhookEventKind::SubscriptionCancelled => "subscription_cancelled",
            WebhookEventKind::Other(t) => t.as_str(),
        }
    }
}

/// Billing provider event, as received on the webhook endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookEvent {
    pub provider_event_id: String,
    pub kind: WebhookEventKind,
    pub customer_ref: Option<String>,
    pub subscription_ref: Option<String>,
    /// Our account id, echoed back by checkout sessions (`client_reference_id`).
    pub account_ref: Option<Uuid>,
    pub billing_reason: Option<String>,
    pub payload: Value,
}

#[derive(Deserialize)]
struct StripeEnvelope {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: StripeData,
}

#[derive(Deserialize)]
struct StripeData {
    object: Value,
}

impl WebhookEvent {
    /// Parse a Stripe event body. Signature verification must happen before this.
    pub fn from_stripe_payload(body: &[u8]) -> Result<Self, WebhookParseError> {
        let envelope: StripeEnvelope = serde_json::from_slice(body)
            .map_err(|e| WebhookParseError::Malformed(e.to_string()))?;

        if envelope.id.is_empty() {
            return Err(WebhookParseError::MissingField("id"));
        }

        let kind = WebhookEventKind::from_provider_type(&envelope.event_type);
        let object = &envelope.data.object;

        let customer_ref = string_field(object, "customer");
        let subscription_ref = match kind {
            // On subscription objects the subscription id is the object id.
            WebhookEventKind::SubscriptionCancelled => string_field(object, "id"),
            _ => string_field(object, "subscription"),
        };
        let account_ref = string_field(object, "client_reference_id")
            .or_else(|| {
                object
                    .get("metadata")
                    .and_then(|m| m.get("user_id"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .and_then(|s| Uuid::parse_str(&s).ok());
        let billing_reason = string_field(object, "billing_reason");

        if !matches!(kind, WebhookEventKind::Other(_)) && customer_ref.is_none() {
            return Err(WebhookParseError::MissingField("data.object.customer"));
        }

        Ok(Self {
            provider_event_id: envelope.id,
            kind,
            customer_ref,
            subscription_ref,
            account_ref,
            billing_reason,
            payload: envelope.data.object,
        })
    }

    /// State machine input for this event; `None` for event types the service does not handle.
    pub fn billing_event(&self) -> Option<BillingEvent> {
        match &self.kind {
            WebhookEventKind::CheckoutCompleted => Some(BillingEvent::CheckoutCompleted {
                customer_ref: self.customer_ref.clone()?,
                subscription_ref: self.subscription_ref.clone(),
            }),
            WebhookEventKind::PaymentSucceeded => Some(BillingEvent::PaymentSucceeded {
                renewal: self.billing_reason.as_deref() != Some("subscription_create"),
            }),
            WebhookEventKind::PaymentFailed => Some(BillingEvent::PaymentFailed),
            WebhookEventKind::SubscriptionCancelled => Some(BillingEvent::SubscriptionCancelled),
            WebhookEventKind::Other(_) => None,
        }
    }
}

fn string_field(object: &Value, key: &str) -> Option<String> {
    object
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Dedup ledger entry for a processed provider event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessedEvent {
    pub provider_event_id: String,
    pub event_type: String,
    pub account_id: Option<Uuid>,
    pub outcome: String,
    pub processed_at: DateTime<Utc>,
}
