use crate::domain::Plan;
use crate::infrastructure::http_retry::{
    build_client, error_body, header_value, send_with_retry, TransportError,
};
use async_trait::async_trait;
use reqwest::{header, Client};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("Checkout session creation failed: {0}")]
    CheckoutFailed(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone)]
pub struct CheckoutRequest<'a> {
    pub account_id: Uuid,
    pub email: &'a str,
    pub name: &'a str,
    pub phone: Option<&'a str>,
    pub plan: &'a Plan,
    pub success_url: String,
    pub cancel_url: String,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Create a hosted checkout session and return its URL.
    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest<'_>,
    ) -> Result<String, PaymentError>;
}

pub struct StripeClient {
    client: Client,
    base_url: String,
}

#[derive(Deserialize)]
struct CheckoutSessionResponse {
    url: Option<String>,
}

impl StripeClient {
    pub fn new(secret_key: &str, base_url: String) -> Result<Self, PaymentError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            header_value(&format!("Bearer {}", secret_key))?,
        );

        Ok(Self {
            client: build_client(headers, Duration::from_secs(30))?,
            base_url,
        })
    }
}

fn checkout_form(request: &CheckoutRequest<'_>) -> Vec<(&'static str, String)> {
    let account_id = request.account_id.to_string();
    let mut form = vec![
        ("mode", "subscription".to_string()),
        ("success_url", request.success_url.clone()),
        ("cancel_url", request.cancel_url.clone()),
        ("payment_method_types[]", "card".to_string()),
        ("line_items[0][price]", request.plan.price_ref.clone()),
        ("line_items[0][quantity]", "1".to_string()),
        ("customer_email", request.email.to_string()),
        ("client_reference_id", account_id.clone()),
        ("metadata[user_id]", account_id.clone()),
        ("metadata[plano]", request.plan.id.clone()),
        ("metadata[nome]", request.name.to_string()),
        ("subscription_data[metadata][user_id]", account_id),
        ("subscription_data[metadata][plano]", request.plan.id.clone()),
    ];
    if let Some(phone) = request.phone {
        form.push(("metadata[telefone]", phone.to_string()));
    }
    form
}

#[async_trait]
impl PaymentProvider for StripeClient {
    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest<'_>,
    ) -> Result<String, PaymentError> {
        let form = checkout_form(request);
        // One open checkout per account and plan; retries reuse the same session.
        let idempotency_key = format!("checkout-{}-{}", request.account_id, request.plan.id);

        let resp = send_with_retry(
            || {
                self.client
                    .post(format!("{}/checkout/sessions", self.base_url))
                    .header("Idempotency-Key", idempotency_key.as_str())
                    .form(&form)
            },
            3,
        )
        .await?;

        if !resp.status().is_success() {
            return Err(PaymentError::CheckoutFailed(error_body(resp).await));
        }

        let session: CheckoutSessionResponse = resp
            .json()
            .await
            .map_err(|e| PaymentError::InvalidResponse(e.to_string()))?;

        session
            .url
            .ok_or_else(|| PaymentError::InvalidResponse("Missing url field".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PlanCatalog;

    #[test]
    fn checkout_form_references_account_and_plan() {
        let catalog = PlanCatalog::builtin();
        let plan = catalog.lookup("completo").unwrap();
        let account_id = Uuid::new_v4();
        let request = CheckoutRequest {
            account_id,
            email: "mae@example.com",
            name: "Ana",
            phone: None,
            plan,
            success_url: "https://site/sucesso".to_string(),
            cancel_url: "https://site/".to_string(),
        };

        let form = checkout_form(&request);
        let get = |key: &str| {
            form.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.as_str())
        };

        assert_eq!(get("client_reference_id"), Some(account_id.to_string().as_str()));
        assert_eq!(get("line_items[0][price]"), Some("price_completo_monthly"));
        assert_eq!(get("mode"), Some("subscription"));
        assert_eq!(get("metadata[telefone]"), None);
    }
}
