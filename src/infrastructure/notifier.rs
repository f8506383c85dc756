use crate::infrastructure::http_retry::{
    build_client, error_body, header_value, send_with_retry, TransportError,
};
use async_trait::async_trait;
use reqwest::{header, Client};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("Notification rejected: {0}")]
    Rejected(String),
    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, recipient: &str, message: &str) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone)]
pub struct EvolutionEndpoint {
    pub url: String,
    pub api_key: String,
    pub instance: String,
}

impl EvolutionEndpoint {
    /// All three settings are required; any missing one disables delivery.
    pub fn from_parts(
        url: Option<&String>,
        api_key: Option<&String>,
        instance: Option<&String>,
    ) -> Option<Self> {
        Some(Self {
            url: url?.trim_end_matches('/').to_string(),
            api_key: api_key?.clone(),
            instance: instance?.clone(),
        })
    }
}

/// WhatsApp delivery through the Evolution API.
pub struct WhatsAppNotifier {
    client: Client,
    endpoint: Option<EvolutionEndpoint>,
}

impl WhatsAppNotifier {
    pub fn new(endpoint: Option<EvolutionEndpoint>) -> Result<Self, NotifyError> {
        let mut headers = header::HeaderMap::new();
        if let Some(endpoint) = &endpoint {
            headers.insert("apikey", header_value(&endpoint.api_key)?);
        }

        Ok(Self {
            client: build_client(headers, Duration::from_secs(10))?,
            endpoint,
        })
    }
}

/// Digits only, with the Brazilian country code prefixed when absent.
pub fn normalize_recipient(phone: &str) -> Result<String, NotifyError> {
    let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    match digits.len() {
        10 | 11 => Ok(format!("55{}", digits)),
        12 | 13 if digits.starts_with("55") => Ok(digits),
        _ => Err(NotifyError::InvalidRecipient(phone.to_string())),
    }
}

#[async_trait]
impl Notifier for WhatsAppNotifier {
    async fn send(&self, recipient: &str, message: &str) -> Result<(), NotifyError> {
        let Some(endpoint) = &self.endpoint else {
            debug!("WhatsApp delivery disabled, dropping notification");
            return Ok(());
        };

        let number = normalize_recipient(recipient)?;
        let body = json!({ "number": number, "text": message });

        let resp = send_with_retry(
            || {
                self.client
                    .post(format!(
                        "{}/message/sendText/{}",
                        endpoint.url, endpoint.instance
                    ))
                    .json(&body)
            },
            2,
        )
        .await?;

        if !resp.status().is_success() {
            return Err(NotifyError::Rejected(error_body(resp).await));
        }

        info!(recipient = %number, "WhatsApp notification sent");
        Ok(())
    }
}
