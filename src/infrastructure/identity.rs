use crate::infrastructure::http_retry::{
    build_client, error_body, header_value, send_with_retry, TransportError,
};
use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("Account already exists")]
    AlreadyExists,
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Identity provider error: {0}")]
    Provider(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountMetadata {
    pub nome: String,
    pub telefone: Option<String>,
    pub plano: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub account_id: Uuid,
    pub access_token: String,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn create_account(
        &self,
        email: &str,
        credential: &str,
        metadata: &AccountMetadata,
    ) -> Result<Uuid, IdentityError>;
    async fn verify_credential(&self, email: &str, credential: &str)
        -> Result<Session, IdentityError>;
    /// Resolve a bearer access token to the account it was issued for.
    async fn resolve_session(&self, access_token: &str) -> Result<Uuid, IdentityError>;
    /// Compensation for a registration that failed after the identity was created.
    async fn delete_account(&self, account_id: Uuid) -> Result<(), IdentityError>;
}

/// Supabase GoTrue auth API.
pub struct SupabaseIdentityClient {
    admin: Client,
    public: Client,
    base_url: String,
}

#[derive(Deserialize)]
struct UserResponse {
    id: Uuid,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    user: UserResponse,
}

impl SupabaseIdentityClient {
    pub fn new(
        supabase_url: &str,
        service_key: &str,
        anon_key: &str,
    ) -> Result<Self, IdentityError> {
        let mut admin_headers = header::HeaderMap::new();
        admin_headers.insert("apikey", header_value(service_key)?);
        admin_headers.insert(
            header::AUTHORIZATION,
            header_value(&format!("Bearer {}", service_key))?,
        );

        let mut public_headers = header::HeaderMap::new();
        public_headers.insert("apikey", header_value(anon_key)?);

        Ok(Self {
            admin: build_client(admin_headers, Duration::from_secs(15))?,
            public: build_client(public_headers, Duration::from_secs(15))?,
            base_url: format!("{}/auth/v1", supabase_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl IdentityProvider for SupabaseIdentityClient {
    async fn create_account(
        &self,
        email: &str,
        credential: &str,
        metadata: &AccountMetadata,
    ) -> Result<Uuid, IdentityError> {
        let body = json!({
            "email": email,
            "password": credential,
            "email_confirm": true,
            "user_metadata": metadata,
        });

        let resp = send_with_retry(
            || {
                self.admin
                    .post(format!("{}/admin/users", self.base_url))
                    .json(&body)
            },
            1,
        )
        .await?;

        match resp.status() {
            s if s.is_success() => {
                let user: UserResponse = resp
                    .json()
                    .await
                    .map_err(|e| IdentityError::InvalidResponse(e.to_string()))?;
                Ok(user.id)
            }
            StatusCode::UNPROCESSABLE_ENTITY | StatusCode::CONFLICT => {
                Err(IdentityError::AlreadyExists)
            }
            _ => Err(IdentityError::Provider(error_body(resp).await)),
        }
    }

    async fn verify_credential(
        &self,
        email: &str,
        credential: &str,
    ) -> Result<Session, IdentityError> {
        let body = json!({ "email": email, "password": credential });

        let resp = send_with_retry(
            || {
                self.public
                    .post(format!("{}/token?grant_type=password", self.base_url))
                    .json(&body)
            },
            2,
        )
        .await?;

        match resp.status() {
            s if s.is_success() => {
                let token: TokenResponse = resp
                    .json()
                    .await
                    .map_err(|e| IdentityError::InvalidResponse(e.to_string()))?;
                Ok(Session {
                    account_id: token.user.id,
                    access_token: token.access_token,
                })
            }
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED => {
                Err(IdentityError::InvalidCredentials)
            }
            _ => Err(IdentityError::Provider(error_body(resp).await)),
        }
    }

    async fn resolve_session(&self, access_token: &str) -> Result<Uuid, IdentityError> {
        let resp = send_with_retry(
            || {
                self.public
                    .get(format!("{}/user", self.base_url))
                    .bearer_auth(access_token)
            },
            2,
        )
        .await?;

        match resp.status() {
            s if s.is_success() => {
                let user: UserResponse = resp
                    .json()
                    .await
                    .map_err(|e| IdentityError::InvalidResponse(e.to_string()))?;
                Ok(user.id)
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(IdentityError::InvalidCredentials)
            }
            _ => Err(IdentityError::Provider(error_body(resp).await)),
        }
    }

    async fn delete_account(&self, account_id: Uuid) -> Result<(), IdentityError> {
        let resp = send_with_retry(
            || {
                self.admin
                    .delete(format!("{}/admin/users/{}", self.base_url, account_id))
            },
            3,
        )
        .await?;

        if resp.status().is_success() || resp.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }

        let body = error_body(resp).await;
        warn!(account_id = %account_id, error = %body, "Failed to delete identity");
        Err(IdentityError::Provider(body))
    }
}

impl std::fmt::Debug for SupabaseIdentityClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseIdentityClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}
