use crate::application::notifications::NotificationDispatcher;
use crate::domain::{Account, Plan, PlanCatalog};
use crate::infrastructure::{
    with_storage_timeout, AccountMetadata, AccountRepository, CheckoutRequest, IdentityError,
    IdentityProvider, Notifier, PaymentError, PaymentProvider, RepositoryError,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;
use validator::Validate;

#[derive(Error, Debug)]
pub enum RegistrationError {
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Unknown plan: {0}")]
    UnknownPlan(String),
    #[error("Email already registered")]
    AlreadyRegistered,
    #[error("Identity provider error: {0}")]
    Identity(IdentityError),
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("Checkout error: {0}")]
    Checkout(#[from] PaymentError),
}

impl From<IdentityError> for RegistrationError {
    fn from(e: IdentityError) -> Self {
        match e {
            IdentityError::AlreadyExists => RegistrationError::AlreadyRegistered,
            other => RegistrationError::Identity(other),
        }
    }
}

/// Sign-up payload as clients send it. Portuguese field names are accepted as aliases.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistrationInput {
    #[serde(default, alias = "nome")]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, alias = "telefone")]
    pub phone: Option<String>,
    #[serde(default, alias = "senha", alias = "credential")]
    pub password: Option<String>,
    #[serde(default, alias = "plano", alias = "plan")]
    pub plan_id: Option<String>,
}

/// Registration after normalization; every field has been trimmed and checked.
#[derive(Debug, Clone, PartialEq, Validate)]
pub struct NewRegistration {
    #[validate(length(min = 2, max = 120, message = "name must have 2 to 120 characters"))]
    pub name: String,
    #[validate(email(message = "email is invalid"))]
    pub email: String,
    #[validate(length(min = 10, max = 20, message = "phone must have 10 to 20 characters"))]
    pub phone: Option<String>,
    #[validate(length(min = 6, message = "password must have at least 6 characters"))]
    pub password: String,
    #[validate(length(min = 1, message = "plan is required"))]
    pub plan_id: String,
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl RegistrationInput {
    pub fn normalize(self) -> Result<NewRegistration, RegistrationError> {
        let required = |value: Option<String>, field: &str| {
            trimmed(value)
                .ok_or_else(|| RegistrationError::Validation(format!("{} is required", field)))
        };

        let registration = NewRegistration {
            name: required(self.name, "name")?,
            email: required(self.email, "email")?.to_lowercase(),
            phone: trimmed(self.phone),
            // Passwords are taken verbatim.
            password: self
                .password
                .filter(|p| !p.is_empty())
                .ok_or_else(|| RegistrationError::Validation("password is required".to_string()))?,
            plan_id: required(self.plan_id, "plan")?.to_lowercase(),
        };

        registration
            .validate()
            .map_err(|e| RegistrationError::Validation(e.to_string()))?;

        Ok(registration)
    }
}

#[derive(Debug, Clone)]
pub struct RegistrationOutcome {
    pub account: Account,
    pub plan: Plan,
    pub checkout_url: String,
}

pub struct RegistrationService<A, I, P, N>
where
    A: AccountRepository,
    I: IdentityProvider,
    P: PaymentProvider,
    N: Notifier + 'static,
{
    account_repo: Arc<A>,
    identity: Arc<I>,
    payments: Arc<P>,
    notifications: Arc<NotificationDispatcher<N>>,
    catalog: Arc<PlanCatalog>,
    site_url: String,
    storage_timeout: Duration,
}

impl<A, I, P, N> RegistrationService<A, I, P, N>
where
    A: AccountRepository,
    I: IdentityProvider,
    P: PaymentProvider,
    N: Notifier + 'static,
{
    pub fn new(
        account_repo: Arc<A>,
        identity: Arc<I>,
        payments: Arc<P>,
        notifications: Arc<NotificationDispatcher<N>>,
        catalog: Arc<PlanCatalog>,
        site_url: String,
        storage_timeout: Duration,
    ) -> Self {
        Self {
            account_repo,
            identity,
            payments,
            notifications,
            catalog,
            site_url: site_url.trim_end_matches('/').to_string(),
            storage_timeout,
        }
    }

    /// Create identity and account (pending payment), then open a checkout session.
    ///
    /// Any failure after the identity exists removes what was created so the email can
    /// register again.
    pub async fn register(
        &self,
        input: RegistrationInput,
    ) -> Result<RegistrationOutcome, RegistrationError> {
        let registration = input.normalize()?;

        let plan = self
            .catalog
            .lookup(&registration.plan_id)
            .map_err(|_| RegistrationError::UnknownPlan(registration.plan_id.clone()))?
            .clone();

        if with_storage_timeout(
            self.storage_timeout,
            self.account_repo.get_by_email(&registration.email),
        )
        .await?
        .is_some()
        {
            return Err(RegistrationError::AlreadyRegistered);
        }

        let metadata = AccountMetadata {
            nome: registration.name.clone(),
            telefone: registration.phone.clone(),
            plano: plan.id.clone(),
        };
        let account_id = self
            .identity
            .create_account(&registration.email, &registration.password, &metadata)
            .await?;
        info!(account_id = %account_id, plan_id = %plan.id, "Created identity");

        let account = Account::new(
            account_id,
            registration.email,
            registration.name,
            registration.phone,
            &plan,
        );

        if let Err(e) =
            with_storage_timeout(self.storage_timeout, self.account_repo.create(&account)).await
        {
            error!(account_id = %account_id, "Failed to store account: {}", e);
            self.compensate(account_id, false).await;
            return Err(match e {
                RepositoryError::AlreadyExists(_) => RegistrationError::AlreadyRegistered,
                other => other.into(),
            });
        }

        let request = CheckoutRequest {
            account_id,
            email: &account.email,
            name: &account.name,
            phone: account.phone.as_deref(),
            plan: &plan,
            success_url: format!("{}/sucesso?session_id={{CHECKOUT_SESSION_ID}}", self.site_url),
            cancel_url: format!("{}/?error=payment_cancelled", self.site_url),
        };

        let checkout_url = match self.payments.create_checkout_session(&request).await {
            Ok(url) => url,
            Err(e) => {
                error!(account_id = %account_id, "Failed to create checkout session: {}", e);
                self.compensate(account_id, true).await;
                return Err(e.into());
            }
        };

        info!(account_id = %account_id, "Registration complete, awaiting payment");
        self.notifications.dispatch_welcome(&account, &plan);

        Ok(RegistrationOutcome {
            account,
            plan,
            checkout_url,
        })
    }

    async fn compensate(&self, account_id: Uuid, account_stored: bool) {
        if account_stored {
            if let Err(e) =
                with_storage_timeout(self.storage_timeout, self.account_repo.delete(account_id))
                    .await
            {
                warn!(account_id = %account_id, "Compensation failed to delete account: {}", e);
            }
        }
        if let Err(e) = self.identity.delete_account(account_id).await {
            warn!(account_id = %account_id, "Compensation failed to delete identity: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input(value: serde_json::Value) -> RegistrationInput {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn accepts_portuguese_field_names() {
        let registration = input(json!({
            "nome": " Ana Souza ",
            "email": "Ana@Example.com",
            "telefone": "11987654321",
            "senha": "segredo123",
            "plano": "Essencial"
        }))
        .normalize()
        .unwrap();

        assert_eq!(registration.name, "Ana Souza");
        assert_eq!(registration.email, "ana@example.com");
        assert_eq!(registration.phone.as_deref(), Some("11987654321"));
        assert_eq!(registration.plan_id, "essencial");
    }

    #[test]
    fn accepts_english_field_names() {
        let registration = input(json!({
            "name": "Ana",
            "email": "ana@example.com",
            "phone": "  ",
            "password": "segredo123",
            "plan_id": "completo"
        }))
        .normalize()
        .unwrap();

        assert_eq!(registration.phone, None);
        assert_eq!(registration.plan_id, "completo");
    }

    #[test]
    fn rejects_missing_and_invalid_fields() {
        let missing = input(json!({ "email": "ana@example.com", "senha": "x", "plano": "a" }));
        assert!(matches!(
            missing.normalize(),
            Err(RegistrationError::Validation(msg)) if msg.contains("name")
        ));

        let bad_email = input(json!({
            "nome": "Ana", "email": "not-an-email", "senha": "segredo123", "plano": "essencial"
        }));
        assert!(matches!(
            bad_email.normalize(),
            Err(RegistrationError::Validation(_))
        ));

        let short_password = input(json!({
            "nome": "Ana", "email": "ana@example.com", "senha": "123", "plano": "essencial"
        }));
        assert!(matches!(
            short_password.normalize(),
            Err(RegistrationError::Validation(_))
        ));
    }

    #[test]
    fn identity_conflict_maps_to_already_registered() {
        let err: RegistrationError = IdentityError::AlreadyExists.into();
        assert!(matches!(err, RegistrationError::AlreadyRegistered));
    }
}
