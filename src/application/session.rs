use crate::domain::Account;
use crate::infrastructure::{
    with_storage_timeout, AccountRepository, IdentityError, IdentityProvider, RepositoryError,
    Session,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Identity provider error: {0}")]
    Identity(IdentityError),
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
}

impl From<IdentityError> for SessionError {
    fn from(e: IdentityError) -> Self {
        match e {
            IdentityError::InvalidCredentials => SessionError::InvalidCredentials,
            other => SessionError::Identity(other),
        }
    }
}

/// Login and bearer-token authentication against the identity provider.
pub struct SessionService<A, I>
where
    A: AccountRepository,
    I: IdentityProvider,
{
    account_repo: Arc<A>,
    identity: Arc<I>,
    storage_timeout: Duration,
}

impl<A, I> SessionService<A, I>
where
    A: AccountRepository,
    I: IdentityProvider,
{
    pub fn new(account_repo: Arc<A>, identity: Arc<I>, storage_timeout: Duration) -> Self {
        Self {
            account_repo,
            identity,
            storage_timeout,
        }
    }

    pub async fn login(
        &self,
        email: &str,
        password: &str,
    ) -> Result<(Session, Account), SessionError> {
        let session = self
            .identity
            .verify_credential(email.trim(), password)
            .await?;
        let account = self.load(session.account_id).await?;
        Ok((session, account))
    }

    /// Account behind a bearer token. Identities without an account row are rejected.
    pub async fn authenticate(&self, access_token: &str) -> Result<Account, SessionError> {
        let account_id = self.identity.resolve_session(access_token).await?;
        self.load(account_id).await
    }

    async fn load(&self, account_id: uuid::Uuid) -> Result<Account, SessionError> {
        match with_storage_timeout(self.storage_timeout, self.account_repo.get_by_id(account_id))
            .await
        {
            Ok(account) => Ok(account),
            Err(RepositoryError::NotFound(_)) => {
                warn!(account_id = %account_id, "Identity has no account record");
                Err(SessionError::InvalidCredentials)
            }
            Err(e) => Err(e.into()),
        }
    }
}
