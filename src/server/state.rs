use crate::application::{
    EntitlementGate, NotificationDispatcher, QuestionService, RegistrationService, SessionService,
    WebhookReconciler,
};
use crate::domain::PlanCatalog;
use crate::infrastructure::{
    AppConfig, EvolutionEndpoint, OpenAiClient, PostgresAccountRepository,
    PostgresConversationRepository, PostgresUsageRepository, PostgresWebhookRepository, StripeClient, SupabaseIdentityClient,
    WhatsAppNotifier,
};
use anyhow::Context;
use sqlx::PgPool;
use std::sync::Arc;

pub type EntitlementGateType = EntitlementGate<PostgresUsageRepository>;

pub type RegistrationServiceType = RegistrationService<
    PostgresAccountRepository,
    SupabaseIdentityClient,
    StripeClient,
    WhatsAppNotifier,
>;

pub type SessionServiceType = SessionService<PostgresAccountRepository, SupabaseIdentityClient>;

pub type QuestionServiceType =
    QuestionService<PostgresUsageRepository, OpenAiClient, PostgresConversationRepository>;

pub type WebhookReconcilerType = WebhookReconciler<
    PostgresAccountRepository,
    PostgresUsageRepository,
    PostgresWebhookRepository,
    WhatsAppNotifier,
>;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub catalog: Arc<PlanCatalog>,
    pub gate: Arc<EntitlementGateType>,
    pub usage_repo: Arc<PostgresUsageRepository>,
    pub registration: Arc<RegistrationServiceType>,
    pub sessions: Arc<SessionServiceType>,
    pub questions: Arc<QuestionServiceType>,
    pub reconciler: Arc<WebhookReconcilerType>,
    pub webhook_secret: Arc<str>,
}

/// Build full state from config + an existing pool.
///
/// Intended for embedding into a larger service that already manages a `PgPool`.
pub async fn build_state_with_pool(
    config: AppConfig,
    pool: PgPool,
    run_migrations: bool,
) -> anyhow::Result<AppState> {
    if run_migrations {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("run migrations")?;
    }

    let catalog = Arc::new(config.plan_catalog().context("load plan catalog")?);
    let storage_timeout = config.storage_timeout();

    let identity = Arc::new(
        SupabaseIdentityClient::new(
            &config.supabase_url,
            &config.supabase_service_key,
            &config.supabase_anon_key,
        )
        .context("init identity client")?,
    );
    let payments = Arc::new(
        StripeClient::new(&config.stripe_secret_key, config.stripe_api_base.clone())
            .context("init Stripe client")?,
    );
    let completions = Arc::new(
        OpenAiClient::new(
            &config.openai_api_key,
            config.openai_api_base.clone(),
            config.openai_model.clone(),
        )
        .context("init completion client")?,
    );

    let endpoint = EvolutionEndpoint::from_parts(
        config.evolution_api_url.as_ref(),
        config.evolution_api_key.as_ref(),
        config.evolution_instance.as_ref(),
    );
    if endpoint.is_none() {
        tracing::warn!("Evolution API not configured, WhatsApp notifications disabled");
    }
    let notifier = Arc::new(WhatsAppNotifier::new(endpoint).context("init WhatsApp notifier")?);
    let notifications = Arc::new(NotificationDispatcher::new(
        notifier,
        config.site_url.clone(),
    ));

    let account_repo = Arc::new(PostgresAccountRepository::new(pool.clone()));
    let usage_repo = Arc::new(PostgresUsageRepository::new(pool.clone()));
    let webhook_repo = Arc::new(PostgresWebhookRepository::new(pool.clone()));
    let conversation_repo = Arc::new(PostgresConversationRepository::new(pool.clone()));

    let gate = Arc::new(EntitlementGate::new(
        usage_repo.clone(),
        catalog.clone(),
        storage_timeout,
    ));

    let registration = Arc::new(RegistrationService::new(
        account_repo.clone(),
        identity.clone(),
        payments,
        notifications.clone(),
        catalog.clone(),
        config.site_url.clone(),
        storage_timeout,
    ));

    let sessions = Arc::new(SessionService::new(
        account_repo.clone(),
        identity,
        storage_timeout,
    ));

    let questions = Arc::new(QuestionService::new(
        gate.clone(),
        completions,
        conversation_repo,
        storage_timeout,
    ));

    let reconciler = Arc::new(WebhookReconciler::new(
        account_repo,
        usage_repo.clone(),
        webhook_repo,
        notifications,
        catalog.clone(),
        storage_timeout,
    ));

    Ok(AppState {
        pool,
        catalog,
        gate,
        usage_repo,
        registration,
        sessions,
        questions,
        reconciler,
        webhook_secret: Arc::from(config.stripe_webhook_secret.as_str()),
    })
}

/// Build state for the standalone server.
///
/// Creates the `PgPool`, runs migrations, and wires repositories/services.
pub async fn build_state_from_env(config: AppConfig) -> anyhow::Result<AppState> {
    let pool = PgPool::connect(&config.database_url)
        .await
        .context("connect database")?;
    build_state_with_pool(config, pool, true).await
}
