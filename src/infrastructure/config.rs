use crate::domain::{Plan, PlanCatalog, PlanCatalogError};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub server_host: String,
    pub server_port: u16,
    pub site_url: String,
    pub storage_timeout_ms: u64,

    // Stripe
    pub stripe_secret_key: String,
    pub stripe_webhook_secret: String,
    pub stripe_api_base: String,

    // Supabase auth
    pub supabase_url: String,
    pub supabase_service_key: String,
    pub supabase_anon_key: String,

    // Completion API
    pub openai_api_key: String,
    pub openai_model: String,
    pub openai_api_base: String,

    // WhatsApp notifications (Evolution API); disabled when any is missing
    pub evolution_api_url: Option<String>,
    pub evolution_api_key: Option<String>,
    pub evolution_instance: Option<String>,

    /// Plan catalog override. The built-in catalog is used when absent.
    #[serde(default)]
    pub plans: Option<Vec<Plan>>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::with_prefix("AURORA")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .set_default("server_host", "0.0.0.0")?
            .set_default("server_port", 8080)?
            .set_default("site_url", "https://aurora-ia.netlify.app")?
            .set_default("storage_timeout_ms", 5000)?
            .set_default("stripe_api_base", "https://api.stripe.com/v1")?
            .set_default("openai_model", "gpt-4o-mini")?
            .set_default("openai_api_base", "https://api.openai.com/v1")?
            .build()?;

        config.try_deserialize()
    }

    pub fn storage_timeout(&self) -> Duration {
        Duration::from_millis(self.storage_timeout_ms)
    }

    /// Build the plan catalog once at startup. Invalid catalogs abort startup.
    pub fn plan_catalog(&self) -> Result<PlanCatalog, PlanCatalogError> {
        match &self.plans {
            Some(plans) => PlanCatalog::new(plans.clone()),
            None => Ok(PlanCatalog::builtin()),
        }
    }
}
