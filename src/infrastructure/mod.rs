pub mod completion;
pub mod config;
pub mod http_retry;
pub mod identity;
pub mod notifier;
pub mod postgres_conversation_repo;
pub mod postgres_usage_repo;
pub mod postgres_webhook_repo;
pub mod repository;
pub mod signature;
pub mod stripe;

pub use completion::*;
pub use config::*;
pub use http_retry::TransportError;
pub use identity::*;
pub use notifier::*;
pub use postgres_conversation_repo::*;
pub use postgres_usage_repo::*;
pub use postgres_webhook_repo::*;
pub use repository::*;
pub use signature::*;
pub use stripe::*;
