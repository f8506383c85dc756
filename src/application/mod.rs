pub mod entitlement;
pub mod notifications;
pub mod questions;
pub mod reconciler;
pub mod registration;
pub mod session;

pub use entitlement::*;
pub use notifications::*;
pub use questions::*;
pub use reconciler::*;
pub use registration::*;
pub use session::*;
