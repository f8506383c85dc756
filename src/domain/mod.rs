pub mod account;
pub mod conversation;
pub mod plan;
pub mod usage;
pub mod webhook;

pub use account::*;
pub use conversation::*;
pub use plan::*;
pub use usage::*;
pub use webhook::*;
