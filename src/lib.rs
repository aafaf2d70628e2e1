//! Tour Bot — guided onboarding tours for chat guilds.

pub mod config;
pub mod error;
pub mod platform;
pub mod resolver;
pub mod store;
pub mod tour;

pub use config::BotConfig;
pub use error::{Error, Result};
