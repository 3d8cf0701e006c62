//! Usage: Infrastructure adapters (persistence, configuration, logging).

pub mod logging;
pub mod settings;
pub mod token_store;
