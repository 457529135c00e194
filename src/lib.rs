// Core modules
pub mod advisory;
pub mod api;
pub mod config;
pub mod error;
pub mod indicators;
pub mod market;
pub mod models;
pub mod persistence;

// Re-export commonly used types
pub use advisory::{DecisionEngine, RecommendationCache};
pub use config::Settings;
pub use error::{AdvisorError, Result};
pub use models::*;
