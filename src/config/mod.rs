//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → LinkConfig (validated, immutable)
//!     → CallExecutor::from_config / downstream clients
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{from_toml, load_config, ConfigError};
pub use schema::{
    BreakerConfig, DeadlineConfig, DownstreamConfig, LinkConfig, LogFormat, ObservabilityConfig,
    RetryConfig,
};
pub use validation::ValidationError;
