//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize, environment overrides)
//!     → validation.rs (semantic checks)
//!     → TunnelConfig (validated, immutable)
//!     → cloned into the server, pool and client
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{apply_env_overrides, load_config, ConfigError};
pub use schema::{ClientConfig, ListenerConfig, ObservabilityConfig, PoolConfig, TlsConfig, TunnelConfig};
pub use validation::{validate_config, ValidationError};
