//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ServerConfig (validated, immutable)
//!     → consumed by ServerBuilder at start
//! ```
//!
//! # Design Decisions
//! - Config is immutable once the server starts; only the TLS identity can be
//!   replaced at runtime (see `net::tls`)
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    LimitsConfig, ListenerConfig, ObservabilityConfig, ResourceConfig, ServerConfig, TlsConfig,
    WorkerConfig,
};
pub use validation::{validate_config, ValidationError};
