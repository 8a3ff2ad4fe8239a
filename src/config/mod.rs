//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! HandlerConfig built in code, or config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → HandlerConfig (validated, immutable)
//!     → AgentConfig forwarded to the connection pool and TLS layer
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - TLS overrides (e.g. disabling certificate checks in tests) are injected
//!   per handler, never read from the process environment

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{AgentConfig, HandlerConfig, ObservabilityConfig, TlsOptions};
pub use validation::{validate_config, ValidationError};
