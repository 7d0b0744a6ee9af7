//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → RuntimeConfig (validated, immutable)
//!     → DialOptions / ServerOptions / BreakerSettings via from_config
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Programmatic builders remain the primary surface; the file is for binaries

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{BreakerConfig, ClientConfig, ObservabilityConfig, RuntimeConfig, ServerConfig, ServerTargetConfig, TlsConfig};
pub use validation::{validate_config, ValidationError};
