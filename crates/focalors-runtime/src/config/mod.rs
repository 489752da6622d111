//! Configuration for a Focalors process.
//!
//! Layered with figment: defaults, then files, then `FOCALORS_*`
//! environment variables. See [`loader`] for the search rules.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile};
pub use schema::{
    DEFAULT_CLIENTS, FocalorsConfig, LogFormat, LogLevel, LogOutput, LoggingConfig, StoreConfig,
    StoreKind,
};
pub use validation::validate_config;
