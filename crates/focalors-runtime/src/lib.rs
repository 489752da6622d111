//! Focalors Runtime - process wiring for the Focalors chat bridge.
//!
//! This crate provides:
//! - Layered configuration (`FocalorsConfig`, `ConfigLoader`)
//! - Logging setup (`LoggingBuilder`)
//! - Lifecycle orchestration (`FocalorsRuntime`)
//!
//! ```ignore
//! use focalors_runtime::FocalorsRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = FocalorsRuntime::builder().build()?;
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Feature Flags
//!
//! - `toml-config` / `yaml-config`: configuration file formats
//! - `json-log`: JSON log lines
//! - `redis`: the Redis store backend

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

pub use config::{ConfigError, ConfigLoader, ConfigResult, FocalorsConfig, Profile};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::LoggingBuilder;
pub use runtime::{FocalorsRuntime, RuntimeBuilder, build_program, build_store};

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
