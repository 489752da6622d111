//! # Focalors
//!
//! A WeChat chat bridge: one backend connection, many independent handlers.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌─────────┐     ┌──────────────────────┐
//! │   Backend    │────▶│ Program │────▶│ SystemClient         │──┐
//! │  (OneBot WS) │     │         │────▶│ GptClient            │──┤
//! └──────────────┘     └─────────┘────▶│ JandanClient ...     │──┤
//!        ▲                             └──────────────────────┘  │
//!        └───────────────────── outbox ──────────────────────────┘
//! ```
//!
//! - **Backend**: the chat platform connection (`focalors-adapter-onebot`)
//! - **Program**: broadcasts each inbound message to every active handler
//! - **Clients**: feature handlers, gated per topic by an `AccessManager`
//! - **Store**: shared key-value state (memory or Redis)
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use focalors::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = FocalorsRuntime::builder().profile("production").build()?;
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config` (default), `yaml-config`: configuration file formats
//! - `redis` (default): the Redis store
//! - `json-log`: JSON log lines

pub use focalors_adapter_onebot as onebot;
pub use focalors_clients as clients;
pub use focalors_core as core;
pub use focalors_framework as framework;
pub use focalors_runtime as runtime;
pub use focalors_store as store;

/// Prelude module for convenient imports.
pub mod prelude {
    // Runtime - main entry point
    pub use focalors_runtime::{FocalorsConfig, FocalorsRuntime, RuntimeBuilder};

    // Core traits for custom handlers and backends
    pub use focalors_core::{
        Backend, BoxedBackend, BoxedClient, Client, ClientError, ClientResult, Outbox, async_trait,
    };

    // Message model
    pub use focalors_core::{Message, Segment, Target};

    // Composition
    pub use focalors_framework::{AccessManager, AccessManagerFactory, Program};
    pub use focalors_store::Store;
}
