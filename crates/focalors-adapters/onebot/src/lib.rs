//! # Focalors OneBot Adapter
//!
//! A [`Backend`](focalors_core::Backend) for OneBot 12 implementations,
//! chiefly ComWeChat, reached as a WebSocket client.
//!
//! - [`config`]: connection, timeout and reconnect settings.
//! - [`model`]: action and event frames.
//! - [`OneBotBackend`]: the backend itself. Actions are correlated by
//!   `echo`; inbound messages are queued and handed to the subscriber in
//!   arrival order.
//!
//! ```rust,ignore
//! let backend = Arc::new(OneBotBackend::new(config.backend.clone(), store.clone()));
//! backend.start().await?;
//! ```

mod api;
mod backend;
pub mod config;
mod connection;
pub mod model;

pub use backend::OneBotBackend;
pub use config::{OneBotConfig, ReconnectConfig};
