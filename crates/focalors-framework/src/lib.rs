//! # Focalors Framework
//!
//! The pieces that turn the core contracts into a running bridge:
//!
//! - [`Program`]: wires one backend to an ordered list of clients, fans
//!   inbound messages out to all of them and manages startup and shutdown.
//! - [`AccessManager`]: per-topic allow lists with in-band admin commands,
//!   built per topic by [`AccessManagerFactory`].
//! - [`FileCache`]: short-lived record of uploaded files.
//!
//! The `testing` module (feature `testing`) provides a recording
//! [`MockBackend`](testing::MockBackend).

pub mod access;
pub mod error;
pub mod file_cache;
pub mod program;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use access::{AccessManager, AccessManagerFactory};
pub use error::{AccessError, AccessResult};
pub use file_cache::FileCache;
pub use program::{ClientState, Program, ShutdownReport};
