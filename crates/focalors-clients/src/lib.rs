//! # Focalors Clients
//!
//! The feature handlers of the bridge. Each one implements
//! [`Client`](focalors_core::Client), embeds an
//! [`Outbox`](focalors_core::Outbox) and is independent of the others:
//!
//! | handler               | topic    | commands                                  |
//! |-----------------------|----------|-------------------------------------------|
//! | [`SystemClient`]      | `system` | `/shutdown`                               |
//! | [`GptClient`]         | `gpt`    | mentions, replies, `/gpt`, private text   |
//! | [`DalleClient`]       | `dalle`  | `/img [hd] [natural] <prompt>`            |
//! | [`JandanClient`]      | `jandan` | `#煎蛋`, `#煎蛋 top N`, timer toggles     |
//! | [`RandomAbyssClient`] | `abyss`  | `#随机深渊杯...`                          |
//! | [`GifClient`]         |          | `/gif <name> <lines>`                     |
//!
//! Upstream HTTP services live in [`providers`] behind traits, so every
//! handler can be built with a fake.

pub mod abyss;
pub mod dalle;
pub mod gif;
pub mod gpt;
pub mod jandan;
pub mod providers;
pub mod settings;
pub mod system;
mod util;

pub use abyss::RandomAbyssClient;
pub use dalle::DalleClient;
pub use gif::GifClient;
pub use gpt::GptClient;
pub use jandan::JandanClient;
pub use providers::{ProviderError, ProviderResult};
pub use settings::{JandanSettings, OpenAiSettings};
pub use system::SystemClient;
pub use util::get_prompt;
