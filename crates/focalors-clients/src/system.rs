//! Process control commands.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use focalors_core::{BoxedBackend, Client, ClientResult, Message, Outbox, Target, match_pattern};
use focalors_framework::AccessManager;

static SHUTDOWN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/shutdown$").expect("shutdown pattern is valid"));

/// Handles `/shutdown` sent in private chat by an authorized user.
///
/// Stops the backend, then cancels `shutdown` so the process exits.
pub struct SystemClient {
    backend: BoxedBackend,
    access: Arc<AccessManager>,
    shutdown: CancellationToken,
    outbox: Outbox,
}

impl SystemClient {
    pub const TOPIC: &'static str = "system";

    pub fn new(backend: BoxedBackend, access: Arc<AccessManager>, shutdown: CancellationToken) -> Self {
        Self {
            backend,
            access,
            shutdown,
            outbox: Outbox::new(),
        }
    }
}

#[async_trait]
impl Client for SystemClient {
    fn name(&self) -> &'static str {
        "system"
    }

    async fn receive(&self, message: &Message, target: &Target) -> ClientResult<bool> {
        if let Some(out) = self.access.manage(message, target.user_id()).await? {
            self.outbox.send_text(out, target);
            return Ok(true);
        }

        let Target::Private { user_id } = target else {
            return Ok(false);
        };
        if match_pattern(message, &SHUTDOWN).is_none() {
            return Ok(false);
        }
        if !self.access.check(user_id).await? {
            warn!(user = %user_id, "Unauthorized shutdown request");
            return Ok(false);
        }

        info!(user = %user_id, "Shutdown requested");
        if let Err(e) = self.backend.stop().await {
            warn!(error = %e, "Backend stop failed during shutdown");
        }
        self.shutdown.cancel();
        Ok(true)
    }

    fn outbox(&self) -> &Outbox {
        &self.outbox
    }
}
