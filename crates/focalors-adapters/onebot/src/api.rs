//! Request/response correlation for actions sent over the socket.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use focalors_core::{BackendError, BackendResult};

use crate::model::{ActionRequest, ActionResponse};

/// Capacity of the outgoing frame queue.
const OUTGOING_CAPACITY: usize = 256;

/// Sends actions and matches responses by `echo`.
///
/// The socket side is a frame queue attached per connection; a caller
/// registers its pending slot before the frame is queued so a fast
/// response cannot be lost.
pub struct ApiCaller {
    outgoing: RwLock<Option<mpsc::Sender<String>>>,
    pending: Mutex<HashMap<String, oneshot::Sender<ActionResponse>>>,
    echo_counter: AtomicU64,
    timeout: Duration,
}

impl ApiCaller {
    pub fn new(timeout: Duration) -> Self {
        Self {
            outgoing: RwLock::new(None),
            pending: Mutex::new(HashMap::new()),
            echo_counter: AtomicU64::new(1),
            timeout,
        }
    }

    /// Opens a fresh frame queue and returns its receiving end for the
    /// connection task.
    pub fn attach(&self) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(OUTGOING_CAPACITY);
        *self.outgoing.write() = Some(tx);
        rx
    }

    /// Drops the frame queue and fails every waiting call.
    pub fn detach(&self) {
        self.outgoing.write().take();
        let dropped = {
            let mut pending = self.pending.lock();
            let n = pending.len();
            pending.clear();
            n
        };
        if dropped > 0 {
            warn!(dropped, "Connection lost with calls in flight");
        }
    }

    pub fn is_attached(&self) -> bool {
        self.outgoing.read().is_some()
    }

    pub fn pending_call_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub async fn call(&self, action: &str, params: Value) -> BackendResult<Value> {
        let tx = self
            .outgoing
            .read()
            .clone()
            .ok_or(BackendError::NotConnected)?;

        let echo = self.echo_counter.fetch_add(1, Ordering::SeqCst).to_string();
        let frame = serde_json::to_string(&ActionRequest {
            action: action.to_string(),
            params,
            echo: echo.clone(),
        })?;

        let (resp_tx, resp_rx) = oneshot::channel();
        self.pending.lock().insert(echo.clone(), resp_tx);
        let _slot = PendingSlot {
            pending: &self.pending,
            echo: &echo,
        };

        trace!(action, %echo, "Calling action");
        if tx.send(frame).await.is_err() {
            return Err(BackendError::NotConnected);
        }

        match timeout(self.timeout, resp_rx).await {
            Ok(Ok(response)) => response.into_result(),
            Ok(Err(_)) => Err(BackendError::NotConnected),
            Err(_) => {
                debug!(action, %echo, "Action timed out");
                Err(BackendError::Timeout)
            }
        }
    }

    /// Completes the call the response belongs to. Returns false if no
    /// call is waiting for it.
    pub fn on_response(&self, response: ActionResponse) -> bool {
        let Some(echo) = response.echo_key() else {
            return false;
        };
        let Some(tx) = self.pending.lock().remove(&echo) else {
            debug!(%echo, "Response for unknown or expired call");
            return false;
        };
        tx.send(response).is_ok()
    }
}

/// Releases a call's pending entry however the call ends, including when
/// its future is dropped.
struct PendingSlot<'a> {
    pending: &'a Mutex<HashMap<String, oneshot::Sender<ActionResponse>>>,
    echo: &'a str,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(self.echo);
    }
}
