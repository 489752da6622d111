//! The dispatcher: one backend, many clients.
//!
//! [`Program`] owns the backend and the ordered list of clients for the
//! lifetime of the process. It:
//!
//! - Wires the backend's inbound stream to every client's
//!   [`receive`](Client::receive) and every client's outbox to the backend's
//!   [`send`](Backend::send).
//! - Starts the backend, then all clients concurrently. A client whose
//!   `start` fails is marked [`ClientState::Failed`] and never sees a message.
//! - Broadcasts each inbound message to every active client. A client that
//!   handles a message does not stop the others from seeing it.
//! - Stops every client and the backend concurrently, collecting all
//!   outcomes into a [`ShutdownReport`].
//!
//! ```text
//! register ──► Registered
//!   start  ──► Active   (start succeeded)
//!          ──► Failed   (start failed; excluded from fan-out)
//!   stop   ──► Stopped
//! ```

use std::sync::{Arc, Weak};

use futures::future;
use parking_lot::RwLock;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

use focalors_core::{
    Backend, BackendResult, BoxedBackend, BoxedClient, Client, Message, Target, subscriber,
};

/// Lifecycle state of a client registered with [`Program`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Registered but not yet started.
    Registered,
    /// Started and receiving messages.
    Active,
    /// `start` failed; the client is ignored for the rest of the run.
    Failed,
    /// Stopped during shutdown.
    Stopped,
}

struct ClientEntry {
    client: BoxedClient,
    state: RwLock<ClientState>,
}

impl ClientEntry {
    fn state(&self) -> ClientState {
        *self.state.read()
    }

    fn set_state(&self, state: ClientState) {
        *self.state.write() = state;
    }
}

struct Inner {
    backend: BoxedBackend,
    clients: Vec<ClientEntry>,
}

impl Inner {
    async fn dispatch(&self, message: &Message, target: &Target) -> Vec<bool> {
        let active: Vec<&BoxedClient> = self
            .clients
            .iter()
            .filter(|e| e.state() == ClientState::Active)
            .map(|e| &e.client)
            .collect();

        debug!(%target, clients = active.len(), "Dispatching message");

        future::join_all(active.into_iter().map(|client| async move {
            match client.receive(message, target).await {
                Ok(handled) => handled,
                Err(e) => {
                    error!(client = client.name(), %target, error = %e, "Client failed to handle message");
                    false
                }
            }
        }))
        .await
    }
}

/// Outcome of [`Program::stop`].
#[derive(Debug, Clone, Default)]
pub struct ShutdownReport {
    /// Components that stopped cleanly.
    pub stopped: Vec<String>,
    /// Components whose `stop` failed, with the error.
    pub failures: Vec<(String, String)>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Composes one backend and an ordered list of clients into a running bridge.
pub struct Program {
    inner: Arc<Inner>,
    report: OnceCell<ShutdownReport>,
}

impl Program {
    pub fn new(backend: BoxedBackend, clients: Vec<BoxedClient>) -> Self {
        let clients = clients
            .into_iter()
            .map(|client| {
                info!(client = client.name(), "Client registered");
                ClientEntry {
                    client,
                    state: RwLock::new(ClientState::Registered),
                }
            })
            .collect();
        Self {
            inner: Arc::new(Inner { backend, clients }),
            report: OnceCell::new(),
        }
    }

    pub fn backend(&self) -> &BoxedBackend {
        &self.inner.backend
    }

    /// Returns each client's name and state, in registration order.
    pub fn states(&self) -> Vec<(&'static str, ClientState)> {
        self.inner
            .clients
            .iter()
            .map(|e| (e.client.name(), e.state()))
            .collect()
    }

    /// Wires, then starts the backend, then starts every client concurrently.
    ///
    /// Only a backend failure is returned; client failures disable that
    /// client.
    pub async fn start(&self) -> BackendResult<()> {
        self.wire();

        self.inner.backend.start().await?;
        info!("Backend started");

        let results = future::join_all(self.inner.clients.iter().map(|e| e.client.start())).await;
        for (entry, result) in self.inner.clients.iter().zip(results) {
            let name = entry.client.name();
            match result {
                Ok(()) => {
                    entry.set_state(ClientState::Active);
                    info!(client = name, "Client started");
                }
                Err(e) => {
                    entry.set_state(ClientState::Failed);
                    error!(client = name, error = %e, "Client failed to start and is disabled");
                }
            }
        }

        info!("Program started");
        Ok(())
    }

    fn wire(&self) {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        self.inner
            .backend
            .subscribe(subscriber(move |message: Message, target: Target| {
                let weak = weak.clone();
                async move {
                    match weak.upgrade() {
                        Some(inner) => {
                            inner.dispatch(&message, &target).await;
                            true
                        }
                        None => false,
                    }
                }
            }));

        for entry in &self.inner.clients {
            let backend = self.inner.backend.clone();
            let name = entry.client.name();
            entry
                .client
                .subscribe(subscriber(move |message: Message, target: Target| {
                    let backend = backend.clone();
                    async move { deliver(backend.as_ref(), name, &message, &target).await }
                }));
        }
    }

    /// Broadcasts an inbound message to every active client.
    ///
    /// Returns each active client's result in registration order; errors
    /// count as `false`.
    pub async fn dispatch(&self, message: &Message, target: &Target) -> Vec<bool> {
        self.inner.dispatch(message, target).await
    }

    /// Stops every client and the backend concurrently.
    ///
    /// Never short-circuits on a failure. Every call, including ones that
    /// overlap a shutdown in progress, returns the first report without
    /// stopping anything twice.
    pub async fn stop(&self) -> ShutdownReport {
        self.report.get_or_init(|| self.shutdown()).await.clone()
    }

    async fn shutdown(&self) -> ShutdownReport {
        let clients = future::join_all(self.inner.clients.iter().map(|entry| async move {
            let result = entry.client.stop().await.map_err(|e| e.to_string());
            entry.set_state(ClientState::Stopped);
            (entry.client.name().to_string(), result)
        }));
        let backend = async {
            let result = self.inner.backend.stop().await.map_err(|e| e.to_string());
            ("backend".to_string(), result)
        };
        let (mut outcomes, backend_outcome) = future::join(clients, backend).await;
        outcomes.push(backend_outcome);

        let mut report = ShutdownReport::default();
        for (name, result) in outcomes {
            match result {
                Ok(()) => report.stopped.push(name),
                Err(e) => {
                    warn!(component = %name, error = %e, "Failed to stop cleanly");
                    report.failures.push((name, e));
                }
            }
        }
        info!(failures = report.failures.len(), "Program stopped");
        report
    }
}

async fn deliver(backend: &dyn Backend, client: &str, message: &Message, target: &Target) -> bool {
    match backend.send(message, target).await {
        Ok(true) => true,
        Ok(false) => {
            warn!(client, %target, "Backend rejected outbound message");
            false
        }
        Err(e) => {
            warn!(client, %target, error = %e, "Failed to deliver outbound message");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockBackend;
    use async_trait::async_trait;
    use focalors_core::{ClientError, ClientResult, Outbox};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingClient {
        name: &'static str,
        handles: bool,
        fail_start: bool,
        fail_stop: bool,
        delay: Option<Duration>,
        received: AtomicUsize,
        stops: AtomicUsize,
        outbox: Outbox,
    }

    impl CountingClient {
        fn new(name: &'static str, handles: bool) -> Self {
            Self {
                name,
                handles,
                fail_start: false,
                fail_stop: false,
                delay: None,
                received: AtomicUsize::new(0),
                stops: AtomicUsize::new(0),
                outbox: Outbox::new(),
            }
        }

        fn slow(name: &'static str) -> Self {
            Self {
                delay: Some(Duration::from_millis(50)),
                ..Self::new(name, false)
            }
        }

        async fn pause(&self) {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
        }
    }

    #[async_trait]
    impl Client for CountingClient {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn start(&self) -> ClientResult<()> {
            self.pause().await;
            if self.fail_start {
                return Err(ClientError::MissingConfig { field: "test.key" });
            }
            Ok(())
        }

        async fn stop(&self) -> ClientResult<()> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            self.pause().await;
            if self.fail_stop {
                return Err(ClientError::Other("stop failed".into()));
            }
            Ok(())
        }

        async fn receive(&self, message: &Message, target: &Target) -> ClientResult<bool> {
            self.received.fetch_add(1, Ordering::SeqCst);
            self.pause().await;
            if self.handles {
                self.outbox
                    .send_text(format!("echo {}", message.extract_plain_text()), target);
            }
            Ok(self.handles)
        }

        fn outbox(&self) -> &Outbox {
            &self.outbox
        }
    }

    struct ErrClient {
        outbox: Outbox,
    }

    #[async_trait]
    impl Client for ErrClient {
        fn name(&self) -> &'static str {
            "err"
        }

        async fn receive(&self, _: &Message, _: &Target) -> ClientResult<bool> {
            Err(ClientError::Other("boom".into()))
        }

        fn outbox(&self) -> &Outbox {
            &self.outbox
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_fan_out_reaches_every_client() {
        let backend = MockBackend::new();
        let a = Arc::new(CountingClient::new("a", true));
        let b = Arc::new(CountingClient::new("b", false));
        let c = Arc::new(CountingClient::new("c", false));
        let program = Program::new(
            backend.clone(),
            vec![a.clone(), b.clone(), c.clone()],
        );
        program.start().await.unwrap();

        assert!(backend.emit(Message::from("hi"), Target::private("u")).await);

        assert_eq!(a.received.load(Ordering::SeqCst), 1);
        assert_eq!(b.received.load(Ordering::SeqCst), 1);
        assert_eq!(c.received.load(Ordering::SeqCst), 1);

        let results = program
            .dispatch(&Message::from("again"), &Target::private("u"))
            .await;
        assert_eq!(results, vec![true, false, false]);
        assert_eq!(c.received.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_outbound_goes_through_backend() {
        let backend = MockBackend::new();
        let a = Arc::new(CountingClient::new("a", true));
        let program = Program::new(backend.clone(), vec![a]);
        program.start().await.unwrap();

        let to = Target::group_member("g@chatroom", "u").unwrap();
        backend.emit(Message::from("ping"), to.clone()).await;
        settle().await;

        let sent = backend.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0.extract_plain_text(), "echo ping");
        assert_eq!(sent[0].1, to);
    }

    #[tokio::test]
    async fn test_receive_error_counts_as_unhandled() {
        let backend = MockBackend::new();
        let ok = Arc::new(CountingClient::new("ok", true));
        let program = Program::new(
            backend,
            vec![
                Arc::new(ErrClient {
                    outbox: Outbox::new(),
                }),
                ok.clone(),
            ],
        );
        program.start().await.unwrap();

        let results = program
            .dispatch(&Message::from("x"), &Target::private("u"))
            .await;
        assert_eq!(results, vec![false, true]);
        assert_eq!(ok.received.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_start_disables_client() {
        let backend = MockBackend::new();
        let good = Arc::new(CountingClient::new("good", false));
        let bad = Arc::new(CountingClient {
            fail_start: true,
            ..CountingClient::new("bad", false)
        });
        let program = Program::new(backend.clone(), vec![good.clone(), bad.clone()]);
        program.start().await.unwrap();

        assert_eq!(
            program.states(),
            vec![("good", ClientState::Active), ("bad", ClientState::Failed)]
        );

        backend.emit(Message::from("x"), Target::private("u")).await;
        assert_eq!(good.received.load(Ordering::SeqCst), 1);
        assert_eq!(bad.received.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_start_order_backend_first() {
        let backend = MockBackend::new();
        let program = Program::new(backend.clone(), vec![]);
        assert!(backend.self_info().is_err());
        program.start().await.unwrap();
        assert_eq!(backend.start_calls(), 1);
        assert!(backend.self_info().is_ok());
    }

    #[tokio::test]
    async fn test_stop_does_not_short_circuit() {
        let backend = MockBackend::new();
        let failing = Arc::new(CountingClient {
            fail_stop: true,
            ..CountingClient::new("failing", false)
        });
        let other = Arc::new(CountingClient::new("other", false));
        let program = Program::new(backend.clone(), vec![failing.clone(), other.clone()]);
        program.start().await.unwrap();

        let report = program.stop().await;
        assert!(!report.is_clean());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, "failing");
        assert_eq!(backend.stop_calls(), 1);
        assert_eq!(other.stops.load(Ordering::SeqCst), 1);
        assert!(report.stopped.contains(&"backend".to_string()));
        assert!(
            program
                .states()
                .iter()
                .all(|(_, s)| *s == ClientState::Stopped)
        );
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let backend = MockBackend::new();
        backend.fail_stop();
        let a = Arc::new(CountingClient::new("a", false));
        let program = Program::new(backend.clone(), vec![a.clone()]);
        program.start().await.unwrap();

        let first = program.stop().await;
        let second = program.stop().await;
        assert_eq!(first.failures, second.failures);
        assert_eq!(backend.stop_calls(), 1);
        assert_eq!(a.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_stops_stop_once() {
        let backend = MockBackend::new();
        let a = Arc::new(CountingClient::slow("a"));
        let program = Program::new(backend.clone(), vec![a.clone()]);
        program.start().await.unwrap();

        let (first, second) = future::join(program.stop(), program.stop()).await;
        assert_eq!(first.stopped, second.stopped);
        assert_eq!(backend.stop_calls(), 1);
        assert_eq!(a.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clients_start_concurrently() {
        let backend = MockBackend::new();
        let a = Arc::new(CountingClient::slow("a"));
        let b = Arc::new(CountingClient::slow("b"));
        let program = Program::new(backend, vec![a, b]);

        let began = tokio::time::Instant::now();
        program.start().await.unwrap();
        let elapsed = began.elapsed();
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_millis(100), "started serially: {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_clients_receive_concurrently() {
        let backend = MockBackend::new();
        let a = Arc::new(CountingClient::slow("a"));
        let b = Arc::new(CountingClient::slow("b"));
        let program = Program::new(backend, vec![a.clone(), b.clone()]);
        program.start().await.unwrap();

        let began = tokio::time::Instant::now();
        let results = program
            .dispatch(&Message::from("x"), &Target::private("u"))
            .await;
        let elapsed = began.elapsed();
        assert_eq!(results, vec![false, false]);
        assert!(elapsed < Duration::from_millis(100), "received serially: {elapsed:?}");
        assert_eq!(a.received.load(Ordering::SeqCst), 1);
        assert_eq!(b.received.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_inbound_after_drop_is_rejected() {
        let backend = MockBackend::new();
        let program = Program::new(backend.clone(), vec![]);
        program.start().await.unwrap();
        drop(program);
        assert!(!backend.emit(Message::from("x"), Target::private("u")).await);
    }
}
