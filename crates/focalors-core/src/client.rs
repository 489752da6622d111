//! The contract every feature handler implements.
//!
//! A [`Client`] sees every inbound message through [`Client::receive`] and
//! produces outbound messages through its [`Outbox`], at any time, not only
//! while handling a message. The dispatcher wires each outbox to the backend
//! once at startup.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::ClientResult;
use crate::message::{Message, Target};

/// Callback receiving `(message, target)` pairs.
///
/// The returned future resolves to `true` when the pair was delivered.
pub type Subscriber = Arc<dyn Fn(Message, Target) -> BoxFuture<'static, bool> + Send + Sync>;

/// Wraps an async closure into a [`Subscriber`].
pub fn subscriber<F, Fut>(f: F) -> Subscriber
where
    F: Fn(Message, Target) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = bool> + Send + 'static,
{
    Arc::new(move |message, target| Box::pin(f(message, target)))
}

/// A feature handler.
#[async_trait]
pub trait Client: Send + Sync + 'static {
    /// Returns the handler's name, used in logs and configuration.
    fn name(&self) -> &'static str;

    /// Called once after the backend is up.
    ///
    /// Fails only when a required dependency or credential is missing.
    async fn start(&self) -> ClientResult<()> {
        Ok(())
    }

    /// Releases owned timers and connections. Repeated calls are no-ops.
    async fn stop(&self) -> ClientResult<()> {
        Ok(())
    }

    /// Examines an inbound message.
    ///
    /// Returns `Ok(true)` if the message was recognized and processed,
    /// `Ok(false)` otherwise. Errors are reserved for infrastructure failures.
    async fn receive(&self, message: &Message, target: &Target) -> ClientResult<bool>;

    /// The outbox this handler emits through.
    fn outbox(&self) -> &Outbox;

    /// Wires the handler's emissions to `subscriber`. Done once.
    fn subscribe(&self, subscriber: Subscriber) {
        self.outbox().subscribe(self.name(), subscriber);
    }
}

/// Type alias for a shared, type-erased handler.
pub type BoxedClient = Arc<dyn Client>;

/// Asynchronous emission primitive embedded in every handler.
///
/// Emissions are queued on an unbounded channel and delivered to the single
/// subscriber in order by a background task. [`Outbox::send`] never waits for
/// delivery.
#[derive(Default)]
pub struct Outbox {
    sender: OnceLock<mpsc::UnboundedSender<(Message, Target)>>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the subscriber and spawns its delivery task.
    ///
    /// Must be called from within a tokio runtime. A second call is ignored.
    pub fn subscribe(&self, owner: &'static str, subscriber: Subscriber) {
        let (tx, mut rx) = mpsc::unbounded_channel::<(Message, Target)>();
        if self.sender.set(tx).is_err() {
            warn!(client = owner, "Outbox already subscribed, ignoring");
            return;
        }

        tokio::spawn(async move {
            while let Some((message, target)) = rx.recv().await {
                if !subscriber(message, target.clone()).await {
                    warn!(client = owner, %target, "Outbound message was not delivered");
                }
            }
            debug!(client = owner, "Outbox closed");
        });
    }

    /// Returns true once a subscriber is installed.
    pub fn is_subscribed(&self) -> bool {
        self.sender.get().is_some()
    }

    /// Queues a message for delivery.
    pub fn send(&self, message: impl Into<Message>, target: &Target) {
        let message = message.into();
        match self.sender.get() {
            Some(tx) => {
                if tx.send((message, target.clone())).is_err() {
                    debug!(%target, "Outbox receiver gone, dropping message");
                }
            }
            None => debug!(%target, "Outbox not subscribed, dropping message"),
        }
    }

    /// Queues a text message. Empty text is skipped.
    pub fn send_text(&self, text: impl Into<String>, target: &Target) {
        let text = text.into();
        if !text.is_empty() {
            self.send(text, target);
        }
    }
}

impl std::fmt::Debug for Outbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outbox")
            .field("subscribed", &self.is_subscribed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Mutex;

    fn recording() -> (Subscriber, Arc<Mutex<Vec<(String, Target)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let sub = subscriber(move |message: Message, target: Target| {
            let sink = sink.clone();
            async move {
                sink.lock().await.push((message.extract_plain_text(), target));
                true
            }
        });
        (sub, seen)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_outbox_delivers_in_order() {
        let outbox = Outbox::new();
        let (sub, seen) = recording();
        outbox.subscribe("test", sub);

        let to = Target::private("u");
        for i in 0..5 {
            outbox.send_text(format!("m{i}"), &to);
        }
        settle().await;

        let seen = seen.lock().await;
        let texts: Vec<_> = seen.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(texts, vec!["m0", "m1", "m2", "m3", "m4"]);
        assert!(seen.iter().all(|(_, t)| t == &to));
    }

    #[tokio::test]
    async fn test_send_text_skips_empty() {
        let outbox = Outbox::new();
        let (sub, seen) = recording();
        outbox.subscribe("test", sub);

        let to = Target::private("u");
        outbox.send_text("", &to);
        outbox.send_text("x", &to);
        settle().await;

        assert_eq!(seen.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_send_before_subscribe_is_dropped() {
        let outbox = Outbox::new();
        outbox.send_text("lost", &Target::private("u"));
        assert!(!outbox.is_subscribed());

        let (sub, seen) = recording();
        outbox.subscribe("test", sub);
        settle().await;
        assert!(seen.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_second_subscribe_is_ignored() {
        let outbox = Outbox::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let c = first.clone();
        outbox.subscribe(
            "test",
            subscriber(move |_, _| {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    true
                }
            }),
        );
        let c = second.clone();
        outbox.subscribe(
            "test",
            subscriber(move |_, _| {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    true
                }
            }),
        );

        outbox.send_text("x", &Target::private("u"));
        settle().await;
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_send_does_not_wait_for_delivery() {
        let outbox = Outbox::new();
        let delivered = Arc::new(AtomicUsize::new(0));
        let c = delivered.clone();
        outbox.subscribe(
            "test",
            subscriber(move |_, _| {
                let c = c.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    c.fetch_add(1, Ordering::SeqCst);
                    false
                }
            }),
        );

        outbox.send_text("slow", &Target::private("u"));
        assert_eq!(delivered.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }
}
