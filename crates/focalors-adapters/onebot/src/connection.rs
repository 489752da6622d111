//! The WebSocket client loop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{error, info, trace, warn};

use focalors_core::{BackendError, BackendResult};

use crate::config::OneBotConfig;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Receives what the socket delivers.
#[async_trait]
pub trait FrameHandler: Send + Sync + 'static {
    /// Called for every text or binary frame. Must not block on other
    /// frames arriving.
    async fn on_frame(&self, frame: &str);

    /// Called once when the loop ends for good.
    async fn on_disconnect(&self);
}

/// A running client loop.
pub struct Connection {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Connection {
    /// Stops the loop and waits for it to close the socket.
    pub async fn close(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Connection task ended abnormally");
        }
    }
}

/// Opens the socket, sending the access token as a bearer header.
pub async fn open(config: &OneBotConfig) -> BackendResult<WsStream> {
    let mut request = config
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| BackendError::Transport(format!("invalid url '{}': {e}", config.url)))?;
    if let Some(token) = config.access_token() {
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| BackendError::Transport(format!("invalid access token: {e}")))?;
        request.headers_mut().insert("Authorization", value);
    }

    let (stream, _response) = connect_async(request).await.map_err(|e| {
        BackendError::Transport(format!("WebSocket connection to {} failed: {e}", config.url))
    })?;
    info!(url = %config.url, "WebSocket client connected");
    Ok(stream)
}

/// Spawns the loop that pumps `outgoing` into the socket and frames from
/// the socket into `handler`, reconnecting per the config.
pub fn spawn(
    stream: WsStream,
    outgoing: mpsc::Receiver<String>,
    config: OneBotConfig,
    handler: Arc<dyn FrameHandler>,
) -> Connection {
    let (shutdown, shutdown_rx) = watch::channel(false);
    let (ws_tx, ws_rx) = stream.split();
    let task = tokio::spawn(run_client_loop(
        ws_tx,
        ws_rx,
        outgoing,
        shutdown_rx,
        handler,
        config,
    ));
    Connection { shutdown, task }
}

async fn run_client_loop(
    ws_tx: WsSink,
    ws_rx: WsSource,
    mut outgoing: mpsc::Receiver<String>,
    mut shutdown_rx: watch::Receiver<bool>,
    handler: Arc<dyn FrameHandler>,
    config: OneBotConfig,
) {
    let mut current_ws_tx = ws_tx;
    let mut current_ws_rx = ws_rx;
    let mut retry_count = 0u32;
    let mut current_delay = config.reconnect.initial_delay();

    loop {
        let lost = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!(url = %config.url, "WebSocket client shutting down");
                    let _ = current_ws_tx.close().await;
                    handler.on_disconnect().await;
                    break;
                }
                false
            }

            Some(frame) = outgoing.recv() => {
                if let Err(e) = current_ws_tx.send(Message::Text(frame.into())).await {
                    warn!(error = %e, "Failed to send frame");
                }
                false
            }

            msg = current_ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    trace!(len = text.len(), "Received text");
                    handler.on_frame(text.as_str()).await;
                    retry_count = 0;
                    current_delay = config.reconnect.initial_delay();
                    false
                }
                Some(Ok(Message::Binary(data))) => {
                    trace!(len = data.len(), "Received binary");
                    handler.on_frame(&String::from_utf8_lossy(&data)).await;
                    false
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = current_ws_tx.send(Message::Pong(data)).await;
                    false
                }
                Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => false,
                Some(Ok(Message::Close(_))) => {
                    info!(url = %config.url, "Server closed connection");
                    true
                }
                Some(Err(e)) => {
                    warn!(error = %e, "WebSocket error");
                    true
                }
                None => {
                    info!(url = %config.url, "WebSocket stream ended");
                    true
                }
            },
        };

        if !lost {
            continue;
        }
        if !config.reconnect.enabled {
            handler.on_disconnect().await;
            break;
        }
        match reconnect(&config, &mut shutdown_rx, &mut retry_count, &mut current_delay).await {
            Some(stream) => {
                let (new_tx, new_rx) = stream.split();
                current_ws_tx = new_tx;
                current_ws_rx = new_rx;
            }
            None => {
                handler.on_disconnect().await;
                break;
            }
        }
    }
}

/// Retries with exponential backoff until connected. Returns None when the
/// retry budget is spent or shutdown is requested.
async fn reconnect(
    config: &OneBotConfig,
    shutdown_rx: &mut watch::Receiver<bool>,
    retry_count: &mut u32,
    current_delay: &mut Duration,
) -> Option<WsStream> {
    loop {
        if let Some(max) = config.reconnect.max_retries
            && *retry_count >= max
        {
            error!(url = %config.url, "Max retries reached, giving up");
            return None;
        }

        warn!(url = %config.url, delay = ?current_delay, "Reconnecting...");
        tokio::select! {
            _ = tokio::time::sleep(*current_delay) => {}
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    return None;
                }
            }
        }

        match open(config).await {
            Ok(stream) => {
                info!(url = %config.url, "Reconnected successfully");
                *retry_count = 0;
                *current_delay = config.reconnect.initial_delay();
                return Some(stream);
            }
            Err(e) => {
                warn!(error = %e, "Reconnection failed");
                *retry_count += 1;
                *current_delay = config.reconnect.next_delay(*current_delay);
            }
        }
    }
}
