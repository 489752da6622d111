//! [`Backend`] over a OneBot 12 WebSocket connection.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use focalors_core::{
    Backend, BackendError, BackendResult, FileDescriptor, FriendInfo, GroupInfo, Message,
    SelfInfo, Segment, Subscriber, Target,
};
use focalors_framework::FileCache;
use focalors_store::Store;

use crate::api::ApiCaller;
use crate::config::OneBotConfig;
use crate::connection::{self, Connection, FrameHandler};
use crate::model::{ActionResponse, Event, MessageEvent, RemoteFile, UploadedFile, is_response};

type Inbound = (Message, Target);

/// A OneBot 12 implementation such as ComWeChat, reached as a WebSocket
/// client.
///
/// Inbound messages are queued and delivered to the subscriber by a
/// separate task, so handlers can call actions while the socket keeps
/// reading.
pub struct OneBotBackend {
    inner: Arc<Inner>,
}

struct Inner {
    config: OneBotConfig,
    api: ApiCaller,
    files: FileCache,
    self_info: RwLock<Option<SelfInfo>>,
    subscriber: RwLock<Option<Subscriber>>,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Inbound>>>,
    connection: Mutex<Option<Connection>>,
    dispatcher: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl OneBotBackend {
    /// Creates a backend; nothing connects until [`Backend::start`].
    pub fn new(config: OneBotConfig, store: Store) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                api: ApiCaller::new(config.api_timeout()),
                config,
                files: FileCache::new(store),
                self_info: RwLock::new(None),
                subscriber: RwLock::new(None),
                inbound_tx,
                inbound_rx: Mutex::new(Some(inbound_rx)),
                connection: Mutex::new(None),
                dispatcher: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &OneBotConfig {
        &self.inner.config
    }

    async fn call<T: DeserializeOwned>(&self, action: &str, params: Value) -> BackendResult<T> {
        let data = self.inner.api.call(action, params).await?;
        Ok(serde_json::from_value(data)?)
    }

    /// Connects, retrying at the poll interval until the socket opens.
    async fn connect(&self) {
        let stream = loop {
            match connection::open(&self.inner.config).await {
                Ok(stream) => break stream,
                Err(e) => {
                    warn!(error = %e, "Backend not reachable yet");
                    tokio::time::sleep(self.inner.config.startup_poll_interval()).await;
                }
            }
        };
        let outgoing = self.inner.api.attach();
        let handler: Arc<dyn FrameHandler> = self.inner.clone();
        let conn = connection::spawn(stream, outgoing, self.inner.config.clone(), handler);
        *self.inner.connection.lock() = Some(conn);
    }

    /// Polls `get_self_info` until the account is logged in.
    async fn wait_for_login(&self) -> SelfInfo {
        loop {
            match self.call::<SelfInfo>("get_self_info", json!({})).await {
                Ok(info) => return info,
                Err(e) => {
                    debug!(error = %e, "Waiting for login");
                    tokio::time::sleep(self.inner.config.startup_poll_interval()).await;
                }
            }
        }
    }

    async fn link_files(&self, message: &Message, message_id: &str) {
        for segment in message.iter() {
            let (Segment::Image(file) | Segment::WxEmoji(file)) = segment else {
                continue;
            };
            if let Err(e) = self.inner.files.link_message(message_id, &file.file_id).await {
                warn!(message_id, file_id = %file.file_id, error = %e, "Failed to link sent file");
            }
        }
    }

    /// Answers from the file cache when the file was sent by this bridge.
    async fn cached_image(&self, id: &str) -> Option<String> {
        let by_message = self.inner.files.get_by_message(id).await;
        let file = match by_message {
            Ok(Some(file)) => Some(file),
            Ok(None) => self.inner.files.get(id).await.ok().flatten(),
            Err(e) => {
                warn!(id, error = %e, "File cache lookup failed");
                None
            }
        };
        file.as_ref().and_then(local_url)
    }
}

impl Inner {
    /// Starts delivering queued messages to the subscriber. Idempotent.
    fn spawn_dispatcher(self: &Arc<Self>) {
        let Some(mut inbound) = self.inbound_rx.lock().take() else {
            return;
        };
        let token = CancellationToken::new();
        let inner = self.clone();
        let stop = token.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    item = inbound.recv() => {
                        let Some((message, target)) = item else { break };
                        let subscriber = inner.subscriber.read().clone();
                        match subscriber {
                            Some(subscriber) => {
                                subscriber(message, target).await;
                            }
                            None => debug!(%target, "No subscriber, dropping message"),
                        }
                    }
                }
            }
            debug!("Inbound dispatcher stopped");
        });
        *self.dispatcher.lock() = Some((token, task));
    }

    fn on_message_event(&self, event: MessageEvent) {
        let Some(target) = event.target() else {
            debug!(detail_type = %event.detail_type, "Ignoring message event");
            return;
        };
        let is_self = self
            .self_info
            .read()
            .as_ref()
            .is_some_and(|me| me.id == event.user_id);
        if is_self {
            trace!(message_id = %event.message_id, "Skipping own message");
            return;
        }

        let message = event.to_message();
        if message.is_empty() {
            debug!(message_id = %event.message_id, alt = %event.alt_message, "Message has no supported segments");
            return;
        }
        debug!(message_id = %event.message_id, %target, %message, "Received message");
        if self.inbound_tx.send((message, target)).is_err() {
            warn!("Inbound queue closed, dropping message");
        }
    }
}

#[async_trait]
impl FrameHandler for Inner {
    async fn on_frame(&self, frame: &str) {
        let value: Value = match serde_json::from_str(frame) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Dropping non-JSON frame");
                return;
            }
        };

        if is_response(&value) {
            match serde_json::from_value::<ActionResponse>(value) {
                Ok(response) => {
                    self.api.on_response(response);
                }
                Err(e) => warn!(error = %e, "Dropping malformed response"),
            }
            return;
        }

        match serde_json::from_value::<Event>(value) {
            Ok(Event::Message(event)) => self.on_message_event(event),
            Ok(Event::Meta(event)) if event.detail_type == "heartbeat" => trace!("Heartbeat"),
            Ok(Event::Meta(event)) => info!(detail_type = %event.detail_type, "Meta event"),
            Ok(Event::Notice(event) | Event::Request(event)) => {
                debug!(detail_type = %event.detail_type, sub_type = %event.sub_type, "Ignoring event")
            }
            Err(e) => warn!(error = %e, "Dropping frame of unknown shape"),
        }
    }

    async fn on_disconnect(&self) {
        info!(url = %self.config.url, "Backend disconnected");
        self.api.detach();
    }
}

#[async_trait]
impl Backend for OneBotBackend {
    fn self_info(&self) -> BackendResult<SelfInfo> {
        self.inner
            .self_info
            .read()
            .clone()
            .ok_or(BackendError::NotStarted)
    }

    async fn start(&self) -> BackendResult<()> {
        if self.inner.self_info.read().is_some() {
            return Ok(());
        }
        info!(url = %self.inner.config.url, "Starting OneBot backend");
        if !self.inner.api.is_attached() {
            self.connect().await;
        }
        self.inner.spawn_dispatcher();

        let info = self.wait_for_login().await;
        info!(user_id = %info.id, user_name = %info.name, "Logged in");
        *self.inner.self_info.write() = Some(info);
        Ok(())
    }

    async fn stop(&self) -> BackendResult<()> {
        let conn = self.inner.connection.lock().take();
        if let Some(conn) = conn {
            conn.close().await;
        }
        self.inner.api.detach();
        if let Some((token, _task)) = self.inner.dispatcher.lock().take() {
            // The current delivery, possibly the one running this call, finishes.
            token.cancel();
        }
        if self.inner.self_info.write().take().is_some() {
            info!("OneBot backend stopped");
        }
        Ok(())
    }

    fn subscribe(&self, subscriber: Subscriber) {
        *self.inner.subscriber.write() = Some(subscriber);
    }

    async fn send(&self, message: &Message, target: &Target) -> BackendResult<bool> {
        let mut params = serde_json::to_value(target.conversation())?;
        params["message"] = serde_json::to_value(message)?;

        let data = match self.inner.api.call("send_message", params).await {
            Ok(data) => data,
            Err(BackendError::Api { retcode, message: reason }) => {
                warn!(%target, retcode, %reason, "Platform rejected message");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };
        if let Some(message_id) = data.get("message_id").and_then(Value::as_str) {
            self.link_files(message, message_id).await;
        }
        Ok(true)
    }

    async fn get_friends(&self, with_avatar: bool) -> BackendResult<Vec<FriendInfo>> {
        let mut friends: Vec<FriendInfo> = self.call("get_friend_list", json!({})).await?;
        if !with_avatar {
            friends.iter_mut().for_each(|f| f.avatar = None);
        }
        Ok(friends)
    }

    async fn get_groups(&self, with_avatar: bool) -> BackendResult<Vec<GroupInfo>> {
        let mut groups: Vec<GroupInfo> = self.call("get_group_list", json!({})).await?;
        if !with_avatar {
            groups.iter_mut().for_each(|g| g.avatar = None);
        }
        Ok(groups)
    }

    async fn get_group_members(&self, group_id: &str) -> BackendResult<HashMap<String, String>> {
        let members: Vec<FriendInfo> = self
            .call("get_group_member_list", json!({ "group_id": group_id }))
            .await?;
        Ok(members
            .into_iter()
            .map(|m| {
                let name = m.display_name().to_string();
                (m.user_id, name)
            })
            .collect())
    }

    async fn get_friend(
        &self,
        user_id: &str,
        group_id: Option<&str>,
    ) -> BackendResult<FriendInfo> {
        match group_id {
            Some(group_id) => {
                self.call(
                    "get_group_member_info",
                    json!({ "group_id": group_id, "user_id": user_id }),
                )
                .await
            }
            None => self.call("get_user_info", json!({ "user_id": user_id })).await,
        }
    }

    async fn upload_file(&self, file: FileDescriptor) -> BackendResult<String> {
        let name = self
            .inner
            .files
            .cache(&file)
            .await
            .map_err(|e| BackendError::Other(e.to_string()))?;
        let mut params = serde_json::to_value(&file)?;
        params["name"] = json!(name);

        let uploaded: UploadedFile = self.call("upload_file", params).await?;
        if let Err(e) = self.inner.files.insert(&uploaded.file_id, &file).await {
            warn!(file_id = %uploaded.file_id, error = %e, "Failed to cache uploaded file");
        }
        debug!(file_id = %uploaded.file_id, %name, "Uploaded file");
        Ok(uploaded.file_id)
    }

    async fn download_image(&self, message_id: &str) -> BackendResult<String> {
        if let Some(url) = self.cached_image(message_id).await {
            return Ok(url);
        }
        let file: RemoteFile = self
            .call("get_file", json!({ "file_id": message_id, "type": "url" }))
            .await?;
        if let Some(url) = file.url.filter(|u| !u.is_empty()) {
            return Ok(url);
        }
        if let Some(data) = file.data.filter(|d| !d.is_empty()) {
            return Ok(data_uri(Some(&file.name), &data));
        }
        Err(BackendError::Other(format!(
            "no downloadable content for image {message_id}"
        )))
    }
}

/// A URL the model can fetch for a cached file. Host paths are not
/// reachable from outside, so they yield None.
fn local_url(file: &FileDescriptor) -> Option<String> {
    match file {
        FileDescriptor::Url { url, .. } => Some(url.clone()),
        FileDescriptor::Data { data, name } => Some(data_uri(name.as_deref(), data)),
        FileDescriptor::Path { .. } => None,
    }
}

fn data_uri(name: Option<&str>, data: &str) -> String {
    let ext = name
        .and_then(|n| n.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase());
    let mime = match ext.as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "image/png",
    };
    format!("data:{mime};base64,{data}")
}
