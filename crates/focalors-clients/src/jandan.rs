//! Forwarding of jandan.net picture comments.
//!
//! Conversations can pull the newest comments on demand or opt in to a
//! recurring forward. Each conversation keeps a sorted set of the comment
//! ids it has already received, scored by comment time, so nothing is sent
//! twice within the retention window.
//!
//! Commands:
//!
//! | command               | effect                                    | gated |
//! |-----------------------|-------------------------------------------|-------|
//! | `#煎蛋`               | send unseen comments now                  | no    |
//! | `#煎蛋 top N`         | send at most N unseen comments now        | no    |
//! | `#煎蛋开启定时转发`   | opt in to the recurring forward           | yes   |
//! | `#煎蛋关闭定时转发`   | opt out                                   | yes   |
//! | `#煎蛋重置`           | forget seen comments and opt out          | yes   |

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Local, NaiveDateTime, TimeZone, Timelike};
use parking_lot::Mutex;
use regex::Regex;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use focalors_core::{
    BoxedBackend, Client, ClientError, ClientResult, FileDescriptor, Message, Outbox, Segment,
    Target, match_pattern,
};
use focalors_framework::AccessManager;
use focalors_store::Store;

use crate::providers::{Comment, JandanApi, SharedJandan};
use crate::settings::JandanSettings;
use crate::util::is_allowed;

const SUBSCRIBERS_KEY: &str = "client:jandan:subscribers";

fn seen_key(conversation: &str) -> String {
    format!("client:jandan:seen:{conversation}")
}

static SEND_NOW: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#\s*煎蛋\s*$").expect("jandan pattern is valid"));
static SEND_TOP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^#\s*煎蛋\s*top\s*(\d+)\s*$").expect("jandan top pattern is valid")
});
static OPT_IN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^#\s*煎蛋开启定时转发\s*$").expect("jandan opt-in pattern is valid")
});
static OPT_OUT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^#\s*煎蛋关闭定时转发\s*$").expect("jandan opt-out pattern is valid")
});
static RESET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#\s*煎蛋重置\s*$").expect("jandan reset pattern is valid"));

/// Who asked for a forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    /// A chat command; empty results and failures are reported.
    Command,
    /// A timer tick; stays silent unless something is sent.
    Timer,
}

/// Gated subscription commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Toggle {
    On,
    Off,
    Reset,
}

impl Toggle {
    fn parse(message: &Message) -> Option<Self> {
        if match_pattern(message, &OPT_IN).is_some() {
            Some(Toggle::On)
        } else if match_pattern(message, &OPT_OUT).is_some() {
            Some(Toggle::Off)
        } else if match_pattern(message, &RESET).is_some() {
            Some(Toggle::Reset)
        } else {
            None
        }
    }
}

fn comment_timestamp(comment: &Comment) -> Option<i64> {
    let naive = NaiveDateTime::parse_from_str(&comment.date, "%Y-%m-%d %H:%M:%S").ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.timestamp())
}

fn file_name(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or(url)
}

fn caption(comment: &Comment) -> String {
    format!(
        "{} 作者: {}\noo: {}, xx: {}",
        comment.text_content, comment.author, comment.vote_positive, comment.vote_negative
    )
    .trim()
    .to_string()
}

/// State shared with the timer tasks.
struct Shared {
    settings: JandanSettings,
    backend: BoxedBackend,
    store: Store,
    source: SharedJandan,
    outbox: Outbox,
}

impl Shared {
    fn retention(&self) -> i64 {
        self.settings.retention_hours as i64 * 3600
    }

    async fn is_seen(&self, key: &str, id: &str) -> bool {
        match self.store.zscore(key, id).await {
            Ok(score) => score.is_some(),
            Err(e) => {
                warn!(error = %e, "Dedup lookup failed, treating comment as unseen");
                false
            }
        }
    }

    async fn mark_seen(&self, key: &str, id: &str, timestamp: i64) {
        if let Err(e) = self.store.zadd(key, id, timestamp as f64).await {
            warn!(error = %e, "Failed to record sent comment");
        }
    }

    async fn prune(&self, key: &str, now: i64) {
        let cutoff = (now - self.retention()) as f64;
        match self.store.zremrangebyscore(key, f64::NEG_INFINITY, cutoff).await {
            Ok(removed) if removed > 0 => debug!(key, removed, "Pruned seen comments"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Failed to prune seen comments"),
        }
    }

    async fn send_comment(&self, comment: &Comment, target: &Target) {
        for pic in &comment.pics {
            let name = file_name(pic);
            let file = FileDescriptor::url(pic.as_str(), name);
            match self.backend.upload_file(file).await {
                Ok(file_id) if name.ends_with(".gif") => {
                    self.outbox.send(Segment::wx_emoji(file_id), target)
                }
                Ok(file_id) => self.outbox.send(Segment::image(file_id), target),
                Err(e) => warn!(pic = %pic, error = %e, "Failed to upload picture"),
            }
        }
        self.outbox.send_text(caption(comment), target);
    }

    /// Sends up to `limit` unseen comments and returns how many were sent.
    async fn forward(&self, target: &Target, limit: Option<usize>, trigger: Trigger) -> usize {
        let key = seen_key(target.conversation_id());
        let now = Local::now().timestamp();
        let mut sent = 0;
        let mut failed = false;

        'pages: for page in 1..=self.settings.max_pages {
            let comments = match self.source.fetch_page(page).await {
                Ok(comments) => comments,
                Err(e) => {
                    error!(page, error = %e, "Failed to fetch jandan comments");
                    failed = true;
                    break;
                }
            };
            if comments.is_empty() {
                break;
            }
            for comment in comments {
                if limit.is_some_and(|limit| sent >= limit) {
                    break 'pages;
                }
                let timestamp = comment_timestamp(&comment).unwrap_or(now);
                if timestamp < now - self.retention() || self.is_seen(&key, &comment.id).await {
                    continue;
                }
                self.send_comment(&comment, target).await;
                self.mark_seen(&key, &comment.id, timestamp).await;
                sent += 1;
            }
        }
        self.prune(&key, now).await;

        info!(%target, sent, ?trigger, "Jandan forward finished");
        if sent == 0 && trigger == Trigger::Command {
            let reply = if failed {
                "糟糕，煎蛋获取失败"
            } else {
                "暂无更新, 请稍候再试..."
            };
            self.outbox.send_text(reply, target);
        }
        sent
    }
}

/// Forwards jandan comments on demand and on a schedule.
pub struct JandanClient {
    shared: Arc<Shared>,
    access: Arc<AccessManager>,
    timers: Mutex<HashMap<String, CancellationToken>>,
}

impl JandanClient {
    pub const TOPIC: &'static str = "jandan";

    pub fn new(
        settings: JandanSettings,
        backend: BoxedBackend,
        access: Arc<AccessManager>,
        store: Store,
    ) -> ClientResult<Self> {
        let source = JandanApi::new(settings.api_url.clone())
            .map_err(|e| ClientError::Upstream(e.to_string()))?;
        Ok(Self::with_source(settings, backend, access, store, Arc::new(source)))
    }

    pub fn with_source(
        settings: JandanSettings,
        backend: BoxedBackend,
        access: Arc<AccessManager>,
        store: Store,
        source: SharedJandan,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                settings,
                backend,
                store,
                source,
                outbox: Outbox::new(),
            }),
            access,
            timers: Mutex::new(HashMap::new()),
        }
    }

    /// Number of running timers.
    pub fn active_timers(&self) -> usize {
        self.timers.lock().len()
    }

    /// Starts the recurring forward for `target`, replacing a running one.
    fn spawn_timer(&self, target: Target) {
        let token = CancellationToken::new();
        if let Some(previous) = self
            .timers
            .lock()
            .insert(target.conversation_id().to_string(), token.clone())
        {
            previous.cancel();
        }

        let shared = self.shared.clone();
        let period = Duration::from_secs(shared.settings.interval_mins.max(1) * 60);
        tokio::spawn(async move {
            let mut ticks = tokio::time::interval_at(Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticks.tick() => {
                        let hour = Local::now().hour();
                        if shared.settings.is_active_hour(hour) {
                            shared.forward(&target, None, Trigger::Timer).await;
                        } else {
                            debug!(%target, hour, "Outside active hours, skipping tick");
                        }
                    }
                }
            }
            debug!(%target, "Jandan timer stopped");
        });
    }

    fn cancel_timer(&self, conversation: &str) {
        if let Some(token) = self.timers.lock().remove(conversation) {
            token.cancel();
        }
    }

    async fn toggle(&self, toggle: Toggle, target: &Target) -> ClientResult<()> {
        let conversation = target.conversation();
        let id = conversation.conversation_id();
        let store = &self.shared.store;

        let reply = match toggle {
            Toggle::On => {
                store.sadd(SUBSCRIBERS_KEY, &[&conversation]).await?;
                self.spawn_timer(conversation.clone());
                "已开启"
            }
            Toggle::Off => {
                store.srem(SUBSCRIBERS_KEY, &[&conversation]).await?;
                self.cancel_timer(id);
                "已关闭"
            }
            Toggle::Reset => {
                store.del(&seen_key(id)).await?;
                store.srem(SUBSCRIBERS_KEY, &[&conversation]).await?;
                self.cancel_timer(id);
                "煎蛋状态已重置"
            }
        };
        info!(%conversation, ?toggle, "Jandan forward updated");
        self.shared.outbox.send_text(reply, target);
        Ok(())
    }
}

#[async_trait]
impl Client for JandanClient {
    fn name(&self) -> &'static str {
        "jandan"
    }

    async fn start(&self) -> ClientResult<()> {
        let subscribers = self.shared.store.smembers::<Target>(SUBSCRIBERS_KEY).await?;
        for target in subscribers {
            self.spawn_timer(target);
        }
        info!(timers = self.active_timers(), "Jandan timers restored");
        Ok(())
    }

    async fn stop(&self) -> ClientResult<()> {
        for (_, token) in self.timers.lock().drain() {
            token.cancel();
        }
        Ok(())
    }

    async fn receive(&self, message: &Message, target: &Target) -> ClientResult<bool> {
        if message.first_text().is_none() {
            return Ok(false);
        }
        if let Some(out) = self.access.manage(message, target.user_id()).await? {
            self.shared.outbox.send_text(out, target);
            return Ok(true);
        }

        if match_pattern(message, &SEND_NOW).is_some() {
            self.shared.forward(target, None, Trigger::Command).await;
            return Ok(true);
        }
        if let Some(caps) = match_pattern(message, &SEND_TOP) {
            let limit = caps[1].parse::<usize>().unwrap_or(usize::MAX);
            self.shared.forward(target, Some(limit), Trigger::Command).await;
            return Ok(true);
        }

        let Some(toggle) = Toggle::parse(message) else {
            return Ok(false);
        };
        if !is_allowed(&self.access, target).await? {
            return Ok(false);
        }
        self.toggle(toggle, target).await?;
        Ok(true)
    }

    fn outbox(&self) -> &Outbox {
        &self.shared.outbox
    }
}
