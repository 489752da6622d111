//! Group sign-up for the "random abyss" challenge.
//!
//! Members who cleared the abyss with full stars register themselves; the
//! status message lists them using a template the master can replace.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, warn};

use focalors_core::{
    BoxedBackend, CardData, Client, ClientResult, Message, Outbox, Target, match_pattern,
};
use focalors_framework::AccessManager;
use focalors_store::Store;

use crate::util::is_allowed;

const TEMPLATE_KEY: &str = "client:random-abyss-template";
const DEFAULT_TEMPLATE: &str = "随机深渊杯,目前{candidates}";

fn candidates_key(group_id: &str) -> String {
    format!("client:random-abyss:{group_id}")
}

static STATUS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#\s*随机深渊杯\s*$").expect("status pattern is valid"));
static JOIN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#\s*随机深渊杯满星\s*$").expect("join pattern is valid"));
static LEAVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^#\s*随机深渊杯(满星)?撤销\s*$").expect("leave pattern is valid")
});
static CLEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#\s*随机深渊杯清空\s*$").expect("clear pattern is valid"));
static SET_TEMPLATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^#\s*随机深渊杯设置\s*$").expect("template pattern is valid")
});
static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\s*candidates\s*\}").expect("placeholder pattern is valid")
});

fn card() -> CardData {
    CardData {
        name: Some(String::new()),
        account: "gh_cabafdd5cf81".to_string(),
        title: "Random Abyss".to_string(),
        digest: Some(String::new()),
        url: "https://mp.weixin.qq.com/mp/getmasssendmsg?__biz=MzkyMjYyMzY1MA==#wechat_webview_type=1&wechat_redirect".to_string(),
        thumburl: "http://mmbiz.qpic.cn/sz_mmbiz_png/nMeboN2UZ1ghzh1zzpN3xrYDUiaENePuH9JiaoBLVJhTfYkBh4Z9icBNVYfqS7ylaBEBhJX22nwLZ5yGL0dSDOFxQ/0?wx_fmt=png".to_string(),
    }
}

/// Renders `template` with the candidate list.
fn render(template: &str, names: &[String]) -> String {
    let outcome = if names.is_empty() {
        "暂无人满星".to_string()
    } else {
        format!("满星{}名: {}", names.len(), names.join(","))
    };
    PLACEHOLDER.replace(template, outcome.as_str()).into_owned()
}

pub struct RandomAbyssClient {
    backend: BoxedBackend,
    access: Arc<AccessManager>,
    store: Store,
    outbox: Outbox,
}

impl RandomAbyssClient {
    pub const TOPIC: &'static str = "abyss";

    pub fn new(backend: BoxedBackend, access: Arc<AccessManager>, store: Store) -> Self {
        Self {
            backend,
            access,
            store,
            outbox: Outbox::new(),
        }
    }

    /// Display names of the registered members, sorted.
    async fn candidates(&self, group_id: &str) -> ClientResult<Vec<String>> {
        let ids = self.store.smembers::<String>(&candidates_key(group_id)).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let members = match self.backend.get_group_members(group_id).await {
            Ok(members) => members,
            Err(e) => {
                warn!(group = group_id, error = %e, "Failed to resolve member names");
                Default::default()
            }
        };
        let mut names: Vec<String> = ids
            .into_iter()
            .map(|id| members.get(&id).cloned().unwrap_or(id))
            .collect();
        names.sort();
        Ok(names)
    }

    async fn send_status(&self, group_id: &str, target: &Target) -> ClientResult<()> {
        let names = self.candidates(group_id).await?;
        let template = self
            .store
            .get::<String>(TEMPLATE_KEY)
            .await?
            .unwrap_or_else(|| DEFAULT_TEMPLATE.to_string());
        let status = Message::new().text(render(&template, &names)).card(card());
        self.outbox.send(status, target);
        Ok(())
    }

    /// Handles the open group commands. Returns false if none matched.
    async fn group_command(
        &self,
        message: &Message,
        group_id: &str,
        user_id: Option<&str>,
        target: &Target,
    ) -> ClientResult<bool> {
        let key = candidates_key(group_id);
        if match_pattern(message, &STATUS).is_some() {
            self.send_status(group_id, target).await?;
        } else if match_pattern(message, &JOIN).is_some() {
            if let Some(user_id) = user_id {
                self.store.sadd(&key, &[user_id]).await?;
            }
            self.send_status(group_id, target).await?;
        } else if match_pattern(message, &LEAVE).is_some() {
            if let Some(user_id) = user_id {
                self.store.srem(&key, &[user_id]).await?;
            }
            self.send_status(group_id, target).await?;
        } else if match_pattern(message, &CLEAR).is_some() {
            self.store.del(&key).await?;
            self.outbox.send_text("已清空", target);
        } else {
            return Ok(false);
        }
        Ok(true)
    }

    async fn set_template(&self, message: &Message, target: &Target) -> ClientResult<()> {
        let Some(reply) = message.reply() else {
            self.outbox.send_text("请回复模板消息", target);
            return Ok(());
        };
        let Some(template) = reply.message_content.as_str().filter(|t| !t.is_empty()) else {
            self.outbox.send_text("请回复文字消息", target);
            return Ok(());
        };
        self.store.set(TEMPLATE_KEY, template, None).await?;
        debug!(template, "Abyss template updated");
        self.outbox.send_text("设置成功", target);
        if let Some(group_id) = target.group_id() {
            self.send_status(group_id, target).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Client for RandomAbyssClient {
    fn name(&self) -> &'static str {
        "abyss"
    }

    async fn receive(&self, message: &Message, target: &Target) -> ClientResult<bool> {
        if message.first_text().is_none() {
            return Ok(false);
        }
        if let Some(out) = self.access.manage(message, target.user_id()).await? {
            self.outbox.send_text(out, target);
            return Ok(true);
        }

        if let Some(group_id) = target.group_id()
            && self
                .group_command(message, group_id, target.user_id(), target)
                .await?
        {
            return Ok(true);
        }

        if match_pattern(message, &SET_TEMPLATE).is_none() {
            return Ok(false);
        }
        if !is_allowed(&self.access, target).await? {
            return Ok(false);
        }
        self.set_template(message, target).await?;
        Ok(true)
    }

    fn outbox(&self) -> &Outbox {
        &self.outbox
    }
}
