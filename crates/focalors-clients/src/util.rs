use focalors_core::{Message, Target, strip_mentions};
use focalors_framework::{AccessManager, AccessResult};
use tracing::{debug, warn};

/// Extracts the prompt from the first text segment.
///
/// Mentions are stripped and the result trimmed. Returns `None` for an empty
/// prompt or one longer than `limit` characters.
pub fn get_prompt(message: &Message, limit: Option<usize>) -> Option<String> {
    let text = strip_mentions(message.first_text().unwrap_or_default());
    let text = text.trim();
    let length = text.chars().count();
    if text.is_empty() || limit.is_some_and(|limit| length > limit) {
        warn!(length, "Invalid prompt length, skipping");
        return None;
    }
    debug!(prompt = text, "Processing prompt");
    Some(text.to_string())
}

/// Returns true if the conversation or the sender may use the topic.
pub async fn is_allowed(access: &AccessManager, target: &Target) -> AccessResult<bool> {
    if access.check(target.conversation_id()).await? {
        return Ok(true);
    }
    match target {
        Target::Group {
            user_id: Some(user_id),
            ..
        } => access.check(user_id).await,
        _ => Ok(false),
    }
}

/// Truncates `text` to at most `limit` characters.
pub fn truncate_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use focalors_core::Segment;

    #[test]
    fn test_get_prompt_strips_mentions() {
        let message = Message::new().mention("bot").text("@Bot  hello world ");
        assert_eq!(get_prompt(&message, Some(100)).as_deref(), Some("hello world"));
    }

    #[test]
    fn test_get_prompt_rejects_empty_and_long() {
        assert_eq!(get_prompt(&Message::new().text("@Bot "), None), None);
        assert_eq!(get_prompt(&Message::from(Segment::image("f")), None), None);
        assert_eq!(get_prompt(&Message::from("你好世界"), Some(3)), None);
        assert_eq!(get_prompt(&Message::from("你好世界"), Some(4)).as_deref(), Some("你好世界"));
    }

    #[tokio::test]
    async fn test_is_allowed_by_group_or_sender() {
        use focalors_framework::AccessManagerFactory;
        use focalors_framework::testing::MockBackend;
        use focalors_store::Store;

        let store = Store::memory();
        let factory = AccessManagerFactory::new(store.clone(), MockBackend::new(), Some("boss".into()));
        let access = factory.make("demo");
        store.sadd("admin:access:demo:allowed", &["g1"]).await.unwrap();

        assert!(is_allowed(&access, &Target::group_member("g1", "u").unwrap()).await.unwrap());
        assert!(is_allowed(&access, &Target::group_member("g2", "boss").unwrap()).await.unwrap());
        assert!(!is_allowed(&access, &Target::group_member("g2", "u").unwrap()).await.unwrap());
        assert!(!is_allowed(&access, &Target::private("u")).await.unwrap());
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("你好世界", 2), "你好");
        assert_eq!(truncate_chars("ab", 5), "ab");
    }
}
