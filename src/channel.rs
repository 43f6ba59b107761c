use anyhow::Result;
use serde::{Deserialize, Serialize};

/// One chat message as delivered by the host platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub author_id: String,
    pub author_name: String,
    pub content: String,
    pub channel_name: String,
    pub group_id: String,
    pub group_name: String,
    #[serde(default)]
    pub mentions_bot: bool,
    #[serde(default)]
    pub mention_everyone: bool,
}

const MENTION: &str = "@king";

/// Split a leading `@king` (any case) off a typed line. The tag must stand
/// alone, so `@kingdom` is ordinary text.
pub fn strip_mention(text: &str) -> (bool, &str) {
    let Some(rest) = text
        .get(..MENTION.len())
        .filter(|p| p.eq_ignore_ascii_case(MENTION))
        .map(|_| &text[MENTION.len()..])
    else {
        return (false, text);
    };
    match rest.chars().next() {
        None => (true, rest),
        Some(c) if c.is_whitespace() => (true, rest.trim_start()),
        Some(_) => (false, text),
    }
}

/// Scoped "is typing" indicator; the stop hook runs on drop.
pub struct Typing(Option<Box<dyn FnOnce() + Send>>);

impl Typing {
    pub fn none() -> Self {
        Self(None)
    }

    pub fn with_stop(stop: impl FnOnce() + Send + 'static) -> Self {
        Self(Some(Box::new(stop)))
    }
}

impl Drop for Typing {
    fn drop(&mut self) {
        if let Some(stop) = self.0.take() {
            stop();
        }
    }
}

/// Where the king's words go for the message being handled.
#[async_trait::async_trait]
pub trait ReplyTarget: Send + Sync {
    /// Answer the inbound message directly.
    async fn reply(&self, text: &str) -> Result<()>;
    /// Post to the channel without quoting the inbound message.
    async fn send(&self, text: &str) -> Result<()>;
    fn typing(&self) -> Typing {
        Typing::none()
    }
}
