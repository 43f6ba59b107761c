use anyhow::Result;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::channel::{self, InboundMessage, ReplyTarget, Typing};
use crate::engine::Engine;

/// Group id for the local terminal court.
pub const CLI_GROUP: &str = "cli";

/// Turn one terminal line into a message in the king's channel.
/// A leading `@king` addresses the king directly.
pub fn parse_line(line: &str, user: &str, channel_name: &str) -> Option<InboundMessage> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let (mentions_bot, content) = channel::strip_mention(line);
    Some(InboundMessage {
        author_id: user.to_string(),
        author_name: user.to_string(),
        content: content.to_string(),
        channel_name: channel_name.to_string(),
        group_id: CLI_GROUP.to_string(),
        group_name: "Terminal".to_string(),
        mentions_bot,
        mention_everyone: false,
    })
}

/// Prints what the king says to any async writer.
pub struct TerminalTarget<W> {
    out: Mutex<W>,
}

impl<W: AsyncWrite + Unpin + Send> TerminalTarget<W> {
    pub fn new(out: W) -> Self {
        Self { out: Mutex::new(out) }
    }

    async fn write(&self, text: &str) -> Result<()> {
        let mut out = self.out.lock().await;
        out.write_all(format!("\n👑 {text}\n\n").as_bytes()).await?;
        out.flush().await?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

#[async_trait::async_trait]
impl<W: AsyncWrite + Unpin + Send> ReplyTarget for TerminalTarget<W> {
    async fn reply(&self, text: &str) -> Result<()> {
        self.write(text).await
    }

    async fn send(&self, text: &str) -> Result<()> {
        self.write(text).await
    }

    fn typing(&self) -> Typing {
        eprint!("(the king is typing...)\r");
        Typing::none()
    }
}

/// Feed lines to the engine until input ends. Failures are reported and the
/// session carries on.
pub async fn play<R, W>(
    engine: &Engine,
    input: R,
    target: &TerminalTarget<W>,
    user: &str,
    channel_name: &str,
) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send,
{
    let mut lines = input.lines();
    let mut answered = 0;
    while let Some(line) = lines.next_line().await? {
        if matches!(line.trim(), "exit" | "quit") {
            break;
        }
        let Some(msg) = parse_line(&line, user, channel_name) else {
            continue;
        };
        match engine.handle_message(&msg, target).await {
            Ok(Some(_)) => answered += 1,
            Ok(None) => {}
            Err(e) => eprintln!("Error: {e:#}"),
        }
    }
    Ok(answered)
}
