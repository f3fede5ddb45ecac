//! Chat list accumulation over the backend's windowed chat pages.

use tracing::{debug, info};

use crate::chat::{Chat, ChatBackend, ChatCursor};
use crate::error::Result;
use crate::metrics;

/// Ordered snapshot of the account's chats, grown page by page.
///
/// Order follows the backend's page order. Once a page comes back empty the
/// list is complete and further calls to [`accumulate`](Self::accumulate)
/// do nothing.
#[derive(Debug, Default)]
pub struct ChatAccumulator {
    chats: Vec<Chat>,
    complete: bool,
}

impl ChatAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grow the list toward `target` chats, or until the backend runs out.
    ///
    /// A failure to resolve any chat aborts the call; chats appended before
    /// the failure stay in the list.
    pub async fn accumulate<B>(&mut self, backend: &B, target: usize) -> Result<()>
    where
        B: ChatBackend + ?Sized,
    {
        while !self.complete && self.chats.len() < target {
            let remaining = target - self.chats.len();
            let cursor = self.cursor();
            let ids = backend.chat_page(cursor, remaining).await?;

            if ids.is_empty() {
                debug!(total = self.chats.len(), "Chat list exhausted");
                self.complete = true;
                break;
            }

            for chat_id in ids.into_iter().take(remaining) {
                let chat = backend.chat(chat_id).await?;
                self.append(chat);
            }
        }

        metrics::set_accumulated_chats(self.chats.len());
        info!(
            chats = self.chats.len(),
            complete = self.complete,
            "Chat list accumulated"
        );
        Ok(())
    }

    /// Cursor after the last accumulated chat.
    pub fn cursor(&self) -> ChatCursor {
        self.chats
            .last()
            .map(ChatCursor::after)
            .unwrap_or(ChatCursor::START)
    }

    pub fn append(&mut self, chat: Chat) {
        self.chats.push(chat);
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn len(&self) -> usize {
        self.chats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chats.is_empty()
    }

    pub fn snapshot(&self) -> &[Chat] {
        &self.chats
    }
}
