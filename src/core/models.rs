//! Request and response shapes of the messaging facade.

use crate::core::errors::{MessagingError, MessagingResult};
use crate::infrastructure::entities::{Conversation, Message};
use serde::Deserialize;
use uuid::Uuid;

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

/// 1-based page selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Page {
    #[serde(default = "first_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn first_page() -> u32 {
    1
}

fn default_limit() -> u32 {
    DEFAULT_PAGE_SIZE
}

impl Default for Page {
    fn default() -> Self {
        Page {
            page: first_page(),
            limit: default_limit(),
        }
    }
}

impl Page {
    pub fn new(page: u32, limit: u32) -> Page {
        Page { page, limit }
    }

    pub fn validate(self) -> MessagingResult<Page> {
        if self.page == 0 {
            return Err(MessagingError::Validation(
                "page numbers start at 1".to_owned(),
            ));
        }
        if self.limit == 0 || self.limit > MAX_PAGE_SIZE {
            return Err(MessagingError::Validation(format!(
                "limit must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }
        Ok(self)
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page.saturating_sub(1)) * i64::from(self.limit)
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.limit)
    }
}

/// A conversation as shown in a conversation list.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationSummary {
    pub conversation: Conversation,
    pub last_message: Option<Message>,
    /// Messages from the other side the caller has not read yet.
    pub unread_count: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConversationPage {
    pub conversations: Vec<ConversationSummary>,
    pub total: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessagePage {
    /// Oldest first.
    pub messages: Vec<Message>,
    pub total: i64,
}

/// Where a message should go. With no `conversation_id` the target is
/// derived from the caller's role and the explicit participants.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SendMessage {
    pub conversation_id: Option<Uuid>,
    pub investor_id: Option<Uuid>,
    pub admin_id: Option<Uuid>,
    pub content: String,
}

impl SendMessage {
    pub fn text(content: impl Into<String>) -> SendMessage {
        SendMessage {
            content: content.into(),
            ..SendMessage::default()
        }
    }

    pub fn to_conversation(conversation_id: Uuid, content: impl Into<String>) -> SendMessage {
        SendMessage {
            conversation_id: Some(conversation_id),
            content: content.into(),
            ..SendMessage::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub message: Message,
    pub conversation: Conversation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkReadOutcome {
    pub updated_count: u64,
}

/// Trims `content` and rejects it if nothing is left.
pub fn validate_content(content: &str) -> MessagingResult<&str> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(MessagingError::Validation(
            "message content must not be empty".to_owned(),
        ));
    }
    Ok(trimmed)
}
