//! Database entities

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// The thread between one investor and at most one admin.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Conversation {
    pub id: Uuid,
    pub investor_id: Uuid,
    /// `None` while the conversation sits in the shared admin inbox.
    pub admin_id: Option<Uuid>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn is_unassigned(&self) -> bool {
        self.admin_id.is_none()
    }

    /// Whether `user_id` is one of the two sides of this conversation.
    pub fn has_participant(&self, user_id: Uuid) -> bool {
        self.investor_id == user_id || self.admin_id == Some(user_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Message {
    /// Store-assigned insertion sequence, breaks `created_at` ties.
    pub seq: i64,
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn is_unread_for(&self, viewer_id: Uuid) -> bool {
        self.read_at.is_none() && self.sender_id != viewer_id
    }
}
