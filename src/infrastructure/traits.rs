//! Infrastructure traits, used for DI on higher levels

use crate::core::errors::MessagingResult;
use crate::core::identity::Caller;
use crate::core::models::Page;
use crate::infrastructure::entities;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn find_by_id(&self, conversation_id: Uuid)
    -> MessagingResult<Option<entities::Conversation>>;

    /// Exact match on both sides; `admin_id = None` only matches unassigned rows.
    async fn find_by_participants(
        &self,
        investor_id: Uuid,
        admin_id: Option<Uuid>,
    ) -> MessagingResult<Option<entities::Conversation>>;

    /// Inserts a new conversation.
    ///
    /// Returns `Conflict` if one already exists for the pair; the check is the
    /// store's unique index, not a prior lookup.
    async fn create(
        &self,
        investor_id: Uuid,
        admin_id: Option<Uuid>,
    ) -> MessagingResult<entities::Conversation>;

    /// Moves `last_message_at` forward to `at` (never backwards) and bumps `updated_at`.
    async fn touch_last_message(
        &self,
        conversation_id: Uuid,
        at: DateTime<Utc>,
    ) -> MessagingResult<()>;

    /// Claims an unassigned conversation for `admin_id`.
    ///
    /// Returns `Conflict` if another admin got there first.
    async fn set_admin(
        &self,
        conversation_id: Uuid,
        admin_id: Uuid,
    ) -> MessagingResult<entities::Conversation>;

    /// Hands a claimed conversation back to the shared inbox.
    ///
    /// Only undoes a claim by `admin_id` that has no message from that admin yet.
    /// Returns whether the conversation is unassigned again.
    async fn release_admin(&self, conversation_id: Uuid, admin_id: Uuid) -> MessagingResult<bool>;

    /// Conversations visible to `caller`, most recently active first.
    async fn list_for_participant(
        &self,
        caller: &Caller,
        page: Page,
    ) -> MessagingResult<(Vec<entities::Conversation>, i64)>;
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Appends a message; `created_at` and ordering are assigned by the store.
    ///
    /// Does not check that the sender belongs to the conversation.
    async fn append(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        content: &str,
    ) -> MessagingResult<entities::Message>;

    async fn list_by_conversation(
        &self,
        conversation_id: Uuid,
        page: Page,
    ) -> MessagingResult<(Vec<entities::Message>, i64)>;

    async fn latest(&self, conversation_id: Uuid) -> MessagingResult<Option<entities::Message>>;

    /// Marks everything not sent by `reader_id` as read at `at`.
    ///
    /// Already-read messages keep their timestamp. Returns the number of rows changed.
    async fn mark_read_except(
        &self,
        conversation_id: Uuid,
        reader_id: Uuid,
        at: DateTime<Utc>,
    ) -> MessagingResult<u64>;
}

#[async_trait]
pub trait UnreadAggregator: Send + Sync {
    async fn count_unread(&self, conversation_id: Uuid, viewer_id: Uuid) -> MessagingResult<i64>;

    /// Sum of [`UnreadAggregator::count_unread`] over every conversation
    /// [`ConversationStore::list_for_participant`] shows to `viewer`.
    async fn count_unread_across_conversations(&self, viewer: &Caller) -> MessagingResult<i64>;
}
