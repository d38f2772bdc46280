//! DI "Interfaces"

use crate::core::errors::MessagingResult;
use crate::core::identity::Caller;
use crate::core::models::{
    ConversationPage, MarkReadOutcome, MessagePage, Page, SendMessage, SentMessage,
};
use crate::core::notifier::EventStream;
use crate::infrastructure::entities;
use async_trait::async_trait;
use uuid::Uuid;

/// Everything the portal UI may do with investor/admin messaging.
#[async_trait]
pub trait MessagingService: Send + Sync {
    /// Lists the conversations visible to the caller with their last message and
    /// the caller's unread count.
    async fn list_conversations(
        &self,
        caller: &Caller,
        page: Page,
    ) -> MessagingResult<ConversationPage>;

    /// Loads a single conversation.
    ///
    /// Returns `AccessDenied` if the caller may not see it.
    async fn get_conversation(
        &self,
        conversation_id: Uuid,
        caller: &Caller,
    ) -> MessagingResult<entities::Conversation>;

    /// List the messages of a conversation, oldest first.
    ///
    /// Returns `AccessDenied` if the caller is not a participant.
    async fn list_messages(
        &self,
        conversation_id: Uuid,
        caller: &Caller,
        page: Page,
    ) -> MessagingResult<MessagePage>;

    /// Sends a message, opening the conversation on first contact.
    async fn send_message(
        &self,
        request: SendMessage,
        caller: &Caller,
    ) -> MessagingResult<SentMessage>;

    /// Marks every message from the other side as read.
    async fn mark_read(
        &self,
        conversation_id: Uuid,
        caller: &Caller,
    ) -> MessagingResult<MarkReadOutcome>;

    /// Opens (or returns) the caller's conversation with an investor. Admins only.
    async fn start_conversation(
        &self,
        investor_id: Uuid,
        caller: &Caller,
    ) -> MessagingResult<entities::Conversation>;

    /// Badge count across all of the caller's conversations.
    async fn unread_count(&self, caller: &Caller) -> MessagingResult<i64>;

    fn subscribe_to_conversation(&self, conversation_id: Uuid) -> EventStream;

    fn subscribe_to_user_scope(&self, user_id: Uuid) -> EventStream;

    fn subscribe_to_unassigned(&self) -> EventStream;
}
