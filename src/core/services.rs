//! Implementations for the service the app needs.
//!

use crate::core::errors::{MessagingError, MessagingResult};
use crate::core::identity::Caller;
use crate::core::matcher::{ConversationMatcher, Resolution};
use crate::core::models::{
    ConversationPage, ConversationSummary, MarkReadOutcome, MessagePage, Page, SendMessage,
    SentMessage, validate_content,
};
use crate::core::notifier::{ChangeKind, EventStream, RealtimeNotifier, Scope};
use crate::core::traits::MessagingService;
use crate::infrastructure::entities::Conversation;
use crate::infrastructure::traits::{ConversationStore, MessageStore, UnreadAggregator};
use async_trait::async_trait;
use chrono::Utc;
use di::{Ref, injectable};
use log::{debug, info, warn};
use uuid::Uuid;

#[injectable(MessagingService)]
pub struct MessagingFacade {
    matcher: Ref<ConversationMatcher>,
    conversations: Ref<dyn ConversationStore>,
    messages: Ref<dyn MessageStore>,
    unread: Ref<dyn UnreadAggregator>,
    notifier: Ref<dyn RealtimeNotifier>,
}

impl MessagingFacade {
    pub fn new(
        conversations: Ref<dyn ConversationStore>,
        messages: Ref<dyn MessageStore>,
        unread: Ref<dyn UnreadAggregator>,
        notifier: Ref<dyn RealtimeNotifier>,
    ) -> Self {
        Self {
            matcher: Ref::new(ConversationMatcher::new(conversations.clone())),
            conversations,
            messages,
            unread,
            notifier,
        }
    }

    /// Tells everyone watching `conversation` (and, when relevant, the admin inbox)
    /// to re-fetch.
    fn announce(&self, conversation: &Conversation, kind: ChangeKind, inbox_changed: bool) {
        self.notifier
            .publish(Scope::Conversation(conversation.id), kind);
        self.notifier
            .publish(Scope::User(conversation.investor_id), kind);
        if let Some(admin_id) = conversation.admin_id {
            self.notifier.publish(Scope::User(admin_id), kind);
        }
        if inbox_changed || conversation.is_unassigned() {
            self.notifier
                .publish(Scope::Unassigned, ChangeKind::ConversationChanged);
        }
    }

    /// Undoes a first-responder claim whose message never made it into the store.
    async fn release_claim(&self, conversation: &Conversation, caller: &Caller) {
        match self
            .conversations
            .release_admin(conversation.id, caller.id)
            .await
        {
            Ok(true) => {
                info!(
                    "admin {} released conversation {} after a failed send",
                    caller.id, conversation.id
                );
                self.notifier
                    .publish(Scope::Unassigned, ChangeKind::ConversationChanged);
            }
            Ok(false) => {}
            Err(err) => warn!(
                "could not release conversation {} for admin {}: {err}",
                conversation.id, caller.id
            ),
        }
    }

    async fn reload(&self, conversation_id: Uuid) -> MessagingResult<Conversation> {
        self.conversations
            .find_by_id(conversation_id)
            .await?
            .ok_or_else(|| {
                MessagingError::NotFound(format!("conversation {conversation_id} does not exist"))
            })
    }
}

#[async_trait]
impl MessagingService for MessagingFacade {
    async fn list_conversations(
        &self,
        caller: &Caller,
        page: Page,
    ) -> MessagingResult<ConversationPage> {
        let page = page.validate()?;
        let (conversations, total) = self
            .conversations
            .list_for_participant(caller, page)
            .await?;

        let mut summaries = Vec::with_capacity(conversations.len());
        for conversation in conversations {
            let last_message = self.messages.latest(conversation.id).await?;
            let unread_count = self.unread.count_unread(conversation.id, caller.id).await?;
            summaries.push(ConversationSummary {
                conversation,
                last_message,
                unread_count,
            });
        }

        Ok(ConversationPage {
            conversations: summaries,
            total,
        })
    }

    async fn get_conversation(
        &self,
        conversation_id: Uuid,
        caller: &Caller,
    ) -> MessagingResult<Conversation> {
        self.matcher.resolve_for_read(caller, conversation_id).await
    }

    async fn list_messages(
        &self,
        conversation_id: Uuid,
        caller: &Caller,
        page: Page,
    ) -> MessagingResult<MessagePage> {
        let page = page.validate()?;
        let conversation = self.matcher.resolve_for_read(caller, conversation_id).await?;
        let (messages, total) = self
            .messages
            .list_by_conversation(conversation.id, page)
            .await?;

        Ok(MessagePage { messages, total })
    }

    async fn send_message(
        &self,
        request: SendMessage,
        caller: &Caller,
    ) -> MessagingResult<SentMessage> {
        // a rejected message must not open or claim anything
        let content = validate_content(&request.content)?;

        let Resolution {
            conversation,
            claimed,
        } = self
            .matcher
            .resolve_for_send(
                caller,
                request.conversation_id,
                request.investor_id,
                request.admin_id,
            )
            .await?;
        debug_assert!(conversation.has_participant(caller.id));

        let message = match self
            .messages
            .append(conversation.id, caller.id, content)
            .await
        {
            Ok(message) => message,
            Err(err) => {
                if claimed {
                    self.release_claim(&conversation, caller).await;
                }
                return Err(err);
            }
        };
        if let Err(err) = self
            .conversations
            .touch_last_message(conversation.id, message.created_at)
            .await
        {
            // the message is stored, so watchers still need to hear about it
            self.announce(&conversation, ChangeKind::MessageCreated, claimed);
            return Err(err);
        }
        let conversation = self.reload(conversation.id).await?;

        debug!(
            "{} {} sent message {} in conversation {}",
            caller.role, caller.id, message.id, conversation.id
        );
        self.announce(&conversation, ChangeKind::MessageCreated, claimed);

        Ok(SentMessage {
            message,
            conversation,
        })
    }

    async fn mark_read(
        &self,
        conversation_id: Uuid,
        caller: &Caller,
    ) -> MessagingResult<MarkReadOutcome> {
        let conversation = self.matcher.resolve_for_read(caller, conversation_id).await?;
        let updated_count = self
            .messages
            .mark_read_except(conversation.id, caller.id, Utc::now())
            .await?;

        if updated_count > 0 {
            debug!(
                "{} marked {updated_count} messages read in {}",
                caller.id, conversation.id
            );
            self.notifier
                .publish(Scope::Conversation(conversation.id), ChangeKind::MessagesRead);
            self.notifier
                .publish(Scope::User(caller.id), ChangeKind::MessagesRead);
            if conversation.is_unassigned() {
                // every admin's inbox shows these unread counts
                self.notifier
                    .publish(Scope::Unassigned, ChangeKind::MessagesRead);
            }
        }

        Ok(MarkReadOutcome { updated_count })
    }

    async fn start_conversation(
        &self,
        investor_id: Uuid,
        caller: &Caller,
    ) -> MessagingResult<Conversation> {
        if !caller.is_admin() {
            return Err(MessagingError::AccessDenied(
                "only admins can start a conversation with an investor".to_owned(),
            ));
        }

        let conversation = self
            .matcher
            .find_or_create(investor_id, Some(caller.id))
            .await?;
        info!(
            "admin {} opened conversation {} with investor {investor_id}",
            caller.id, conversation.id
        );
        self.announce(&conversation, ChangeKind::ConversationChanged, false);

        Ok(conversation)
    }

    async fn unread_count(&self, caller: &Caller) -> MessagingResult<i64> {
        self.unread
            .count_unread_across_conversations(caller)
            .await
    }

    fn subscribe_to_conversation(&self, conversation_id: Uuid) -> EventStream {
        self.notifier.subscribe(Scope::Conversation(conversation_id))
    }

    fn subscribe_to_user_scope(&self, user_id: Uuid) -> EventStream {
        self.notifier.subscribe(Scope::User(user_id))
    }

    fn subscribe_to_unassigned(&self) -> EventStream {
        self.notifier.subscribe(Scope::Unassigned)
    }
}
