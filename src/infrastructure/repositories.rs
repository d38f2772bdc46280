//! DB Repository abstractions

use crate::core::errors::{MessagingError, MessagingResult};
use crate::core::identity::{Caller, Role};
use crate::core::models::{Page, validate_content};
use crate::infrastructure::database::{DatabaseConnection, STORE_NOW, store_timestamp};
use crate::infrastructure::entities::{Conversation, Message};
use crate::infrastructure::traits::{ConversationStore, MessageStore, UnreadAggregator};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use di::{Ref, injectable};
use log::{debug, error};
use uuid::Uuid;

/// Converts a driver error, logging the ones that are not business outcomes.
fn store_error(err: sqlx::Error) -> MessagingError {
    let err = MessagingError::from(err);
    if let MessagingError::TransientStore(reason) = &err {
        error!("{reason}");
    }
    err
}

/// Conversations a caller sees: their own, plus the shared inbox for admins.
fn visible_to(role: Role) -> &'static str {
    match role {
        Role::Investor => "investor_id = ?",
        Role::Admin => "(admin_id = ? OR admin_id IS NULL)",
    }
}

#[injectable(ConversationStore)]
pub struct DbConversationStore {
    connection: Ref<DatabaseConnection>,
}

impl DbConversationStore {
    pub fn new(connection: Ref<DatabaseConnection>) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl ConversationStore for DbConversationStore {
    async fn find_by_id(&self, conversation_id: Uuid) -> MessagingResult<Option<Conversation>> {
        sqlx::query_as("SELECT * FROM conversations WHERE id = ?")
            .bind(conversation_id)
            .fetch_optional(&**self.connection)
            .await
            .map_err(store_error)
    }

    async fn find_by_participants(
        &self,
        investor_id: Uuid,
        admin_id: Option<Uuid>,
    ) -> MessagingResult<Option<Conversation>> {
        sqlx::query_as("SELECT * FROM conversations WHERE investor_id = ? AND admin_id IS ?")
            .bind(investor_id)
            .bind(admin_id)
            .fetch_optional(&**self.connection)
            .await
            .map_err(store_error)
    }

    async fn create(
        &self,
        investor_id: Uuid,
        admin_id: Option<Uuid>,
    ) -> MessagingResult<Conversation> {
        let conversation: Conversation = sqlx::query_as(&format!(
            "INSERT INTO conversations (id, investor_id, admin_id, created_at, updated_at) VALUES (?, ?, ?, {STORE_NOW}, {STORE_NOW}) RETURNING *"
        ))
        .bind(Uuid::new_v4())
        .bind(investor_id)
        .bind(admin_id)
        .fetch_one(&**self.connection)
        .await
        .map_err(|e| match store_error(e) {
            MessagingError::Conflict(_) => MessagingError::Conflict(format!(
                "a conversation between investor {investor_id} and {} already exists",
                admin_id.map_or("the admin inbox".to_owned(), |id| format!("admin {id}"))
            )),
            other => other,
        })?;

        debug!(
            "created conversation {} (investor {}, admin {:?})",
            conversation.id, investor_id, admin_id
        );
        Ok(conversation)
    }

    async fn touch_last_message(
        &self,
        conversation_id: Uuid,
        at: DateTime<Utc>,
    ) -> MessagingResult<()> {
        let at = store_timestamp(&at);
        let result = sqlx::query(&format!(
            "UPDATE conversations SET last_message_at = MAX(COALESCE(last_message_at, ''), ?), updated_at = MAX(updated_at, ?, {STORE_NOW}) WHERE id = ?"
        ))
        .bind(&at)
        .bind(&at)
        .bind(conversation_id)
        .execute(&**self.connection)
        .await
        .map_err(store_error)?;

        if result.rows_affected() == 0 {
            return Err(MessagingError::NotFound(format!(
                "conversation {conversation_id} does not exist"
            )));
        }
        Ok(())
    }

    async fn set_admin(&self, conversation_id: Uuid, admin_id: Uuid) -> MessagingResult<Conversation> {
        let updated: Option<Conversation> = sqlx::query_as(&format!(
            "UPDATE conversations SET admin_id = ?, updated_at = MAX(updated_at, {STORE_NOW}) WHERE id = ? AND (admin_id IS NULL OR admin_id = ?) RETURNING *"
        ))
        .bind(admin_id)
        .bind(conversation_id)
        .bind(admin_id)
        .fetch_optional(&**self.connection)
        .await
        .map_err(|e| match store_error(e) {
            MessagingError::Conflict(_) => MessagingError::Conflict(format!(
                "admin {admin_id} already has a separate conversation with this investor"
            )),
            other => other,
        })?;

        match updated {
            Some(conversation) => Ok(conversation),
            None => match self.find_by_id(conversation_id).await? {
                Some(_) => Err(MessagingError::Conflict(format!(
                    "conversation {conversation_id} is already handled by another admin"
                ))),
                None => Err(MessagingError::NotFound(format!(
                    "conversation {conversation_id} does not exist"
                ))),
            },
        }
    }

    async fn release_admin(&self, conversation_id: Uuid, admin_id: Uuid) -> MessagingResult<bool> {
        let result = sqlx::query(&format!(
            "UPDATE conversations SET admin_id = NULL, updated_at = MAX(updated_at, {STORE_NOW}) WHERE id = ? AND admin_id = ? AND NOT EXISTS (SELECT 1 FROM messages WHERE conversation_id = ? AND sender_id = ?)"
        ))
        .bind(conversation_id)
        .bind(admin_id)
        .bind(conversation_id)
        .bind(admin_id)
        .execute(&**self.connection)
        .await
        .map_err(store_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_for_participant(
        &self,
        caller: &Caller,
        page: Page,
    ) -> MessagingResult<(Vec<Conversation>, i64)> {
        let filter = visible_to(caller.role);

        let total: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM conversations WHERE {filter}"
        ))
        .bind(caller.id)
        .fetch_one(&**self.connection)
        .await
        .map_err(store_error)?;

        let conversations = sqlx::query_as(&format!(
            "SELECT * FROM conversations WHERE {filter} ORDER BY last_message_at IS NULL, last_message_at DESC, created_at DESC LIMIT ? OFFSET ?"
        ))
        .bind(caller.id)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&**self.connection)
        .await
        .map_err(store_error)?;

        Ok((conversations, total))
    }
}

#[injectable(MessageStore)]
pub struct DbMessageStore {
    connection: Ref<DatabaseConnection>,
}

impl DbMessageStore {
    pub fn new(connection: Ref<DatabaseConnection>) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl MessageStore for DbMessageStore {
    async fn append(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        content: &str,
    ) -> MessagingResult<Message> {
        let content = validate_content(content)?;

        // created_at never goes below the newest message already in the conversation
        sqlx::query_as(&format!(
            "INSERT INTO messages (id, conversation_id, sender_id, content, created_at) SELECT ?, ?, ?, ?, MAX({STORE_NOW}, COALESCE(MAX(created_at), '')) FROM messages WHERE conversation_id = ? RETURNING *"
        ))
        .bind(Uuid::new_v4())
        .bind(conversation_id)
        .bind(sender_id)
        .bind(content)
        .bind(conversation_id)
        .fetch_one(&**self.connection)
        .await
        .map_err(store_error)
    }

    async fn list_by_conversation(
        &self,
        conversation_id: Uuid,
        page: Page,
    ) -> MessagingResult<(Vec<Message>, i64)> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE conversation_id = ?")
            .bind(conversation_id)
            .fetch_one(&**self.connection)
            .await
            .map_err(store_error)?;

        let messages = sqlx::query_as(
            "SELECT * FROM messages WHERE conversation_id = ? ORDER BY created_at ASC, seq ASC LIMIT ? OFFSET ?",
        )
        .bind(conversation_id)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&**self.connection)
        .await
        .map_err(store_error)?;

        Ok((messages, total))
    }

    async fn latest(&self, conversation_id: Uuid) -> MessagingResult<Option<Message>> {
        sqlx::query_as(
            "SELECT * FROM messages WHERE conversation_id = ? ORDER BY created_at DESC, seq DESC LIMIT 1",
        )
        .bind(conversation_id)
        .fetch_optional(&**self.connection)
        .await
        .map_err(store_error)
    }

    async fn mark_read_except(
        &self,
        conversation_id: Uuid,
        reader_id: Uuid,
        at: DateTime<Utc>,
    ) -> MessagingResult<u64> {
        let result = sqlx::query(
            "UPDATE messages SET read_at = ? WHERE conversation_id = ? AND sender_id != ? AND read_at IS NULL",
        )
        .bind(store_timestamp(&at))
        .bind(conversation_id)
        .bind(reader_id)
        .execute(&**self.connection)
        .await
        .map_err(store_error)?;

        Ok(result.rows_affected())
    }
}

#[injectable(UnreadAggregator)]
pub struct DbUnreadAggregator {
    connection: Ref<DatabaseConnection>,
}

impl DbUnreadAggregator {
    pub fn new(connection: Ref<DatabaseConnection>) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl UnreadAggregator for DbUnreadAggregator {
    async fn count_unread(&self, conversation_id: Uuid, viewer_id: Uuid) -> MessagingResult<i64> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM messages WHERE conversation_id = ? AND sender_id != ? AND read_at IS NULL",
        )
        .bind(conversation_id)
        .bind(viewer_id)
        .fetch_one(&**self.connection)
        .await
        .map_err(store_error)
    }

    async fn count_unread_across_conversations(&self, viewer: &Caller) -> MessagingResult<i64> {
        sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM messages INNER JOIN conversations ON conversations.id = messages.conversation_id WHERE {} AND messages.sender_id != ? AND messages.read_at IS NULL",
            visible_to(viewer.role)
        ))
        .bind(viewer.id)
        .bind(viewer.id)
        .fetch_one(&**self.connection)
        .await
        .map_err(store_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::database::test_support::test_connection;

    struct Stores {
        conversations: DbConversationStore,
        messages: DbMessageStore,
        unread: DbUnreadAggregator,
    }

    async fn stores() -> Stores {
        let connection = test_connection().await;
        Stores {
            conversations: DbConversationStore::new(connection.clone()),
            messages: DbMessageStore::new(connection.clone()),
            unread: DbUnreadAggregator::new(connection),
        }
    }

    #[tokio::test]
    async fn unassigned_and_assigned_are_distinct_keys() {
        let s = stores().await;
        let investor = Uuid::new_v4();
        let admin = Uuid::new_v4();

        let open = s.conversations.create(investor, None).await.unwrap();
        let assigned = s.conversations.create(investor, Some(admin)).await.unwrap();
        assert_ne!(open.id, assigned.id);

        let found = s.conversations.find_by_participants(investor, None).await.unwrap();
        assert_eq!(found.map(|c| c.id), Some(open.id));
        let found = s
            .conversations
            .find_by_participants(investor, Some(admin))
            .await
            .unwrap();
        assert_eq!(found.map(|c| c.id), Some(assigned.id));
        assert!(
            s.conversations
                .find_by_participants(investor, Some(Uuid::new_v4()))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn duplicate_create_is_a_conflict() {
        let s = stores().await;
        let investor = Uuid::new_v4();
        let admin = Uuid::new_v4();

        s.conversations.create(investor, None).await.unwrap();
        let err = s.conversations.create(investor, None).await.unwrap_err();
        assert!(err.is_conflict(), "{err:?}");

        s.conversations.create(investor, Some(admin)).await.unwrap();
        let err = s.conversations.create(investor, Some(admin)).await.unwrap_err();
        assert!(err.is_conflict(), "{err:?}");
    }

    #[tokio::test]
    async fn set_admin_is_first_responder_wins() {
        let s = stores().await;
        let investor = Uuid::new_v4();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        let conversation = s.conversations.create(investor, None).await.unwrap();

        let claimed = s.conversations.set_admin(conversation.id, first).await.unwrap();
        assert_eq!(claimed.admin_id, Some(first));
        assert!(claimed.updated_at >= claimed.created_at);

        // same admin again is a no-op
        let again = s.conversations.set_admin(conversation.id, first).await.unwrap();
        assert_eq!(again.admin_id, Some(first));

        let err = s.conversations.set_admin(conversation.id, second).await.unwrap_err();
        assert_eq!(err.kind(), "conflict");

        let err = s
            .conversations
            .set_admin(Uuid::new_v4(), second)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn set_admin_cannot_duplicate_an_existing_pair() {
        let s = stores().await;
        let investor = Uuid::new_v4();
        let admin = Uuid::new_v4();
        s.conversations.create(investor, Some(admin)).await.unwrap();
        let open = s.conversations.create(investor, None).await.unwrap();

        let err = s.conversations.set_admin(open.id, admin).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn touch_last_message_never_moves_backwards() {
        let s = stores().await;
        let conversation = s.conversations.create(Uuid::new_v4(), None).await.unwrap();
        let later = Utc::now() + chrono::Duration::minutes(5);
        let earlier = Utc::now() - chrono::Duration::minutes(5);

        s.conversations.touch_last_message(conversation.id, later).await.unwrap();
        s.conversations.touch_last_message(conversation.id, earlier).await.unwrap();

        let reloaded = s.conversations.find_by_id(conversation.id).await.unwrap().unwrap();
        assert_eq!(
            reloaded.last_message_at.map(|at| store_timestamp(&at)),
            Some(store_timestamp(&later))
        );
        assert!(reloaded.updated_at >= reloaded.created_at);

        let err = s
            .conversations
            .touch_last_message(Uuid::new_v4(), later)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn append_rejects_blank_content_and_trims() {
        let s = stores().await;
        let investor = Uuid::new_v4();
        let conversation = s.conversations.create(investor, None).await.unwrap();

        let err = s.messages.append(conversation.id, investor, "   ").await.unwrap_err();
        assert_eq!(err.kind(), "validation");

        let message = s
            .messages
            .append(conversation.id, investor, "  hello  ")
            .await
            .unwrap();
        assert_eq!(message.content, "hello");
        assert_eq!(message.sender_id, investor);
        assert!(message.read_at.is_none());
    }

    #[tokio::test]
    async fn append_to_missing_conversation_fails() {
        let s = stores().await;
        let err = s
            .messages
            .append(Uuid::new_v4(), Uuid::new_v4(), "hello")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn messages_come_back_in_insertion_order() {
        let s = stores().await;
        let investor = Uuid::new_v4();
        let admin = Uuid::new_v4();
        let conversation = s.conversations.create(investor, Some(admin)).await.unwrap();

        let mut sent = Vec::new();
        for i in 0..12 {
            let sender = if i % 3 == 0 { admin } else { investor };
            let message = s
                .messages
                .append(conversation.id, sender, &format!("message {i}"))
                .await
                .unwrap();
            sent.push(message.id);
        }

        let (first, total) = s
            .messages
            .list_by_conversation(conversation.id, Page::new(1, 5))
            .await
            .unwrap();
        let (rest, _) = s
            .messages
            .list_by_conversation(conversation.id, Page::new(2, 100))
            .await
            .unwrap();
        assert_eq!(total, 12);
        assert_eq!(first.len(), 5);

        let (all, _) = s
            .messages
            .list_by_conversation(conversation.id, Page::new(1, 100))
            .await
            .unwrap();
        assert_eq!(all.iter().map(|m| m.id).collect::<Vec<_>>(), sent);
        assert!(all.windows(2).all(|w| w[0].created_at <= w[1].created_at));
        assert_eq!(rest.len(), 0);

        let latest = s.messages.latest(conversation.id).await.unwrap().unwrap();
        assert_eq!(Some(latest.id), sent.last().copied());
    }

    #[tokio::test]
    async fn mark_read_is_idempotent_and_skips_own_messages() {
        let s = stores().await;
        let investor = Uuid::new_v4();
        let admin = Uuid::new_v4();
        let conversation = s.conversations.create(investor, Some(admin)).await.unwrap();

        for text in ["one", "two", "three"] {
            s.messages.append(conversation.id, investor, text).await.unwrap();
        }
        s.messages.append(conversation.id, admin, "reply").await.unwrap();

        assert_eq!(s.unread.count_unread(conversation.id, admin).await.unwrap(), 3);
        assert_eq!(s.unread.count_unread(conversation.id, investor).await.unwrap(), 1);

        let first = Utc::now();
        let updated = s
            .messages
            .mark_read_except(conversation.id, admin, first)
            .await
            .unwrap();
        assert_eq!(updated, 3);
        let updated = s
            .messages
            .mark_read_except(conversation.id, admin, Utc::now())
            .await
            .unwrap();
        assert_eq!(updated, 0);

        assert_eq!(s.unread.count_unread(conversation.id, admin).await.unwrap(), 0);
        assert_eq!(s.unread.count_unread(conversation.id, investor).await.unwrap(), 1);

        // the first read timestamp sticks
        let (messages, _) = s
            .messages
            .list_by_conversation(conversation.id, Page::default())
            .await
            .unwrap();
        for message in messages.iter().filter(|m| m.sender_id == investor) {
            assert_eq!(
                message.read_at.map(|at| store_timestamp(&at)),
                Some(store_timestamp(&first))
            );
        }
    }

    #[tokio::test]
    async fn unread_total_is_the_sum_over_conversations() {
        let s = stores().await;
        let admin = Uuid::new_v4();
        let investors = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];

        let mut conversations = Vec::new();
        for (n, investor) in investors.iter().enumerate() {
            let conversation = s.conversations.create(*investor, Some(admin)).await.unwrap();
            for i in 0..=n {
                s.messages
                    .append(conversation.id, *investor, &format!("ping {i}"))
                    .await
                    .unwrap();
            }
            conversations.push(conversation);
        }
        // another admin's thread does not count
        let other = s
            .conversations
            .create(Uuid::new_v4(), Some(Uuid::new_v4()))
            .await
            .unwrap();
        s.messages.append(other.id, other.investor_id, "hi").await.unwrap();
        // the shared inbox does
        let open = s.conversations.create(Uuid::new_v4(), None).await.unwrap();
        s.messages.append(open.id, open.investor_id, "anyone?").await.unwrap();
        conversations.push(open);

        let mut sum = 0;
        for conversation in &conversations {
            sum += s.unread.count_unread(conversation.id, admin).await.unwrap();
        }
        assert_eq!(sum, 7);
        assert_eq!(
            s.unread
                .count_unread_across_conversations(&Caller::admin(admin))
                .await
                .unwrap(),
            sum
        );
        assert_eq!(
            s.unread
                .count_unread_across_conversations(&Caller::investor(investors[0]))
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn listing_respects_role_visibility() {
        let s = stores().await;
        let investor = Uuid::new_v4();
        let admin = Uuid::new_v4();
        let other_admin = Uuid::new_v4();

        let open = s.conversations.create(investor, None).await.unwrap();
        let mine = s.conversations.create(investor, Some(admin)).await.unwrap();
        s.conversations
            .create(Uuid::new_v4(), Some(other_admin))
            .await
            .unwrap();
        s.messages.append(open.id, investor, "first").await.unwrap();
        let last = s.messages.append(mine.id, admin, "second").await.unwrap();
        s.conversations
            .touch_last_message(mine.id, last.created_at)
            .await
            .unwrap();

        let (seen, total) = s
            .conversations
            .list_for_participant(&Caller::admin(admin), Page::default())
            .await
            .unwrap();
        assert_eq!(total, 2);
        // conversations with activity come first
        assert_eq!(seen[0].id, mine.id);
        assert_eq!(seen[1].id, open.id);

        let (seen, total) = s
            .conversations
            .list_for_participant(&Caller::investor(investor), Page::new(1, 1))
            .await
            .unwrap();
        assert_eq!(total, 2);
        assert_eq!(seen.len(), 1);
    }

    #[tokio::test]
    async fn badge_matches_the_visible_list() {
        let s = stores().await;
        let admin = Caller::admin(Uuid::new_v4());
        let open = s.conversations.create(Uuid::new_v4(), None).await.unwrap();
        s.messages.append(open.id, open.investor_id, "hello").await.unwrap();

        let (seen, _) = s
            .conversations
            .list_for_participant(&admin, Page::default())
            .await
            .unwrap();
        let mut listed = 0;
        for conversation in &seen {
            listed += s.unread.count_unread(conversation.id, admin.id).await.unwrap();
        }

        assert_eq!(listed, 1);
        assert_eq!(
            s.unread.count_unread_across_conversations(&admin).await.unwrap(),
            listed
        );
    }

    #[tokio::test]
    async fn release_admin_only_undoes_a_silent_claim() {
        let s = stores().await;
        let investor = Uuid::new_v4();
        let admin = Uuid::new_v4();
        let conversation = s.conversations.create(investor, None).await.unwrap();

        s.conversations.set_admin(conversation.id, admin).await.unwrap();
        assert!(s.conversations.release_admin(conversation.id, admin).await.unwrap());
        let reloaded = s.conversations.find_by_id(conversation.id).await.unwrap().unwrap();
        assert!(reloaded.is_unassigned());

        // once the admin has written, the claim stays
        s.conversations.set_admin(conversation.id, admin).await.unwrap();
        s.messages.append(conversation.id, admin, "hi").await.unwrap();
        assert!(!s.conversations.release_admin(conversation.id, admin).await.unwrap());
        let reloaded = s.conversations.find_by_id(conversation.id).await.unwrap().unwrap();
        assert_eq!(reloaded.admin_id, Some(admin));

        // and nobody else can release it
        assert!(
            !s.conversations
                .release_admin(conversation.id, Uuid::new_v4())
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn created_at_never_falls_behind_the_newest_message() {
        let s = stores().await;
        let investor = Uuid::new_v4();
        let admin = Uuid::new_v4();
        let conversation = s.conversations.create(investor, Some(admin)).await.unwrap();

        // a message stamped by a clock running ahead of ours
        let ahead = "2999-01-01T00:00:00.000Z";
        let early: Message = sqlx::query_as(
            "INSERT INTO messages (id, conversation_id, sender_id, content, created_at) VALUES (?, ?, ?, ?, ?) RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(conversation.id)
        .bind(investor)
        .bind("from the future")
        .bind(ahead)
        .fetch_one(&**s.messages.connection)
        .await
        .unwrap();
        s.conversations
            .touch_last_message(conversation.id, early.created_at)
            .await
            .unwrap();

        let later = s
            .messages
            .append(conversation.id, admin, "reply")
            .await
            .unwrap();
        assert!(later.created_at >= early.created_at);
        assert_eq!(store_timestamp(&later.created_at), ahead);

        s.conversations
            .touch_last_message(conversation.id, later.created_at)
            .await
            .unwrap();
        let (messages, _) = s
            .messages
            .list_by_conversation(conversation.id, Page::default())
            .await
            .unwrap();
        assert_eq!(
            messages.iter().map(|m| m.id).collect::<Vec<_>>(),
            vec![early.id, later.id]
        );

        let reloaded = s.conversations.find_by_id(conversation.id).await.unwrap().unwrap();
        assert_eq!(reloaded.last_message_at, Some(later.created_at));
    }
}
