//! Conversations endpoints

use crate::api::{ExtractCaller, ValidJson, ValidPath, ValidQuery, realtime};
use crate::api::conversations::schemas::{
    ConversationList, MarkRead, MessagesList, StartConversation, UnreadCount,
};
use crate::core::errors::MessagingError;
use crate::core::models::{Page, SendMessage};
use crate::core::traits::MessagingService;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use di_axum::Inject;
use uuid::Uuid;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_conversations).post(start_conversation))
        .route("/:id", get(get_conversation))
        .route("/:id/messages", get(conversation_messages))
        .route("/:id/read", post(mark_read))
        .route("/:id/events", get(realtime::conversation_events))
}

async fn list_conversations(
    Inject(messaging): Inject<dyn MessagingService>,
    ExtractCaller(caller): ExtractCaller,
    ValidQuery(page): ValidQuery<Page>,
) -> Result<Json<ConversationList>, MessagingError> {
    let page = messaging.list_conversations(&caller, page).await?;
    Ok(Json(page.into()))
}

async fn start_conversation(
    Inject(messaging): Inject<dyn MessagingService>,
    ExtractCaller(caller): ExtractCaller,
    ValidJson(request): ValidJson<StartConversation>,
) -> Result<(StatusCode, Json<schemas::Conversation>), MessagingError> {
    let conversation = messaging
        .start_conversation(request.investor_id, &caller)
        .await?;
    Ok((StatusCode::OK, Json(conversation.into())))
}

async fn get_conversation(
    Inject(messaging): Inject<dyn MessagingService>,
    ExtractCaller(caller): ExtractCaller,
    ValidPath(conversation_id): ValidPath<Uuid>,
) -> Result<Json<schemas::Conversation>, MessagingError> {
    let conversation = messaging.get_conversation(conversation_id, &caller).await?;
    Ok(Json(conversation.into()))
}

async fn conversation_messages(
    Inject(messaging): Inject<dyn MessagingService>,
    ExtractCaller(caller): ExtractCaller,
    ValidPath(conversation_id): ValidPath<Uuid>,
    ValidQuery(page): ValidQuery<Page>,
) -> Result<Json<MessagesList>, MessagingError> {
    let page = messaging
        .list_messages(conversation_id, &caller, page)
        .await?;
    Ok(Json(MessagesList {
        messages: page.messages.into_iter().map(schemas::Message::from).collect(),
        total: page.total,
    }))
}

async fn mark_read(
    Inject(messaging): Inject<dyn MessagingService>,
    ExtractCaller(caller): ExtractCaller,
    ValidPath(conversation_id): ValidPath<Uuid>,
) -> Result<Json<MarkRead>, MessagingError> {
    let outcome = messaging.mark_read(conversation_id, &caller).await?;
    Ok(Json(MarkRead {
        updated_count: outcome.updated_count,
    }))
}

pub(crate) async fn send_message(
    Inject(messaging): Inject<dyn MessagingService>,
    ExtractCaller(caller): ExtractCaller,
    ValidJson(request): ValidJson<SendMessage>,
) -> Result<(StatusCode, Json<schemas::SentMessage>), MessagingError> {
    let sent = messaging.send_message(request, &caller).await?;
    Ok((
        StatusCode::CREATED,
        Json(schemas::SentMessage {
            message: sent.message.into(),
            conversation: sent.conversation.into(),
        }),
    ))
}

pub(crate) async fn unread_count(
    Inject(messaging): Inject<dyn MessagingService>,
    ExtractCaller(caller): ExtractCaller,
) -> Result<Json<UnreadCount>, MessagingError> {
    let unread_count = messaging.unread_count(&caller).await?;
    Ok(Json(UnreadCount { unread_count }))
}

pub mod schemas {
    use crate::core::models;
    use crate::infrastructure::entities;
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};
    use uuid::Uuid;

    #[derive(Deserialize, Debug)]
    pub struct StartConversation {
        pub investor_id: Uuid,
    }

    #[derive(Serialize, Debug)]
    pub struct Conversation {
        pub id: Uuid,
        pub investor_id: Uuid,
        pub admin_id: Option<Uuid>,
        pub last_message_at: Option<DateTime<Utc>>,
        pub created_at: DateTime<Utc>,
        pub updated_at: DateTime<Utc>,
    }

    impl From<entities::Conversation> for Conversation {
        fn from(conversation: entities::Conversation) -> Self {
            Conversation {
                id: conversation.id,
                investor_id: conversation.investor_id,
                admin_id: conversation.admin_id,
                last_message_at: conversation.last_message_at,
                created_at: conversation.created_at,
                updated_at: conversation.updated_at,
            }
        }
    }

    #[derive(Serialize, Debug)]
    pub struct ConversationSummary {
        #[serde(flatten)]
        pub conversation: Conversation,
        pub last_message: Option<Message>,
        pub unread_count: i64,
    }

    impl From<models::ConversationSummary> for ConversationSummary {
        fn from(summary: models::ConversationSummary) -> Self {
            ConversationSummary {
                conversation: summary.conversation.into(),
                last_message: summary.last_message.map(Message::from),
                unread_count: summary.unread_count,
            }
        }
    }

    #[derive(Serialize, Debug)]
    pub struct ConversationList {
        pub conversations: Vec<ConversationSummary>,
        pub total: i64,
    }

    impl From<models::ConversationPage> for ConversationList {
        fn from(page: models::ConversationPage) -> Self {
            ConversationList {
                conversations: page
                    .conversations
                    .into_iter()
                    .map(ConversationSummary::from)
                    .collect(),
                total: page.total,
            }
        }
    }

    #[derive(Serialize, Debug, Default)]
    pub struct MessagesList {
        pub messages: Vec<Message>,
        pub total: i64,
    }

    #[derive(Serialize, Debug)]
    pub struct Message {
        pub id: Uuid,
        pub conversation_id: Uuid,
        pub sender_id: Uuid,
        pub content: String,
        pub read_at: Option<DateTime<Utc>>,
        pub created_at: DateTime<Utc>,
    }

    impl From<entities::Message> for Message {
        fn from(message: entities::Message) -> Self {
            Message {
                id: message.id,
                conversation_id: message.conversation_id,
                sender_id: message.sender_id,
                content: message.content,
                read_at: message.read_at,
                created_at: message.created_at,
            }
        }
    }

    #[derive(Serialize, Debug)]
    pub struct SentMessage {
        pub message: Message,
        pub conversation: Conversation,
    }

    #[derive(Serialize, Debug)]
    pub struct MarkRead {
        pub updated_count: u64,
    }

    #[derive(Serialize, Debug)]
    pub struct UnreadCount {
        pub unread_count: i64,
    }
}
