//! Which conversation a send or read belongs to, and who may touch it.

use crate::core::errors::{MessagingError, MessagingResult};
use crate::core::identity::{Caller, Role};
use crate::infrastructure::entities::Conversation;
use crate::infrastructure::traits::ConversationStore;
use di::{Ref, injectable};
use log::{debug, info, warn};
use uuid::Uuid;

/// Outcome of [`ConversationMatcher::resolve_for_send`].
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub conversation: Conversation,
    /// The sending admin was just assigned to a previously unassigned conversation.
    pub claimed: bool,
}

#[injectable]
pub struct ConversationMatcher {
    conversations: Ref<dyn ConversationStore>,
}

impl ConversationMatcher {
    pub fn new(conversations: Ref<dyn ConversationStore>) -> Self {
        Self { conversations }
    }

    /// Resolves the conversation a message from `caller` goes into.
    ///
    /// An admin writing into an unassigned conversation becomes its admin here;
    /// if another admin claimed it first the call fails with `Conflict`.
    pub async fn resolve_for_send(
        &self,
        caller: &Caller,
        explicit_conversation_id: Option<Uuid>,
        explicit_investor_id: Option<Uuid>,
        explicit_admin_id: Option<Uuid>,
    ) -> MessagingResult<Resolution> {
        let conversation = match explicit_conversation_id {
            Some(conversation_id) => {
                let conversation = self.load(conversation_id).await?;
                authorize_send(caller, &conversation)?;
                conversation
            }
            None => {
                let (investor_id, admin_id) =
                    participants_for(caller, explicit_investor_id, explicit_admin_id)?;
                self.find_or_create(investor_id, admin_id).await?
            }
        };

        if caller.is_admin() && conversation.is_unassigned() {
            let claimed = self
                .conversations
                .set_admin(conversation.id, caller.id)
                .await?;
            info!("admin {} picked up conversation {}", caller.id, claimed.id);
            return Ok(Resolution {
                conversation: claimed,
                claimed: true,
            });
        }

        Ok(Resolution {
            conversation,
            claimed: false,
        })
    }

    /// Loads a conversation `caller` is allowed to read.
    pub async fn resolve_for_read(
        &self,
        caller: &Caller,
        conversation_id: Uuid,
    ) -> MessagingResult<Conversation> {
        let conversation = self.load(conversation_id).await?;
        authorize_read(caller, &conversation)?;
        Ok(conversation)
    }

    /// Looks the pair up and creates it if missing.
    ///
    /// Two first contacts racing each other both miss the lookup; the loser's
    /// insert hits the unique index and we read back the winner's row.
    pub async fn find_or_create(
        &self,
        investor_id: Uuid,
        admin_id: Option<Uuid>,
    ) -> MessagingResult<Conversation> {
        if let Some(existing) = self
            .conversations
            .find_by_participants(investor_id, admin_id)
            .await?
        {
            return Ok(existing);
        }

        match self.conversations.create(investor_id, admin_id).await {
            Ok(created) => {
                debug!("first contact, opened conversation {}", created.id);
                Ok(created)
            }
            Err(MessagingError::Conflict(reason)) => {
                warn!("lost conversation creation race ({reason}), reloading");
                self.conversations
                    .find_by_participants(investor_id, admin_id)
                    .await?
                    .ok_or(MessagingError::Conflict(reason))
            }
            Err(err) => Err(err),
        }
    }

    async fn load(&self, conversation_id: Uuid) -> MessagingResult<Conversation> {
        self.conversations
            .find_by_id(conversation_id)
            .await?
            .ok_or_else(|| {
                MessagingError::NotFound(format!("conversation {conversation_id} does not exist"))
            })
    }
}

fn participants_for(
    caller: &Caller,
    explicit_investor_id: Option<Uuid>,
    explicit_admin_id: Option<Uuid>,
) -> MessagingResult<(Uuid, Option<Uuid>)> {
    match caller.role {
        Role::Investor => {
            if explicit_investor_id.is_some_and(|id| id != caller.id) {
                return Err(MessagingError::AccessDenied(
                    "investors can only write in their own conversations".to_owned(),
                ));
            }
            Ok((caller.id, explicit_admin_id))
        }
        Role::Admin => {
            if explicit_admin_id.is_some_and(|id| id != caller.id) {
                return Err(MessagingError::AccessDenied(
                    "admins cannot write on behalf of another admin".to_owned(),
                ));
            }
            let investor_id = explicit_investor_id.ok_or_else(|| {
                MessagingError::Validation("choose the investor to write to".to_owned())
            })?;
            Ok((investor_id, Some(caller.id)))
        }
    }
}

/// Admins may read any conversation that is theirs or still unassigned.
pub fn authorize_read(caller: &Caller, conversation: &Conversation) -> MessagingResult<()> {
    let allowed = match caller.role {
        Role::Investor => conversation.investor_id == caller.id,
        Role::Admin => conversation.admin_id.is_none_or(|admin| admin == caller.id),
    };

    if allowed {
        Ok(())
    } else {
        Err(MessagingError::AccessDenied(format!(
            "not a participant of conversation {}",
            conversation.id
        )))
    }
}

fn authorize_send(caller: &Caller, conversation: &Conversation) -> MessagingResult<()> {
    match (caller.role, conversation.admin_id) {
        (Role::Admin, Some(admin)) if admin != caller.id => Err(MessagingError::Conflict(format!(
            "conversation {} is already handled by another admin",
            conversation.id
        ))),
        _ => authorize_read(caller, conversation),
    }
}
