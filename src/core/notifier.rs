//! Realtime invalidation fan-out.
//!
//! Subscribers are told *that* something changed in a scope, never *what*;
//! they re-fetch through the facade. Losing the notifier costs latency only.

use async_stream::stream;
use futures_util::Stream;
use log::{debug, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::{self, Display};
use std::pin::Pin;
use std::sync::Mutex;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Scope {
    Conversation(Uuid),
    User(Uuid),
    /// Every admin watching the shared inbox of unassigned conversations.
    Unassigned,
}

impl Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Conversation(id) => write!(f, "conversation:{id}"),
            Scope::User(id) => write!(f, "user:{id}"),
            Scope::Unassigned => f.write_str("unassigned"),
        }
    }
}

/// Hint about what kind of change happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    MessageCreated,
    MessagesRead,
    ConversationChanged,
    /// Notifications were dropped; re-fetch everything in scope.
    Resync,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChangeEvent {
    pub scope: Scope,
    pub kind: ChangeKind,
}

pub type EventStream = Pin<Box<dyn Stream<Item = ChangeEvent> + Send>>;

pub trait RealtimeNotifier: Send + Sync {
    /// Fire and forget; never fails the caller.
    fn publish(&self, scope: Scope, kind: ChangeKind);

    fn subscribe(&self, scope: Scope) -> EventStream;
}

/// In-process notifier with one broadcast channel per live scope.
pub struct BroadcastNotifier {
    capacity: usize,
    channels: Mutex<HashMap<Scope, broadcast::Sender<ChangeEvent>>>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> BroadcastNotifier {
        BroadcastNotifier {
            capacity: capacity.max(1),
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Number of scopes that currently have at least one subscriber.
    pub fn active_scopes(&self) -> usize {
        match self.channels.lock() {
            Ok(channels) => channels
                .values()
                .filter(|sender| sender.receiver_count() > 0)
                .count(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

impl RealtimeNotifier for BroadcastNotifier {
    fn publish(&self, scope: Scope, kind: ChangeKind) {
        let mut channels = match self.channels.lock() {
            Ok(channels) => channels,
            Err(poisoned) => poisoned.into_inner(),
        };

        let Some(sender) = channels.get(&scope) else {
            return;
        };

        if sender.send(ChangeEvent { scope, kind }).is_err() {
            // last subscriber went away
            channels.remove(&scope);
            debug!("dropped idle realtime scope {scope}");
        }
    }

    fn subscribe(&self, scope: Scope) -> EventStream {
        let mut receiver = {
            let mut channels = match self.channels.lock() {
                Ok(channels) => channels,
                Err(poisoned) => poisoned.into_inner(),
            };
            // scopes whose subscribers all hung up without anything being published
            channels.retain(|_, sender| sender.receiver_count() > 0);
            channels
                .entry(scope)
                .or_insert_with(|| broadcast::channel(self.capacity).0)
                .subscribe()
        };
        debug!("new realtime subscriber for {scope}");

        Box::pin(stream! {
            loop {
                match receiver.recv().await {
                    Ok(event) => yield event,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("subscriber on {scope} lagged by {skipped} events");
                        yield ChangeEvent { scope, kind: ChangeKind::Resync };
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}
