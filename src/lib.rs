//! Investor <-> admin messaging service - Library exports for testing
//!
//! Conversations, ordered messages, read state, unread counts and realtime
//! invalidation, served over HTTP.

pub mod api;
pub mod config;
pub mod core;
pub mod infrastructure;

use crate::config::AppConfig;
use crate::core::matcher::ConversationMatcher;
use crate::core::notifier::{BroadcastNotifier, RealtimeNotifier};
use crate::core::services::MessagingFacade;
use crate::infrastructure::database::DatabaseConnection;
use crate::infrastructure::repositories::{
    DbConversationStore, DbMessageStore, DbUnreadAggregator,
};
use di::{Injectable, ServiceCollection, existing, existing_as_self};

/// Registers every messaging service around an already opened database.
pub fn service_collection(config: AppConfig, connection: DatabaseConnection) -> ServiceCollection {
    let notifier = BroadcastNotifier::new(config.realtime_channel_capacity);

    let mut services = ServiceCollection::new();
    services
        .add(existing_as_self(config))
        .add(existing_as_self(connection))
        .add(existing::<dyn RealtimeNotifier, BroadcastNotifier>(Box::new(
            notifier,
        )))
        .add(DbConversationStore::scoped())
        .add(DbMessageStore::scoped())
        .add(DbUnreadAggregator::scoped())
        .add(ConversationMatcher::scoped())
        .add(MessagingFacade::scoped());
    services
}
