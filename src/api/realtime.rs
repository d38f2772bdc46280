//! Server-sent invalidation streams.
//!
//! Every event only says "re-fetch"; the payload names the scope and a hint.

use crate::api::{ExtractCaller, ValidPath};
use crate::core::errors::MessagingError;
use crate::core::notifier::EventStream;
use crate::core::traits::MessagingService;
use async_stream::stream;
use axum::Router;
use axum::response::Sse;
use axum::response::sse::{Event, KeepAlive};
use axum::routing::get;
use di_axum::Inject;
use futures_util::{Stream, StreamExt, stream};
use log::{debug, warn};
use std::convert::Infallible;
use std::time::Duration;
use uuid::Uuid;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(20);

pub fn router() -> Router {
    Router::new().route("/events", get(user_events))
}

pub(crate) async fn conversation_events(
    Inject(messaging): Inject<dyn MessagingService>,
    ExtractCaller(caller): ExtractCaller,
    ValidPath(conversation_id): ValidPath<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, MessagingError> {
    // only participants may learn when a thread changes
    messaging.get_conversation(conversation_id, &caller).await?;
    debug!("{} watching conversation {conversation_id}", caller.id);

    Ok(into_sse(messaging.subscribe_to_conversation(conversation_id)))
}

async fn user_events(
    Inject(messaging): Inject<dyn MessagingService>,
    ExtractCaller(caller): ExtractCaller,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let own = messaging.subscribe_to_user_scope(caller.id);
    let events: EventStream = if caller.is_admin() {
        Box::pin(stream::select(own, messaging.subscribe_to_unassigned()))
    } else {
        own
    };

    into_sse(events)
}

fn into_sse(mut events: EventStream) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = stream! {
        while let Some(change) = events.next().await {
            match Event::default().event("invalidate").json_data(change) {
                Ok(event) => yield Ok::<Event, Infallible>(event),
                Err(err) => warn!("could not encode realtime event: {err}"),
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL))
}
