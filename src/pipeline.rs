//! Per-event processing after a delivery has been verified and normalized.
//!
//! Each event walks `resolve identity -> log inbound -> reply` on its own.
//! A failure at any step is logged and ends that event only; the delivery is
//! still acknowledged so the platform does not redeliver it.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use crate::{
    identity::resolve_lead,
    reply::{reply, ReplyOutcome},
    types::{AppState, ChannelEvent, ConversationMessage, Direction, LogOutcome},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    Replied,
    ReplyFailed,
    /// Reply handed to a background task.
    ReplyQueued,
    /// Logged; the channel has no reply route.
    Logged,
    /// Redelivery of a message already in the log. No reply is sent.
    Duplicate,
    PersistenceFailed,
}

/// Processes the events of one delivery in array order.
pub async fn process_delivery(
    state: &Arc<AppState>,
    events: Vec<ChannelEvent>,
) -> Vec<EventOutcome> {
    let mut outcomes = Vec::with_capacity(events.len());
    for event in events {
        let span = info_span!(
            "event",
            channel = %event.channel,
            external_user_id = %event.external_user_id,
            external_message_id = %event.external_message_id
        );
        outcomes.push(process_event(state, event).instrument(span).await);
    }
    outcomes
}

pub async fn process_event(state: &Arc<AppState>, event: ChannelEvent) -> EventOutcome {
    let resolved = match resolve_lead(
        state.leads.as_ref(),
        state.platform.as_ref(),
        event.channel,
        &event.external_user_id,
    )
    .await
    {
        Ok(resolved) => resolved,
        Err(err) => {
            error!(error = %err, "identity resolution failed; event skipped");
            return EventOutcome::PersistenceFailed;
        }
    };
    let lead = resolved.lead;

    if resolved.created {
        let notifier = state.notifier.clone();
        let created = lead.clone();
        let first_message = event.text.clone();
        tokio::spawn(
            async move { notifier.lead_created(&created, &first_message).await }
                .in_current_span(),
        );
    }

    let incoming = ConversationMessage {
        id: Uuid::new_v4().to_string(),
        lead_id: lead.id.clone(),
        channel: event.channel,
        external_message_id: Some(event.external_message_id.clone()),
        content: event.text.clone(),
        raw_payload: event.raw.clone(),
        direction: Direction::Incoming,
        created_at: Utc::now().to_rfc3339(),
    };
    match state.conversations.append(&incoming).await {
        Ok(LogOutcome::Inserted) => {
            info!(lead_id = %lead.id, "inbound message logged");
        }
        Ok(LogOutcome::Duplicate) => {
            info!(lead_id = %lead.id, "duplicate delivery; already logged");
            return EventOutcome::Duplicate;
        }
        Err(err) => {
            error!(
                lead_id = %lead.id,
                error = %err,
                "failed to log inbound message; event skipped"
            );
            return EventOutcome::PersistenceFailed;
        }
    }

    if state.config.reply_async {
        let state = state.clone();
        tokio::spawn(
            async move {
                reply(&state, &lead, &event).await;
            }
            .in_current_span(),
        );
        return EventOutcome::ReplyQueued;
    }

    match reply(state, &lead, &event).await {
        ReplyOutcome::Replied => EventOutcome::Replied,
        ReplyOutcome::Failed => EventOutcome::ReplyFailed,
        ReplyOutcome::Skipped => EventOutcome::Logged,
    }
}
