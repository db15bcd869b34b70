use serde_json::Value;

use crate::{
    error::WebhookError,
    types::{Channel, ChannelEvent},
};

/// Text messages from a LINE delivery, in delivery order. Follow, postback,
/// sticker and other event types are dropped.
pub fn normalize_line(payload: &Value) -> Result<Vec<ChannelEvent>, WebhookError> {
    let Some(events) = payload.get("events").and_then(Value::as_array) else {
        return Err(WebhookError::UnexpectedShape("missing events array"));
    };

    let normalized = events
        .iter()
        .filter_map(|event| {
            if event.get("type").and_then(Value::as_str) != Some("message") {
                return None;
            }
            let message = event.get("message")?;
            if message.get("type").and_then(Value::as_str) != Some("text") {
                return None;
            }
            let external_user_id = identifier(event.pointer("/source/userId"))?;
            let external_message_id = identifier(message.get("id"))?;
            let text = message.get("text").and_then(Value::as_str)?.to_string();
            Some(ChannelEvent {
                channel: Channel::Line,
                external_user_id,
                external_message_id,
                text,
                raw: event.clone(),
                reply_token: identifier(event.get("replyToken")),
            })
        })
        .collect();
    Ok(normalized)
}

/// Text messages from a Messenger or Instagram delivery. `channel` is the
/// sub-channel whose endpoint received the request; sender ids are only
/// meaningful within it. Echoes of our own outbound messages are dropped.
pub fn normalize_meta(
    channel: Channel,
    payload: &Value,
) -> Result<Vec<ChannelEvent>, WebhookError> {
    let Some(entries) = payload.get("entry").and_then(Value::as_array) else {
        return Err(WebhookError::UnexpectedShape("missing entry array"));
    };

    let normalized = entries
        .iter()
        .filter_map(|entry| entry.get("messaging").and_then(Value::as_array))
        .flatten()
        .filter_map(|item| {
            let message = item.get("message")?;
            let is_echo = message
                .get("is_echo")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            if is_echo {
                return None;
            }
            let text = message
                .get("text")
                .and_then(Value::as_str)
                .filter(|text| !text.is_empty())?
                .to_string();
            let external_user_id = identifier(item.pointer("/sender/id"))?;
            let external_message_id = identifier(message.get("mid"))?;
            Some(ChannelEvent {
                channel,
                external_user_id,
                external_message_id,
                text,
                raw: item.clone(),
                reply_token: None,
            })
        })
        .collect();
    Ok(normalized)
}

/// Ids arrive as strings, occasionally as numbers. Message text never goes
/// through here: it is kept exactly as sent.
fn identifier(value: Option<&Value>) -> Option<String> {
    let id = match value? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    Some(id).filter(|id| !id.is_empty())
}
