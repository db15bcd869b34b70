use serde_json::{json, Value};

use crate::{
    error::UpstreamError,
    reply::{OutboundMessage, PropertyCard},
    types::Profile,
};

const LINE_TEXT_LIMIT: usize = 5000;
const LINE_ALT_TEXT_LIMIT: usize = 400;

pub(super) fn parse_profile(body: Value) -> Result<Profile, UpstreamError> {
    let display_name = body
        .get("displayName")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| UpstreamError::Decode("LINE profile without displayName".into()))?
        .to_string();
    let avatar_url = body
        .get("pictureUrl")
        .and_then(Value::as_str)
        .filter(|url| !url.is_empty())
        .map(str::to_string);
    Ok(Profile {
        display_name,
        avatar_url,
        raw: body,
    })
}

/// Messaging API `messages` array for one outbound message.
pub fn line_messages(message: &OutboundMessage) -> Vec<Value> {
    match message {
        OutboundMessage::Text(text) => vec![json!({
            "type": "text",
            "text": truncate(text, LINE_TEXT_LIMIT),
        })],
        OutboundMessage::Carousel { alt_text, cards } => vec![json!({
            "type": "flex",
            "altText": truncate(alt_text, LINE_ALT_TEXT_LIMIT),
            "contents": {
                "type": "carousel",
                "contents": cards.iter().map(bubble).collect::<Vec<_>>(),
            }
        })],
    }
}

fn bubble(card: &PropertyCard) -> Value {
    json!({
        "type": "bubble",
        "hero": {
            "type": "image",
            "url": card.image_url,
            "size": "full",
            "aspectRatio": "20:13",
            "aspectMode": "cover",
            "action": { "type": "uri", "uri": card.link_url },
        },
        "body": {
            "type": "box",
            "layout": "vertical",
            "spacing": "sm",
            "contents": [
                { "type": "text", "text": card.title, "weight": "bold", "size": "md", "wrap": true, "maxLines": 2 },
                { "type": "text", "text": card.price_label, "weight": "bold", "size": "lg", "color": "#1DB446" },
                { "type": "text", "text": card.location_line, "size": "sm", "color": "#666666", "wrap": true },
                { "type": "text", "text": card.rooms_line, "size": "sm", "color": "#666666" },
            ]
        },
        "footer": {
            "type": "box",
            "layout": "vertical",
            "contents": [{
                "type": "button",
                "style": "primary",
                "height": "sm",
                "action": { "type": "uri", "label": card.button_label, "uri": card.link_url },
            }]
        }
    })
}

fn truncate(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}
