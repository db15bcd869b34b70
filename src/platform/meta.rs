use serde_json::{json, Value};

use crate::{
    error::UpstreamError,
    reply::{OutboundMessage, PropertyCard},
    types::{Channel, Profile},
};

const META_TITLE_LIMIT: usize = 80;
const META_SUBTITLE_LIMIT: usize = 80;
const META_TEXT_LIMIT: usize = 2000;

pub(super) fn profile_fields(channel: Channel) -> &'static str {
    match channel {
        Channel::Instagram => "name,username,profile_pic",
        _ => "first_name,last_name,profile_pic",
    }
}

pub(super) fn parse_profile(channel: Channel, body: Value) -> Result<Profile, UpstreamError> {
    let text = |key: &str| {
        body.get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };
    let display_name = match channel {
        Channel::Instagram => text("name").or_else(|| text("username")).map(str::to_string),
        _ => {
            let full = [text("first_name"), text("last_name")]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(" ");
            Some(full).filter(|name| !name.is_empty())
        }
    };
    let Some(display_name) = display_name else {
        return Err(UpstreamError::Decode(format!(
            "{} profile without a name",
            channel.label()
        )));
    };
    let avatar_url = text("profile_pic").map(str::to_string);
    Ok(Profile {
        display_name,
        avatar_url,
        raw: body,
    })
}

/// Send API `message` object: plain text, or a generic template whose
/// elements mirror the carousel cards.
pub fn meta_message(message: &OutboundMessage) -> Value {
    match message {
        OutboundMessage::Text(text) => json!({ "text": truncate(text, META_TEXT_LIMIT) }),
        OutboundMessage::Carousel { cards, .. } => json!({
            "attachment": {
                "type": "template",
                "payload": {
                    "template_type": "generic",
                    "elements": cards.iter().map(element).collect::<Vec<_>>(),
                }
            }
        }),
    }
}

fn element(card: &PropertyCard) -> Value {
    let subtitle = format!(
        "{}\n{} · {}",
        card.price_label, card.location_line, card.rooms_line
    );
    json!({
        "title": truncate(&card.title, META_TITLE_LIMIT),
        "image_url": card.image_url,
        "subtitle": truncate(&subtitle, META_SUBTITLE_LIMIT),
        "default_action": { "type": "web_url", "url": card.link_url },
        "buttons": [{ "type": "web_url", "url": card.link_url, "title": card.button_label }],
    })
}

fn truncate(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}
