//! Reply composition: search listings for the inbound text and answer with
//! either a carousel of cards or a plain-text "nothing found" hint.

use chrono::Utc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    config::Config,
    error::PipelineError,
    templates::{render_carousel_alt_text, render_not_found_reply},
    types::{
        AppState, Channel, ChannelEvent, ConversationMessage, Direction, Lead, ListingType,
        PropertyCandidate, ReplyTarget,
    },
};

/// Carousel ceiling shared by LINE flex carousels and Meta generic templates.
pub const MAX_CAROUSEL_CARDS: usize = 10;

const VIEW_DETAILS_LABEL: &str = "View details";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyCard {
    pub property_id: String,
    pub title: String,
    pub image_url: String,
    pub price_label: String,
    pub location_line: String,
    pub rooms_line: String,
    pub link_url: String,
    pub button_label: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    Text(String),
    Carousel {
        alt_text: String,
        cards: Vec<PropertyCard>,
    },
}

impl OutboundMessage {
    /// Human-readable content stored in the outbound conversation log.
    pub fn summary(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Carousel { alt_text, cards } => {
                let titles = cards
                    .iter()
                    .map(|card| card.title.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{alt_text}: {titles}")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyOutcome {
    Replied,
    Failed,
    /// The channel has no reply route for this event.
    Skipped,
}

pub struct CardSettings<'a> {
    pub public_site_url: &'a str,
    pub placeholder_image_url: &'a str,
}

impl<'a> From<&'a Config> for CardSettings<'a> {
    fn from(config: &'a Config) -> Self {
        Self {
            public_site_url: &config.public_site_url,
            placeholder_image_url: &config.placeholder_image_url,
        }
    }
}

pub fn compose_reply(
    query: &str,
    candidates: &[PropertyCandidate],
    settings: &CardSettings<'_>,
) -> OutboundMessage {
    if candidates.is_empty() {
        return OutboundMessage::Text(render_not_found_reply(query));
    }
    let cards = candidates
        .iter()
        .take(MAX_CAROUSEL_CARDS)
        .map(|candidate| property_card(candidate, settings))
        .collect::<Vec<_>>();
    OutboundMessage::Carousel {
        alt_text: render_carousel_alt_text(query, cards.len()),
        cards,
    }
}

fn property_card(candidate: &PropertyCandidate, settings: &CardSettings<'_>) -> PropertyCard {
    let image_url = candidate
        .cover_image_url
        .as_deref()
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .unwrap_or(settings.placeholder_image_url)
        .to_string();
    let title = Some(candidate.title.trim())
        .filter(|t| !t.is_empty())
        .unwrap_or("Untitled listing")
        .to_string();
    let location_line = candidate
        .neighborhood
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or("-")
        .to_string();
    PropertyCard {
        property_id: candidate.id.clone(),
        title,
        image_url,
        price_label: format_price(candidate),
        location_line,
        rooms_line: format_rooms(candidate.bedrooms, candidate.bathrooms),
        link_url: format!(
            "{}/properties/{}",
            settings.public_site_url.trim_end_matches('/'),
            candidate.id
        ),
        button_label: VIEW_DETAILS_LABEL.to_string(),
    }
}

/// Sale prices render as a lump sum, rentals with a `/month` suffix.
pub fn format_price(candidate: &PropertyCandidate) -> String {
    match (
        candidate.listing_type,
        candidate.price,
        candidate.rental_price,
    ) {
        (ListingType::Rent, _, Some(rent)) => format!("฿{}/month", group_thousands(rent)),
        (_, Some(price), _) => format!("฿{}", group_thousands(price)),
        (_, None, Some(rent)) => format!("฿{}/month", group_thousands(rent)),
        (_, None, None) => "Price on request".to_string(),
    }
}

fn format_rooms(bedrooms: Option<i32>, bathrooms: Option<i32>) -> String {
    match (bedrooms, bathrooms) {
        (Some(bed), Some(bath)) => format!("{bed} bed · {bath} bath"),
        (Some(bed), None) => format!("{bed} bed"),
        (None, Some(bath)) => format!("{bath} bath"),
        (None, None) => "-".to_string(),
    }
}

fn group_thousands(value: i64) -> String {
    let digits = value.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (idx, ch) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if value < 0 {
        format!("-{grouped}")
    } else {
        grouped
    }
}

pub fn reply_target(config: &Config, event: &ChannelEvent) -> Option<ReplyTarget> {
    match event.channel {
        Channel::Line => event
            .reply_token
            .clone()
            .map(|reply_token| ReplyTarget::LineReply { reply_token }),
        Channel::Facebook | Channel::Instagram if config.meta_reply_enabled => {
            Some(ReplyTarget::Meta {
                channel: event.channel,
                recipient_id: event.external_user_id.clone(),
            })
        }
        Channel::Facebook | Channel::Instagram => None,
    }
}

/// Search, compose, send, then log the outbound turn. Never fails the
/// delivery: every error ends here as a log line and `ReplyOutcome::Failed`.
pub async fn reply(state: &AppState, lead: &Lead, event: &ChannelEvent) -> ReplyOutcome {
    let Some(target) = reply_target(&state.config, event) else {
        debug!("no reply route for event; stopping after log");
        return ReplyOutcome::Skipped;
    };

    let candidates = match state
        .search
        .search(&event.text, state.config.search_result_limit)
        .await
    {
        Ok(candidates) => candidates,
        Err(err) => {
            let err = PipelineError::Search(err);
            error!(error = %err, "no reply sent");
            return ReplyOutcome::Failed;
        }
    };

    let message = compose_reply(&event.text, &candidates, &CardSettings::from(&state.config));
    let payload = match state.platform.send(&target, &message).await {
        Ok(payload) => payload,
        Err(err) => {
            warn!(error = %err, candidates = candidates.len(), "reply delivery failed");
            return ReplyOutcome::Failed;
        }
    };
    info!(candidates = candidates.len(), "reply delivered");

    let outgoing = ConversationMessage {
        id: Uuid::new_v4().to_string(),
        lead_id: lead.id.clone(),
        channel: event.channel,
        external_message_id: None,
        content: message.summary(),
        raw_payload: payload,
        direction: Direction::Outgoing,
        created_at: Utc::now().to_rfc3339(),
    };
    if let Err(err) = state.conversations.append(&outgoing).await {
        error!(error = %err, lead_id = %lead.id, "failed to log outgoing reply");
    }
    ReplyOutcome::Replied
}
