use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    config::Config,
    notify::AuditNotifier,
    platform::PlatformClient,
    search::PropertySearch,
    store::{ConversationSink, LeadStore},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Channel {
    Line,
    Facebook,
    Instagram,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Line, Channel::Facebook, Channel::Instagram];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Line => "LINE",
            Self::Facebook => "FACEBOOK",
            Self::Instagram => "INSTAGRAM",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|channel| channel.as_str().eq_ignore_ascii_case(value.trim()))
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Line => "LINE",
            Self::Facebook => "Facebook",
            Self::Instagram => "Instagram",
        }
    }

    /// Which Lead column carries this channel's external identity.
    pub fn identity_field(self) -> IdentityField {
        match self {
            Self::Line => IdentityField::LineUserId,
            Self::Facebook => IdentityField::FacebookPsid,
            Self::Instagram => IdentityField::InstagramSid,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentityField {
    LineUserId,
    FacebookPsid,
    InstagramSid,
}

impl IdentityField {
    /// Column name in `leads`. Only ever interpolated from this closed set.
    pub fn column(self) -> &'static str {
        match self {
            Self::LineUserId => "line_user_id",
            Self::FacebookPsid => "facebook_psid",
            Self::InstagramSid => "instagram_sid",
        }
    }
}

impl fmt::Display for IdentityField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeadStage {
    New,
    Contacted,
    Qualified,
    Negotiating,
    Won,
    Lost,
}

impl LeadStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Contacted => "CONTACTED",
            Self::Qualified => "QUALIFIED",
            Self::Negotiating => "NEGOTIATING",
            Self::Won => "WON",
            Self::Lost => "LOST",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "NEW" => Some(Self::New),
            "CONTACTED" => Some(Self::Contacted),
            "QUALIFIED" => Some(Self::Qualified),
            "NEGOTIATING" => Some(Self::Negotiating),
            "WON" => Some(Self::Won),
            "LOST" => Some(Self::Lost),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Lead {
    pub id: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub line_user_id: Option<String>,
    pub facebook_psid: Option<String>,
    pub instagram_sid: Option<String>,
    pub stage: LeadStage,
    pub source: String,
    pub note: String,
    pub created_at: String,
    pub updated_at: String,
}

impl Lead {
    pub fn external_id(&self, field: IdentityField) -> Option<&str> {
        match field {
            IdentityField::LineUserId => self.line_user_id.as_deref(),
            IdentityField::FacebookPsid => self.facebook_psid.as_deref(),
            IdentityField::InstagramSid => self.instagram_sid.as_deref(),
        }
    }
}

/// Insert-side shape of a Lead created from a first inbound message.
#[derive(Debug, Clone)]
pub struct NewLead {
    pub id: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub channel: Channel,
    pub external_user_id: String,
    pub note: String,
    pub created_at: String,
}

impl NewLead {
    pub fn into_lead(self) -> Lead {
        let field = self.channel.identity_field();
        let identity = Some(self.external_user_id);
        let mut lead = Lead {
            id: self.id,
            display_name: self.display_name,
            avatar_url: self.avatar_url,
            line_user_id: None,
            facebook_psid: None,
            instagram_sid: None,
            stage: LeadStage::New,
            source: self.channel.as_str().to_string(),
            note: self.note,
            created_at: self.created_at.clone(),
            updated_at: self.created_at,
        };
        match field {
            IdentityField::LineUserId => lead.line_user_id = identity,
            IdentityField::FacebookPsid => lead.facebook_psid = identity,
            IdentityField::InstagramSid => lead.instagram_sid = identity,
        }
        lead
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Incoming,
    Outgoing,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Incoming => "INCOMING",
            Self::Outgoing => "OUTGOING",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationMessage {
    pub id: String,
    pub lead_id: String,
    pub channel: Channel,
    pub external_message_id: Option<String>,
    pub content: String,
    pub raw_payload: Value,
    pub direction: Direction,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutcome {
    Inserted,
    Duplicate,
}

/// One normalized inbound text message. Lives only for the request that
/// delivered it.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelEvent {
    pub channel: Channel,
    pub external_user_id: String,
    pub external_message_id: String,
    pub text: String,
    pub raw: Value,
    pub reply_token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ListingType {
    Sale,
    Rent,
    SaleAndRent,
}

impl ListingType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sale => "SALE",
            Self::Rent => "RENT",
            Self::SaleAndRent => "SALE_AND_RENT",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "SALE" => Some(Self::Sale),
            "RENT" => Some(Self::Rent),
            "SALE_AND_RENT" => Some(Self::SaleAndRent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyCandidate {
    pub id: String,
    pub title: String,
    pub cover_image_url: Option<String>,
    pub price: Option<i64>,
    pub rental_price: Option<i64>,
    pub listing_type: ListingType,
    pub bedrooms: Option<i32>,
    pub bathrooms: Option<i32>,
    pub neighborhood: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub raw: Value,
}

/// How an outbound message is routed back to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyTarget {
    LineReply { reply_token: String },
    LinePush { to: String },
    Meta { channel: Channel, recipient_id: String },
}

pub struct AppState {
    pub config: Config,
    pub leads: Arc<dyn LeadStore>,
    pub conversations: Arc<dyn ConversationSink>,
    pub search: Arc<dyn PropertySearch>,
    pub platform: Arc<dyn PlatformClient>,
    pub notifier: Arc<dyn AuditNotifier>,
}
