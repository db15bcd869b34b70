//! Inbound messaging webhooks for the property back office.
//!
//! LINE, Facebook Messenger and Instagram deliveries are verified,
//! normalized into [`types::ChannelEvent`]s, attached to a Lead, logged
//! append-only, and answered with listings matching the message text.

pub mod app;
pub mod config;
pub mod error;
pub mod identity;
pub mod normalize;
pub mod notify;
pub mod pipeline;
pub mod platform;
pub mod reply;
pub mod search;
pub mod store;
pub mod templates;
pub mod types;
pub mod verify;
pub mod webhook;
