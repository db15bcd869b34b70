//! HTTP handlers for the platform webhooks.
//!
//! Handlers verify, parse and normalize the delivery, then hand the events to
//! the pipeline. Once a delivery is authentic and well formed it is always
//! acknowledged with 200, whatever happens to the individual events.

use std::{collections::HashMap, sync::Arc};

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::{
    error::{Rejection, WebhookError},
    normalize::{normalize_line, normalize_meta},
    pipeline::process_delivery,
    types::{AppState, Channel, ChannelEvent},
    verify::{
        verify_line_signature, verify_meta_signature, verify_subscription, LINE_SIGNATURE_HEADER,
        META_SIGNATURE_HEADER,
    },
};

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "ok": true })))
}

pub async fn line_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, WebhookError> {
    verify_line_signature(
        &state.config.line_channel_secret,
        header_text(&headers, LINE_SIGNATURE_HEADER),
        &body,
    )
    .map_err(|rejection| rejected(Channel::Line, rejection))?;

    let payload = parse_payload(Channel::Line, &body)?;
    let events = normalize_line(&payload).map_err(|err| malformed(Channel::Line, err))?;
    Ok(acknowledge(&state, Channel::Line, events).await)
}

pub async fn facebook_verify(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, Rejection> {
    subscription_handshake(&state, Channel::Facebook, &params)
}

pub async fn instagram_verify(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, Rejection> {
    subscription_handshake(&state, Channel::Instagram, &params)
}

pub async fn facebook_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, WebhookError> {
    meta_webhook(&state, Channel::Facebook, &headers, &body).await
}

pub async fn instagram_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, WebhookError> {
    meta_webhook(&state, Channel::Instagram, &headers, &body).await
}

fn subscription_handshake(
    state: &AppState,
    channel: Channel,
    params: &HashMap<String, String>,
) -> Result<(StatusCode, String), Rejection> {
    match verify_subscription(params, &state.config.meta_verify_token) {
        Ok(challenge) => {
            info!(%channel, "webhook subscription verified");
            Ok((StatusCode::OK, challenge))
        }
        Err(rejection) => {
            warn!(%channel, reason = %rejection, "webhook subscription rejected");
            Err(rejection)
        }
    }
}

async fn meta_webhook(
    state: &Arc<AppState>,
    channel: Channel,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<(StatusCode, Json<Value>), WebhookError> {
    verify_meta_signature(
        &state.config.meta_app_secret,
        header_text(headers, META_SIGNATURE_HEADER),
        body,
    )
    .map_err(|rejection| rejected(channel, rejection))?;

    let payload = parse_payload(channel, body)?;
    let events = normalize_meta(channel, &payload).map_err(|err| malformed(channel, err))?;
    Ok(acknowledge(state, channel, events).await)
}

async fn acknowledge(
    state: &Arc<AppState>,
    channel: Channel,
    events: Vec<ChannelEvent>,
) -> (StatusCode, Json<Value>) {
    if events.is_empty() {
        debug!(%channel, "delivery carried no text messages");
    }
    let outcomes = process_delivery(state, events).await;
    debug!(%channel, ?outcomes, "delivery processed");
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

fn header_text<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn parse_payload(channel: Channel, body: &[u8]) -> Result<Value, WebhookError> {
    serde_json::from_slice(body).map_err(|err| malformed(channel, err.into()))
}

fn rejected(channel: Channel, rejection: Rejection) -> WebhookError {
    warn!(%channel, reason = %rejection, "webhook delivery rejected");
    rejection.into()
}

fn malformed(channel: Channel, err: WebhookError) -> WebhookError {
    warn!(%channel, error = %err, "malformed webhook payload");
    err
}
