//! Outbound calls to the messaging platforms: profile lookups and sends.

mod line;
mod meta;

use async_trait::async_trait;
use reqwest::{Response, Url};
use serde_json::{json, Value};

pub use line::line_messages;
pub use meta::meta_message;

use crate::{
    config::Config,
    error::UpstreamError,
    reply::OutboundMessage,
    types::{Channel, Profile, ReplyTarget},
};

#[async_trait]
pub trait PlatformClient: Send + Sync {
    async fn fetch_profile(
        &self,
        channel: Channel,
        external_user_id: &str,
    ) -> Result<Profile, UpstreamError>;

    /// Sends one message and returns the exact request body that was
    /// accepted, for the outbound conversation log.
    async fn send(
        &self,
        target: &ReplyTarget,
        message: &OutboundMessage,
    ) -> Result<Value, UpstreamError>;
}

pub struct HttpPlatformClient {
    http: reqwest::Client,
    line_api_base: String,
    line_access_token: String,
    meta_graph_base: String,
    meta_page_access_token: String,
}

impl HttpPlatformClient {
    pub fn new(config: &Config) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder()
            .timeout(config.outbound_timeout)
            .build()?;
        Ok(Self {
            http,
            line_api_base: config.line_api_base.clone(),
            line_access_token: config.line_channel_access_token.clone(),
            meta_graph_base: config.meta_graph_base.clone(),
            meta_page_access_token: config.meta_page_access_token.clone(),
        })
    }

    fn meta_token(&self) -> Result<&str, UpstreamError> {
        if self.meta_page_access_token.is_empty() {
            return Err(UpstreamError::NotConfigured("META_PAGE_ACCESS_TOKEN"));
        }
        Ok(&self.meta_page_access_token)
    }

    async fn post_line(&self, path: &str, body: Value) -> Result<Value, UpstreamError> {
        let response = self
            .http
            .post(format!("{}{path}", self.line_api_base))
            .bearer_auth(&self.line_access_token)
            .json(&body)
            .send()
            .await?;
        read_json(response).await?;
        Ok(body)
    }
}

/// Appends `external_user_id` to `base` as one percent-encoded path segment,
/// so an id can never climb out of the API prefix or add query parameters.
fn profile_url(base: &str, external_user_id: &str) -> Result<Url, UpstreamError> {
    let id = external_user_id.trim();
    if id.is_empty() || id == "." || id == ".." {
        return Err(UpstreamError::InvalidId(external_user_id.to_string()));
    }
    let mut url = Url::parse(base).map_err(|err| UpstreamError::Endpoint(err.to_string()))?;
    url.path_segments_mut()
        .map_err(|_| UpstreamError::Endpoint(base.to_string()))?
        .pop_if_empty()
        .push(id);
    Ok(url)
}

/// Reads the body and turns any non-2xx into `UpstreamError::Status` carrying
/// the raw body for the log.
async fn read_json(response: Response) -> Result<Value, UpstreamError> {
    let status = response.status();
    let raw_body = response.text().await.unwrap_or_default();
    if !status.is_success() {
        return Err(UpstreamError::Status {
            status: status.as_u16(),
            body: raw_body,
        });
    }
    if raw_body.trim().is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_str(&raw_body).map_err(|e| UpstreamError::Decode(e.to_string()))
}

#[async_trait]
impl PlatformClient for HttpPlatformClient {
    async fn fetch_profile(
        &self,
        channel: Channel,
        external_user_id: &str,
    ) -> Result<Profile, UpstreamError> {
        match channel {
            Channel::Line => {
                let response = self
                    .http
                    .get(profile_url(
                        &format!("{}/v2/bot/profile", self.line_api_base),
                        external_user_id,
                    )?)
                    .bearer_auth(&self.line_access_token)
                    .send()
                    .await?;
                line::parse_profile(read_json(response).await?)
            }
            Channel::Facebook | Channel::Instagram => {
                let token = self.meta_token()?;
                let response = self
                    .http
                    .get(profile_url(&self.meta_graph_base, external_user_id)?)
                    .query(&[
                        ("fields", meta::profile_fields(channel)),
                        ("access_token", token),
                    ])
                    .send()
                    .await?;
                meta::parse_profile(channel, read_json(response).await?)
            }
        }
    }

    async fn send(
        &self,
        target: &ReplyTarget,
        message: &OutboundMessage,
    ) -> Result<Value, UpstreamError> {
        match target {
            ReplyTarget::LineReply { reply_token } => {
                let body = json!({
                    "replyToken": reply_token,
                    "messages": line_messages(message),
                });
                self.post_line("/v2/bot/message/reply", body).await
            }
            ReplyTarget::LinePush { to } => {
                let body = json!({
                    "to": to,
                    "messages": line_messages(message),
                });
                self.post_line("/v2/bot/message/push", body).await
            }
            ReplyTarget::Meta { recipient_id, .. } => {
                let token = self.meta_token()?;
                let body = json!({
                    "recipient": { "id": recipient_id },
                    "messaging_type": "RESPONSE",
                    "message": meta_message(message),
                });
                let response = self
                    .http
                    .post(format!("{}/me/messages", self.meta_graph_base))
                    .query(&[("access_token", token)])
                    .json(&body)
                    .send()
                    .await?;
                read_json(response).await?;
                Ok(body)
            }
        }
    }
}
