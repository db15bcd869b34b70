use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use hmac::{Hmac, Mac};
use http_body_util::BodyExt;
use lead_webhook_server::{
    app::router,
    config::Config,
    error::{StoreError, UpstreamError},
    notify::LineAdminNotifier,
    platform::PlatformClient,
    reply::OutboundMessage,
    search::PropertySearch,
    store::{ConversationSink, MemoryStore},
    types::{
        AppState, Channel, ConversationMessage, Direction, LeadStage, ListingType, LogOutcome,
        Profile, PropertyCandidate, ReplyTarget,
    },
    verify::line_signature,
};
use serde_json::{json, Value};
use sha2::Sha256;
use tokio::sync::Mutex;
use tower::ServiceExt;

const LINE_SECRET: &str = "test-line-secret";
const META_APP_SECRET: &str = "test-meta-app-secret";
const ADMIN: &str = "Uadmin";

#[derive(Default)]
struct FakePlatform {
    sent: Mutex<Vec<(ReplyTarget, OutboundMessage)>>,
    fail_sends: AtomicBool,
}

impl FakePlatform {
    async fn replies(&self) -> Vec<(ReplyTarget, OutboundMessage)> {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|(target, _)| !matches!(target, ReplyTarget::LinePush { .. }))
            .cloned()
            .collect()
    }

    async fn admin_pushes(&self) -> Vec<OutboundMessage> {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|(target, _)| matches!(target, ReplyTarget::LinePush { to } if to == ADMIN))
            .map(|(_, message)| message.clone())
            .collect()
    }
}

#[async_trait]
impl PlatformClient for FakePlatform {
    async fn fetch_profile(
        &self,
        channel: Channel,
        external_user_id: &str,
    ) -> Result<Profile, UpstreamError> {
        Ok(Profile {
            display_name: format!("{} {}", channel.label(), external_user_id),
            avatar_url: None,
            raw: json!({ "id": external_user_id }),
        })
    }

    async fn send(
        &self,
        target: &ReplyTarget,
        message: &OutboundMessage,
    ) -> Result<Value, UpstreamError> {
        let is_admin_push = matches!(target, ReplyTarget::LinePush { .. });
        if self.fail_sends.load(Ordering::SeqCst) && !is_admin_push {
            return Err(UpstreamError::Status {
                status: 500,
                body: "upstream down".into(),
            });
        }
        self.sent
            .lock()
            .await
            .push((target.clone(), message.clone()));
        Ok(json!({ "sent": message.summary() }))
    }
}

struct FakeSearch {
    results: usize,
    fail: bool,
}

#[async_trait]
impl PropertySearch for FakeSearch {
    async fn search(&self, _text: &str, limit: i64) -> Result<Vec<PropertyCandidate>, StoreError> {
        if self.fail {
            return Err(StoreError::CorruptRow {
                table: "properties",
                detail: "search backend unavailable".into(),
            });
        }
        Ok((0..self.results.min(limit as usize))
            .map(|idx| PropertyCandidate {
                id: format!("prop-{idx}"),
                title: format!("Condo Bang Na #{idx}"),
                cover_image_url: None,
                price: Some(3_000_000),
                rental_price: None,
                listing_type: ListingType::Sale,
                bedrooms: Some(1),
                bathrooms: Some(1),
                neighborhood: Some("Bang Na".into()),
            })
            .collect())
    }
}

/// Logs incoming rows normally and refuses every outgoing one.
struct RejectOutgoing {
    inner: Arc<MemoryStore>,
}

#[async_trait]
impl ConversationSink for RejectOutgoing {
    async fn append(&self, message: &ConversationMessage) -> Result<LogOutcome, StoreError> {
        if message.direction == Direction::Outgoing {
            return Err(StoreError::CorruptRow {
                table: "conversation_messages",
                detail: "outgoing insert refused".into(),
            });
        }
        self.inner.append(message).await
    }
}

struct Harness {
    app: Router,
    store: Arc<MemoryStore>,
    platform: Arc<FakePlatform>,
}

fn harness(results: usize, overrides: &[(&str, &str)]) -> Harness {
    build_harness(FakeSearch { results, fail: false }, false, overrides)
}

fn build_harness(
    search: FakeSearch,
    reject_outgoing: bool,
    overrides: &[(&str, &str)],
) -> Harness {
    let mut env = HashMap::from([
        ("LINE_CHANNEL_SECRET", LINE_SECRET),
        ("LINE_CHANNEL_ACCESS_TOKEN", "line-token"),
        ("LINE_ADMIN_USER_ID", ADMIN),
        ("META_VERIFY_TOKEN", "meta-verify"),
        ("PUBLIC_SITE_URL", "https://homes.example.com"),
    ]);
    env.extend(overrides.iter().copied());
    let config = Config::from_lookup(|key| env.get(key).map(|v| v.to_string())).unwrap();

    let store = Arc::new(MemoryStore::new());
    let platform = Arc::new(FakePlatform::default());
    let conversations: Arc<dyn ConversationSink> = if reject_outgoing {
        Arc::new(RejectOutgoing {
            inner: store.clone(),
        })
    } else {
        store.clone()
    };
    let state = Arc::new(AppState {
        config,
        leads: store.clone(),
        conversations,
        search: Arc::new(search),
        platform: platform.clone(),
        notifier: Arc::new(LineAdminNotifier::new(platform.clone(), ADMIN)),
    });
    Harness {
        app: router(state),
        store,
        platform,
    }
}

fn line_body(user_id: &str, message_id: &str, text: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "destination": "Ubot",
        "events": [{
            "type": "message",
            "replyToken": format!("reply-{message_id}"),
            "source": { "type": "user", "userId": user_id },
            "timestamp": 1767225600000u64,
            "message": { "type": "text", "id": message_id, "text": text }
        }]
    }))
    .unwrap()
}

fn meta_body(object: &str, sender: &str, mid: &str, text: &str, echo: bool) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "object": object,
        "entry": [{
            "id": "PAGE",
            "time": 1767225600000u64,
            "messaging": [{
                "sender": { "id": sender },
                "recipient": { "id": "PAGE" },
                "timestamp": 1767225600000u64,
                "message": { "mid": mid, "text": text, "is_echo": echo }
            }]
        }]
    }))
    .unwrap()
}

fn signed_line(body: Vec<u8>) -> Request<Body> {
    let signature = line_signature(LINE_SECRET, &body).unwrap();
    Request::builder()
        .method("POST")
        .uri("/api/webhooks/line")
        .header("content-type", "application/json")
        .header("x-line-signature", signature)
        .body(Body::from(body))
        .unwrap()
}

fn meta_post(path: &str, body: Vec<u8>, signature: Option<String>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json");
    if let Some(signature) = signature {
        builder = builder.header("x-hub-signature-256", signature);
    }
    builder.body(Body::from(body)).unwrap()
}

fn meta_signature(body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(META_APP_SECRET.as_bytes()).unwrap();
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

async fn call(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, body.to_vec())
}

async fn call_json(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, body) = call(app, request).await;
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}

async fn wait_for_admin_pushes(platform: &FakePlatform, expected: usize) -> Vec<OutboundMessage> {
    for _ in 0..100 {
        let pushes = platform.admin_pushes().await;
        if pushes.len() >= expected {
            return pushes;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    platform.admin_pushes().await
}

#[tokio::test]
async fn health_reports_ok() {
    let h = harness(0, &[]);
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, body) = call_json(&h.app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "ok": true }));
}

#[tokio::test]
async fn brand_new_line_user_gets_lead_log_and_carousel() {
    let h = harness(3, &[]);
    let request = signed_line(line_body("U123", "m-1", "หาคอนโดบางนา"));
    let (status, body) = call_json(&h.app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok" }));

    let leads = h.store.leads().await;
    assert_eq!(leads.len(), 1);
    assert_eq!(leads[0].line_user_id.as_deref(), Some("U123"));
    assert_eq!(leads[0].stage, LeadStage::New);
    assert_eq!(leads[0].source, "LINE");
    assert_eq!(leads[0].display_name, "LINE U123");

    let messages = h.store.messages().await;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].direction, Direction::Incoming);
    assert_eq!(messages[0].content, "หาคอนโดบางนา");
    assert_eq!(messages[0].external_message_id.as_deref(), Some("m-1"));
    assert_eq!(messages[0].raw_payload["replyToken"], "reply-m-1");
    assert_eq!(messages[1].direction, Direction::Outgoing);
    assert!(messages[1].external_message_id.is_none());
    assert!(messages.iter().all(|m| m.lead_id == leads[0].id));

    let replies = h.platform.replies().await;
    assert_eq!(replies.len(), 1);
    assert_eq!(
        replies[0].0,
        ReplyTarget::LineReply {
            reply_token: "reply-m-1".into()
        }
    );
    let OutboundMessage::Carousel { cards, .. } = &replies[0].1 else {
        panic!("expected a carousel reply");
    };
    assert_eq!(cards.len(), 3);
    assert_eq!(cards[0].link_url, "https://homes.example.com/properties/prop-0");

    let pushes = wait_for_admin_pushes(&h.platform, 1).await;
    assert_eq!(pushes.len(), 1);
}

#[tokio::test]
async fn redelivery_creates_no_new_rows_and_no_second_reply() {
    let h = harness(2, &[]);
    let body = line_body("U123", "m-1", "คอนโด บางนา");
    let (first, _) = call(&h.app, signed_line(body.clone())).await;
    let (second, _) = call(&h.app, signed_line(body)).await;
    assert_eq!(first, StatusCode::OK);
    assert_eq!(second, StatusCode::OK);

    assert_eq!(h.store.leads().await.len(), 1);
    let incoming = h
        .store
        .messages()
        .await
        .into_iter()
        .filter(|m| m.direction == Direction::Incoming)
        .count();
    assert_eq!(incoming, 1);
    assert_eq!(h.platform.replies().await.len(), 1);
}

#[tokio::test]
async fn returning_user_reuses_lead_and_is_not_announced_again() {
    let h = harness(1, &[]);
    call(&h.app, signed_line(line_body("U123", "m-1", "condo"))).await;
    call(&h.app, signed_line(line_body("U123", "m-2", "condo rent"))).await;

    assert_eq!(h.store.leads().await.len(), 1);
    assert_eq!(h.store.messages().await.len(), 4);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.platform.admin_pushes().await.len(), 1);
}

#[tokio::test]
async fn events_in_one_delivery_are_processed_in_order() {
    let h = harness(0, &[]);
    let body = serde_json::to_vec(&json!({
        "events": [
            { "type": "follow", "replyToken": "r0", "source": { "userId": "U1" } },
            { "type": "message", "replyToken": "r1", "source": { "userId": "U1" },
              "message": { "type": "text", "id": "m-1", "text": "first" } },
            { "type": "message", "replyToken": "r2", "source": { "userId": "U1" },
              "message": { "type": "sticker", "id": "m-2" } },
            { "type": "message", "replyToken": "r3", "source": { "userId": "U1" },
              "message": { "type": "text", "id": "m-3", "text": "second" } }
        ]
    }))
    .unwrap();
    let (status, _) = call(&h.app, signed_line(body)).await;
    assert_eq!(status, StatusCode::OK);

    let incoming = h
        .store
        .messages()
        .await
        .into_iter()
        .filter(|m| m.direction == Direction::Incoming)
        .map(|m| m.content)
        .collect::<Vec<_>>();
    assert_eq!(incoming, vec!["first", "second"]);

    let replies = h.platform.replies().await;
    assert_eq!(replies.len(), 2);
    assert!(matches!(replies[0].1, OutboundMessage::Text(_)));
}

#[tokio::test]
async fn line_delivery_without_signature_is_rejected_before_any_write() {
    let h = harness(1, &[]);
    let request = Request::builder()
        .method("POST")
        .uri("/api/webhooks/line")
        .body(Body::from(line_body("U1", "m-1", "condo")))
        .unwrap();
    let (status, body) = call_json(&h.app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "error": "missing_signature" }));
    assert!(h.store.leads().await.is_empty());
}

#[tokio::test]
async fn line_delivery_with_tampered_body_is_unauthorized() {
    let h = harness(1, &[]);
    let body = line_body("U1", "m-1", "condo");
    let signature = line_signature(LINE_SECRET, &body).unwrap();
    let mut tampered = body;
    let last = tampered.len() - 2;
    tampered[last] ^= 0x01;
    let request = Request::builder()
        .method("POST")
        .uri("/api/webhooks/line")
        .header("x-line-signature", signature)
        .body(Body::from(tampered))
        .unwrap();
    let (status, body) = call_json(&h.app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({ "error": "invalid_signature" }));
    assert!(h.store.messages().await.is_empty());
    assert!(h.platform.replies().await.is_empty());
}

#[tokio::test]
async fn signed_but_malformed_line_body_is_a_bad_request() {
    let h = harness(1, &[]);
    let (status, body) = call_json(&h.app, signed_line(b"{not json".to_vec())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "error": "malformed_payload" }));

    let (status, _) = call(&h.app, signed_line(br#"{"destination":"Ubot"}"#.to_vec())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn store_outage_still_acknowledges_delivery_without_reply() {
    let h = harness(3, &[]);
    h.store.set_unavailable(true);
    let request = signed_line(line_body("U1", "m-1", "condo"));
    let (status, body) = call_json(&h.app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok" }));
    assert!(h.platform.replies().await.is_empty());
}

#[tokio::test]
async fn failed_reply_is_not_logged_and_does_not_fail_delivery() {
    let h = harness(3, &[]);
    h.platform.fail_sends.store(true, Ordering::SeqCst);
    let (status, _) = call(&h.app, signed_line(line_body("U1", "m-1", "condo"))).await;
    assert_eq!(status, StatusCode::OK);

    let messages = h.store.messages().await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].direction, Direction::Incoming);
}

#[tokio::test]
async fn search_failure_acknowledges_without_reply() {
    let h = build_harness(FakeSearch { results: 3, fail: true }, false, &[]);
    let request = signed_line(line_body("U1", "m-1", "condo"));
    let (status, body) = call_json(&h.app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok" }));
    assert!(h.platform.replies().await.is_empty());

    let messages = h.store.messages().await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].direction, Direction::Incoming);
}

#[tokio::test]
async fn outgoing_log_failure_still_counts_as_replied() {
    let h = build_harness(FakeSearch { results: 2, fail: false }, true, &[]);
    let (status, _) = call(&h.app, signed_line(line_body("U1", "m-1", "condo"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.platform.replies().await.len(), 1);

    let messages = h.store.messages().await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].direction, Direction::Incoming);
}

#[tokio::test]
async fn line_text_is_logged_exactly_as_sent() {
    let h = harness(0, &[]);
    call(&h.app, signed_line(line_body("U1", "m-1", "  คอนโด\n"))).await;
    call(&h.app, signed_line(line_body("U1", "m-2", "   "))).await;

    let incoming = h
        .store
        .messages()
        .await
        .into_iter()
        .filter(|m| m.direction == Direction::Incoming)
        .map(|m| m.content)
        .collect::<Vec<_>>();
    assert_eq!(incoming, vec!["  คอนโด\n", "   "]);
}

#[tokio::test]
async fn async_replies_are_sent_after_acknowledgement() {
    let h = harness(1, &[("REPLY_ASYNC", "true")]);
    let (status, _) = call(&h.app, signed_line(line_body("U1", "m-1", "condo"))).await;
    assert_eq!(status, StatusCode::OK);

    let mut replies = Vec::new();
    for _ in 0..100 {
        replies = h.platform.replies().await;
        if !replies.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(replies.len(), 1);
}

#[tokio::test]
async fn meta_subscription_handshake_echoes_challenge() {
    let h = harness(0, &[]);
    for path in ["/api/webhooks/facebook", "/api/webhooks/instagram"] {
        let request = Request::builder()
            .uri(format!(
                "{path}?hub.mode=subscribe&hub.verify_token=meta-verify&hub.challenge=12345"
            ))
            .body(Body::empty())
            .unwrap();
        let (status, body) = call(&h.app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"12345");
    }
}

#[tokio::test]
async fn meta_subscription_handshake_rejects_wrong_or_missing_params() {
    let h = harness(0, &[]);
    let wrong = Request::builder()
        .uri("/api/webhooks/facebook?hub.mode=subscribe&hub.verify_token=nope&hub.challenge=1")
        .body(Body::empty())
        .unwrap();
    let (status, _) = call(&h.app, wrong).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let missing = Request::builder()
        .uri("/api/webhooks/instagram?hub.mode=subscribe")
        .body(Body::empty())
        .unwrap();
    let (status, _) = call(&h.app, missing).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn facebook_message_is_logged_but_not_answered_by_default() {
    let h = harness(3, &[]);
    let body = meta_body("page", "PSID-1", "mid.1", "บ้าน เช่า", false);
    let request = meta_post("/api/webhooks/facebook", body, None);
    let (status, json_body) = call_json(&h.app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body, json!({ "status": "ok" }));

    let leads = h.store.leads().await;
    assert_eq!(leads.len(), 1);
    assert_eq!(leads[0].facebook_psid.as_deref(), Some("PSID-1"));
    assert_eq!(leads[0].source, "FACEBOOK");
    let messages = h.store.messages().await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].channel, Channel::Facebook);
    assert!(h.platform.replies().await.is_empty());
}

#[tokio::test]
async fn page_echoes_are_ignored() {
    let h = harness(3, &[]);
    let body = meta_body("instagram", "PAGE", "mid.echo", "our own reply", true);
    let (status, _) = call(&h.app, meta_post("/api/webhooks/instagram", body, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(h.store.leads().await.is_empty());
    assert!(h.store.messages().await.is_empty());
}

#[tokio::test]
async fn instagram_replies_when_enabled() {
    let h = harness(12, &[("META_REPLY_ENABLED", "true")]);
    let body = meta_body("instagram", "IG-9", "mid.9", "condo", false);
    let (status, _) = call(&h.app, meta_post("/api/webhooks/instagram", body, None)).await;
    assert_eq!(status, StatusCode::OK);

    let replies = h.platform.replies().await;
    assert_eq!(replies.len(), 1);
    assert_eq!(
        replies[0].0,
        ReplyTarget::Meta {
            channel: Channel::Instagram,
            recipient_id: "IG-9".into()
        }
    );
    let OutboundMessage::Carousel { cards, .. } = &replies[0].1 else {
        panic!("expected a carousel reply");
    };
    assert_eq!(cards.len(), 10);
}

#[tokio::test]
async fn meta_signature_is_enforced_when_app_secret_is_configured() {
    let h = harness(0, &[("META_APP_SECRET", META_APP_SECRET)]);
    let body = meta_body("page", "PSID-2", "mid.2", "condo", false);

    let (status, _) = call(&h.app, meta_post("/api/webhooks/facebook", body.clone(), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(h.store.leads().await.is_empty());

    let signature = meta_signature(&body);
    let (status, _) = call(
        &h.app,
        meta_post("/api/webhooks/facebook", body, Some(signature)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.store.leads().await.len(), 1);
}

#[tokio::test]
async fn same_sender_id_on_two_meta_channels_yields_two_leads() {
    let h = harness(0, &[]);
    let fb = meta_body("page", "1234", "mid.fb", "condo", false);
    let ig = meta_body("instagram", "1234", "mid.ig", "condo", false);
    call(&h.app, meta_post("/api/webhooks/facebook", fb, None)).await;
    call(&h.app, meta_post("/api/webhooks/instagram", ig, None)).await;

    let leads = h.store.leads().await;
    assert_eq!(leads.len(), 2);
    assert!(leads.iter().any(|l| l.facebook_psid.as_deref() == Some("1234")));
    assert!(leads.iter().any(|l| l.instagram_sid.as_deref() == Some("1234")));
}
