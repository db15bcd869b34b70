//! Authenticity checks for inbound webhook requests.
//!
//! LINE signs every delivery with `base64(HMAC-SHA256(channel_secret, body))`
//! in `x-line-signature`. Meta proves endpoint ownership with a one-off GET
//! handshake and, when an app secret is configured, signs POST bodies with a
//! hex digest in `x-hub-signature-256`.

use std::collections::HashMap;

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::Rejection;

type HmacSha256 = Hmac<Sha256>;

pub const LINE_SIGNATURE_HEADER: &str = "x-line-signature";
pub const META_SIGNATURE_HEADER: &str = "x-hub-signature-256";

pub fn verify_line_signature(
    channel_secret: &str,
    signature_header: Option<&str>,
    body: &[u8],
) -> Result<(), Rejection> {
    let signature = signature_header
        .map(str::trim)
        .filter(|signature| !signature.is_empty())
        .ok_or(Rejection::MissingSignature)?;
    let provided = B64
        .decode(signature)
        .map_err(|_| Rejection::InvalidSignature)?;
    check_digest(channel_secret, body, &provided)
}

pub fn line_signature(channel_secret: &str, body: &[u8]) -> Option<String> {
    let mac = keyed_mac(channel_secret, body)?;
    Some(B64.encode(mac.finalize().into_bytes()))
}

/// Checks `x-hub-signature-256: sha256=<hex>` when an app secret is
/// configured. An empty secret disables the check.
pub fn verify_meta_signature(
    app_secret: &str,
    signature_header: Option<&str>,
    body: &[u8],
) -> Result<(), Rejection> {
    if app_secret.is_empty() {
        return Ok(());
    }
    let provided = signature_header
        .and_then(|header| header.trim().strip_prefix("sha256="))
        .and_then(|digest| hex::decode(digest.trim()).ok())
        .ok_or(Rejection::InvalidSignature)?;
    check_digest(app_secret, body, &provided)
}

fn keyed_mac(secret: &str, body: &[u8]) -> Option<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body);
    Some(mac)
}

/// Constant-time comparison of `provided` against HMAC-SHA256(secret, body).
fn check_digest(secret: &str, body: &[u8], provided: &[u8]) -> Result<(), Rejection> {
    keyed_mac(secret, body)
        .ok_or(Rejection::InvalidSignature)?
        .verify_slice(provided)
        .map_err(|_| Rejection::InvalidSignature)
}

/// Meta subscription handshake. Returns the challenge to echo back.
pub fn verify_subscription(
    params: &HashMap<String, String>,
    expected_verify_token: &str,
) -> Result<String, Rejection> {
    let (Some(mode), Some(verify_token), Some(challenge)) = (
        params.get("hub.mode"),
        params.get("hub.verify_token"),
        params.get("hub.challenge"),
    ) else {
        return Err(Rejection::MissingVerificationParams);
    };
    if challenge.is_empty() {
        return Err(Rejection::MissingVerificationParams);
    }

    let token_matches = !expected_verify_token.is_empty()
        && bool::from(
            verify_token
                .as_bytes()
                .ct_eq(expected_verify_token.as_bytes()),
        );
    if mode == "subscribe" && token_matches {
        Ok(challenge.clone())
    } else {
        Err(Rejection::VerificationMismatch)
    }
}
