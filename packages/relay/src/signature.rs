use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::AppError;
use crate::models::WebhookEvent;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the provider's signature on inbound events
pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

/// Parsed `t=<unix>,v1=<hex>[,v1=<hex>...]` signature header
#[derive(Debug)]
pub struct ParsedSignature {
    pub timestamp: i64,
    pub digests: Vec<String>,
}

/// Parse a signature header into its timestamp and v1 digests.
///
/// Unknown schemes (e.g. `v0=`) are skipped so secret rotation on the
/// provider side does not break verification.
pub fn parse_signature_header(header: &str) -> Result<ParsedSignature, AppError> {
    let mut timestamp = None;
    let mut digests = Vec::new();

    for part in header.split(',') {
        let (key, value) = part
            .trim()
            .split_once('=')
            .ok_or_else(|| AppError::Signature("malformed signature header".to_string()))?;
        match key {
            "t" => {
                timestamp = Some(value.parse::<i64>().map_err(|_| {
                    AppError::Signature("invalid timestamp in signature header".to_string())
                })?);
            }
            "v1" => digests.push(value.to_string()),
            _ => {}
        }
    }

    let timestamp = timestamp
        .ok_or_else(|| AppError::Signature("missing timestamp in signature header".to_string()))?;
    if digests.is_empty() {
        return Err(AppError::Signature(
            "no v1 digest in signature header".to_string(),
        ));
    }

    Ok(ParsedSignature { timestamp, digests })
}

/// Compute the hex HMAC-SHA256 digest over `"{timestamp}.{body}"`.
fn compute_digest(secret: &str, timestamp: i64, body: &[u8]) -> String {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Produce a `t=...,v1=...` header value for an outbound body.
pub fn sign(body: &[u8], secret: &str, timestamp: i64) -> String {
    format!("t={},v1={}", timestamp, compute_digest(secret, timestamp, body))
}

/// Verify an inbound event body against its signature header.
///
/// Rejects digest mismatches and timestamps outside the tolerance window.
/// Digest comparison is constant-time. The secret is never logged.
/// A valid signature over malformed JSON is the distinct `Payload` error.
pub fn verify(
    raw_body: &[u8],
    header: &str,
    secret: &str,
    tolerance_secs: i64,
    now: i64,
) -> Result<WebhookEvent, AppError> {
    let parsed = parse_signature_header(header)?;

    if (now - parsed.timestamp).abs() > tolerance_secs {
        return Err(AppError::Signature(
            "signature timestamp outside tolerance window".to_string(),
        ));
    }

    let expected = compute_digest(secret, parsed.timestamp, raw_body);
    let matched = parsed
        .digests
        .iter()
        .any(|digest| bool::from(digest.as_bytes().ct_eq(expected.as_bytes())));
    if !matched {
        return Err(AppError::Signature(
            "signature digest mismatch".to_string(),
        ));
    }

    serde_json::from_slice(raw_body)
        .map_err(|e| AppError::Payload(format!("invalid event JSON: {e}")))
}
