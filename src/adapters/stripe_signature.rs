//! Stripe-style webhook signature verification.
//!
//! Header: `t=<unix seconds>,v1=<hex>[,v1=<hex>...]`. The MAC is
//! HMAC-SHA256 over `"{t}." ++ raw_body`, keyed with the endpoint secret.

use {
    crate::domain::{error::VerificationError, event::WebhookEvent},
    chrono::{DateTime, Utc},
    hmac::{Hmac, Mac},
    sha2::Sha256,
};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "Stripe-Signature";
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, PartialEq, Eq)]
struct SignatureHeader {
    timestamp: i64,
    signatures: Vec<Vec<u8>>,
}

impl SignatureHeader {
    fn parse(header: &str) -> Result<Self, VerificationError> {
        let mut timestamp = None;
        let mut signatures = Vec::new();

        for part in header.split(',') {
            let (key, value) = part
                .trim()
                .split_once('=')
                .ok_or(VerificationError::BadFormat)?;
            match key {
                "t" => {
                    if timestamp.is_some() {
                        return Err(VerificationError::BadFormat);
                    }
                    let ts = value
                        .parse::<i64>()
                        .map_err(|_| VerificationError::BadFormat)?;
                    timestamp = Some(ts);
                }
                "v1" => {
                    let sig = hex::decode(value).map_err(|_| VerificationError::BadFormat)?;
                    signatures.push(sig);
                }
                // v0 and future schemes are not ours to check.
                _ => {}
            }
        }

        match timestamp {
            Some(timestamp) if !signatures.is_empty() => Ok(Self {
                timestamp,
                signatures,
            }),
            _ => Err(VerificationError::BadFormat),
        }
    }
}

fn mac_for(secret: &str, timestamp: i64, body: &[u8]) -> Result<HmacSha256, VerificationError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| VerificationError::BadFormat)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    Ok(mac)
}

/// Hex HMAC for `body` signed at `timestamp`.
pub fn compute_signature(secret: &str, timestamp: i64, body: &[u8]) -> String {
    match mac_for(secret, timestamp, body) {
        Ok(mac) => hex::encode(mac.finalize().into_bytes()),
        Err(_) => String::new(),
    }
}

/// Full header value as the provider would send it.
pub fn signature_header(secret: &str, timestamp: i64, body: &[u8]) -> String {
    format!(
        "t={timestamp},v1={}",
        compute_signature(secret, timestamp, body)
    )
}

pub fn verify(
    raw_body: &[u8],
    signature_header: &str,
    secret: &str,
    tolerance_secs: i64,
) -> Result<WebhookEvent, VerificationError> {
    verify_at(raw_body, signature_header, secret, tolerance_secs, Utc::now())
}

/// Verify against an explicit clock. The signature is checked before the
/// timestamp, so a stale but correctly signed delivery reports
/// `TimestampExpired`.
pub fn verify_at(
    raw_body: &[u8],
    signature_header: &str,
    secret: &str,
    tolerance_secs: i64,
    now: DateTime<Utc>,
) -> Result<WebhookEvent, VerificationError> {
    let signature_header = signature_header.trim();
    if signature_header.is_empty() {
        return Err(VerificationError::MissingHeader);
    }
    let header = SignatureHeader::parse(signature_header)?;

    let matched = header.signatures.iter().try_fold(false, |matched, candidate| {
        let mac = mac_for(secret, header.timestamp, raw_body)?;
        // verify_slice compares in constant time.
        Ok::<_, VerificationError>(matched || mac.verify_slice(candidate).is_ok())
    })?;
    if !matched {
        return Err(VerificationError::SignatureMismatch);
    }

    let skew = now
        .timestamp()
        .checked_sub(header.timestamp)
        .and_then(i64::checked_abs);
    if !matches!(skew, Some(s) if s <= tolerance_secs) {
        return Err(VerificationError::TimestampExpired);
    }

    WebhookEvent::parse(raw_body, now)
}
