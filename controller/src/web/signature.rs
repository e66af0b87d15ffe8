//! Slack-style webhook signature verification.
//!
//! Providers sign each callback with HMAC-SHA256 over `v0:<timestamp>:<body>`
//! using the channel's signing secret, and send the result as
//! `X-Slack-Signature: v0=<hex>` next to `X-Slack-Request-Timestamp`.
//! Reference: https://api.slack.com/authentication/verifying-requests-from-slack
//!
//! Verification is a pure decision over its inputs. It never logs; callers
//! decide what to record about a rejected request.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

use crate::settings::{ChannelRegistry, SigningKey};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the request timestamp in Unix seconds.
pub const TIMESTAMP_HEADER: &str = "x-slack-request-timestamp";

/// Header carrying the `v0=<hex>` signature.
pub const SIGNATURE_HEADER: &str = "x-slack-signature";

/// Signature scheme version prefix.
const VERSION: &str = "v0";

/// Default freshness window for request timestamps.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(300);

/// Reasons a webhook request is rejected.
///
/// Messages name the failure without echoing the secret or computed signature.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VerificationError {
    #[error("{0} is not configured")]
    ChannelNotConfigured(String),

    #[error("{0} signing secret is not configured")]
    SigningSecretMissing(String),

    #[error("missing X-Slack-Request-Timestamp header")]
    TimestampMissing,

    #[error("invalid X-Slack-Request-Timestamp header")]
    TimestampInvalid,

    #[error("request timestamp is outside the {max_age_seconds}s freshness window")]
    TimestampStale { max_age_seconds: u64 },

    #[error("missing X-Slack-Signature header")]
    SignatureMissing,

    #[error("malformed X-Slack-Signature header, expected v0=<hex>")]
    SignatureMalformed,

    #[error("signature mismatch")]
    SignatureMismatch,
}

impl VerificationError {
    /// Stable snake_case name, used for metrics labels and response bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ChannelNotConfigured(_) => "not_configured",
            Self::SigningSecretMissing(_) => "signing_secret_missing",
            Self::TimestampMissing => "timestamp_missing",
            Self::TimestampInvalid => "timestamp_invalid",
            Self::TimestampStale { .. } => "timestamp_stale",
            Self::SignatureMissing => "signature_missing",
            Self::SignatureMalformed => "signature_malformed",
            Self::SignatureMismatch => "signature_mismatch",
        }
    }
}

/// Verify a signed webhook request for `channel`.
///
/// # Arguments
///
/// * `registry` - Channels of the current settings snapshot
/// * `channel` - Name of the channel the request claims to come from
/// * `body` - Raw request body, exactly as received
/// * `headers` - Request headers
/// * `now` - Wall-clock time of verification
/// * `max_age` - Maximum allowed distance between `now` and the request timestamp
///
/// Checks run in a fixed order: channel, secret, timestamp, signature format,
/// then the constant-time signature comparison.
pub fn verify_request(
    registry: &ChannelRegistry,
    channel: &str,
    body: &[u8],
    headers: &HeaderMap,
    now: SystemTime,
    max_age: Duration,
) -> Result<(), VerificationError> {
    let secret = match registry.signing_key(channel) {
        SigningKey::NotConfigured => {
            return Err(VerificationError::ChannelNotConfigured(channel.to_string()))
        }
        SigningKey::Missing => {
            return Err(VerificationError::SigningSecretMissing(channel.to_string()))
        }
        SigningKey::Present(secret) => secret,
    };

    let timestamp = parse_timestamp(headers)?;
    check_freshness(timestamp, now, max_age)?;

    let provided = parse_signature(headers)?;

    let mut mac = HmacSha256::new_from_slice(secret.expose())
        .map_err(|_| VerificationError::SignatureMismatch)?;
    mac.update(format!("{}:{}:", VERSION, timestamp).as_bytes());
    mac.update(body);

    // verify_slice compares in constant time.
    mac.verify_slice(&provided)
        .map_err(|_| VerificationError::SignatureMismatch)
}

fn parse_timestamp(headers: &HeaderMap) -> Result<i64, VerificationError> {
    let raw = headers
        .get(TIMESTAMP_HEADER)
        .ok_or(VerificationError::TimestampMissing)?;
    raw.to_str()
        .ok()
        .and_then(|v| v.trim().parse::<i64>().ok())
        .ok_or(VerificationError::TimestampInvalid)
}

fn check_freshness(
    timestamp: i64,
    now: SystemTime,
    max_age: Duration,
) -> Result<(), VerificationError> {
    let now = match now.duration_since(UNIX_EPOCH) {
        Ok(elapsed) => i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX),
        Err(before) => -i64::try_from(before.duration().as_secs()).unwrap_or(i64::MAX),
    };

    let age = now.abs_diff(timestamp);
    if age > max_age.as_secs() {
        return Err(VerificationError::TimestampStale {
            max_age_seconds: max_age.as_secs(),
        });
    }
    Ok(())
}

fn parse_signature(headers: &HeaderMap) -> Result<Vec<u8>, VerificationError> {
    let raw = headers
        .get(SIGNATURE_HEADER)
        .ok_or(VerificationError::SignatureMissing)?;
    let value = raw
        .to_str()
        .map_err(|_| VerificationError::SignatureMalformed)?;
    let digest = value
        .strip_prefix("v0=")
        .ok_or(VerificationError::SignatureMalformed)?;
    // Providers send lowercase hex; any other spelling is not an exact match.
    if !digest.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
        return Err(VerificationError::SignatureMalformed);
    }
    hex::decode(digest).map_err(|_| VerificationError::SignatureMalformed)
}

/// Compute the `v0=<hex>` signature a provider would send.
#[cfg(test)]
pub(crate) fn sign_request(secret: &[u8], timestamp: i64, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).unwrap();
    mac.update(format!("{}:{}:", VERSION, timestamp).as_bytes());
    mac.update(body);
    format!("{}={}", VERSION, hex::encode(mac.finalize().into_bytes()))
}
