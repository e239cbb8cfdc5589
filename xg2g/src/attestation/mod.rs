//! Playback-decision attestation (C4): compact HMAC-SHA256 tokens binding a
//! `serviceRef`/`mode` pair to a short-lived window, with a rotating keyring.

use std::time::{Duration, Instant};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::config::PlaybackDecisionConfig;
use crate::errors::AppError;
use crate::models::PlaybackDecisionClaims;

type HmacSha256 = Hmac<Sha256>;

const VERSION_PREFIX: &str = "v1";
/// Claims are rejected if `iat` is further in the future than this skew.
const MAX_FUTURE_SKEW_SECS: i64 = 15;

struct Key {
    kid: String,
    secret: Vec<u8>,
}

/// A retired key plus the instant it stopped being `active`. Verification
/// against it is only honored inside `rotation_window` of that instant
/// (§4.3: "previous keys remain valid for verification within a
/// rotationWindow").
struct RetiredKey {
    key: Key,
    rotated_at: Instant,
}

pub struct Keyring {
    active: Key,
    previous: Vec<RetiredKey>,
    rotation_window: Duration,
}

impl Keyring {
    pub fn from_config(config: &PlaybackDecisionConfig) -> Self {
        let secret = if config.secret.is_empty() {
            warn!("playback decision: no secret configured, using an ephemeral random dev key");
            rand_secret()
        } else {
            config.secret.as_bytes().to_vec()
        };
        let kid = config
            .key_id
            .clone()
            .unwrap_or_else(|| derive_kid(&secret));

        // Every configured previous key is treated as rotated out the moment
        // this keyring is built; there is no persisted rotation history
        // across restarts, so "now" is the only honest starting point.
        let rotated_at = Instant::now();
        let previous = config
            .previous_keys
            .iter()
            .filter_map(|entry| entry.split_once(':'))
            .map(|(kid, secret)| RetiredKey {
                key: Key {
                    kid: kid.to_string(),
                    secret: secret.as_bytes().to_vec(),
                },
                rotated_at,
            })
            .collect();

        Self {
            active: Key { kid, secret },
            previous,
            rotation_window: config.rotation_window,
        }
    }

    fn find(&self, kid: Option<&str>) -> Option<&Key> {
        match kid {
            None => None,
            Some(kid) if kid == self.active.kid => Some(&self.active),
            Some(kid) => self
                .previous
                .iter()
                .find(|retired| retired.key.kid == kid && !self.is_expired(retired))
                .map(|retired| &retired.key),
        }
    }

    fn is_expired(&self, retired: &RetiredKey) -> bool {
        retired.rotated_at.elapsed() > self.rotation_window
    }

    /// When `kid` is absent from the token, fall back through the ordered
    /// legacy key list, never inferring an unknown kid. Expired previous
    /// keys are excluded.
    fn all_candidates(&self) -> impl Iterator<Item = &Key> {
        std::iter::once(&self.active).chain(
            self.previous
                .iter()
                .filter(|retired| !self.is_expired(retired))
                .map(|retired| &retired.key),
        )
    }

    pub fn sign(&self, claims: &PlaybackDecisionClaims) -> Result<String, AppError> {
        let payload = serde_json::to_vec(claims)
            .map_err(|e| AppError::internal(anyhow::anyhow!(e)))?;
        let payload_b64 = URL_SAFE_NO_PAD.encode(&payload);

        let mut mac = HmacSha256::new_from_slice(&self.active.secret)
            .map_err(|e| AppError::internal(anyhow::anyhow!(e)))?;
        mac.update(payload_b64.as_bytes());
        let sig = mac.finalize().into_bytes();
        let sig_b64 = URL_SAFE_NO_PAD.encode(sig);

        Ok(format!("{VERSION_PREFIX}.{payload_b64}.{sig_b64}"))
    }
}

fn derive_kid(secret: &[u8]) -> String {
    let digest = Sha256::digest(secret);
    hex::encode(&digest[..8])
}

fn rand_secret() -> Vec<u8> {
    use rand::RngCore;
    let mut bytes = vec![0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    bytes
}

/// Verifies a compact token and returns the enclosed claims. Token-level
/// failures (malformed, bad signature, expired, unknown kid) are
/// [`AppError::TokenInvalid`]; binding mismatches against the caller's
/// expected `service_ref`/`mode` are [`AppError::Forbidden`] with
/// `CLAIM_MISMATCH` (§4.3).
pub fn verify(
    keyring: &Keyring,
    token: &str,
    expected_service_ref: &str,
    expected_mode: &str,
) -> Result<PlaybackDecisionClaims, AppError> {
    if token != token.trim() {
        return Err(token_invalid("token has leading or trailing whitespace"));
    }

    let mut parts = token.split('.');
    let (Some(version), Some(payload_b64), Some(sig_b64), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(token_invalid("malformed token structure"));
    };
    if version != VERSION_PREFIX {
        return Err(token_invalid("unsupported token version"));
    }

    let payload = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| token_invalid("payload is not valid base64url"))?;
    let sig = URL_SAFE_NO_PAD
        .decode(sig_b64)
        .map_err(|_| token_invalid("signature is not valid base64url"))?;

    let claims: PlaybackDecisionClaims =
        serde_json::from_slice(&payload).map_err(|_| token_invalid("payload is not valid claims JSON"))?;

    let verified = if let Some(kid) = claims.kid.as_deref() {
        let key = keyring
            .find(Some(kid))
            .ok_or_else(|| token_invalid("unknown kid"))?;
        verify_signature(key, payload_b64.as_bytes(), &sig)
    } else {
        keyring
            .all_candidates()
            .any(|key| verify_signature(key, payload_b64.as_bytes(), &sig))
    };

    if !verified {
        return Err(token_invalid("signature does not match any configured key"));
    }

    let now = Utc::now().timestamp();
    if claims.iat > now + MAX_FUTURE_SKEW_SECS {
        return Err(token_invalid("token issued too far in the future"));
    }
    if claims.exp <= now {
        return Err(token_invalid("token has expired"));
    }
    if claims.iat >= claims.exp {
        return Err(token_invalid("iat must precede exp"));
    }

    if claims.service_ref != expected_service_ref {
        return Err(claim_mismatch("serviceRef does not match the intent"));
    }
    if claims.mode.to_ascii_uppercase() != expected_mode.to_ascii_uppercase() {
        return Err(claim_mismatch("mode does not match the intent"));
    }

    Ok(claims)
}

fn verify_signature(key: &Key, payload_b64: &[u8], sig: &[u8]) -> bool {
    let Ok(mut mac) = HmacSha256::new_from_slice(&key.secret) else {
        return false;
    };
    mac.update(payload_b64);
    let expected = mac.finalize().into_bytes();
    expected.as_slice().ct_eq(sig).into()
}

fn token_invalid(detail: &str) -> AppError {
    AppError::TokenInvalid {
        code: "TOKEN_INVALID",
        detail: detail.to_string(),
    }
}

fn claim_mismatch(detail: &str) -> AppError {
    AppError::Forbidden {
        code: "CLAIM_MISMATCH",
        detail: detail.to_string(),
    }
}
