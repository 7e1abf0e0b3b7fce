//! OAuth `state` parameter: a signed, time-boxed, single-use envelope around
//! `{platform, user_id}`.
//!
//! Wire format: `base64url(hmac_sha256(payload) || payload)` where `payload` is
//! compact JSON `{"p": platform, "u": user_id, "iat": unix_seconds, "n": nonce}`.

use base64::Engine as _;
use chrono::Utc;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::crypto::CryptoEngine;
use crate::error::AppError;
use crate::providers::Platform;

/// Tolerated clock skew for states issued by another instance.
const MAX_FUTURE_SKEW_SECS: i64 = 60;

/// Decoded contents of a state parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthState {
    pub platform: Platform,
    pub user_id: String,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct StatePayload {
    #[serde(rename = "p")]
    platform: Platform,
    #[serde(rename = "u")]
    user_id: String,
    #[serde(rename = "iat")]
    issued_at: i64,
    #[serde(rename = "n")]
    nonce: String,
}

pub struct StateCodec {
    crypto: Arc<CryptoEngine>,
    ttl: Duration,
    /// Nonces already redeemed, with their issuance time for pruning.
    consumed: Mutex<HashMap<String, i64>>,
}

impl StateCodec {
    pub fn new(crypto: Arc<CryptoEngine>, ttl: Duration) -> Self {
        Self {
            crypto,
            ttl,
            consumed: Mutex::new(HashMap::new()),
        }
    }

    pub fn encode(&self, platform: Platform, user_id: &str) -> Result<String, AppError> {
        self.encode_at(platform, user_id, Utc::now().timestamp())
    }

    fn encode_at(&self, platform: Platform, user_id: &str, issued_at: i64) -> Result<String, AppError> {
        let mut nonce = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut nonce);

        let payload = StatePayload {
            platform,
            user_id: user_id.to_string(),
            issued_at,
            nonce: base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(nonce),
        };
        let bytes = serde_json::to_vec(&payload)
            .map_err(|e| AppError::Internal(format!("failed to serialize state: {e}")))?;

        self.crypto.sign(&bytes)
    }

    /// Verify signature, shape and freshness. Never panics; every failure is
    /// reported as `MalformedState`.
    pub fn decode(&self, value: &str) -> Result<OAuthState, AppError> {
        let payload = self.verify(value)?;
        Ok(OAuthState {
            platform: payload.platform,
            user_id: payload.user_id,
        })
    }

    /// Decode and redeem the state. A second redemption of the same value fails.
    pub fn consume(&self, value: &str) -> Result<OAuthState, AppError> {
        let payload = self.verify(value)?;
        let now = Utc::now().timestamp();
        let ttl = self.ttl_secs();

        let mut consumed = self
            .consumed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        consumed.retain(|_, issued_at| now - *issued_at <= ttl + MAX_FUTURE_SKEW_SECS);

        if consumed.contains_key(&payload.nonce) {
            return Err(AppError::MalformedState("state was already used".into()));
        }
        consumed.insert(payload.nonce, payload.issued_at);

        Ok(OAuthState {
            platform: payload.platform,
            user_id: payload.user_id,
        })
    }

    fn verify(&self, value: &str) -> Result<StatePayload, AppError> {
        if value.is_empty() {
            return Err(AppError::MalformedState("empty".into()));
        }

        let bytes = self.crypto.verify(value)?;
        let payload: StatePayload = serde_json::from_slice(&bytes)
            .map_err(|_| AppError::MalformedState("unexpected payload shape".into()))?;

        if payload.user_id.is_empty() {
            return Err(AppError::MalformedState("missing user".into()));
        }

        let age = Utc::now().timestamp() - payload.issued_at;
        if age > self.ttl_secs() {
            return Err(AppError::MalformedState("expired".into()));
        }
        if age < -MAX_FUTURE_SKEW_SECS {
            return Err(AppError::MalformedState("issued in the future".into()));
        }

        Ok(payload)
    }

    fn ttl_secs(&self) -> i64 {
        i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX)
    }
}
