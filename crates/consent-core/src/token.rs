//! Signed, time-stamped link tokens.
//!
//! A token is `payload.timestamp.signature`, each part unpadded base64url.
//! The payload is `{"lid": <link id>}` and nothing else: every use re-reads
//! the link row, so revoking a link is a database update.

use std::fmt;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

use crate::error::ConsentError;

type HmacSha256 = Hmac<Sha256>;

const SIGNING_NAMESPACE: &[u8] = b"consent-link.";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    /// Correctly signed but outside the accepted age. Carries the link id so
    /// callers can still settle the link's own expiry.
    #[error("token for link {0} has expired")]
    Expired(i64),
    #[error("token is invalid")]
    Invalid,
    #[error("signing secret must not be empty")]
    EmptySecret,
}

impl From<TokenError> for ConsentError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired(_) => ConsentError::TokenExpired,
            TokenError::Invalid => ConsentError::TokenInvalid,
            TokenError::EmptySecret => ConsentError::Invalid(err.to_string()),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct TokenPayload {
    lid: i64,
}

#[derive(Clone)]
pub struct TokenCodec {
    mac: HmacSha256,
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec").finish_non_exhaustive()
    }
}

impl TokenCodec {
    pub fn new(secret: &[u8]) -> Result<Self, TokenError> {
        if secret.is_empty() {
            return Err(TokenError::EmptySecret);
        }
        let mac = HmacSha256::new_from_slice(secret).map_err(|_| TokenError::EmptySecret)?;
        Ok(Self { mac })
    }

    pub fn issue(&self, link_id: i64, issued_at: DateTime<Utc>) -> String {
        let payload = URL_SAFE_NO_PAD.encode(format!("{{\"lid\":{link_id}}}"));
        let seconds = u64::try_from(issued_at.timestamp()).unwrap_or_default();
        let stamp = URL_SAFE_NO_PAD.encode(seconds.to_be_bytes());
        let signature = URL_SAFE_NO_PAD.encode(self.sign(&payload, &stamp));

        format!("{payload}.{stamp}.{signature}")
    }

    /// Returns the link id of a token signed by this codec and issued no more
    /// than `max_age` before `now`.
    pub fn verify(
        &self,
        token: &str,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> Result<i64, TokenError> {
        let mut parts = token.trim().split('.');
        let (Some(payload), Some(stamp), Some(signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(TokenError::Invalid);
        };

        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| TokenError::Invalid)?;
        self.keyed(payload, stamp)
            .verify_slice(&signature)
            .map_err(|_| TokenError::Invalid)?;

        let stamp: [u8; 8] = URL_SAFE_NO_PAD
            .decode(stamp)
            .map_err(|_| TokenError::Invalid)?
            .try_into()
            .map_err(|_| TokenError::Invalid)?;
        let seconds = i64::try_from(u64::from_be_bytes(stamp)).map_err(|_| TokenError::Invalid)?;
        let issued_at = DateTime::from_timestamp(seconds, 0).ok_or(TokenError::Invalid)?;

        let payload = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| TokenError::Invalid)?;
        let payload: TokenPayload =
            serde_json::from_slice(&payload).map_err(|_| TokenError::Invalid)?;

        let age = now - issued_at;
        if age < Duration::zero() || age > max_age {
            return Err(TokenError::Expired(payload.lid));
        }

        Ok(payload.lid)
    }

    fn sign(&self, payload: &str, stamp: &str) -> Vec<u8> {
        self.keyed(payload, stamp).finalize().into_bytes().to_vec()
    }

    fn keyed(&self, payload: &str, stamp: &str) -> HmacSha256 {
        let mut mac = self.mac.clone();
        mac.update(SIGNING_NAMESPACE);
        mac.update(payload.as_bytes());
        mac.update(b".");
        mac.update(stamp.as_bytes());
        mac
    }
}
