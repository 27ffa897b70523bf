//! Sealed, self-expiring link tokens: `nonce || tag || ciphertext` under
//! AES-256-GCM, in unpadded URL-safe base64.

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit},
};
use base64::{
    Engine, alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
};
use chrono::Utc;
use rand::RngCore;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;

const ENVELOPE_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("malformed link token: {0}")]
    Decode(String),
    #[error("link token failed authentication")]
    Integrity,
    #[error("link token expired at {expired_at}")]
    Expired { expired_at: i64 },
    #[error("failed to seal payload: {0}")]
    Seal(String),
    #[error("ttl must be greater than zero")]
    InvalidTtl,
}

impl TokenError {
    pub fn is_expired(&self) -> bool {
        matches!(self, Self::Expired { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Decode(_) => "decode",
            Self::Integrity => "integrity",
            Self::Expired { .. } => "expired",
            Self::Seal(_) => "seal",
            Self::InvalidTtl => "invalid_ttl",
        }
    }
}

#[derive(Serialize)]
struct SealedClaims<'a, T: ?Sized> {
    #[serde(rename = "p")]
    payload: &'a T,
    #[serde(rename = "iat")]
    issued_at: i64,
    ttl: u64,
}

#[derive(Deserialize)]
struct OpenedClaims {
    #[serde(rename = "p")]
    payload: serde_json::Value,
    #[serde(rename = "iat")]
    issued_at: i64,
    ttl: u64,
}

#[derive(Clone)]
pub struct LinkSealer {
    key: Zeroizing<[u8; KEY_LEN]>,
}

impl std::fmt::Debug for LinkSealer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkSealer")
            .field("key", &"<redacted>")
            .finish()
    }
}

impl LinkSealer {
    pub fn new(secret: &str) -> Self {
        Self {
            key: derive_key(secret),
        }
    }

    pub fn seal<T: Serialize + ?Sized>(
        &self,
        payload: &T,
        ttl_seconds: u64,
    ) -> Result<String, TokenError> {
        self.seal_at(payload, ttl_seconds, Utc::now().timestamp())
    }

    pub fn seal_at<T: Serialize + ?Sized>(
        &self,
        payload: &T,
        ttl_seconds: u64,
        now: i64,
    ) -> Result<String, TokenError> {
        if ttl_seconds == 0 {
            return Err(TokenError::InvalidTtl);
        }

        let claims = SealedClaims {
            payload,
            issued_at: now,
            ttl: ttl_seconds,
        };
        let plaintext = Zeroizing::new(
            serde_json::to_vec(&claims).map_err(|error| TokenError::Seal(error.to_string()))?,
        );

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);

        let sealed = self
            .cipher()
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_slice())
            .map_err(|_| TokenError::Seal("encryption failed".to_string()))?;

        // aes-gcm appends the tag; the envelope carries it ahead of the ciphertext.
        let tag_start = sealed.len().saturating_sub(TAG_LEN);
        let (ciphertext, tag) = sealed.split_at(tag_start);

        let mut buffer = Vec::with_capacity(NONCE_LEN + sealed.len());
        buffer.extend_from_slice(&nonce_bytes);
        buffer.extend_from_slice(tag);
        buffer.extend_from_slice(ciphertext);

        Ok(ENVELOPE_ENGINE.encode(buffer))
    }

    pub fn unseal<T: DeserializeOwned>(&self, envelope: &str) -> Result<T, TokenError> {
        self.unseal_at(envelope, Utc::now().timestamp())
    }

    /// Expiry is checked before the payload is decoded into `T`.
    pub fn unseal_at<T: DeserializeOwned>(&self, envelope: &str, now: i64) -> Result<T, TokenError> {
        let raw = ENVELOPE_ENGINE
            .decode(envelope)
            .map_err(|error| TokenError::Decode(format!("invalid base64: {error}")))?;

        if raw.len() < NONCE_LEN + TAG_LEN {
            return Err(TokenError::Decode("envelope too short".to_string()));
        }

        let (nonce, rest) = raw.split_at(NONCE_LEN);
        let (tag, ciphertext) = rest.split_at(TAG_LEN);

        let mut sealed = Vec::with_capacity(rest.len());
        sealed.extend_from_slice(ciphertext);
        sealed.extend_from_slice(tag);

        let plaintext = Zeroizing::new(
            self.cipher()
                .decrypt(Nonce::from_slice(nonce), sealed.as_slice())
                .map_err(|_| TokenError::Integrity)?,
        );

        let claims: OpenedClaims = serde_json::from_slice(&plaintext)
            .map_err(|error| TokenError::Decode(format!("invalid claims: {error}")))?;

        let ttl = i64::try_from(claims.ttl).unwrap_or(i64::MAX);
        let expired_at = claims.issued_at.saturating_add(ttl);
        if now > expired_at {
            return Err(TokenError::Expired { expired_at });
        }

        serde_json::from_value(claims.payload)
            .map_err(|error| TokenError::Decode(format!("unexpected payload: {error}")))
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(self.key.as_slice()))
    }
}

pub fn seal<T: Serialize + ?Sized>(
    payload: &T,
    secret: &str,
    ttl_seconds: u64,
) -> Result<String, TokenError> {
    LinkSealer::new(secret).seal(payload, ttl_seconds)
}

pub fn unseal<T: DeserializeOwned>(envelope: &str, secret: &str) -> Result<T, TokenError> {
    LinkSealer::new(secret).unseal(envelope)
}

fn derive_key(secret: &str) -> Zeroizing<[u8; KEY_LEN]> {
    let digest = Sha256::digest(secret.as_bytes());
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    key.copy_from_slice(&digest);
    key
}
