//! Bearer token verification
//!
//! Tokens are issued by the account service; this crate only verifies
//! them at connection handshake time. HMAC-SHA256 compact tokens
//! (header.claims.signature, base64url). A failed verification never
//! refuses the connection - the caller downgrades it to a visitor.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::debug;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Claims carried by a verified bearer token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject (user ID)
    pub sub: Uuid,
    /// Display name
    pub name: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

impl TokenClaims {
    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() > self.exp
    }
}

/// Token verifier bound to the shared signing secret
#[derive(Clone)]
pub struct TokenVerifier {
    secret: Vec<u8>,
}

impl TokenVerifier {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Verify a compact token and return its claims
    ///
    /// Returns `None` for malformed tokens, bad signatures and expired
    /// claims alike; callers treat all three as "anonymous visitor".
    pub fn verify(&self, token: &str) -> Option<TokenClaims> {
        let mut parts = token.split('.');
        let header = parts.next()?;
        let claims_part = parts.next()?;
        let signature_part = parts.next()?;
        if parts.next().is_some() {
            return None;
        }

        let signature = URL_SAFE_NO_PAD.decode(signature_part).ok()?;
        let mut mac = HmacSha256::new_from_slice(&self.secret).ok()?;
        mac.update(header.as_bytes());
        mac.update(b".");
        mac.update(claims_part.as_bytes());
        if mac.verify_slice(&signature).is_err() {
            debug!("Bearer token signature verification failed");
            return None;
        }

        let claims_json = URL_SAFE_NO_PAD.decode(claims_part).ok()?;
        let claims: TokenClaims = serde_json::from_slice(&claims_json).ok()?;
        if claims.is_expired() {
            debug!("Bearer token for {} is expired", claims.sub);
            return None;
        }

        Some(claims)
    }
}
