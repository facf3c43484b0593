//! # Device Tokens
//!
//! Bearer tokens presented in the relay `Hello`. A token is
//! `hex(claims_json) "." hex(ed25519_signature)`, signed with the device key.
//! The relay verifies it with the device's registered public key.

use hk_01_leadership::TimeSource;
use serde::{Deserialize, Serialize};
use shared_crypto::{Ed25519KeyPair, Ed25519PublicKey, Ed25519Signature};
use std::sync::Arc;
use std::time::Duration;

use crate::domain::TokenError;
use crate::ports::TokenProvider;

/// Accepted difference between issuer and verifier clocks.
pub const CLOCK_SKEW_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub device_id: String,
    pub hostnames: Vec<String>,
    /// Issued at, unix seconds.
    pub iat: u64,
    /// Expiry, unix seconds.
    pub exp: u64,
    /// Unique per token.
    pub jti: String,
}

pub struct SignedTokenProvider {
    device_id: String,
    keypair: Ed25519KeyPair,
    ttl: Duration,
    clock: Arc<dyn TimeSource>,
}

impl SignedTokenProvider {
    pub fn new(
        device_id: impl Into<String>,
        keypair: Ed25519KeyPair,
        ttl: Duration,
        clock: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            keypair,
            ttl,
            clock,
        }
    }

    #[must_use]
    pub fn public_key(&self) -> Ed25519PublicKey {
        self.keypair.public_key()
    }
}

impl TokenProvider for SignedTokenProvider {
    fn issue(&self, hostnames: &[String]) -> Result<String, TokenError> {
        let iat = self.clock.now_ms() / 1000;
        let claims = TokenClaims {
            device_id: self.device_id.clone(),
            hostnames: hostnames.to_vec(),
            iat,
            exp: iat + self.ttl.as_secs(),
            jti: uuid::Uuid::new_v4().to_string(),
        };
        let body = serde_json::to_vec(&claims).map_err(|e| TokenError::Signing(e.to_string()))?;
        let signature = self.keypair.sign(&body);
        Ok(format!(
            "{}.{}",
            hex::encode(&body),
            hex::encode(signature.to_bytes())
        ))
    }
}

/// Check signature and validity window at `now_secs`.
pub fn verify_token(
    token: &str,
    key: &Ed25519PublicKey,
    now_secs: u64,
) -> Result<TokenClaims, TokenError> {
    let (body_hex, sig_hex) = token.split_once('.').ok_or(TokenError::Malformed)?;
    let body = hex::decode(body_hex).map_err(|_| TokenError::Malformed)?;
    let sig_bytes = hex::decode(sig_hex).map_err(|_| TokenError::Malformed)?;
    let signature = Ed25519Signature::from_slice(&sig_bytes).map_err(|_| TokenError::Malformed)?;

    key.verify(&body, &signature)
        .map_err(|_| TokenError::BadSignature)?;

    let claims: TokenClaims = serde_json::from_slice(&body).map_err(|_| TokenError::Malformed)?;
    if now_secs >= claims.exp {
        return Err(TokenError::Expired(claims.exp));
    }
    if claims.iat > now_secs + CLOCK_SKEW_SECS {
        return Err(TokenError::NotYetValid(claims.iat));
    }
    Ok(claims)
}
