//! Access-token signing/verification and opaque token material.
//!
//! Access tokens are HS256 JWTs. Refresh tokens are random opaque strings;
//! only their SHA-256 digest is ever persisted.

use std::collections::HashSet;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

use gatehouse_core::{IdentityId, SessionId};

use crate::claims::{AccessClaims, TokenError, validate_claims};
use crate::{HandleName, PermissionName, RoleName};

const OPAQUE_TOKEN_BYTES: usize = 32;

/// Signed access token plus the claims it carries.
#[derive(Debug, Clone)]
pub struct IssuedAccessToken {
    pub token: String,
    pub claims: AccessClaims,
    pub expires_at: DateTime<Utc>,
}

/// Mints and verifies access tokens with a process-wide secret.
pub struct AccessTokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl AccessTokenIssuer {
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked against the injected clock in `validate_claims`.
        validation.validate_exp = false;
        validation.required_spec_claims = HashSet::new();

        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn issue(
        &self,
        identity_id: IdentityId,
        handle: HandleName,
        roles: Vec<RoleName>,
        permissions: Vec<PermissionName>,
        session_id: SessionId,
        now: DateTime<Utc>,
    ) -> Result<IssuedAccessToken, TokenError> {
        let expires_at = now + self.ttl;
        let claims = AccessClaims {
            sub: identity_id,
            handle,
            roles,
            permissions,
            sid: session_id,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| TokenError::Signing(e.to_string()))?;

        Ok(IssuedAccessToken {
            token,
            claims,
            expires_at,
        })
    }

    /// Signature + expiry check only; no datastore round-trip.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<AccessClaims, TokenError> {
        let data = decode::<AccessClaims>(token, &self.decoding_key, &self.validation).map_err(
            |e| match e.kind() {
                ErrorKind::InvalidSignature => TokenError::InvalidSignature,
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Malformed,
            },
        )?;

        validate_claims(&data.claims, now)?;
        Ok(data.claims)
    }
}

/// Freshly generated opaque token. The plaintext leaves the process exactly once.
pub struct OpaqueToken {
    pub plaintext: String,
    pub hash: String,
}

impl OpaqueToken {
    pub fn generate() -> Self {
        let mut bytes = [0u8; OPAQUE_TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        let plaintext = URL_SAFE_NO_PAD.encode(bytes);
        let hash = hash_token(&plaintext);
        Self { plaintext, hash }
    }
}

impl core::fmt::Debug for OpaqueToken {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OpaqueToken")
            .field("fingerprint", &token_fingerprint(&self.plaintext))
            .finish_non_exhaustive()
    }
}

/// One-way digest used for persisted refresh tokens and session bindings.
pub fn hash_token(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

/// Short, log-safe identifier for a token.
pub fn token_fingerprint(token: &str) -> String {
    hash_token(token).chars().take(12).collect()
}
