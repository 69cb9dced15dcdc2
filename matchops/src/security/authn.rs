//! Bearer token authentication

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::errors::OpsError;
use crate::security::request::SecurityRequest;

/// Claims carried by marketplace access tokens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,

    /// Marketplace role: admin, contractor, vendor, subscriber, bidder
    pub role: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Issued at timestamp
    pub iat: i64,

    /// Expiration timestamp
    pub exp: i64,
}

impl Claims {
    /// Claims valid for `ttl_secs` from now
    pub fn new(sub: impl Into<String>, role: impl Into<String>, ttl_secs: i64) -> Self {
        let now = Utc::now().timestamp();
        Self {
            sub: sub.into(),
            role: role.into(),
            email: None,
            iat: now,
            exp: now + ttl_secs,
        }
    }
}

/// Token from an `Authorization: Bearer <token>` header
pub fn extract_bearer_token(req: &SecurityRequest) -> Option<&str> {
    let value = req.header("authorization")?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() {
        Some(token)
    } else {
        None
    }
}

/// HS256 signer and verifier over the shared secret
pub struct TokenVerifier {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &SecretString) -> Self {
        let key = secret.expose_secret().as_bytes();
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        Self {
            encoding: EncodingKey::from_secret(key),
            decoding: DecodingKey::from_secret(key),
            validation,
        }
    }

    /// Check signature and expiry
    pub fn verify(&self, token: &str) -> Result<Claims, String> {
        decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| format!("Invalid authentication token: {}", e))
    }

    /// Sign claims into a token
    pub fn issue(&self, claims: &Claims) -> Result<String, OpsError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| OpsError::Internal(format!("Failed to sign token: {}", e)))
    }
}
