//! Compact signed tokens (HS256 JWS) for access and refresh credentials.
//!
//! Access and refresh tokens are signed with different secrets, so a token
//! minted for one purpose never verifies for the other.

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{SessionId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenPurpose {
    Access,
    Refresh,
}

/// Caller-supplied part of the token body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPayload {
    pub sub: UserId,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<SessionId>,
    pub jti: String,
}

impl TokenPayload {
    pub fn new(sub: UserId, roles: Vec<String>, sid: Option<SessionId>) -> Self {
        Self {
            sub,
            roles,
            sid,
            jti: Uuid::new_v4().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(flatten)]
    pub payload: TokenPayload,
    pub iat: i64, // issued at
    pub exp: i64, // expiration time
}

impl Claims {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::<Utc>::from_timestamp(self.exp, 0)
    }

    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        DateTime::<Utc>::from_timestamp(self.iat, 0)
    }
}

/// Outcome of [`TokenCodec::verify`]. Never an error: bad input is `Invalid`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenVerification {
    Valid(Claims),
    Invalid,
    Expired,
}

impl TokenVerification {
    pub fn into_claims(self) -> Option<Claims> {
        match self {
            TokenVerification::Valid(claims) => Some(claims),
            _ => None,
        }
    }
}

#[derive(Clone)]
struct Keys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl Keys {
    fn from_secret(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }
}

#[derive(Clone)]
pub struct TokenCodec {
    access: Keys,
    refresh: Keys,
    validation: Validation,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec").finish_non_exhaustive()
    }
}

impl TokenCodec {
    pub fn new(access_secret: &str, refresh_secret: &str) -> Self {
        // Expiry is checked against the caller's clock after the signature,
        // so an expired-but-authentic token is distinguishable from a forged one.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        Self {
            access: Keys::from_secret(access_secret),
            refresh: Keys::from_secret(refresh_secret),
            validation,
        }
    }

    fn keys(&self, purpose: TokenPurpose) -> &Keys {
        match purpose {
            TokenPurpose::Access => &self.access,
            TokenPurpose::Refresh => &self.refresh,
        }
    }

    pub fn sign(
        &self,
        payload: &TokenPayload,
        purpose: TokenPurpose,
        ttl_seconds: i64,
    ) -> anyhow::Result<String> {
        self.sign_at(payload, purpose, ttl_seconds, Utc::now())
    }

    pub fn sign_at(
        &self,
        payload: &TokenPayload,
        purpose: TokenPurpose,
        ttl_seconds: i64,
        now: DateTime<Utc>,
    ) -> anyhow::Result<String> {
        let iat = now.timestamp();
        let claims = Claims {
            payload: payload.clone(),
            iat,
            exp: iat + ttl_seconds,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &self.keys(purpose).encoding,
        )?;
        Ok(token)
    }

    pub fn verify(&self, token: &str, purpose: TokenPurpose) -> TokenVerification {
        self.verify_at(token, purpose, Utc::now())
    }

    pub fn verify_at(
        &self,
        token: &str,
        purpose: TokenPurpose,
        now: DateTime<Utc>,
    ) -> TokenVerification {
        let mut segments = 0;
        for segment in token.split('.') {
            if segment.is_empty() {
                return TokenVerification::Invalid;
            }
            segments += 1;
        }
        if segments != 3 {
            return TokenVerification::Invalid;
        }

        // jsonwebtoken compares HMAC signatures in constant time.
        match decode::<Claims>(token, &self.keys(purpose).decoding, &self.validation) {
            Ok(data) if now.timestamp() > data.claims.exp => TokenVerification::Expired,
            Ok(data) => TokenVerification::Valid(data.claims),
            Err(err) => {
                tracing::trace!(error = %err, ?purpose, "Token failed verification");
                TokenVerification::Invalid
            }
        }
    }
}
