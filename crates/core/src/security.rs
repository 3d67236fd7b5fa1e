use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::account::Role;
use crate::domain::employee::EmployeeId;
use crate::errors::ApplicationError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("session token is malformed")]
    Malformed,
    #[error("session token signature mismatch")]
    BadSignature,
    #[error("session token expired")]
    Expired,
    #[error("session token could not be signed: {0}")]
    Signing(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("password hashing failed: {0}")]
pub struct PasswordError(String);

impl From<TokenError> for ApplicationError {
    fn from(error: TokenError) -> Self {
        Self::Configuration(error.to_string())
    }
}

impl From<PasswordError> for ApplicationError {
    fn from(error: PasswordError) -> Self {
        Self::Configuration(error.to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub employee_id: EmployeeId,
    pub role: Role,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct JwtClaims {
    sub: String,
    role: Role,
    iat: i64,
    exp: i64,
}

/// Argon2id with a fresh salt, encoded as a PHC string.
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|error| PasswordError(error.to_string()))
}

pub fn verify_password(password: &str, phc_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(phc_hash) else {
        return false;
    };
    Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok()
}

/// Issues and verifies HS256 bearer tokens carrying `sub`, `role` and `exp`.
#[derive(Clone)]
pub struct SessionSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl std::fmt::Debug for SessionSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSigner").field("ttl", &self.ttl).finish_non_exhaustive()
    }
}

impl SessionSigner {
    pub fn new(secret: impl AsRef<[u8]>, ttl: Duration) -> Self {
        let secret = secret.as_ref();
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn issue(
        &self,
        employee_id: &EmployeeId,
        role: Role,
        now: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        let claims = JwtClaims {
            sub: employee_id.0.clone(),
            role,
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|error| TokenError::Signing(error.to_string()))
    }

    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<SessionClaims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let data = decode::<JwtClaims>(token.trim(), &self.decoding, &validation).map_err(
            |error| match error.kind() {
                ErrorKind::InvalidSignature => TokenError::BadSignature,
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Malformed,
            },
        )?;
        let claims = data.claims;

        if claims.sub.trim().is_empty() {
            return Err(TokenError::Malformed);
        }
        if claims.exp <= now.timestamp() {
            return Err(TokenError::Expired);
        }
        let expires_at = DateTime::from_timestamp(claims.exp, 0).ok_or(TokenError::Malformed)?;

        Ok(SessionClaims { employee_id: EmployeeId(claims.sub), role: claims.role, expires_at })
    }
}
