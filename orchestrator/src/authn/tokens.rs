//! Scoped token service
//!
//! Every principal kind (user, service, in-flight deployment) is authenticated
//! through the same signed token format. The `type` discriminant in the claims
//! keeps their capabilities apart: a token is only ever resolved as the kind it
//! was issued for.

use std::str::FromStr;

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;

/// Default lifetime of user and service tokens
pub const DEFAULT_TOKEN_TTL_MINUTES: i64 = 15;

/// Lifetime of the token handed to a deploy task
pub const DEPLOYMENT_TOKEN_TTL_MINUTES: i64 = 30;

/// Kind of principal a token was issued for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    User,
    Service,
    Deployment,
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TokenKind::User => "user",
            TokenKind::Service => "service",
            TokenKind::Deployment => "deployment",
        };
        f.write_str(s)
    }
}

/// The principal a token identifies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Principal {
    User {
        user: String,
    },
    Service {
        service: String,
        /// Label recorded as the deployment origin
        #[serde(default, skip_serializing_if = "Option::is_none")]
        origin: Option<String>,
        /// Label recorded as the deployment initiator
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user: Option<String>,
    },
    Deployment {
        deployment: i64,
    },
}

impl Principal {
    pub fn user(name: impl Into<String>) -> Self {
        Principal::User { user: name.into() }
    }

    pub fn service(name: impl Into<String>) -> Self {
        Principal::Service {
            service: name.into(),
            origin: None,
            user: None,
        }
    }

    pub fn deployment(id: i64) -> Self {
        Principal::Deployment { deployment: id }
    }

    pub fn kind(&self) -> TokenKind {
        match self {
            Principal::User { .. } => TokenKind::User,
            Principal::Service { .. } => TokenKind::Service,
            Principal::Deployment { .. } => TokenKind::Deployment,
        }
    }
}

/// Token claims: a principal plus an absolute expiry (unix seconds)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(flatten)]
    pub principal: Principal,
    pub exp: i64,
}

/// Issues and verifies signed tokens
pub struct TokenService {
    secret: SecretString,
    algorithm: Algorithm,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    /// Create a token service from a secret and an HMAC algorithm name
    pub fn new(secret: SecretString, algorithm: &str) -> Result<Self, AppError> {
        if secret.expose_secret().is_empty() {
            return Err(AppError::ConfigError("secret key must not be empty".to_string()));
        }

        let algorithm = Algorithm::from_str(algorithm)
            .map_err(|e| AppError::ConfigError(format!("Unknown signing algorithm {}: {}", algorithm, e)))?;
        if !matches!(algorithm, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
            return Err(AppError::ConfigError(format!(
                "Signing algorithm {:?} is not supported, use an HMAC algorithm",
                algorithm
            )));
        }

        Ok(Self { secret, algorithm })
    }

    /// Sign `principal` with an expiry `ttl` from now
    pub fn issue(&self, principal: Principal, ttl: Duration) -> Result<String, AppError> {
        let claims = Claims {
            principal,
            exp: (Utc::now() + ttl).timestamp(),
        };

        encode(
            &Header::new(self.algorithm),
            &claims,
            &EncodingKey::from_secret(self.secret.expose_secret().as_bytes()),
        )
        .map_err(|e| AppError::Internal(format!("Failed to sign token: {}", e)))
    }

    /// Issue a token with the default lifetime for its kind
    pub fn issue_default(&self, principal: Principal) -> Result<String, AppError> {
        let ttl = match principal.kind() {
            TokenKind::User | TokenKind::Service => Duration::minutes(DEFAULT_TOKEN_TTL_MINUTES),
            TokenKind::Deployment => Duration::minutes(DEPLOYMENT_TOKEN_TTL_MINUTES),
        };
        self.issue(principal, ttl)
    }

    /// Verify signature and expiry, then check the token kind
    pub fn resolve(&self, token: &str, expected: TokenKind) -> Result<Claims, AppError> {
        let mut validation = Validation::new(self.algorithm);
        validation.leeway = 0;

        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.expose_secret().as_bytes()),
            &validation,
        )
        .map_err(|e| AppError::InvalidToken(e.to_string()))?;

        let found = data.claims.principal.kind();
        if found != expected {
            return Err(AppError::WrongTokenType { expected, found });
        }

        Ok(data.claims)
    }
}
