//! Identity Resolution
//!
//! Connections authenticate with a session token. The [`IdentityStore`] trait
//! turns that token into a stable [`Identity`] and answers liveness checks
//! before privileged actions. The server never issues tokens.
//!
//! [`JwtIdentityStore`] validates JWTs from an external provider.
//! [`GuestIdentityStore`] accepts any non-empty token and exists for local
//! play when no provider is configured.

use jsonwebtoken::{decode, Algorithm, DecodingKey, TokenData, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::debug;

use crate::game::state::PlayerId;
use crate::network::connection::Identity;
use crate::network::protocol::{ErrorCode, ServerMessage};

const PLAYER_ID_DOMAIN: &[u8] = b"paddle-arena-player:";

/// Authentication configuration.
#[derive(Clone, Debug, Default)]
pub struct AuthConfig {
    /// Expected issuer claim ("iss"). If None, any issuer accepted.
    pub issuer: Option<String>,
    /// Expected audience claim ("aud"). If None, any audience accepted.
    pub audience: Option<String>,
    /// RS256 public key in PEM format.
    pub public_key_pem: Option<String>,
    /// HS256 secret.
    pub secret: Option<String>,
    /// Skip expiry validation (testing only).
    pub skip_expiry: bool,
}

impl AuthConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            issuer: std::env::var("AUTH_ISSUER").ok(),
            audience: std::env::var("AUTH_AUDIENCE").ok(),
            public_key_pem: std::env::var("AUTH_PUBLIC_KEY_PEM").ok(),
            secret: std::env::var("AUTH_SECRET").ok(),
            skip_expiry: std::env::var("AUTH_SKIP_EXPIRY")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        }
    }

    /// Check if a verification key is configured.
    pub fn is_configured(&self) -> bool {
        self.public_key_pem.is_some() || self.secret.is_some()
    }
}

/// Claims read from a session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject, the provider's user id.
    pub sub: String,
    /// Display name, when the provider supplies one.
    #[serde(default)]
    pub name: Option<String>,
    /// Expiry (Unix seconds).
    #[serde(default)]
    pub exp: u64,
    /// Issued at.
    #[serde(default)]
    pub iat: u64,
    /// Issuer.
    #[serde(default)]
    pub iss: Option<String>,
    /// Audience.
    #[serde(default)]
    pub aud: Option<serde_json::Value>,
}

impl TokenClaims {
    /// Stable player id for the subject.
    pub fn player_id(&self) -> PlayerId {
        player_id_for_subject(&self.sub)
    }

    /// Display name, or a name derived from the player id.
    pub fn display_name(&self) -> String {
        match self.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => format!("player-{}", self.player_id().short()),
        }
    }
}

/// Hash a subject into a 16-byte player id.
pub fn player_id_for_subject(subject: &str) -> PlayerId {
    let mut hasher = Sha256::new();
    hasher.update(PLAYER_ID_DOMAIN);
    hasher.update(subject.as_bytes());
    let hash = hasher.finalize();

    let mut id = [0u8; 16];
    id.copy_from_slice(&hash[..16]);
    PlayerId::new(id)
}

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No verification key configured.
    #[error("authentication not configured")]
    NotConfigured,
    /// Token format is invalid.
    #[error("invalid token format")]
    InvalidFormat,
    /// Signature verification failed.
    #[error("invalid signature")]
    InvalidSignature,
    /// Token has expired.
    #[error("token expired")]
    Expired,
    /// Issuer mismatch.
    #[error("invalid issuer")]
    InvalidIssuer,
    /// Audience mismatch.
    #[error("invalid audience")]
    InvalidAudience,
    /// Required claim is missing.
    #[error("missing required claim: {0}")]
    MissingClaim(String),
    /// JWT decoding error.
    #[error("decode error: {0}")]
    DecodeError(String),
}

impl AuthError {
    /// Rejection sent to the client.
    pub fn to_message(&self) -> ServerMessage {
        match self {
            AuthError::Expired => ServerMessage::SessionExpired { reason: self.to_string() },
            other => ServerMessage::error(ErrorCode::AuthFailed, other.to_string()),
        }
    }
}

/// Validate a JWT and extract claims.
pub fn validate_token(token: &str, config: &AuthConfig) -> Result<TokenClaims, AuthError> {
    if !config.is_configured() {
        return Err(AuthError::NotConfigured);
    }

    let algorithm = if config.public_key_pem.is_some() {
        Algorithm::RS256
    } else {
        Algorithm::HS256
    };

    let mut validation = Validation::new(algorithm);
    validation.required_spec_claims = std::collections::HashSet::new();

    if let Some(ref issuer) = config.issuer {
        validation.set_issuer(&[issuer]);
    }

    if let Some(ref audience) = config.audience {
        validation.set_audience(&[audience]);
    } else {
        validation.validate_aud = false;
    }

    if config.skip_expiry {
        validation.validate_exp = false;
    }

    let token_data: TokenData<TokenClaims> = if let Some(ref pem) = config.public_key_pem {
        let key = DecodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|e| AuthError::DecodeError(format!("invalid public key: {}", e)))?;
        decode(token, &key, &validation).map_err(map_jwt_error)?
    } else if let Some(ref secret) = config.secret {
        let key = DecodingKey::from_secret(secret.as_bytes());
        decode(token, &key, &validation).map_err(map_jwt_error)?
    } else {
        return Err(AuthError::NotConfigured);
    };

    let claims = token_data.claims;

    if claims.sub.is_empty() {
        return Err(AuthError::MissingClaim("sub".into()));
    }

    // The library skips exp when leeway allows it; enforce it exactly.
    if !config.skip_expiry && claims.exp > 0 && unix_now() > claims.exp {
        return Err(AuthError::Expired);
    }

    Ok(claims)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn map_jwt_error(err: jsonwebtoken::errors::Error) -> AuthError {
    use jsonwebtoken::errors::ErrorKind;
    match err.kind() {
        ErrorKind::ExpiredSignature => AuthError::Expired,
        ErrorKind::InvalidSignature => AuthError::InvalidSignature,
        ErrorKind::InvalidIssuer => AuthError::InvalidIssuer,
        ErrorKind::InvalidAudience => AuthError::InvalidAudience,
        ErrorKind::InvalidToken | ErrorKind::Base64(_) => AuthError::InvalidFormat,
        _ => AuthError::DecodeError(err.to_string()),
    }
}

// =============================================================================
// IDENTITY STORES
// =============================================================================

/// Maps session tokens to identities.
pub trait IdentityStore: Send + Sync {
    /// Resolve a token.
    fn resolve(&self, token: &str) -> Result<Identity, AuthError>;

    /// Whether a previously resolved identity is still valid.
    fn is_live(&self, identity: &Identity) -> bool;
}

/// JWT-backed identity store.
#[derive(Clone, Debug)]
pub struct JwtIdentityStore {
    config: AuthConfig,
}

impl JwtIdentityStore {
    /// Store using the given verification config.
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }
}

impl IdentityStore for JwtIdentityStore {
    fn resolve(&self, token: &str) -> Result<Identity, AuthError> {
        let claims = validate_token(token, &self.config)?;
        Ok(Identity {
            player_id: claims.player_id(),
            name: claims.display_name(),
            token: token.to_string(),
        })
    }

    fn is_live(&self, identity: &Identity) -> bool {
        match validate_token(&identity.token, &self.config) {
            Ok(claims) => claims.player_id() == identity.player_id,
            Err(e) => {
                debug!(player = %identity.player_id.short(), error = %e, "session no longer live");
                false
            }
        }
    }
}

/// Accepts any non-empty token as a guest.
///
/// The token is the subject; `name:subject` sets a display name.
#[derive(Clone, Copy, Debug, Default)]
pub struct GuestIdentityStore;

impl IdentityStore for GuestIdentityStore {
    fn resolve(&self, token: &str) -> Result<Identity, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::MissingClaim("sub".into()));
        }
        let (name, subject) = match token.split_once(':') {
            Some((name, subject)) if !name.is_empty() && !subject.is_empty() => (Some(name), subject),
            _ => (None, token),
        };
        let player_id = player_id_for_subject(subject);
        Ok(Identity {
            player_id,
            name: name.map(str::to_string).unwrap_or_else(|| format!("guest-{}", player_id.short())),
            token: token.to_string(),
        })
    }

    fn is_live(&self, identity: &Identity) -> bool {
        !identity.token.is_empty()
    }
}

// =============================================================================
// TESTS
// =============================================================================
