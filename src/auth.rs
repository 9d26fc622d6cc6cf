//! Bearer-token authentication for write routes.
//!
//! Tokens are provisioned out of band (`API_AUTH_TOKENS`) and compared as
//! opaque strings in constant time. With no tokens configured the middleware
//! lets every request through.

use crate::error::{DbError, DbResult};
use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::collections::HashSet;
use std::sync::Arc;
use subtle::{Choice, ConstantTimeEq};
use tracing::warn;

/// Accepted bearer tokens.
#[derive(Clone)]
pub struct AuthConfig {
    enabled: bool,
    tokens: HashSet<String>,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("enabled", &self.enabled)
            .field("token_count", &self.tokens.len())
            .finish()
    }
}

impl AuthConfig {
    /// Create a new AuthConfig from a list of tokens.
    ///
    /// An empty list disables authentication; a blank entry is rejected.
    pub fn from_tokens(tokens: Vec<String>) -> Result<Self, String> {
        let mut valid_tokens = HashSet::new();
        for token in tokens {
            let trimmed = token.trim().to_string();
            if trimmed.is_empty() {
                return Err("Empty token value in API_AUTH_TOKENS".to_string());
            }
            valid_tokens.insert(trimmed);
        }
        let enabled = !valid_tokens.is_empty();
        Ok(Self {
            enabled,
            tokens: valid_tokens,
        })
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            tokens: HashSet::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }

    /// Check a request's `Authorization` header. Always passes when disabled.
    pub fn authorize(&self, headers: &HeaderMap) -> DbResult<()> {
        if !self.enabled {
            return Ok(());
        }
        let token = bearer_token(headers)?;
        if self.accepts(token) {
            Ok(())
        } else {
            Err(DbError::unauthorized(
                format!("Unknown Bearer token {}", mask_token(token)),
                "Use one of the tokens configured in API_AUTH_TOKENS",
            ))
        }
    }

    /// Compares against every token so timing does not reveal which matched.
    fn accepts(&self, provided: &str) -> bool {
        let matched = self.tokens.iter().fold(Choice::from(0), |found, expected| {
            found | expected.as_bytes().ct_eq(provided.as_bytes())
        });
        matched.into()
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Reject write requests whose bearer token is missing or unknown.
pub async fn auth_middleware(
    State(auth_config): State<Arc<AuthConfig>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let verdict = auth_config.authorize(request.headers());
    match verdict {
        Ok(()) => next.run(request).await,
        Err(err) => {
            warn!(path = %request.uri().path(), error = %err, "Authentication failed");
            err.into_response()
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> DbResult<&str> {
    let value = headers.get(header::AUTHORIZATION).ok_or_else(|| {
        DbError::unauthorized(
            "Missing Bearer token in Authorization header",
            "Send 'Authorization: Bearer <token>'",
        )
    })?;

    let malformed = || {
        DbError::unauthorized(
            "Malformed Authorization header",
            "Send 'Authorization: Bearer <token>'",
        )
    };
    let token = value
        .to_str()
        .map_err(|_| malformed())?
        .strip_prefix("Bearer ")
        .ok_or_else(malformed)?
        .trim();

    if token.is_empty() {
        return Err(malformed());
    }
    Ok(token)
}

fn mask_token(token: &str) -> String {
    match token.char_indices().nth(3) {
        Some((idx, _)) => format!("{}***", &token[..idx]),
        None => "***".to_string(),
    }
}
