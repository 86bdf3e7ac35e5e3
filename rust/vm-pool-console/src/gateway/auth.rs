//! Authentication middleware for bearer tokens and proxy-supplied users.
//!
//! The middleware resolves the acting user once per request and stores an
//! [`AuthenticatedUser`] in the request extensions. Handlers take it with
//! `Extension<AuthenticatedUser>`.

use axum::{
    Json,
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

#[cfg(feature = "gateway")]
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};

use crate::config::GatewayConfig;

/// Header carrying the login of a user already authenticated by a proxy.
pub const REMOTE_USER_HEADER: &str = "x-remote-user";

/// Authentication error response.
#[derive(Debug, Serialize)]
pub struct AuthError {
    pub error: String,
    pub message: String,
}

impl AuthError {
    fn new(error: &str, message: impl Into<String>) -> Self {
        Self {
            error: error.to_string(),
            message: message.into(),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (StatusCode::UNAUTHORIZED, Json(self)).into_response()
    }
}

/// JWT claims structure.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user's login.
    pub sub: String,
    /// Expiration time (Unix timestamp).
    pub exp: i64,
    /// Issued at (Unix timestamp).
    pub iat: i64,
}

/// The user on whose behalf a request runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    /// Login id, matched against permission grants.
    pub uid: String,
    pub auth_method: AuthMethod,
}

/// How the user was identified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    /// Signed bearer token.
    Jwt,
    /// `X-Remote-User` header from a trusted proxy.
    RemoteUser,
}

/// Generate a JWT token.
#[cfg(feature = "gateway")]
pub fn generate_jwt(uid: &str, secret: &str, expiry_secs: i64) -> anyhow::Result<String> {
    let now = chrono::Utc::now().timestamp();
    let claims = Claims {
        sub: uid.to_string(),
        exp: now + expiry_secs,
        iat: now,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

/// Validate a JWT token.
#[cfg(feature = "gateway")]
pub fn validate_jwt(token: &str, secret: &str) -> anyhow::Result<Claims> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;

    Ok(token_data.claims)
}

/// Stub for non-gateway builds.
#[cfg(not(feature = "gateway"))]
pub fn generate_jwt(_uid: &str, _secret: &str, _expiry_secs: i64) -> anyhow::Result<String> {
    Err(anyhow::anyhow!("JWT support requires 'gateway' feature"))
}

#[cfg(not(feature = "gateway"))]
pub fn validate_jwt(_token: &str, _secret: &str) -> anyhow::Result<Claims> {
    Err(anyhow::anyhow!("JWT support requires 'gateway' feature"))
}

/// Identify the user behind a request from its headers.
///
/// A bearer token is tried first; the remote-user header is only consulted
/// when the gateway trusts it.
pub fn authenticate(headers: &HeaderMap, config: &GatewayConfig) -> Result<AuthenticatedUser, AuthError> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));

    if let Some(token) = bearer {
        let secret = config
            .jwt_secret
            .as_deref()
            .filter(|_| config.jwt_enabled())
            .ok_or_else(|| AuthError::new("configuration_error", "Bearer tokens are not accepted by this console"))?;

        let claims = validate_jwt(token.trim(), secret)
            .map_err(|e| AuthError::new("invalid_token", format!("JWT validation failed: {e}")))?;

        if claims.sub.trim().is_empty() {
            return Err(AuthError::new("invalid_token", "Token subject is empty"));
        }

        return Ok(AuthenticatedUser {
            uid: claims.sub,
            auth_method: AuthMethod::Jwt,
        });
    }

    if config.trust_remote_user {
        let remote = headers
            .get(REMOTE_USER_HEADER)
            .and_then(|h| h.to_str().ok())
            .map(str::trim)
            .filter(|uid| !uid.is_empty());
        if let Some(uid) = remote {
            return Ok(AuthenticatedUser {
                uid: uid.to_string(),
                auth_method: AuthMethod::RemoteUser,
            });
        }
    }

    Err(AuthError::new("missing_auth", "Authentication is required"))
}

/// Authentication middleware.
pub async fn auth_middleware(
    State(state): State<crate::AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AuthError> {
    // Skip auth for health endpoints
    let path = req.uri().path();
    if path == "/health" || path == "/ready" {
        return Ok(next.run(req).await);
    }

    let user = authenticate(req.headers(), &state.config.gateway).inspect_err(|e| {
        tracing::debug!(path = %req.uri().path(), error = %e.error, "Request rejected");
    })?;

    req.extensions_mut().insert(user);

    Ok(next.run(req).await)
}
