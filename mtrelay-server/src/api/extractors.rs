//! Custom Axum extractors for request authentication.
//!
//! Provides:
//! - `ControlToken`: checks the `X-Settlement-Token` header against the
//!   configured argon2 hash (open when no token is configured).
//! - `FollowerAuth`: verifies the `Mtrelay-Follower` / `Mtrelay-Signature`
//!   pair against the follower's registered shared secrets.
//!
//! All signature operations are delegated to [`mtrelay_sdk::signature`].

use axum::{
    Json,
    extract::FromRequestParts,
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
};
use mtrelay_sdk::objects::ErrorResponse;
use mtrelay_sdk::signature::{
    self, CONTROL_TOKEN_HEADER, FOLLOWER_HEADER, SIGNATURE_HEADER, SignatureError,
};

use crate::state::AppState;

fn reject(status: StatusCode, message: &str) -> Response {
    (status, Json(ErrorResponse::new(message))).into_response()
}

// ---------------------------------------------------------------------------
// ControlToken
// ---------------------------------------------------------------------------

/// Guard for mutating control operations.
pub struct ControlToken;

#[derive(Debug)]
pub enum ControlTokenError {
    InvalidHeader,
    Unauthorized,
}

impl IntoResponse for ControlTokenError {
    fn into_response(self) -> Response {
        match self {
            ControlTokenError::InvalidHeader => {
                reject(StatusCode::BAD_REQUEST, "invalid X-Settlement-Token header")
            }
            ControlTokenError::Unauthorized => {
                reject(StatusCode::UNAUTHORIZED, "invalid or missing control token")
            }
        }
    }
}

impl FromRequestParts<AppState> for ControlToken {
    type Rejection = ControlTokenError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let presented = parts
            .headers
            .get(CONTROL_TOKEN_HEADER)
            .map(|value| value.to_str().map_err(|_| ControlTokenError::InvalidHeader))
            .transpose()?;

        let admin = state.config.admin.read().await;
        if admin.authorize(presented) {
            Ok(ControlToken)
        } else {
            tracing::warn!("Rejected control request with bad token");
            Err(ControlTokenError::Unauthorized)
        }
    }
}

// ---------------------------------------------------------------------------
// FollowerAuth
// ---------------------------------------------------------------------------

/// An authenticated follower.
///
/// # Header format
///
/// ```text
/// Mtrelay-Follower:  {follower_pubkey}
/// Mtrelay-Signature: {unix_timestamp}.{base64_signature}
/// ```
///
/// The signature is `HMAC-SHA256("{follower_pubkey}.{timestamp}", shared_secret)`
/// for any of the follower's subscriptions.
pub struct FollowerAuth(pub String);

#[derive(Debug)]
pub enum FollowerAuthError {
    FanoutDisabled,
    MissingFollower,
    MissingSignature,
    InvalidHeader,
    InvalidBase64,
    SignatureMismatch,
    Expired,
    Storage,
}

impl From<SignatureError> for FollowerAuthError {
    fn from(err: SignatureError) -> Self {
        match err {
            SignatureError::InvalidFormat => Self::InvalidHeader,
            SignatureError::InvalidBase64 => Self::InvalidBase64,
            SignatureError::SignatureMismatch => Self::SignatureMismatch,
            SignatureError::Expired => Self::Expired,
        }
    }
}

impl IntoResponse for FollowerAuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            FollowerAuthError::FanoutDisabled => (StatusCode::NOT_FOUND, "fanout is disabled"),
            FollowerAuthError::MissingFollower => {
                (StatusCode::UNAUTHORIZED, "missing Mtrelay-Follower header")
            }
            FollowerAuthError::MissingSignature => {
                (StatusCode::UNAUTHORIZED, "missing Mtrelay-Signature header")
            }
            FollowerAuthError::InvalidHeader => (StatusCode::BAD_REQUEST, "invalid header format"),
            FollowerAuthError::InvalidBase64 => {
                (StatusCode::BAD_REQUEST, "invalid signature encoding")
            }
            FollowerAuthError::SignatureMismatch => {
                (StatusCode::UNAUTHORIZED, "signature verification failed")
            }
            FollowerAuthError::Expired => (StatusCode::UNAUTHORIZED, "signature expired"),
            FollowerAuthError::Storage => {
                (StatusCode::SERVICE_UNAVAILABLE, "storage unavailable")
            }
        };
        reject(status, message)
    }
}

impl FromRequestParts<AppState> for FollowerAuth {
    type Rejection = FollowerAuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if !state.fanout_enabled {
            return Err(FollowerAuthError::FanoutDisabled);
        }
        let follower = parts
            .headers
            .get(FOLLOWER_HEADER)
            .ok_or(FollowerAuthError::MissingFollower)?
            .to_str()
            .map_err(|_| FollowerAuthError::InvalidHeader)?
            .to_owned();
        let sig_value = parts
            .headers
            .get(SIGNATURE_HEADER)
            .ok_or(FollowerAuthError::MissingSignature)?
            .to_str()
            .map_err(|_| FollowerAuthError::InvalidHeader)?;

        let (timestamp, signature_bytes) = signature::parse_signature_header(sig_value)?;

        let secrets = state
            .stores
            .registry
            .list_follower_secrets(&follower)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to load follower secrets");
                FollowerAuthError::Storage
            })?;

        let mut last_error = SignatureError::SignatureMismatch;
        for secret in &secrets {
            match signature::verify_follower(
                &follower,
                timestamp,
                &signature_bytes,
                secret.as_bytes(),
            ) {
                Ok(()) => return Ok(FollowerAuth(follower)),
                Err(e) => last_error = e,
            }
        }
        Err(last_error.into())
    }
}
