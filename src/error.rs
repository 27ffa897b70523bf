use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::warn;

use crate::token::TokenError;

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub code: Option<&'static str>,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            code: None,
        }
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_GATEWAY,
            message: message.into(),
            code: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
            code: None,
        }
    }

    pub fn link_expired() -> Self {
        Self {
            status: StatusCode::GONE,
            message: "Link expired. Request the media again to get a fresh link.".to_string(),
            code: Some("LINK_EXPIRED"),
        }
    }

    pub fn invalid_link() -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: "Failed to decrypt link.".to_string(),
            code: Some("INVALID_LINK"),
        }
    }

    /// Maps a redemption failure to a client response.
    ///
    /// Decode and integrity failures share one response so a client cannot
    /// tell a forged token from garbage; the kind is only logged.
    pub fn from_token_error(error: &TokenError) -> Self {
        warn!(kind = error.kind(), "link redemption rejected: {error}");

        match error {
            TokenError::Expired { .. } => Self::link_expired(),
            TokenError::Decode(_) | TokenError::Integrity => Self::invalid_link(),
            TokenError::Seal(_) | TokenError::InvalidTtl => {
                Self::internal("Could not prepare download link.")
            }
        }
    }
}

impl From<TokenError> for ApiError {
    fn from(error: TokenError) -> Self {
        Self::from_token_error(&error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
            code: self.code,
        });

        (self.status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_maps_to_gone() {
        let error = ApiError::from_token_error(&TokenError::Expired { expired_at: 10 });
        assert_eq!(error.status, StatusCode::GONE);
        assert_eq!(error.code, Some("LINK_EXPIRED"));
    }

    #[test]
    fn decode_and_integrity_are_indistinguishable() {
        let decode = ApiError::from_token_error(&TokenError::Decode("bad base64".to_string()));
        let integrity = ApiError::from_token_error(&TokenError::Integrity);

        assert_eq!(decode.status, integrity.status);
        assert_eq!(decode.code, integrity.code);
        assert_eq!(decode.message, integrity.message);
        assert!(!decode.message.contains("base64"));
    }

    #[test]
    fn seal_side_failures_are_internal() {
        let error = ApiError::from(TokenError::InvalidTtl);
        assert_eq!(error.status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
