//! Typed failure taxonomy for the auth flows.
//!
//! Every operation returns one of these variants instead of letting errors
//! escape as panics or opaque strings. The HTTP binding lives here too:
//! each variant maps to a status code and a stable machine-readable code
//! string so clients can branch on `error` without parsing messages.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::time::Duration;
use tracing::error;
use utoipa::ToSchema;

#[derive(Debug, thiserror::Error)]
pub enum AuthFlowError {
    #[error("invalid phone format")]
    InvalidPhoneFormat,
    #[error("invalid {field}: {reason}")]
    Validation {
        field: &'static str,
        reason: &'static str,
    },
    #[error("resend requested too soon")]
    ResendTooSoon { retry_after: Duration },
    #[error("too many verification attempts")]
    TooManyAttempts,
    #[error("rate limited")]
    RateLimited { retry_after: Duration },
    #[error("account already exists")]
    AccountAlreadyExists,
    #[error("no verification code outstanding")]
    NoOtpFound,
    #[error("verification code expired")]
    ExpiredCode,
    #[error("verification code mismatch")]
    InvalidCode { attempts_remaining: u32 },
    #[error("invalid or expired verification code")]
    InvalidOrExpiredCode,
    #[error("code delivery failed")]
    DeliveryFailed,
    #[error("account not found")]
    NotFound,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// JSON body returned for every failed auth call.
#[derive(Serialize, ToSchema, Debug)]
pub struct ErrorBody {
    /// Stable machine-readable code, independent of the message wording.
    pub error: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts_remaining: Option<u32>,
}

impl AuthFlowError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidPhoneFormat => "invalid_phone_format",
            Self::Validation { .. } => "validation_error",
            Self::ResendTooSoon { .. } => "resend_too_soon",
            Self::TooManyAttempts => "too_many_attempts",
            Self::RateLimited { .. } => "rate_limited",
            Self::AccountAlreadyExists => "account_already_exists",
            Self::NoOtpFound => "no_otp_found",
            Self::ExpiredCode => "expired_code",
            Self::InvalidCode { .. } => "invalid_code",
            Self::InvalidOrExpiredCode => "invalid_or_expired_code",
            Self::DeliveryFailed => "delivery_failed",
            Self::NotFound => "not_found",
            Self::InvalidCredentials => "invalid_credentials",
            Self::Internal(_) => "internal_error",
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidPhoneFormat
            | Self::Validation { .. }
            | Self::NoOtpFound
            | Self::ExpiredCode
            | Self::InvalidCode { .. }
            | Self::InvalidOrExpiredCode => StatusCode::BAD_REQUEST,
            Self::ResendTooSoon { .. } | Self::TooManyAttempts | Self::RateLimited { .. } => {
                StatusCode::TOO_MANY_REQUESTS
            }
            Self::AccountAlreadyExists => StatusCode::CONFLICT,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::InvalidCredentials => StatusCode::UNAUTHORIZED,
            Self::DeliveryFailed | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn retry_after_seconds(&self) -> Option<u64> {
        match self {
            Self::ResendTooSoon { retry_after } | Self::RateLimited { retry_after } => {
                // Report at least one second so clients never retry in a hot loop.
                Some(retry_after.as_secs().max(1))
            }
            _ => None,
        }
    }
}

impl IntoResponse for AuthFlowError {
    fn into_response(self) -> Response {
        // Dependency failures keep full context server-side; the client sees
        // only the generic code.
        let message = match &self {
            Self::Internal(err) => {
                error!("auth flow failed: {err:#}");
                "Internal error".to_string()
            }
            other => other.to_string(),
        };

        let attempts_remaining = match &self {
            Self::InvalidCode { attempts_remaining } => Some(*attempts_remaining),
            _ => None,
        };

        let body = ErrorBody {
            error: self.code(),
            message,
            retry_after_seconds: self.retry_after_seconds(),
            attempts_remaining,
        };
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn codes_are_stable() {
        assert_eq!(AuthFlowError::InvalidPhoneFormat.code(), "invalid_phone_format");
        assert_eq!(AuthFlowError::NoOtpFound.code(), "no_otp_found");
        assert_eq!(AuthFlowError::ExpiredCode.code(), "expired_code");
        assert_eq!(AuthFlowError::TooManyAttempts.code(), "too_many_attempts");
        assert_eq!(
            AuthFlowError::AccountAlreadyExists.code(),
            "account_already_exists"
        );
        assert_eq!(AuthFlowError::InvalidCredentials.code(), "invalid_credentials");
    }

    #[test]
    fn statuses_follow_the_taxonomy() {
        assert_eq!(
            AuthFlowError::InvalidPhoneFormat.status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AuthFlowError::RateLimited {
                retry_after: Duration::from_secs(30)
            }
            .status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            AuthFlowError::AccountAlreadyExists.status(),
            StatusCode::CONFLICT
        );
        assert_eq!(AuthFlowError::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            AuthFlowError::InvalidCredentials.status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AuthFlowError::DeliveryFailed.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AuthFlowError::Internal(anyhow!("boom")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn retry_after_is_reported_and_clamped() {
        let err = AuthFlowError::ResendTooSoon {
            retry_after: Duration::from_secs(87),
        };
        assert_eq!(err.retry_after_seconds(), Some(87));

        let err = AuthFlowError::RateLimited {
            retry_after: Duration::from_millis(10),
        };
        assert_eq!(err.retry_after_seconds(), Some(1));

        assert_eq!(AuthFlowError::NoOtpFound.retry_after_seconds(), None);
    }
}
