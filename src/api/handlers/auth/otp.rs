//! OTP issuance and verification endpoints.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

use super::error::{AuthFlowError, ErrorBody};
use super::phone::normalize_phone;
use super::rate_limit::{RateLimitAction, client_or_unknown};
use super::state::AuthState;
use super::storage;
use super::types::{
    IssueOtpRequest, IssueOtpResponse, OtpPurpose, VerifyOtpRequest, VerifyOtpResponse,
};
use super::utils::{extract_client_ip, generate_otp_code};

/// Issue a verification code and hand it to the SMS capability.
#[utoipa::path(
    post,
    path = "/v1/auth/otp/issue",
    request_body = IssueOtpRequest,
    responses(
        (status = 200, description = "Code issued and delivery attempted", body = IssueOtpResponse),
        (status = 400, description = "Invalid phone", body = ErrorBody),
        (status = 404, description = "No account for password reset", body = ErrorBody),
        (status = 409, description = "Account already exists", body = ErrorBody),
        (status = 429, description = "Rate limited or resend too soon", body = ErrorBody),
        (status = 500, description = "Delivery or storage failure", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn issue_otp(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<IssueOtpRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return missing_payload();
    };

    // The rate limit gate runs before any phone parsing or storage work.
    let client = client_or_unknown(extract_client_ip(&headers));
    let decision = auth_state
        .rate_limiter()
        .allow(RateLimitAction::IssueOtp, &client)
        .await;
    if !decision.allowed {
        return AuthFlowError::RateLimited {
            retry_after: decision.retry_after,
        }
        .into_response();
    }

    match issue_flow(&pool, &auth_state, &request).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn issue_flow(
    pool: &PgPool,
    state: &AuthState,
    request: &IssueOtpRequest,
) -> Result<IssueOtpResponse, AuthFlowError> {
    let phone = normalize_phone(&request.phone).ok_or(AuthFlowError::InvalidPhoneFormat)?;

    // Purpose decides the account precondition: a signup code must not go
    // to an existing account, a reset code must.
    let existing = storage::lookup_user_by_phone(pool, &phone).await?;
    match request.purpose {
        OtpPurpose::Signup => {
            if existing.is_some() {
                return Err(AuthFlowError::AccountAlreadyExists);
            }
        }
        OtpPurpose::PasswordReset => {
            if existing.is_none() {
                return Err(AuthFlowError::NotFound);
            }
        }
    }

    let cooldown = state.config().resend_cooldown_seconds();
    if let Some(wait_seconds) =
        storage::resend_wait_seconds(pool, &phone, request.purpose, cooldown).await?
    {
        let wait_seconds = u64::try_from(wait_seconds).unwrap_or(0).max(1);
        return Err(AuthFlowError::ResendTooSoon {
            retry_after: Duration::from_secs(wait_seconds),
        });
    }

    let code = generate_otp_code();
    let ttl_seconds = state.config().otp_ttl_seconds();
    let code_id = storage::insert_otp_code(pool, &phone, request.purpose, &code, ttl_seconds).await?;

    // Delivery is synchronous with bounded retries. On final failure the
    // record is removed so nobody holds a code that never arrived.
    if let Err(err) = state.sms().deliver(&phone, &code).await {
        error!("otp delivery failed for {phone}: {err:#}");
        if let Err(cleanup_err) = storage::delete_otp_code(pool, code_id).await {
            error!("failed to roll back undelivered otp code: {cleanup_err:#}");
        }
        return Err(AuthFlowError::DeliveryFailed);
    }

    let debug_code = if state.config().otp_debug_echo() {
        Some(code)
    } else {
        None
    };

    Ok(IssueOtpResponse {
        phone,
        expires_in_seconds: ttl_seconds,
        debug_code,
    })
}

/// Verify a submitted code against the most recent outstanding one.
#[utoipa::path(
    post,
    path = "/v1/auth/otp/verify",
    request_body = VerifyOtpRequest,
    responses(
        (status = 200, description = "Code verified", body = VerifyOtpResponse),
        (status = 400, description = "Invalid input, missing/expired/mismatched code", body = ErrorBody),
        (status = 429, description = "Rate limited or attempts exhausted", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn verify_otp(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<VerifyOtpRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return missing_payload();
    };

    let client = client_or_unknown(extract_client_ip(&headers));
    let decision = auth_state
        .rate_limiter()
        .allow(RateLimitAction::VerifyOtp, &client)
        .await;
    if !decision.allowed {
        return AuthFlowError::RateLimited {
            retry_after: decision.retry_after,
        }
        .into_response();
    }

    match verify_flow(&pool, &auth_state, &request).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn verify_flow(
    pool: &PgPool,
    state: &AuthState,
    request: &VerifyOtpRequest,
) -> Result<VerifyOtpResponse, AuthFlowError> {
    let phone = normalize_phone(&request.phone).ok_or(AuthFlowError::InvalidPhoneFormat)?;
    let submitted = valid_code_shape(&request.code)?;

    let record = storage::latest_unused_code(pool, &phone, request.purpose)
        .await?
        .ok_or(AuthFlowError::NoOtpFound)?;

    // Expiry is reported before a value mismatch so users are told to
    // resend instead of "wrong code" when the code simply aged out.
    if record.expired {
        return Err(AuthFlowError::ExpiredCode);
    }

    let max_attempts = state.config().max_otp_attempts();
    if record.code != submitted {
        let attempts = storage::record_code_mismatch(pool, record.id).await?;
        let attempts_remaining = u32::try_from(max_attempts - attempts).unwrap_or(0);
        return Err(AuthFlowError::InvalidCode { attempts_remaining });
    }

    // The limit is checked on the accepting attempt: a correct code on the
    // attempt that would exceed it is rejected only if earlier mismatches
    // already exhausted the budget.
    if record.attempts >= max_attempts {
        return Err(AuthFlowError::TooManyAttempts);
    }

    // Single-use: of two racing verifications only one consumes the row.
    if !storage::consume_code(pool, record.id).await? {
        return Err(AuthFlowError::NoOtpFound);
    }

    // Successful phone re-proof clears login lockout state, if any.
    storage::clear_failed_logins(pool, &phone).await?;

    Ok(VerifyOtpResponse {
        verified: true,
        phone,
    })
}

fn valid_code_shape(code: &str) -> Result<&str, AuthFlowError> {
    let trimmed = code.trim();
    if trimmed.len() == 6 && trimmed.chars().all(|ch| ch.is_ascii_digit()) {
        Ok(trimmed)
    } else {
        Err(AuthFlowError::Validation {
            field: "code",
            reason: "must be six digits",
        })
    }
}

pub(super) fn missing_payload() -> axum::response::Response {
    AuthFlowError::Validation {
        field: "body",
        reason: "missing payload",
    }
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::super::rate_limit::RateLimiter;
    use super::super::sms::SmsSender;
    use super::super::state::{AuthConfig, AuthState};
    use super::*;
    use anyhow::Result;
    use sqlx::postgres::PgPoolOptions;

    fn auth_state() -> Arc<AuthState> {
        Arc::new(AuthState::new(
            AuthConfig::new("https://shenasa.dev".to_string()),
            secrecy::SecretString::from("test-secret-0123456789abcdef0123"),
            RateLimiter::Noop,
            SmsSender::log(),
        ))
    }

    fn lazy_pool() -> Result<PgPool> {
        Ok(PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?)
    }

    #[tokio::test]
    async fn issue_missing_payload() -> Result<()> {
        let response = issue_otp(
            HeaderMap::new(),
            Extension(lazy_pool()?),
            Extension(auth_state()),
            None,
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn issue_rejects_invalid_phone_before_storage() -> Result<()> {
        let response = issue_otp(
            HeaderMap::new(),
            Extension(lazy_pool()?),
            Extension(auth_state()),
            Some(Json(IssueOtpRequest {
                phone: "not-a-phone".to_string(),
                purpose: OtpPurpose::Signup,
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn verify_rejects_malformed_code_before_storage() -> Result<()> {
        let response = verify_otp(
            HeaderMap::new(),
            Extension(lazy_pool()?),
            Extension(auth_state()),
            Some(Json(VerifyOtpRequest {
                phone: "09120000000".to_string(),
                code: "12ab".to_string(),
                purpose: OtpPurpose::Signup,
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[test]
    fn code_shape_validation() {
        assert!(valid_code_shape("012345").is_ok());
        assert_eq!(valid_code_shape(" 012345 ").ok(), Some("012345"));
        assert!(valid_code_shape("12345").is_err());
        assert!(valid_code_shape("1234567").is_err());
        assert!(valid_code_shape("12a456").is_err());
    }
}
