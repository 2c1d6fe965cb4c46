//! Password reset completion.
//!
//! Consumes a `password_reset` code and replaces the stored hash in the
//! same transaction, mirroring the registration flow's re-validation.

use anyhow::Context;
use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use sqlx::PgPool;
use std::sync::Arc;

use super::error::{AuthFlowError, ErrorBody};
use super::otp::missing_payload;
use super::password::hash_password;
use super::phone::normalize_phone;
use super::rate_limit::{RateLimitAction, client_or_unknown};
use super::state::AuthState;
use super::storage;
use super::types::{OtpPurpose, SetPasswordRequest};
use super::utils::{extract_client_ip, valid_password};

#[utoipa::path(
    post,
    path = "/v1/auth/set-password",
    request_body = SetPasswordRequest,
    responses(
        (status = 204, description = "Password replaced"),
        (status = 400, description = "Invalid input or invalid/expired code", body = ErrorBody),
        (status = 404, description = "Unknown account", body = ErrorBody),
        (status = 429, description = "Rate limited", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn set_password(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<SetPasswordRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return missing_payload();
    };

    let client = client_or_unknown(extract_client_ip(&headers));
    let decision = auth_state
        .rate_limiter()
        .allow(RateLimitAction::SetPassword, &client)
        .await;
    if !decision.allowed {
        return AuthFlowError::RateLimited {
            retry_after: decision.retry_after,
        }
        .into_response();
    }

    match set_password_flow(&pool, &request).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => err.into_response(),
    }
}

async fn set_password_flow(
    pool: &PgPool,
    request: &SetPasswordRequest,
) -> Result<(), AuthFlowError> {
    let phone = normalize_phone(&request.phone).ok_or(AuthFlowError::InvalidPhoneFormat)?;

    if !valid_password(&request.password) {
        return Err(AuthFlowError::Validation {
            field: "password",
            reason: "must be at least eight characters with a letter and a digit",
        });
    }

    let user = storage::lookup_user_by_phone(pool, &phone)
        .await?
        .ok_or(AuthFlowError::NotFound)?;

    let password_hash = hash_password(&request.password)?;

    let mut tx = pool.begin().await.context("begin set-password transaction")?;

    let code_id = storage::find_valid_code(
        &mut tx,
        &phone,
        request.code.trim(),
        OtpPurpose::PasswordReset,
    )
    .await?
    .ok_or(AuthFlowError::InvalidOrExpiredCode)?;

    storage::mark_code_consumed_tx(&mut tx, code_id).await?;

    storage::set_password_hash_tx(&mut tx, user.id, &password_hash).await?;

    tx.commit().await.context("commit set-password transaction")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::rate_limit::RateLimiter;
    use super::super::sms::SmsSender;
    use super::super::state::AuthConfig;
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

    #[tokio::test]
    async fn set_password_rejects_weak_password_before_storage() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = set_password(
            HeaderMap::new(),
            Extension(pool),
            Extension(auth_state()),
            Some(Json(SetPasswordRequest {
                phone: "09120000000".to_string(),
                code: "123456".to_string(),
                password: "short".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn set_password_missing_payload() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = set_password(HeaderMap::new(), Extension(pool), Extension(auth_state()), None)
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }
}
