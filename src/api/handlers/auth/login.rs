//! Password login for returning users.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    response::IntoResponse,
};
use sqlx::PgPool;
use std::sync::Arc;

use super::error::{AuthFlowError, ErrorBody};
use super::otp::missing_payload;
use super::password::verify_password;
use super::phone::normalize_phone;
use super::rate_limit::{RateLimitAction, client_or_unknown};
use super::session::{identity_response, mint_session, now_unix, session_response};
use super::state::AuthState;
use super::storage;
use super::types::{AuthenticatedResponse, LoginRequest};
use super::utils::extract_client_ip;

/// Authenticate with phone + password and mint a fresh session.
///
/// "Unknown identifier" and "wrong password" are deliberately distinct
/// responses; collapsing them is a product decision recorded in DESIGN.md.
#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in", body = AuthenticatedResponse),
        (status = 400, description = "Invalid identifier", body = ErrorBody),
        (status = 401, description = "Wrong password", body = ErrorBody),
        (status = 404, description = "Unknown identifier", body = ErrorBody),
        (status = 429, description = "Rate limited", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn login(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<LoginRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return missing_payload();
    };

    let client = client_or_unknown(extract_client_ip(&headers));
    let decision = auth_state
        .rate_limiter()
        .allow(RateLimitAction::Login, &client)
        .await;
    if !decision.allowed {
        return AuthFlowError::RateLimited {
            retry_after: decision.retry_after,
        }
        .into_response();
    }

    match login_flow(&pool, &auth_state, &request).await {
        Ok((response, cookie)) => {
            let mut response_headers = HeaderMap::new();
            response_headers.insert(SET_COOKIE, cookie);
            (StatusCode::OK, response_headers, Json(response)).into_response()
        }
        Err(err) => err.into_response(),
    }
}

async fn login_flow(
    pool: &PgPool,
    state: &AuthState,
    request: &LoginRequest,
) -> Result<(AuthenticatedResponse, axum::http::HeaderValue), AuthFlowError> {
    // The identifier goes through the same normalization as signup, so any
    // accepted spelling of the stored phone logs in.
    let phone = normalize_phone(&request.identifier).ok_or(AuthFlowError::InvalidPhoneFormat)?;

    let user = storage::lookup_user_by_phone(pool, &phone)
        .await?
        .ok_or(AuthFlowError::NotFound)?;

    let Some(password_hash) = user.password_hash.as_deref() else {
        // Account exists but never set a password (reset flow abandoned).
        return Err(AuthFlowError::InvalidCredentials);
    };

    if !verify_password(&request.password, password_hash)? {
        storage::record_failed_login(pool, user.id).await?;
        return Err(AuthFlowError::InvalidCredentials);
    }

    storage::touch_last_login(pool, user.id).await?;

    let minted = mint_session(state, &user, now_unix())?;
    let response = AuthenticatedResponse {
        identity: identity_response(&user),
        session: session_response(&minted),
    };
    Ok((response, minted.cookie))
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

    fn lazy_pool() -> Result<PgPool> {
        Ok(PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?)
    }

    #[tokio::test]
    async fn login_missing_payload() -> Result<()> {
        let response = login(
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
    async fn login_rejects_malformed_identifier_before_storage() -> Result<()> {
        let response = login(
            HeaderMap::new(),
            Extension(lazy_pool()?),
            Extension(auth_state()),
            Some(Json(LoginRequest {
                identifier: "someone@example.com".to_string(),
                password: "Passw0rd1".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }
}
