//! Registration completion: code re-validation, identity creation, and an
//! immediate session.

use anyhow::Context;
use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    response::IntoResponse,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use super::error::{AuthFlowError, ErrorBody};
use super::otp::missing_payload;
use super::password::hash_password;
use super::phone::normalize_phone;
use super::rate_limit::{RateLimitAction, client_or_unknown};
use super::session::{identity_response, mint_session, now_unix, session_response};
use super::state::AuthState;
use super::storage::{self, RegistrationOutcome};
use super::types::{AuthenticatedResponse, RegisterRequest};
use super::utils::{extract_client_ip, valid_name, valid_password};

/// Complete a signup: the code is re-checked here rather than trusting an
/// earlier verify call, because verification and registration may be
/// separated in time and the code must not have been consumed elsewhere.
#[utoipa::path(
    post,
    path = "/v1/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created and logged in", body = AuthenticatedResponse),
        (status = 400, description = "Invalid input or invalid/expired code", body = ErrorBody),
        (status = 409, description = "Account already exists", body = ErrorBody),
        (status = 429, description = "Rate limited", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn register(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<RegisterRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return missing_payload();
    };

    let client = client_or_unknown(extract_client_ip(&headers));
    let decision = auth_state
        .rate_limiter()
        .allow(RateLimitAction::Register, &client)
        .await;
    if !decision.allowed {
        return AuthFlowError::RateLimited {
            retry_after: decision.retry_after,
        }
        .into_response();
    }

    match register_flow(&pool, &auth_state, &request).await {
        Ok((response, cookie)) => {
            let mut response_headers = HeaderMap::new();
            response_headers.insert(SET_COOKIE, cookie);
            (StatusCode::CREATED, response_headers, Json(response)).into_response()
        }
        Err(err) => err.into_response(),
    }
}

async fn register_flow(
    pool: &PgPool,
    state: &AuthState,
    request: &RegisterRequest,
) -> Result<(AuthenticatedResponse, axum::http::HeaderValue), AuthFlowError> {
    let phone = normalize_phone(&request.phone).ok_or(AuthFlowError::InvalidPhoneFormat)?;

    let name = request.name.trim();
    if !valid_name(name) {
        return Err(AuthFlowError::Validation {
            field: "name",
            reason: "must be at least two characters",
        });
    }
    if !valid_password(&request.password) {
        return Err(AuthFlowError::Validation {
            field: "password",
            reason: "must be at least eight characters with a letter and a digit",
        });
    }

    let password_hash = hash_password(&request.password)?;

    // Code consumption and identity creation commit or roll back together:
    // a conflict on phone releases the code untouched.
    let mut tx = pool.begin().await.context("begin registration transaction")?;

    let code_id = storage::find_valid_code(&mut tx, &phone, request.code.trim(), request.purpose)
        .await?
        .ok_or(AuthFlowError::InvalidOrExpiredCode)?;

    storage::mark_code_consumed_tx(&mut tx, code_id).await?;

    let user = match storage::insert_user_tx(&mut tx, &phone, name, &password_hash).await? {
        RegistrationOutcome::Created(user) => user,
        RegistrationOutcome::Conflict => {
            let _ = tx.rollback().await;
            return Err(AuthFlowError::AccountAlreadyExists);
        }
    };

    tx.commit().await.context("commit registration transaction")?;

    // Observer notification is best-effort; registration already succeeded.
    if let Err(err) = storage::enqueue_signup_notification(pool, user.id, &phone, name).await {
        error!("failed to enqueue signup notification: {err:#}");
    }

    let minted = mint_session(state, &user, now_unix())?;
    let response = AuthenticatedResponse {
        identity: identity_response(&user),
        session: session_response(&minted),
    };
    Ok((response, minted.cookie))
}
