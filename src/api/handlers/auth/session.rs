//! Session minting: claims assembly and the session cookie.

use anyhow::{Context, Result};
use axum::http::HeaderValue;
use chrono::Utc;
use secrecy::ExposeSecret;
use uuid::Uuid;

use crate::token::{SessionClaims, sign_hs256};

use super::state::AuthState;
use super::storage::UserRecord;
use super::types::{IdentityResponse, SessionResponse};

const SESSION_COOKIE_NAME: &str = "shenasa_session";

pub(super) struct MintedSession {
    pub(super) token: String,
    pub(super) expires_at: i64,
    pub(super) cookie: HeaderValue,
}

/// Mint a signed session credential for an identity.
///
/// Deterministic given identity, time, and secret (the `jti` aside); the
/// caller passes `now_unix` so tests control the clock.
pub(super) fn mint_session(
    state: &AuthState,
    user: &UserRecord,
    now_unix: i64,
) -> Result<MintedSession> {
    let expires_at = now_unix + state.config().session_ttl_seconds();
    let claims = SessionClaims {
        sub: user.id.to_string(),
        role: user.role.clone(),
        phone: user.phone.clone(),
        name: user.name.clone(),
        iss: state.config().session_issuer().to_string(),
        iat: now_unix,
        exp: expires_at,
        jti: Uuid::new_v4().to_string(),
    };

    let token = sign_hs256(state.session_secret().expose_secret().as_bytes(), &claims)
        .context("failed to sign session token")?;
    let cookie = session_cookie(state, &token).context("failed to build session cookie")?;

    Ok(MintedSession {
        token,
        expires_at,
        cookie,
    })
}

pub(super) fn now_unix() -> i64 {
    Utc::now().timestamp()
}

pub(super) fn identity_response(user: &UserRecord) -> IdentityResponse {
    IdentityResponse {
        id: user.id.to_string(),
        phone: user.phone.clone(),
        name: user.name.clone(),
        role: user.role.clone(),
        is_verified: user.is_verified,
    }
}

pub(super) fn session_response(minted: &MintedSession) -> SessionResponse {
    SessionResponse {
        token: minted.token.clone(),
        expires_at: minted.expires_at,
    }
}

/// Build the `Set-Cookie` value: HTTP-only, lax, lifetime matching the
/// claims, secure only when the service is reached over HTTPS.
fn session_cookie(state: &AuthState, token: &str) -> Result<HeaderValue, axum::http::header::InvalidHeaderValue> {
    let ttl_seconds = state.config().session_ttl_seconds();
    let secure = state.config().session_cookie_secure();
    let mut cookie = format!(
        "{SESSION_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={ttl_seconds}"
    );
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::rate_limit::RateLimiter;
    use crate::api::handlers::auth::sms::SmsSender;
    use crate::api::handlers::auth::state::AuthConfig;
    use crate::token::verify_hs256;
    use secrecy::SecretString;

    const TEST_SECRET: &str = "test-secret-0123456789abcdef0123";

    fn auth_state(base_url: &str) -> AuthState {
        AuthState::new(
            AuthConfig::new(base_url.to_string()),
            SecretString::from(TEST_SECRET),
            RateLimiter::Noop,
            SmsSender::log(),
        )
    }

    fn user() -> UserRecord {
        UserRecord {
            id: Uuid::nil(),
            phone: "989120000000".to_string(),
            name: "Test User".to_string(),
            password_hash: None,
            role: "user".to_string(),
            is_verified: true,
        }
    }

    #[test]
    fn minted_token_verifies_and_carries_identity_claims() -> Result<()> {
        let state = auth_state("https://shenasa.dev");
        let now = 1_700_000_000;
        let minted = mint_session(&state, &user(), now)?;

        let claims = verify_hs256(
            &minted.token,
            TEST_SECRET.as_bytes(),
            "https://shenasa.dev",
            now,
        )?;
        assert_eq!(claims.sub, Uuid::nil().to_string());
        assert_eq!(claims.phone, "989120000000");
        assert_eq!(claims.role, "user");
        assert_eq!(claims.iat, now);
        assert_eq!(claims.exp, now + 30 * 24 * 60 * 60);
        assert_eq!(minted.expires_at, claims.exp);
        Ok(())
    }

    #[test]
    fn cookie_flags_follow_scheme() -> Result<()> {
        let state = auth_state("https://shenasa.dev");
        let minted = mint_session(&state, &user(), 1_700_000_000)?;
        let cookie = minted.cookie.to_str()?;
        assert!(cookie.starts_with("shenasa_session="));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Lax"));
        assert!(cookie.contains("Max-Age=2592000"));
        assert!(cookie.contains("Secure"));

        let state = auth_state("http://localhost:8080");
        let minted = mint_session(&state, &user(), 1_700_000_000)?;
        assert!(!minted.cookie.to_str()?.contains("Secure"));
        Ok(())
    }
}
