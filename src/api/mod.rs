use crate::cli::globals::GlobalArgs;
use anyhow::{Context, Result, anyhow};
use axum::{
    Extension, Router,
    body::Body,
    extract::MatchedPath,
    http::{
        HeaderName, HeaderValue, Method, Request,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    routing::{get, post},
};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{Span, info, info_span};
use ulid::Ulid;
use url::Url;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub mod handlers;
mod openapi;

pub use openapi::ApiDoc;

use handlers::auth::{self, AuthConfig, AuthState, RateLimiter, SmsSender};

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(port: u16, dsn: String, globals: &GlobalArgs, auth_config: AuthConfig) -> Result<()> {
    // Connect to database
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&dsn)
        .await
        .context("Failed to connect to database")?;

    // The shared-store limiter is the default; the in-process variant is an
    // explicit opt-in with per-instance guarantees only.
    let rate_limiter = if globals.in_memory_rate_limit {
        RateLimiter::in_memory()
    } else {
        RateLimiter::postgres(pool.clone())
    };

    let sms = match &globals.sms_api_url {
        Some(api_url) => {
            let endpoint = Url::parse(api_url)
                .with_context(|| format!("Invalid SMS API URL: {api_url}"))?;
            let api_key = globals
                .sms_api_key
                .clone()
                .ok_or_else(|| anyhow!("SMS API key is required when an SMS API URL is set"))?;
            SmsSender::http(endpoint, api_key)?
        }
        None => {
            info!("No SMS provider configured; codes are logged instead of sent");
            SmsSender::log()
        }
    };

    let auth_state = Arc::new(AuthState::new(
        auth_config,
        globals.session_secret.clone(),
        rate_limiter,
        sms,
    ));

    let public_origin = public_origin(auth_state.config().public_base_url())?;
    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(AllowOrigin::exact(public_origin))
        .allow_credentials(true);

    let app = router()
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(Extension(auth_state.clone()))
                .layer(Extension(pool.clone())),
        );

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

/// All served routes; kept separate from `new` so tests can build the
/// router without a listener.
#[must_use]
pub fn router() -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/v1/auth/otp/issue", post(auth::otp::issue_otp))
        .route("/v1/auth/otp/verify", post(auth::otp::verify_otp))
        .route("/v1/auth/register", post(auth::registration::register))
        .route("/v1/auth/login", post(auth::login::login))
        .route("/v1/auth/set-password", post(auth::set_password::set_password))
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

fn public_origin(public_base_url: &str) -> Result<HeaderValue> {
    let parsed = Url::parse(public_base_url)
        .with_context(|| format!("Invalid public base URL: {public_base_url}"))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow!("Public base URL must include a valid host: {public_base_url}"))?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build public origin header")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_origin_strips_path_and_keeps_port() -> Result<()> {
        let origin = public_origin("https://auth.shenasa.dev:8443/v1/")?;
        assert_eq!(origin, HeaderValue::from_static("https://auth.shenasa.dev:8443"));

        let origin = public_origin("http://localhost:8080")?;
        assert_eq!(origin, HeaderValue::from_static("http://localhost:8080"));
        Ok(())
    }

    #[test]
    fn public_origin_rejects_garbage() {
        assert!(public_origin("not a url").is_err());
    }

    #[test]
    fn user_agent_carries_name_and_version() {
        assert!(APP_USER_AGENT.starts_with("shenasa/"));
    }
}
