//! Small helpers shared by the auth flows.

use axum::http::HeaderMap;
use rand::{Rng, rngs::OsRng};

const NAME_MIN_LENGTH: usize = 2;
const PASSWORD_MIN_LENGTH: usize = 8;

/// Generate a uniformly random six-digit code, leading zeros allowed.
pub(super) fn generate_otp_code() -> String {
    let value: u32 = OsRng.gen_range(0..1_000_000);
    format!("{value:06}")
}

/// Display name: non-empty after trimming, with a small minimum length.
pub(super) fn valid_name(name: &str) -> bool {
    name.trim().chars().count() >= NAME_MIN_LENGTH
}

/// Password policy: minimum length plus at least one letter and one digit.
pub(super) fn valid_password(password: &str) -> bool {
    password.chars().count() >= PASSWORD_MIN_LENGTH
        && password.chars().any(char::is_alphabetic)
        && password.chars().any(|ch| ch.is_ascii_digit())
}

/// Extract a client IP for rate limiting from common proxy headers.
pub(super) fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
