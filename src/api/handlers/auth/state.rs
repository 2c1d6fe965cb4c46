//! Auth configuration and shared state.

use secrecy::SecretString;

use super::rate_limit::RateLimiter;
use super::sms::SmsSender;

const DEFAULT_OTP_TTL_SECONDS: i64 = 120;
const DEFAULT_RESEND_COOLDOWN_SECONDS: i64 = 120;
const DEFAULT_MAX_OTP_ATTEMPTS: i32 = 3;
const DEFAULT_SESSION_TTL_SECONDS: i64 = 30 * 24 * 60 * 60;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    public_base_url: String,
    otp_ttl_seconds: i64,
    resend_cooldown_seconds: i64,
    max_otp_attempts: i32,
    session_ttl_seconds: i64,
    otp_debug_echo: bool,
}

impl AuthConfig {
    #[must_use]
    pub fn new(public_base_url: String) -> Self {
        Self {
            public_base_url,
            otp_ttl_seconds: DEFAULT_OTP_TTL_SECONDS,
            resend_cooldown_seconds: DEFAULT_RESEND_COOLDOWN_SECONDS,
            max_otp_attempts: DEFAULT_MAX_OTP_ATTEMPTS,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            otp_debug_echo: false,
        }
    }

    #[must_use]
    pub fn with_otp_ttl_seconds(mut self, seconds: i64) -> Self {
        self.otp_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_resend_cooldown_seconds(mut self, seconds: i64) -> Self {
        self.resend_cooldown_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    /// Echo the raw code in issue responses. Debug/test aid only; off by
    /// default and must stay off in production.
    #[must_use]
    pub fn with_otp_debug_echo(mut self, enabled: bool) -> Self {
        self.otp_debug_echo = enabled;
        self
    }

    pub(crate) fn public_base_url(&self) -> &str {
        &self.public_base_url
    }

    pub(super) fn otp_ttl_seconds(&self) -> i64 {
        self.otp_ttl_seconds
    }

    pub(super) fn resend_cooldown_seconds(&self) -> i64 {
        self.resend_cooldown_seconds
    }

    pub(super) fn max_otp_attempts(&self) -> i32 {
        self.max_otp_attempts
    }

    pub(super) fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl_seconds
    }

    pub(super) fn otp_debug_echo(&self) -> bool {
        self.otp_debug_echo
    }

    /// Issuer claim for minted tokens.
    pub(super) fn session_issuer(&self) -> &str {
        self.public_base_url.trim_end_matches('/')
    }

    pub(super) fn session_cookie_secure(&self) -> bool {
        self.public_base_url.starts_with("https://")
    }
}

pub struct AuthState {
    config: AuthConfig,
    session_secret: SecretString,
    rate_limiter: RateLimiter,
    sms: SmsSender,
}

impl AuthState {
    #[must_use]
    pub fn new(
        config: AuthConfig,
        session_secret: SecretString,
        rate_limiter: RateLimiter,
        sms: SmsSender,
    ) -> Self {
        Self {
            config,
            session_secret,
            rate_limiter,
            sms,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub(super) fn session_secret(&self) -> &SecretString {
        &self.session_secret
    }

    pub(super) fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub(super) fn sms(&self) -> &SmsSender {
        &self.sms
    }
}
