//! Request/response types for the auth endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Why an OTP was issued. Scopes lookups and the duplicate-account check.
#[derive(ToSchema, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OtpPurpose {
    Signup,
    PasswordReset,
}

impl OtpPurpose {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Signup => "signup",
            Self::PasswordReset => "password_reset",
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct IssueOtpRequest {
    pub phone: String,
    pub purpose: OtpPurpose,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct IssueOtpResponse {
    /// Normalized phone the code was sent to.
    pub phone: String,
    pub expires_in_seconds: i64,
    /// Raw code, echoed only when debug echo is enabled in configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_code: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct VerifyOtpRequest {
    pub phone: String,
    pub code: String,
    pub purpose: OtpPurpose,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct VerifyOtpResponse {
    pub verified: bool,
    pub phone: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RegisterRequest {
    pub phone: String,
    pub code: String,
    pub purpose: OtpPurpose,
    pub name: String,
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginRequest {
    /// Phone number in any accepted input shape.
    pub identifier: String,
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SetPasswordRequest {
    pub phone: String,
    pub code: String,
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct IdentityResponse {
    pub id: String,
    pub phone: String,
    pub name: String,
    pub role: String,
    pub is_verified: bool,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionResponse {
    /// Signed session token; also set as an HTTP-only cookie.
    pub token: String,
    /// Unix seconds at which the token expires.
    pub expires_at: i64,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct AuthenticatedResponse {
    pub identity: IdentityResponse,
    pub session: SessionResponse,
}
