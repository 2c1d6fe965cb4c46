//! OpenAPI document for the served routes.

use utoipa::OpenApi;

use super::handlers::auth::error::ErrorBody;
use super::handlers::auth::types::{
    AuthenticatedResponse, IdentityResponse, IssueOtpRequest, IssueOtpResponse, LoginRequest,
    OtpPurpose, RegisterRequest, SessionResponse, SetPasswordRequest, VerifyOtpRequest,
    VerifyOtpResponse,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        super::handlers::health::health,
        super::handlers::auth::otp::issue_otp,
        super::handlers::auth::otp::verify_otp,
        super::handlers::auth::registration::register,
        super::handlers::auth::login::login,
        super::handlers::auth::set_password::set_password,
    ),
    components(schemas(
        ErrorBody,
        OtpPurpose,
        IssueOtpRequest,
        IssueOtpResponse,
        VerifyOtpRequest,
        VerifyOtpResponse,
        RegisterRequest,
        LoginRequest,
        SetPasswordRequest,
        IdentityResponse,
        SessionResponse,
        AuthenticatedResponse,
    )),
    tags(
        (name = "shenasa", description = "Phone OTP authentication service"),
        (name = "auth", description = "OTP issuance, verification, registration, and login")
    )
)]
pub struct ApiDoc;
