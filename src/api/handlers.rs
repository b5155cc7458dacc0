//! HTTP handlers for the authentication recipes.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use std::sync::Arc;
use tracing::error;

use crate::error::{EngineError, SessionError};
use crate::recipes::{
    ConsumeCodeOutcome, CreateCodeOutcome, PasswordlessContact, SignInOutcome, SignInUpOutcome,
    SignUpOutcome, UpdateOutcome,
};
use crate::session::SessionRef;

use super::types::{
    AuthResponse, ConsumeCodeRequest, CreateCodeRequest, SignInRequest, SignUpRequest,
    ThirdPartySignInUpRequest, UpdateEmailRequest,
};
use super::AppState;

/// Best-effort bearer session extraction; an unreadable token is treated as
/// no session, and the engine decides whether that matters.
fn session_from_headers(state: &AppState, headers: &HeaderMap) -> Option<SessionRef> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))?;
    state.sessions.resolve(bearer)
}

fn engine_error_response(error: &EngineError) -> Response {
    match error {
        EngineError::Session(SessionError::TryRefreshToken) => (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "message": "try refresh token" })),
        )
            .into_response(),
        EngineError::Session(SessionError::Unauthorised) => (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "message": "unauthorised" })),
        )
            .into_response(),
        EngineError::InvalidClaims { claim_id } => (
            StatusCode::FORBIDDEN,
            Json(json!({
                "message": "invalid claim",
                "claimValidationErrors": [ { "id": claim_id } ]
            })),
        )
            .into_response(),
        EngineError::Repo(error) => {
            error!("repository failure: {error}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/{tenant_id}/emailpassword/signup",
    params(("tenant_id" = String, Path, description = "Tenant")),
    request_body = SignUpRequest,
    responses(
        (status = 200, description = "Outcome-tagged result", body = AuthResponse),
        (status = 401, description = "Session missing or expired"),
        (status = 403, description = "Claim validation failed")
    ),
    tag = "emailpassword"
)]
pub async fn emailpassword_signup(
    Extension(state): Extension<Arc<AppState>>,
    axum::extract::Path(tenant_id): axum::extract::Path<String>,
    headers: HeaderMap,
    Json(body): Json<SignUpRequest>,
) -> impl IntoResponse {
    let session = session_from_headers(&state, &headers);
    let result = state
        .emailpassword
        .sign_up(
            &tenant_id,
            &body.email,
            &body.password,
            session.as_ref(),
            body.should_try_linking_with_session_user,
            &state.options,
        )
        .await;
    match result {
        Ok(SignUpOutcome::Ok { user, recipe_user_id }) => {
            Json(AuthResponse::ok(&user, recipe_user_id)).into_response()
        }
        Ok(SignUpOutcome::EmailAlreadyExists) => {
            Json(AuthResponse::status("EMAIL_ALREADY_EXISTS_ERROR")).into_response()
        }
        Ok(SignUpOutcome::NotAllowed { reason }) => {
            Json(AuthResponse::with_reason("SIGN_UP_NOT_ALLOWED", reason.to_string())).into_response()
        }
        Ok(SignUpOutcome::FieldError { message }) => {
            Json(AuthResponse::with_reason("FIELD_ERROR", message)).into_response()
        }
        Err(error) => engine_error_response(&error),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/{tenant_id}/emailpassword/signin",
    params(("tenant_id" = String, Path, description = "Tenant")),
    request_body = SignInRequest,
    responses(
        (status = 200, description = "Outcome-tagged result", body = AuthResponse),
        (status = 401, description = "Session missing or expired"),
        (status = 403, description = "Claim validation failed")
    ),
    tag = "emailpassword"
)]
pub async fn emailpassword_signin(
    Extension(state): Extension<Arc<AppState>>,
    axum::extract::Path(tenant_id): axum::extract::Path<String>,
    headers: HeaderMap,
    Json(body): Json<SignInRequest>,
) -> impl IntoResponse {
    let session = session_from_headers(&state, &headers);
    let result = state
        .emailpassword
        .sign_in(
            &tenant_id,
            &body.email,
            &body.password,
            session.as_ref(),
            body.should_try_linking_with_session_user,
            &state.options,
        )
        .await;
    match result {
        Ok(SignInOutcome::Ok { user, recipe_user_id }) => {
            Json(AuthResponse::ok(&user, recipe_user_id)).into_response()
        }
        Ok(SignInOutcome::WrongCredentials) => {
            Json(AuthResponse::status("WRONG_CREDENTIALS_ERROR")).into_response()
        }
        Ok(SignInOutcome::NotAllowed { reason }) => {
            Json(AuthResponse::with_reason("SIGN_IN_NOT_ALLOWED", reason.to_string())).into_response()
        }
        Err(error) => engine_error_response(&error),
    }
}

#[utoipa::path(
    put,
    path = "/v1/auth/emailpassword/user",
    request_body = UpdateEmailRequest,
    responses(
        (status = 200, description = "Outcome-tagged result", body = AuthResponse)
    ),
    tag = "emailpassword"
)]
pub async fn emailpassword_update(
    Extension(state): Extension<Arc<AppState>>,
    Json(body): Json<UpdateEmailRequest>,
) -> impl IntoResponse {
    let result = state
        .emailpassword
        .update_email_or_password(
            body.recipe_user_id,
            body.email.as_deref(),
            body.password.as_deref(),
            &state.options,
        )
        .await;
    match result {
        Ok(UpdateOutcome::Ok) => Json(AuthResponse::status("OK")).into_response(),
        Ok(UpdateOutcome::EmailAlreadyExists) => {
            Json(AuthResponse::status("EMAIL_ALREADY_EXISTS_ERROR")).into_response()
        }
        Ok(UpdateOutcome::EmailChangeNotAllowed { reason }) => Json(AuthResponse::with_reason(
            "EMAIL_CHANGE_NOT_ALLOWED_ERROR",
            reason.to_string(),
        ))
        .into_response(),
        Ok(UpdateOutcome::FieldError { message }) => {
            Json(AuthResponse::with_reason("FIELD_ERROR", message)).into_response()
        }
        Err(error) => engine_error_response(&error),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/{tenant_id}/thirdparty/signinup",
    params(("tenant_id" = String, Path, description = "Tenant")),
    request_body = ThirdPartySignInUpRequest,
    responses(
        (status = 200, description = "Outcome-tagged result", body = AuthResponse),
        (status = 401, description = "Session missing or expired"),
        (status = 403, description = "Claim validation failed")
    ),
    tag = "thirdparty"
)]
pub async fn thirdparty_signinup(
    Extension(state): Extension<Arc<AppState>>,
    axum::extract::Path(tenant_id): axum::extract::Path<String>,
    headers: HeaderMap,
    Json(body): Json<ThirdPartySignInUpRequest>,
) -> impl IntoResponse {
    let session = session_from_headers(&state, &headers);
    let result = state
        .thirdparty
        .sign_in_up(
            &tenant_id,
            &body.third_party_id,
            &body.third_party_user_id,
            &body.email,
            body.email_verified,
            session.as_ref(),
            body.should_try_linking_with_session_user,
            &state.options,
        )
        .await;
    match result {
        Ok(SignInUpOutcome::Ok {
            user,
            recipe_user_id,
            created_new_user,
        }) => {
            let mut response = AuthResponse::ok(&user, recipe_user_id);
            response.created_new_recipe_user = Some(created_new_user);
            Json(response).into_response()
        }
        Ok(SignInUpOutcome::NotAllowed { reason }) => {
            Json(AuthResponse::with_reason("SIGN_IN_UP_NOT_ALLOWED", reason.to_string())).into_response()
        }
        Ok(SignInUpOutcome::FieldError { message }) => {
            Json(AuthResponse::with_reason("FIELD_ERROR", message)).into_response()
        }
        Err(error) => engine_error_response(&error),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/{tenant_id}/passwordless/code",
    params(("tenant_id" = String, Path, description = "Tenant")),
    request_body = CreateCodeRequest,
    responses(
        (status = 200, description = "Outcome-tagged result", body = AuthResponse),
        (status = 401, description = "Session missing or expired")
    ),
    tag = "passwordless"
)]
pub async fn passwordless_create_code(
    Extension(state): Extension<Arc<AppState>>,
    axum::extract::Path(tenant_id): axum::extract::Path<String>,
    headers: HeaderMap,
    Json(body): Json<CreateCodeRequest>,
) -> impl IntoResponse {
    let contact = match (body.email, body.phone_number) {
        (Some(email), None) => PasswordlessContact::Email(email),
        (None, Some(phone_number)) => PasswordlessContact::PhoneNumber(phone_number),
        _ => {
            return Json(AuthResponse::with_reason(
                "FIELD_ERROR",
                "Provide exactly one of email or phone number".to_string(),
            ))
            .into_response();
        }
    };
    let session = session_from_headers(&state, &headers);
    let result = state
        .passwordless
        .create_code(
            &tenant_id,
            contact,
            session.as_ref(),
            body.should_try_linking_with_session_user,
            &state.options,
        )
        .await;
    match result {
        Ok(CreateCodeOutcome::Ok { device_id, code: _ }) => {
            // The code goes out through the delivery channel, not the API.
            let mut response = AuthResponse::status("OK");
            response.device_id = Some(device_id);
            Json(response).into_response()
        }
        Ok(CreateCodeOutcome::NotAllowed { reason }) => {
            Json(AuthResponse::with_reason("SIGN_IN_UP_NOT_ALLOWED", reason.to_string())).into_response()
        }
        Ok(CreateCodeOutcome::FieldError { message }) => {
            Json(AuthResponse::with_reason("FIELD_ERROR", message)).into_response()
        }
        Err(error) => engine_error_response(&error),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/{tenant_id}/passwordless/code/consume",
    params(("tenant_id" = String, Path, description = "Tenant")),
    request_body = ConsumeCodeRequest,
    responses(
        (status = 200, description = "Outcome-tagged result", body = AuthResponse),
        (status = 401, description = "Session missing or expired"),
        (status = 403, description = "Claim validation failed")
    ),
    tag = "passwordless"
)]
pub async fn passwordless_consume_code(
    Extension(state): Extension<Arc<AppState>>,
    axum::extract::Path(tenant_id): axum::extract::Path<String>,
    headers: HeaderMap,
    Json(body): Json<ConsumeCodeRequest>,
) -> impl IntoResponse {
    let session = session_from_headers(&state, &headers);
    let result = state
        .passwordless
        .consume_code(
            &tenant_id,
            body.device_id,
            &body.user_input_code,
            session.as_ref(),
            body.should_try_linking_with_session_user,
            &state.options,
        )
        .await;
    match result {
        Ok(ConsumeCodeOutcome::Ok {
            user,
            recipe_user_id,
            created_new_user,
        }) => {
            let mut response = AuthResponse::ok(&user, recipe_user_id);
            response.created_new_recipe_user = Some(created_new_user);
            Json(response).into_response()
        }
        Ok(ConsumeCodeOutcome::IncorrectCode { failed_attempts }) => {
            let mut response = AuthResponse::status("INCORRECT_USER_INPUT_CODE_ERROR");
            response.failed_code_input_attempt_count = Some(failed_attempts);
            Json(response).into_response()
        }
        Ok(ConsumeCodeOutcome::ExpiredCode) => {
            Json(AuthResponse::status("EXPIRED_USER_INPUT_CODE_ERROR")).into_response()
        }
        Ok(ConsumeCodeOutcome::RestartFlow) => {
            Json(AuthResponse::status("RESTART_FLOW_ERROR")).into_response()
        }
        Ok(ConsumeCodeOutcome::NotAllowed { reason }) => {
            Json(AuthResponse::with_reason("SIGN_IN_UP_NOT_ALLOWED", reason.to_string())).into_response()
        }
        Err(error) => engine_error_response(&error),
    }
}

#[derive(utoipa::ToSchema, serde::Serialize, Debug)]
pub struct Health {
    name: String,
    version: String,
}

#[utoipa::path(
    get,
    path = "/v1/health",
    responses((status = 200, description = "Service is up", body = Health)),
    tag = "health"
)]
pub async fn health() -> impl IntoResponse {
    Json(Health {
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
