//! OpenAPI document for the HTTP surface.

use utoipa::OpenApi;

use super::handlers;
use super::types;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "ligilo",
        description = "Multi-tenant account-linking decision engine",
    ),
    paths(
        handlers::health,
        handlers::emailpassword_signup,
        handlers::emailpassword_signin,
        handlers::emailpassword_update,
        handlers::thirdparty_signinup,
        handlers::passwordless_create_code,
        handlers::passwordless_consume_code,
    ),
    components(schemas(
        handlers::Health,
        types::AuthResponse,
        types::UserView,
        types::LoginMethodView,
        types::SignUpRequest,
        types::SignInRequest,
        types::UpdateEmailRequest,
        types::ThirdPartySignInUpRequest,
        types::CreateCodeRequest,
        types::ConsumeCodeRequest,
    )),
    tags(
        (name = "health", description = "Service health"),
        (name = "emailpassword", description = "Email/password recipe"),
        (name = "thirdparty", description = "Third-party recipe"),
        (name = "passwordless", description = "Passwordless recipe"),
    )
)]
pub struct ApiDoc;

/// Serialized OpenAPI spec, used by the `openapi` CLI action.
///
/// # Errors
/// Returns an error when the document cannot be serialized.
pub fn openapi_json() -> anyhow::Result<String> {
    Ok(ApiDoc::openapi().to_pretty_json()?)
}
