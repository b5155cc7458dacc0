//! Wire types for the HTTP API.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::account::{LoginMethod, User};

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginMethodView {
    pub recipe_user_id: Uuid,
    pub recipe_id: String,
    pub tenant_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub third_party_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub third_party_user_id: Option<String>,
    pub verified: bool,
    pub time_joined: i64,
}

impl From<&LoginMethod> for LoginMethodView {
    fn from(method: &LoginMethod) -> Self {
        Self {
            recipe_user_id: method.recipe_user_id,
            recipe_id: method.recipe_id.as_str().to_string(),
            tenant_ids: method.tenant_ids.iter().cloned().collect(),
            email: method.email.clone(),
            phone_number: method.phone_number.clone(),
            third_party_id: method.third_party.as_ref().map(|tp| tp.provider_id.clone()),
            third_party_user_id: method.third_party.as_ref().map(|tp| tp.provider_user_id.clone()),
            verified: method.verified,
            time_joined: method.time_joined,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct UserView {
    pub id: Uuid,
    pub is_primary_user: bool,
    pub time_joined: i64,
    pub login_methods: Vec<LoginMethodView>,
}

impl From<&User> for UserView {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            is_primary_user: user.is_primary_user,
            time_joined: user.time_joined,
            login_methods: user.login_methods.iter().map(LoginMethodView::from).collect(),
        }
    }
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub should_try_linking_with_session_user: Option<bool>,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub should_try_linking_with_session_user: Option<bool>,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct UpdateEmailRequest {
    pub recipe_user_id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct ThirdPartySignInUpRequest {
    pub third_party_id: String,
    pub third_party_user_id: String,
    pub email: String,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default)]
    pub should_try_linking_with_session_user: Option<bool>,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct CreateCodeRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub should_try_linking_with_session_user: Option<bool>,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct ConsumeCodeRequest {
    pub device_id: Uuid,
    pub user_input_code: String,
    #[serde(default)]
    pub should_try_linking_with_session_user: Option<bool>,
}

/// Tagged response body: `status` is `OK` or one of the documented error
/// statuses, with `reason` carrying the stable user-facing string.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct AuthResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipe_user_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_new_recipe_user: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_code_input_attempt_count: Option<u32>,
}

impl AuthResponse {
    #[must_use]
    pub fn ok(user: &User, recipe_user_id: Uuid) -> Self {
        Self {
            status: "OK".to_string(),
            user: Some(UserView::from(user)),
            recipe_user_id: Some(recipe_user_id),
            created_new_recipe_user: None,
            reason: None,
            device_id: None,
            failed_code_input_attempt_count: None,
        }
    }

    #[must_use]
    pub fn status(status: &str) -> Self {
        Self {
            status: status.to_string(),
            user: None,
            recipe_user_id: None,
            created_new_recipe_user: None,
            reason: None,
            device_id: None,
            failed_code_input_attempt_count: None,
        }
    }

    #[must_use]
    pub fn with_reason(status: &str, reason: String) -> Self {
        Self {
            reason: Some(reason),
            ..Self::status(status)
        }
    }
}
