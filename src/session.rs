//! Per-attempt session reference and the tri-state linking intent.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::error::SessionError;

/// The session supplied alongside an authentication attempt. The engine does
/// not issue or refresh sessions; it only reads this reference to bias link
/// target selection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRef {
    pub user_id: Uuid,
    pub recipe_user_id: Uuid,
    /// Access-token expiry, unix milliseconds.
    pub expires_at: i64,
}

impl SessionRef {
    #[must_use]
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at <= now_ms
    }
}

#[must_use]
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
}

/// Resolve the caller's `should_try_linking_with_session_user` intent.
///
/// - `Some(true)`: the session is required; absence is `unauthorised`,
///   expiry is `try refresh token`.
/// - `Some(false)`: the session is ignored for linking purposes.
/// - `None`: use the session when present and valid, otherwise proceed
///   without one.
///
/// # Errors
/// Returns a [`SessionError`] only when the caller required session linking.
pub fn resolve_session_for_linking(
    session: Option<&SessionRef>,
    should_try_linking_with_session_user: Option<bool>,
    now_ms: i64,
) -> Result<Option<SessionRef>, SessionError> {
    match should_try_linking_with_session_user {
        Some(false) => Ok(None),
        Some(true) => match session {
            None => Err(SessionError::Unauthorised),
            Some(session) if session.is_expired(now_ms) => Err(SessionError::TryRefreshToken),
            Some(session) => Ok(Some(session.clone())),
        },
        None => Ok(session.filter(|session| !session.is_expired(now_ms)).cloned()),
    }
}
