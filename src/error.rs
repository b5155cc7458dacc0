//! Error taxonomy and the stable, user-facing reason strings.
//!
//! Reason strings are a support-triage contract: they are matched verbatim by
//! downstream dashboards and must never be reworded.

use std::fmt;
use thiserror::Error;

use crate::repo::RepoError;

/// Numbered rejection reasons surfaced through `SIGN_IN_UP_NOT_ALLOWED`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReasonCode {
    /// Email/password sign-up blocked by a conflicting account.
    EmailPasswordSignUp,
    /// Passwordless code creation blocked by a conflicting account.
    PasswordlessCreateCode,
    /// Passwordless code consumption blocked after authentication.
    PasswordlessConsumeCode,
    /// Third-party sign-in/up blocked by a conflicting account.
    ThirdPartySignInUp,
    /// Third-party sign-in required an email change that is not allowed.
    ThirdPartyEmailChange,
    /// Email/password sign-in blocked (email now collides with a primary user).
    EmailPasswordSignIn,
    /// Passwordless code consumption could not link to the session user.
    PasswordlessSessionLink,
    /// Passwordless code creation pre-check failed against the session user.
    PasswordlessSessionPreCheck,
    /// Promoting the session user to primary failed at write time.
    SessionUserPromotionFailed,
    /// Third-party login method could not be linked to the session user.
    ThirdPartySessionLink,
    /// The session user cannot become primary (conflicting primary user).
    SessionUserConflict,
}

impl ReasonCode {
    #[must_use]
    pub const fn number(self) -> u8 {
        match self {
            Self::EmailPasswordSignUp => 1,
            Self::PasswordlessCreateCode => 2,
            Self::PasswordlessConsumeCode => 3,
            Self::ThirdPartySignInUp => 4,
            Self::ThirdPartyEmailChange => 5,
            Self::EmailPasswordSignIn => 6,
            Self::PasswordlessSessionLink => 17,
            Self::PasswordlessSessionPreCheck => 18,
            Self::SessionUserPromotionFailed => 21,
            Self::ThirdPartySessionLink => 22,
            Self::SessionUserConflict => 23,
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let number = self.number();
        match self {
            Self::EmailPasswordSignUp => write!(
                f,
                "Cannot sign up due to security reasons. Please try a different login method or contact support. (ERR_CODE_{number:03})"
            ),
            Self::PasswordlessCreateCode | Self::ThirdPartySignInUp | Self::EmailPasswordSignIn | Self::PasswordlessConsumeCode => {
                write!(
                    f,
                    "Cannot sign in / up due to security reasons. Please try a different login method or contact support. (ERR_CODE_{number:03})"
                )
            }
            Self::ThirdPartyEmailChange => write!(
                f,
                "Cannot sign in / up because new email cannot be applied to existing account. Please contact support. (ERR_CODE_{number:03})"
            ),
            Self::PasswordlessSessionLink
            | Self::PasswordlessSessionPreCheck
            | Self::SessionUserPromotionFailed
            | Self::ThirdPartySessionLink
            | Self::SessionUserConflict => write!(
                f,
                "Cannot sign in / up due to security reasons. Please contact support. (ERR_CODE_{number:03})"
            ),
        }
    }
}

/// Why a contact-info change was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmailChangeReason {
    /// The new value belongs to a different primary user.
    PrimaryUserConflict,
    /// Applying the unverified value would let this account claim an
    /// identity someone else already established.
    AccountTakeoverRisk,
}

impl fmt::Display for EmailChangeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PrimaryUserConflict => {
                write!(f, "Email already associated with another primary user.")
            }
            Self::AccountTakeoverRisk => write!(
                f,
                "New email cannot be applied to existing account because of account takeover risks."
            ),
        }
    }
}

/// Session problems, both mapped to 401 at the API boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("unauthorised")]
    Unauthorised,
    #[error("try refresh token")]
    TryRefreshToken,
}

/// Claim id asserted when linking requires a verified session-user email.
pub const EMAIL_VERIFIED_CLAIM_ID: &str = "st-ev";

/// Failures an authentication attempt can abort with. Expected policy
/// rejections are outcome-enum variants on the recipe results, not errors.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Session(#[from] SessionError),
    /// A required claim failed validation (403 at the API boundary),
    /// distinct from linking rejections.
    #[error("invalid claim: {claim_id}")]
    InvalidClaims { claim_id: &'static str },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_strings_are_stable() {
        assert_eq!(
            ReasonCode::SessionUserConflict.to_string(),
            "Cannot sign in / up due to security reasons. Please contact support. (ERR_CODE_023)"
        );
        assert_eq!(
            ReasonCode::SessionUserPromotionFailed.to_string(),
            "Cannot sign in / up due to security reasons. Please contact support. (ERR_CODE_021)"
        );
        assert_eq!(
            ReasonCode::PasswordlessCreateCode.to_string(),
            "Cannot sign in / up due to security reasons. Please try a different login method or contact support. (ERR_CODE_002)"
        );
        assert_eq!(
            ReasonCode::ThirdPartySignInUp.to_string(),
            "Cannot sign in / up due to security reasons. Please try a different login method or contact support. (ERR_CODE_004)"
        );
        assert_eq!(
            ReasonCode::ThirdPartyEmailChange.to_string(),
            "Cannot sign in / up because new email cannot be applied to existing account. Please contact support. (ERR_CODE_005)"
        );
        assert_eq!(
            ReasonCode::EmailPasswordSignIn.to_string(),
            "Cannot sign in / up due to security reasons. Please try a different login method or contact support. (ERR_CODE_006)"
        );
    }

    #[test]
    fn email_change_reason_strings_are_stable() {
        assert_eq!(
            EmailChangeReason::PrimaryUserConflict.to_string(),
            "Email already associated with another primary user."
        );
        assert_eq!(
            EmailChangeReason::AccountTakeoverRisk.to_string(),
            "New email cannot be applied to existing account because of account takeover risks."
        );
    }

    #[test]
    fn session_error_messages() {
        assert_eq!(SessionError::Unauthorised.to_string(), "unauthorised");
        assert_eq!(SessionError::TryRefreshToken.to_string(), "try refresh token");
    }
}
