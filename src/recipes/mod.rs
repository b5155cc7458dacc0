//! Authentication recipes.
//!
//! Each recipe authenticates its own factor, then hands the resulting login
//! method to the linking engine. Expected rejections are outcome-enum
//! variants; `EngineError` is reserved for session failures, claim failures,
//! and storage errors.

mod emailpassword;
mod passwordless;
pub(crate) mod password;
mod thirdparty;
pub(crate) mod utils;

pub use emailpassword::{
    CreateResetTokenOutcome, EmailPassword, ResetPasswordOutcome, SignInOutcome, SignUpOutcome, UpdateOutcome,
};
pub use password::{PasswordHasher, Sha256PasswordHasher};
pub use passwordless::{ConsumeCodeOutcome, CreateCodeOutcome, Passwordless, PasswordlessContact};
pub use thirdparty::{SignInUpOutcome, ThirdParty};
