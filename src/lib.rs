//! Multi-tenant account-linking decision engine.
//!
//! Users own one or more login methods (email/password, third-party,
//! passwordless). After a method authenticates, the engine decides whether
//! it becomes a primary user, links into an existing one, or stays
//! standalone, and guards contact-info changes against account takeover.

pub mod account;
pub mod api;
pub mod cli;
pub mod error;
pub mod linking;
pub mod policy;
pub mod recipes;
pub mod repo;
pub mod session;
pub mod verification;

pub use account::{AccountInfo, LoginMethod, RecipeId, ThirdPartyInfo, User};
pub use error::{EmailChangeReason, EngineError, ReasonCode, SessionError, EMAIL_VERIFIED_CLAIM_ID};
pub use linking::{AccountLinker, EmailChangeCheck, LinkingOutcome};
pub use policy::{
    AccountInfoWithRecipe, LinkIfVerified, LinkWithoutVerification, LinkingDisabled, LinkingOptions,
    LinkingPolicy, PolicyDecision,
};
pub use session::SessionRef;
pub use verification::VerificationTracker;
