//! Repository seam between the linking engine and storage.
//!
//! All reads are tenant-scoped. Writes that change link topology return
//! result enums instead of errors: primary-user conflicts are expected
//! concurrency outcomes, and callers handle each variant explicitly.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::account::{AccountInfo, RecipeId, ThirdPartyInfo, User};

mod counting;
mod memory;
mod postgres;

pub use counting::CountingRepository;
pub use memory::InMemoryRepository;
pub use postgres::PostgresRepository;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("unknown user {0}")]
    UnknownUser(Uuid),
    #[error("unknown login method {0}")]
    UnknownLoginMethod(Uuid),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Input for creating a fresh recipe user with a single login method.
#[derive(Clone, Debug)]
pub struct NewLoginMethod {
    pub recipe_id: RecipeId,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub third_party: Option<ThirdPartyInfo>,
    pub verified: bool,
    /// Only set for emailpassword methods.
    pub password_hash: Option<String>,
}

impl NewLoginMethod {
    #[must_use]
    pub fn account_info(&self) -> AccountInfo {
        AccountInfo {
            email: self.email.clone(),
            phone_number: self.phone_number.clone(),
            third_party: self.third_party.clone(),
        }
    }
}

#[derive(Clone, Debug)]
pub enum ContactUpdate {
    Email(String),
    PhoneNumber(String),
}

/// Result of promoting a recipe user to primary.
#[derive(Clone, Debug)]
pub enum CreatePrimaryUserResult {
    Ok {
        user: User,
        was_already_primary: bool,
    },
    /// The recipe user is already linked to some other primary user.
    RecipeUserAlreadyLinked { primary_user_id: Uuid },
    /// Another primary user already owns matching account info on a shared
    /// tenant.
    AccountInfoAlreadyAssociated { primary_user_id: Uuid },
}

/// Result of linking a recipe user to a primary user.
#[derive(Clone, Debug)]
pub enum LinkAccountsResult {
    Ok {
        user: User,
        /// The exact link already existed; the call was a no-op.
        accounts_already_linked: bool,
    },
    RecipeUserAlreadyLinked { primary_user_id: Uuid, user: User },
    AccountInfoAlreadyAssociated { primary_user_id: Uuid },
    /// The target user is not primary; callers must promote it first.
    TargetNotPrimary,
}

/// Storage contract for users, login methods, links, and verification
/// records. Implementations must keep the primary-user uniqueness
/// constraint: per tenant, one account-info value maps to at most one
/// primary user.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Fetch a user (primary or standalone) by user id.
    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, RepoError>;

    /// Fetch the user that owns the given login method.
    async fn get_user_by_recipe_user_id(&self, recipe_user_id: Uuid) -> Result<Option<User>, RepoError>;

    /// All users with a login method matching any populated field of `info`
    /// on `tenant_id`, ordered by `time_joined` ascending. Each user appears
    /// once even when several fields match.
    async fn list_users_by_account_info(
        &self,
        tenant_id: &str,
        info: &AccountInfo,
    ) -> Result<Vec<User>, RepoError>;

    /// Create a standalone user with one login method on `tenant_id`.
    async fn create_user(&self, tenant_id: &str, method: NewLoginMethod) -> Result<User, RepoError>;

    /// Promote the recipe user to primary. Idempotent when it is already
    /// primary on its own.
    async fn create_primary_user(&self, recipe_user_id: Uuid) -> Result<CreatePrimaryUserResult, RepoError>;

    /// Link `recipe_user_id` into `primary_user_id`. Idempotent for an
    /// existing identical link.
    async fn link_accounts(
        &self,
        recipe_user_id: Uuid,
        primary_user_id: Uuid,
    ) -> Result<LinkAccountsResult, RepoError>;

    /// Replace the login method's email or phone number. Verification state
    /// for the new value comes from existing per-value records.
    async fn update_contact_info(&self, recipe_user_id: Uuid, update: ContactUpdate) -> Result<User, RepoError>;

    /// Whether `(recipe_user_id, value)` has a verification record.
    async fn is_verified(&self, recipe_user_id: Uuid, value: &str) -> Result<bool, RepoError>;

    /// Set or clear the verification record for `(recipe_user_id, value)`.
    async fn set_verified(&self, recipe_user_id: Uuid, value: &str, verified: bool) -> Result<(), RepoError>;

    /// Stored password hash for an emailpassword login method.
    async fn password_hash(&self, recipe_user_id: Uuid) -> Result<Option<String>, RepoError>;

    /// Replace the stored password hash.
    async fn update_password_hash(&self, recipe_user_id: Uuid, password_hash: &str) -> Result<(), RepoError>;
}
