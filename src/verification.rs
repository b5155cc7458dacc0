//! Verification state tracker.
//!
//! Records are keyed `(recipe_user_id, contact value)`. A login method reads
//! verified only while its current value has a record, and linking spreads
//! verification to sibling methods sharing the same value.

use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::repo::{RepoError, UserRepository};

#[derive(Clone)]
pub struct VerificationTracker {
    repo: Arc<dyn UserRepository>,
}

impl VerificationTracker {
    #[must_use]
    pub fn new(repo: Arc<dyn UserRepository>) -> Self {
        Self { repo }
    }

    /// Whether the method's current contact value carries a record.
    ///
    /// # Errors
    /// Fails when the login method does not exist or storage fails.
    pub async fn is_verified(&self, recipe_user_id: Uuid) -> Result<bool, RepoError> {
        let user = self
            .repo
            .get_user_by_recipe_user_id(recipe_user_id)
            .await?
            .ok_or(RepoError::UnknownLoginMethod(recipe_user_id))?;
        let method = user
            .login_method(recipe_user_id)
            .ok_or(RepoError::UnknownLoginMethod(recipe_user_id))?;
        Ok(method.verified)
    }

    /// Mark the value verified for this method.
    ///
    /// Records are additive: verifying a new value never clears records for
    /// previous values, so restoring an old value restores its state.
    ///
    /// # Errors
    /// Fails when storage fails.
    pub async fn mark_verified(&self, recipe_user_id: Uuid, value: &str) -> Result<(), RepoError> {
        self.repo.set_verified(recipe_user_id, value, true).await
    }

    /// Clear the record for this method and value. Sibling methods keep
    /// their own records.
    ///
    /// # Errors
    /// Fails when storage fails.
    pub async fn unverify(&self, recipe_user_id: Uuid, value: &str) -> Result<(), RepoError> {
        self.repo.set_verified(recipe_user_id, value, false).await
    }

    /// Inherit verification from linked siblings: if any other login method
    /// of the same user shares this method's contact value and is verified,
    /// mark this method verified for that value. Never unverifies.
    ///
    /// # Errors
    /// Fails when the login method does not exist or storage fails.
    pub async fn inherit_from_siblings(&self, recipe_user_id: Uuid) -> Result<bool, RepoError> {
        let user = self
            .repo
            .get_user_by_recipe_user_id(recipe_user_id)
            .await?
            .ok_or(RepoError::UnknownLoginMethod(recipe_user_id))?;
        let method = user
            .login_method(recipe_user_id)
            .ok_or(RepoError::UnknownLoginMethod(recipe_user_id))?;
        if method.verified {
            return Ok(false);
        }
        let mut inherited = false;
        for value in method.contact_values() {
            let verified_sibling = user.login_methods.iter().any(|sibling| {
                sibling.recipe_user_id != recipe_user_id
                    && sibling.verified
                    && sibling.contact_values().any(|other| other == value)
            });
            if verified_sibling {
                debug!(%recipe_user_id, "inheriting verification from linked login method");
                self.repo.set_verified(recipe_user_id, value, true).await?;
                inherited = true;
            }
        }
        Ok(inherited)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::RecipeId;
    use crate::repo::{InMemoryRepository, NewLoginMethod};

    fn method(recipe_id: RecipeId, email: &str, verified: bool) -> NewLoginMethod {
        NewLoginMethod {
            recipe_id,
            email: Some(email.to_string()),
            phone_number: None,
            third_party: None,
            verified,
            password_hash: None,
        }
    }

    #[tokio::test]
    async fn linking_spreads_verification_to_shared_value() -> anyhow::Result<()> {
        let repo = Arc::new(InMemoryRepository::new());
        let tracker = VerificationTracker::new(repo.clone());

        let verified = repo
            .create_user("public", method(RecipeId::ThirdParty, "a@example.com", true))
            .await?;
        let unverified = repo
            .create_user("public", method(RecipeId::EmailPassword, "a@example.com", false))
            .await?;
        let rid_verified = verified.login_methods[0].recipe_user_id;
        let rid_unverified = unverified.login_methods[0].recipe_user_id;
        repo.create_primary_user(rid_verified).await?;
        repo.link_accounts(rid_unverified, verified.id).await?;

        assert!(tracker.inherit_from_siblings(rid_unverified).await?);
        assert!(tracker.is_verified(rid_unverified).await?);
        Ok(())
    }

    #[tokio::test]
    async fn no_inheritance_across_different_values() -> anyhow::Result<()> {
        let repo = Arc::new(InMemoryRepository::new());
        let tracker = VerificationTracker::new(repo.clone());

        let first = repo
            .create_user("public", method(RecipeId::ThirdParty, "a@example.com", true))
            .await?;
        let second = repo
            .create_user("public", method(RecipeId::EmailPassword, "b@example.com", false))
            .await?;
        let rid1 = first.login_methods[0].recipe_user_id;
        let rid2 = second.login_methods[0].recipe_user_id;
        repo.create_primary_user(rid1).await?;
        repo.link_accounts(rid2, first.id).await?;

        assert!(!tracker.inherit_from_siblings(rid2).await?);
        assert!(!tracker.is_verified(rid2).await?);
        Ok(())
    }

    #[tokio::test]
    async fn unverify_is_scoped_to_one_method() -> anyhow::Result<()> {
        let repo = Arc::new(InMemoryRepository::new());
        let tracker = VerificationTracker::new(repo.clone());

        let first = repo
            .create_user("public", method(RecipeId::ThirdParty, "a@example.com", true))
            .await?;
        let second = repo
            .create_user("public", method(RecipeId::EmailPassword, "a@example.com", true))
            .await?;
        let rid1 = first.login_methods[0].recipe_user_id;
        let rid2 = second.login_methods[0].recipe_user_id;
        repo.create_primary_user(rid1).await?;
        repo.link_accounts(rid2, first.id).await?;

        tracker.unverify(rid2, "a@example.com").await?;
        assert!(!tracker.is_verified(rid2).await?);
        assert!(tracker.is_verified(rid1).await?);
        Ok(())
    }
}
