//! Account-linking engine.
//!
//! [`AccountLinker`] owns the repository, the policy, and the verification
//! tracker. Recipes call [`AccountLinker::resolve`] after authenticating a
//! login method; the manual operations mirror what the resolver does
//! internally and are exposed for admin tooling.

mod email_change;
mod resolver;

pub use email_change::EmailChangeCheck;

use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::account::User;
use crate::error::{EngineError, ReasonCode};
use crate::policy::{AccountInfoWithRecipe, LinkingOptions, LinkingPolicy, PolicyDecision};
use crate::repo::{CreatePrimaryUserResult, LinkAccountsResult, RepoError, UserRepository};
use crate::session::SessionRef;
use crate::verification::VerificationTracker;

/// Outcome of running an authenticated login method through the resolver.
#[derive(Clone, Debug)]
pub enum LinkingOutcome {
    /// The method ended up primary, linked, or standalone; `user` is the
    /// post-resolution view and its id is the caller's user id from now on.
    Ok { user: User },
    /// Session-priority linking hit a conflict that must abort the attempt.
    Rejected { reason: ReasonCode },
}

/// Read-only answer to "could this method become primary right now".
#[derive(Clone, Debug)]
pub enum CanCreatePrimaryUser {
    Ok { was_already_primary: bool },
    RecipeUserAlreadyLinked { primary_user_id: Uuid },
    AccountInfoAlreadyAssociated { primary_user_id: Uuid },
}

#[derive(Clone)]
pub struct AccountLinker {
    repo: Arc<dyn UserRepository>,
    policy: Arc<dyn LinkingPolicy>,
    verification: VerificationTracker,
}

impl AccountLinker {
    #[must_use]
    pub fn new(repo: Arc<dyn UserRepository>, policy: Arc<dyn LinkingPolicy>) -> Self {
        let verification = VerificationTracker::new(repo.clone());
        Self {
            repo,
            policy,
            verification,
        }
    }

    #[must_use]
    pub fn repo(&self) -> &Arc<dyn UserRepository> {
        &self.repo
    }

    #[must_use]
    pub fn verification(&self) -> &VerificationTracker {
        &self.verification
    }

    /// Pre-check for sign-up: refuse when creating this account would plant
    /// an unverifiable duplicate next to existing accounts it would later
    /// link with.
    ///
    /// # Errors
    /// Fails on storage errors only; a `false` answer is a policy decision.
    pub async fn is_sign_up_allowed(
        &self,
        tenant_id: &str,
        account: &AccountInfoWithRecipe,
        is_verified: bool,
        session: Option<&SessionRef>,
        options: &LinkingOptions,
    ) -> Result<bool, EngineError> {
        self.is_account_allowed(tenant_id, account, is_verified, session, options, None)
            .await
    }

    /// Pre-check for sign-in of an existing standalone method: the account
    /// may have become linkable (and therefore risky) since it signed up.
    ///
    /// # Errors
    /// Fails when the login method does not exist or storage fails.
    pub async fn is_sign_in_allowed(
        &self,
        tenant_id: &str,
        recipe_user_id: Uuid,
        session: Option<&SessionRef>,
        options: &LinkingOptions,
    ) -> Result<bool, EngineError> {
        let user = self
            .repo
            .get_user_by_recipe_user_id(recipe_user_id)
            .await
            .map_err(EngineError::Repo)?
            .ok_or(RepoError::UnknownLoginMethod(recipe_user_id))?;
        if user.is_primary_user {
            return Ok(true);
        }
        let method = user
            .login_method(recipe_user_id)
            .ok_or(RepoError::UnknownLoginMethod(recipe_user_id))?;
        let account = AccountInfoWithRecipe {
            recipe_id: method.recipe_id,
            info: method.account_info(),
        };
        self.is_account_allowed(tenant_id, &account, method.verified, session, options, Some(user.id))
            .await
    }

    /// Shared allow-check. `exclude_user` removes the acting user itself
    /// from the candidate scan on sign-in.
    async fn is_account_allowed(
        &self,
        tenant_id: &str,
        account: &AccountInfoWithRecipe,
        is_verified: bool,
        session: Option<&SessionRef>,
        options: &LinkingOptions,
        exclude_user: Option<Uuid>,
    ) -> Result<bool, EngineError> {
        let candidates: Vec<User> = self
            .repo
            .list_users_by_account_info(tenant_id, &account.info)
            .await?
            .into_iter()
            .filter(|user| Some(user.id) != exclude_user)
            .collect();
        if candidates.is_empty() {
            return Ok(true);
        }
        let primary = candidates.iter().find(|user| user.is_primary_user);
        match primary {
            Some(primary) => {
                match self.policy.should_do_automatic_account_linking(
                    account,
                    Some(primary),
                    session,
                    tenant_id,
                    options,
                ) {
                    PolicyDecision::DoNotLink => Ok(true),
                    PolicyDecision::Link {
                        require_verification: false,
                    } => Ok(true),
                    PolicyDecision::Link { .. } => {
                        // Linking into this primary is on the table, so the
                        // value must be verified on both sides: an unverified
                        // party on either end is an account-takeover vector.
                        let verified_in_primary = primary
                            .login_methods
                            .iter()
                            .any(|method| method.shares_contact_value(&account.info) && method.verified);
                        if is_verified && verified_in_primary {
                            Ok(true)
                        } else {
                            debug!(tenant_id, "blocking attempt: primary user owns this account info");
                            Ok(false)
                        }
                    }
                }
            }
            None => {
                match self.policy.should_do_automatic_account_linking(
                    account,
                    None,
                    session,
                    tenant_id,
                    options,
                ) {
                    PolicyDecision::DoNotLink => Ok(true),
                    PolicyDecision::Link {
                        require_verification: false,
                    } => Ok(true),
                    PolicyDecision::Link { .. } => {
                        if !is_verified {
                            // The new method stays standalone until verified,
                            // which is always safe.
                            return Ok(true);
                        }
                        // The new method is verified and will become the
                        // primary; refuse while unverified holders of the
                        // same contact value exist, since linking them in
                        // later would hand them this identity.
                        let unverified_holder = candidates.iter().any(|user| {
                            user.login_methods
                                .iter()
                                .any(|method| method.shares_contact_value(&account.info) && !method.verified)
                        });
                        if unverified_holder {
                            debug!(tenant_id, "blocking attempt: unverified holders of this account info exist");
                        }
                        Ok(!unverified_holder)
                    }
                }
            }
        }
    }

    /// Read-only variant of [`Self::create_primary_user`].
    ///
    /// # Errors
    /// Fails when the login method does not exist or storage fails.
    pub async fn can_create_primary_user(&self, recipe_user_id: Uuid) -> Result<CanCreatePrimaryUser, EngineError> {
        let user = self
            .repo
            .get_user_by_recipe_user_id(recipe_user_id)
            .await?
            .ok_or(RepoError::UnknownLoginMethod(recipe_user_id))?;
        if user.is_primary_user {
            if user.id == recipe_user_id {
                return Ok(CanCreatePrimaryUser::Ok {
                    was_already_primary: true,
                });
            }
            return Ok(CanCreatePrimaryUser::RecipeUserAlreadyLinked {
                primary_user_id: user.id,
            });
        }
        let method = user
            .login_method(recipe_user_id)
            .ok_or(RepoError::UnknownLoginMethod(recipe_user_id))?;
        for tenant_id in &method.tenant_ids {
            let conflict = self
                .repo
                .list_users_by_account_info(tenant_id, &method.account_info())
                .await?
                .into_iter()
                .find(|candidate| candidate.is_primary_user && candidate.id != user.id);
            if let Some(conflict) = conflict {
                return Ok(CanCreatePrimaryUser::AccountInfoAlreadyAssociated {
                    primary_user_id: conflict.id,
                });
            }
        }
        Ok(CanCreatePrimaryUser::Ok {
            was_already_primary: false,
        })
    }

    /// Promote a recipe user to primary.
    ///
    /// # Errors
    /// Fails when the login method does not exist or storage fails.
    pub async fn create_primary_user(&self, recipe_user_id: Uuid) -> Result<CreatePrimaryUserResult, EngineError> {
        Ok(self.repo.create_primary_user(recipe_user_id).await?)
    }

    /// Link a recipe user into a primary user, spreading verification to
    /// methods that share a now-verified contact value. Idempotent for an
    /// existing identical link.
    ///
    /// # Errors
    /// Fails when the login method does not exist or storage fails.
    pub async fn link_accounts(
        &self,
        recipe_user_id: Uuid,
        primary_user_id: Uuid,
    ) -> Result<LinkAccountsResult, EngineError> {
        let result = self.repo.link_accounts(recipe_user_id, primary_user_id).await?;
        match result {
            LinkAccountsResult::Ok {
                user,
                accounts_already_linked: false,
            } => {
                // The merged view already carries every sibling, so
                // inheritance is computed locally and written back without
                // extra reads.
                let mut spread = false;
                for method in &user.login_methods {
                    if method.verified {
                        continue;
                    }
                    for value in method.contact_values() {
                        let verified_sibling = user.login_methods.iter().any(|sibling| {
                            sibling.recipe_user_id != method.recipe_user_id
                                && sibling.verified
                                && sibling.contact_values().any(|other| other == value)
                        });
                        if verified_sibling {
                            self.repo.set_verified(method.recipe_user_id, value, true).await?;
                            spread = true;
                        }
                    }
                }
                let user = if spread {
                    self.repo
                        .get_user_by_recipe_user_id(recipe_user_id)
                        .await?
                        .ok_or(RepoError::UnknownUser(recipe_user_id))?
                } else {
                    user
                };
                Ok(LinkAccountsResult::Ok {
                    user,
                    accounts_already_linked: false,
                })
            }
            other => Ok(other),
        }
    }
}
