//! Primary-user resolution after a successful authentication.
//!
//! Rules, in order: the session user (when one is supplied) outranks
//! account-info candidates as the link target; among account-info candidates
//! the oldest user wins; a method that is already linked or primary is never
//! moved. Conflicts on the sessionless path degrade to a standalone user;
//! conflicts on the session path abort the attempt with a numbered reason.

use tracing::{debug, warn};
use uuid::Uuid;

use crate::account::{RecipeId, User};
use crate::error::{EngineError, ReasonCode, SessionError, EMAIL_VERIFIED_CLAIM_ID};
use crate::policy::{AccountInfoWithRecipe, LinkingOptions, PolicyDecision};
use crate::repo::{CreatePrimaryUserResult, LinkAccountsResult, RepoError};
use crate::session::SessionRef;

use super::{AccountLinker, LinkingOutcome};

/// Reason used when linking the new method to the session user loses a
/// race or hits a pre-existing conflict.
const fn session_link_conflict_code(recipe_id: RecipeId) -> ReasonCode {
    match recipe_id {
        RecipeId::Passwordless => ReasonCode::PasswordlessSessionLink,
        RecipeId::ThirdParty => ReasonCode::ThirdPartySessionLink,
        RecipeId::EmailPassword => ReasonCode::SessionUserConflict,
    }
}

impl AccountLinker {
    /// Resolve the just-authenticated login method into its final user.
    ///
    /// # Errors
    /// Returns [`EngineError::Session`] when the session user vanished, and
    /// [`EngineError::InvalidClaims`] when linking requires a verified value
    /// the caller does not have. Expected conflicts come back as
    /// [`LinkingOutcome::Rejected`].
    pub async fn resolve(
        &self,
        tenant_id: &str,
        recipe_user_id: Uuid,
        session: Option<&SessionRef>,
        options: &LinkingOptions,
    ) -> Result<LinkingOutcome, EngineError> {
        let user = self
            .repo()
            .get_user_by_recipe_user_id(recipe_user_id)
            .await?
            .ok_or(RepoError::UnknownLoginMethod(recipe_user_id))?;

        if user.is_primary_user {
            // Nothing to decide; just let verification flow between the
            // already-linked methods.
            if self.verification().inherit_from_siblings(recipe_user_id).await? {
                let user = self
                    .repo()
                    .get_user_by_recipe_user_id(recipe_user_id)
                    .await?
                    .ok_or(RepoError::UnknownLoginMethod(recipe_user_id))?;
                return Ok(LinkingOutcome::Ok { user });
            }
            return Ok(LinkingOutcome::Ok { user });
        }

        match session {
            Some(session) => self.link_to_session_user(tenant_id, user, session, options).await,
            None => self
                .try_link_by_account_info(tenant_id, user, None, options)
                .await
                .map(|user| LinkingOutcome::Ok { user }),
        }
    }

    /// Sessionless path: pick the oldest matching candidate, promote or
    /// link per policy, and fall back to standalone on any conflict.
    async fn try_link_by_account_info(
        &self,
        tenant_id: &str,
        user: User,
        session: Option<&SessionRef>,
        options: &LinkingOptions,
    ) -> Result<User, EngineError> {
        let recipe_user_id = user.login_methods[0].recipe_user_id;
        let method = user
            .login_method(recipe_user_id)
            .ok_or(RepoError::UnknownLoginMethod(recipe_user_id))?
            .clone();
        let account = AccountInfoWithRecipe {
            recipe_id: method.recipe_id,
            info: method.account_info(),
        };

        // Candidates come back oldest first, so the first primary is the
        // oldest primary.
        let target = self
            .repo()
            .list_users_by_account_info(tenant_id, &account.info)
            .await?
            .into_iter()
            .find(|candidate| candidate.is_primary_user && candidate.id != user.id);

        match target {
            Some(target) => {
                match self.policy.should_do_automatic_account_linking(
                    &account,
                    Some(&target),
                    session,
                    tenant_id,
                    options,
                ) {
                    PolicyDecision::DoNotLink => Ok(user),
                    PolicyDecision::Link { require_verification } => {
                        if require_verification && !method.verified {
                            debug!(%recipe_user_id, "leaving method standalone until verified");
                            return Ok(user);
                        }
                        match self.link_accounts(recipe_user_id, target.id).await? {
                            LinkAccountsResult::Ok { user, .. }
                            | LinkAccountsResult::RecipeUserAlreadyLinked { user, .. } => Ok(user),
                            LinkAccountsResult::AccountInfoAlreadyAssociated { .. }
                            | LinkAccountsResult::TargetNotPrimary => {
                                // Lost a race; re-read once and stay standalone.
                                warn!(%recipe_user_id, "link lost a concurrent topology change");
                                Ok(self
                                    .repo()
                                    .get_user_by_recipe_user_id(recipe_user_id)
                                    .await?
                                    .ok_or(RepoError::UnknownLoginMethod(recipe_user_id))?)
                            }
                        }
                    }
                }
            }
            None => {
                match self.policy.should_do_automatic_account_linking(
                    &account,
                    None,
                    session,
                    tenant_id,
                    options,
                ) {
                    PolicyDecision::DoNotLink => Ok(user),
                    PolicyDecision::Link { require_verification } => {
                        if require_verification && !method.verified {
                            debug!(%recipe_user_id, "leaving method standalone until verified");
                            return Ok(user);
                        }
                        match self.repo().create_primary_user(recipe_user_id).await? {
                            CreatePrimaryUserResult::Ok { user, .. } => Ok(user),
                            CreatePrimaryUserResult::RecipeUserAlreadyLinked { .. }
                            | CreatePrimaryUserResult::AccountInfoAlreadyAssociated { .. } => {
                                warn!(%recipe_user_id, "promotion lost a concurrent topology change");
                                Ok(self
                                    .repo()
                                    .get_user_by_recipe_user_id(recipe_user_id)
                                    .await?
                                    .ok_or(RepoError::UnknownLoginMethod(recipe_user_id))?)
                            }
                        }
                    }
                }
            }
        }
    }

    /// Session path: the session user is the link target. The session user
    /// is promoted to primary first when needed; a policy veto at either
    /// step falls back to the sessionless path.
    async fn link_to_session_user(
        &self,
        tenant_id: &str,
        user: User,
        session: &SessionRef,
        options: &LinkingOptions,
    ) -> Result<LinkingOutcome, EngineError> {
        let recipe_user_id = user.login_methods[0].recipe_user_id;
        let method = user
            .login_method(recipe_user_id)
            .ok_or(RepoError::UnknownLoginMethod(recipe_user_id))?
            .clone();

        let mut session_user = self
            .repo()
            .get_user(session.user_id)
            .await?
            .ok_or(EngineError::Session(SessionError::Unauthorised))?;

        if !session_user.is_primary_user {
            let session_method = session_user.login_methods[0].clone();
            let session_account = AccountInfoWithRecipe {
                recipe_id: session_method.recipe_id,
                info: session_method.account_info(),
            };
            match self.policy.should_do_automatic_account_linking(
                &session_account,
                None,
                Some(session),
                tenant_id,
                options,
            ) {
                PolicyDecision::DoNotLink => {
                    return self
                        .try_link_by_account_info(tenant_id, user, Some(session), options)
                        .await
                        .map(|user| LinkingOutcome::Ok { user });
                }
                PolicyDecision::Link { require_verification } => {
                    if require_verification && !session_method.verified {
                        return Err(EngineError::InvalidClaims {
                            claim_id: EMAIL_VERIFIED_CLAIM_ID,
                        });
                    }
                }
            }

            // Another primary owning the session user's account info means
            // the session user can never become primary here.
            let conflict = self
                .repo()
                .list_users_by_account_info(tenant_id, &session_account.info)
                .await?
                .into_iter()
                .any(|candidate| candidate.is_primary_user && candidate.id != session_user.id);
            if conflict {
                return Ok(LinkingOutcome::Rejected {
                    reason: ReasonCode::SessionUserConflict,
                });
            }

            match self
                .repo()
                .create_primary_user(session_method.recipe_user_id)
                .await?
            {
                CreatePrimaryUserResult::Ok { user, .. } => session_user = user,
                CreatePrimaryUserResult::RecipeUserAlreadyLinked { .. } => {
                    session_user = self
                        .repo()
                        .get_user(session.user_id)
                        .await?
                        .ok_or(EngineError::Session(SessionError::Unauthorised))?;
                }
                CreatePrimaryUserResult::AccountInfoAlreadyAssociated { .. } => {
                    return Ok(LinkingOutcome::Rejected {
                        reason: ReasonCode::SessionUserPromotionFailed,
                    });
                }
            }
        }

        let account = AccountInfoWithRecipe {
            recipe_id: method.recipe_id,
            info: method.account_info(),
        };
        match self.policy.should_do_automatic_account_linking(
            &account,
            Some(&session_user),
            Some(session),
            tenant_id,
            options,
        ) {
            PolicyDecision::DoNotLink => {
                return self
                    .try_link_by_account_info(tenant_id, user, Some(session), options)
                    .await
                    .map(|user| LinkingOutcome::Ok { user });
            }
            PolicyDecision::Link { require_verification } => {
                if require_verification && !method.verified {
                    return Err(EngineError::InvalidClaims {
                        claim_id: EMAIL_VERIFIED_CLAIM_ID,
                    });
                }
            }
        }

        match self.link_accounts(recipe_user_id, session_user.id).await? {
            LinkAccountsResult::Ok { user, .. } => Ok(LinkingOutcome::Ok { user }),
            LinkAccountsResult::RecipeUserAlreadyLinked { primary_user_id, user } => {
                if primary_user_id == session_user.id {
                    Ok(LinkingOutcome::Ok { user })
                } else {
                    Ok(LinkingOutcome::Rejected {
                        reason: session_link_conflict_code(method.recipe_id),
                    })
                }
            }
            LinkAccountsResult::AccountInfoAlreadyAssociated { .. } => Ok(LinkingOutcome::Rejected {
                reason: session_link_conflict_code(method.recipe_id),
            }),
            LinkAccountsResult::TargetNotPrimary => Ok(LinkingOutcome::Rejected {
                reason: ReasonCode::SessionUserPromotionFailed,
            }),
        }
    }
}
