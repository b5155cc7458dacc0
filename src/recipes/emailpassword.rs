//! Email/password recipe.
//!
//! Password-reset tokens live in an in-process store, like passwordless
//! codes. A token may target a user with no password method yet; consuming
//! it then attaches one and links it in without consulting the policy,
//! since acting on the emailed link proves ownership of the address.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::account::{AccountInfo, RecipeId, User};
use crate::error::{EmailChangeReason, EngineError, ReasonCode};
use crate::linking::{AccountLinker, EmailChangeCheck, LinkingOutcome};
use crate::policy::{AccountInfoWithRecipe, LinkingOptions};
use crate::repo::{ContactUpdate, CreatePrimaryUserResult, LinkAccountsResult, NewLoginMethod, RepoError};
use crate::session::{now_ms, resolve_session_for_linking, SessionRef};

use super::password::PasswordHasher;
use super::utils::{generate_reset_token, normalize_email, valid_email};

const MIN_PASSWORD_LEN: usize = 8;
const RESET_TOKEN_LIFETIME_MS: i64 = 60 * 60 * 1_000;

#[derive(Clone, Debug)]
pub enum SignUpOutcome {
    Ok {
        user: User,
        recipe_user_id: Uuid,
    },
    EmailAlreadyExists,
    NotAllowed { reason: ReasonCode },
    FieldError { message: String },
}

#[derive(Clone, Debug)]
pub enum SignInOutcome {
    Ok {
        user: User,
        recipe_user_id: Uuid,
    },
    WrongCredentials,
    NotAllowed { reason: ReasonCode },
}

#[derive(Clone, Debug)]
pub enum UpdateOutcome {
    Ok,
    EmailAlreadyExists,
    EmailChangeNotAllowed { reason: EmailChangeReason },
    FieldError { message: String },
}

#[derive(Clone, Debug)]
pub enum CreateResetTokenOutcome {
    Ok { token: String, user_id: Uuid },
    /// The only holders of the email cannot safely receive a password
    /// method (the value is unverified on all of them).
    NotAllowed,
    UnknownEmail,
}

#[derive(Clone, Debug)]
pub enum ResetPasswordOutcome {
    Ok { user: User, recipe_user_id: Uuid },
    InvalidToken,
    FieldError { message: String },
}

struct ResetTokenEntry {
    tenant_id: String,
    user_id: Uuid,
    email: String,
    /// Set when the target already has a password method for the email.
    ep_recipe_user_id: Option<Uuid>,
    created_at: i64,
}

pub struct EmailPassword {
    linker: AccountLinker,
    hasher: Arc<dyn PasswordHasher>,
    reset_tokens: Mutex<HashMap<String, ResetTokenEntry>>,
}

impl EmailPassword {
    #[must_use]
    pub fn new(linker: AccountLinker, hasher: Arc<dyn PasswordHasher>) -> Self {
        Self {
            linker,
            hasher,
            reset_tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Sign up with email and password, then resolve the new method into
    /// its final user.
    ///
    /// # Errors
    /// Fails on session errors, claim failures, and storage errors.
    pub async fn sign_up(
        &self,
        tenant_id: &str,
        email: &str,
        password: &str,
        session: Option<&SessionRef>,
        should_try_linking_with_session_user: Option<bool>,
        options: &LinkingOptions,
    ) -> Result<SignUpOutcome, EngineError> {
        let email = normalize_email(email);
        if !valid_email(&email) {
            return Ok(SignUpOutcome::FieldError {
                message: "Email is invalid".to_string(),
            });
        }
        if password.len() < MIN_PASSWORD_LEN {
            return Ok(SignUpOutcome::FieldError {
                message: "Password must contain at least 8 characters".to_string(),
            });
        }
        let session = resolve_session_for_linking(session, should_try_linking_with_session_user, now_ms())
            .map_err(EngineError::Session)?;

        let account = AccountInfoWithRecipe {
            recipe_id: RecipeId::EmailPassword,
            info: crate::account::AccountInfo::from_email(email.clone()),
        };
        let holders = self
            .linker
            .repo()
            .list_users_by_account_info(tenant_id, &account.info)
            .await?;
        let duplicate = holders.iter().any(|user| {
            user.login_methods
                .iter()
                .any(|method| method.recipe_id == RecipeId::EmailPassword && method.has_same_email_as(Some(&email)))
        });
        if duplicate {
            return Ok(SignUpOutcome::EmailAlreadyExists);
        }

        // A brand-new emailpassword method is always unverified.
        if !self
            .linker
            .is_sign_up_allowed(tenant_id, &account, false, session.as_ref(), options)
            .await?
        {
            debug!(tenant_id, "emailpassword sign-up refused by pre-check");
            return Ok(SignUpOutcome::NotAllowed {
                reason: ReasonCode::EmailPasswordSignUp,
            });
        }

        let hash = self.hasher.hash(password).map_err(RepoError::Storage)?;
        let user = self
            .linker
            .repo()
            .create_user(
                tenant_id,
                NewLoginMethod {
                    recipe_id: RecipeId::EmailPassword,
                    email: Some(email),
                    phone_number: None,
                    third_party: None,
                    verified: false,
                    password_hash: Some(hash),
                },
            )
            .await?;
        let recipe_user_id = user.login_methods[0].recipe_user_id;

        match self
            .linker
            .resolve(tenant_id, recipe_user_id, session.as_ref(), options)
            .await?
        {
            LinkingOutcome::Ok { user } => Ok(SignUpOutcome::Ok { user, recipe_user_id }),
            LinkingOutcome::Rejected { reason } => Ok(SignUpOutcome::NotAllowed { reason }),
        }
    }

    /// Sign in with email and password.
    ///
    /// # Errors
    /// Fails on session errors, claim failures, and storage errors.
    pub async fn sign_in(
        &self,
        tenant_id: &str,
        email: &str,
        password: &str,
        session: Option<&SessionRef>,
        should_try_linking_with_session_user: Option<bool>,
        options: &LinkingOptions,
    ) -> Result<SignInOutcome, EngineError> {
        let email = normalize_email(email);
        let holders = self
            .linker
            .repo()
            .list_users_by_account_info(tenant_id, &crate::account::AccountInfo::from_email(email.clone()))
            .await?;
        let method = holders.iter().find_map(|user| {
            user.login_methods
                .iter()
                .find(|method| method.recipe_id == RecipeId::EmailPassword && method.has_same_email_as(Some(&email)))
        });
        let Some(method) = method else {
            return Ok(SignInOutcome::WrongCredentials);
        };
        let recipe_user_id = method.recipe_user_id;

        let stored = self.linker.repo().password_hash(recipe_user_id).await?;
        let matches = match stored {
            Some(hash) => self.hasher.verify(password, &hash).map_err(RepoError::Storage)?,
            None => false,
        };
        if !matches {
            return Ok(SignInOutcome::WrongCredentials);
        }

        let session = resolve_session_for_linking(session, should_try_linking_with_session_user, now_ms())
            .map_err(EngineError::Session)?;

        if !self
            .linker
            .is_sign_in_allowed(tenant_id, recipe_user_id, session.as_ref(), options)
            .await?
        {
            debug!(tenant_id, "emailpassword sign-in refused by pre-check");
            return Ok(SignInOutcome::NotAllowed {
                reason: ReasonCode::EmailPasswordSignIn,
            });
        }

        match self
            .linker
            .resolve(tenant_id, recipe_user_id, session.as_ref(), options)
            .await?
        {
            LinkingOutcome::Ok { user } => Ok(SignInOutcome::Ok { user, recipe_user_id }),
            LinkingOutcome::Rejected { reason } => Ok(SignInOutcome::NotAllowed { reason }),
        }
    }

    /// Update the method's email, password, or both. The email change runs
    /// through the anti-takeover guard before anything is written.
    ///
    /// # Errors
    /// Fails when the login method does not exist or storage fails.
    pub async fn update_email_or_password(
        &self,
        recipe_user_id: Uuid,
        new_email: Option<&str>,
        new_password: Option<&str>,
        options: &LinkingOptions,
    ) -> Result<UpdateOutcome, EngineError> {
        if let Some(new_email) = new_email {
            let new_email = normalize_email(new_email);
            if !valid_email(&new_email) {
                return Ok(UpdateOutcome::FieldError {
                    message: "Email is invalid".to_string(),
                });
            }
            let update = ContactUpdate::Email(new_email.clone());
            match self
                .linker
                .is_email_change_allowed(recipe_user_id, &update, None, options)
                .await?
            {
                EmailChangeCheck::Allowed => {}
                EmailChangeCheck::NotAllowed { reason } => {
                    return Ok(UpdateOutcome::EmailChangeNotAllowed { reason });
                }
            }

            let user = self
                .linker
                .repo()
                .get_user_by_recipe_user_id(recipe_user_id)
                .await?
                .ok_or(RepoError::UnknownLoginMethod(recipe_user_id))?;
            let method = user
                .login_method(recipe_user_id)
                .ok_or(RepoError::UnknownLoginMethod(recipe_user_id))?;
            for tenant_id in &method.tenant_ids {
                let duplicate = self
                    .linker
                    .repo()
                    .list_users_by_account_info(tenant_id, &crate::account::AccountInfo::from_email(new_email.clone()))
                    .await?
                    .iter()
                    .any(|holder| {
                        holder.login_methods.iter().any(|other| {
                            other.recipe_user_id != recipe_user_id
                                && other.recipe_id == RecipeId::EmailPassword
                                && other.has_same_email_as(Some(&new_email))
                        })
                    });
                if duplicate {
                    return Ok(UpdateOutcome::EmailAlreadyExists);
                }
            }

            self.linker.repo().update_contact_info(recipe_user_id, update).await?;
            // The new value may already be verified on a linked sibling.
            self.linker.verification().inherit_from_siblings(recipe_user_id).await?;
        }

        if let Some(new_password) = new_password {
            if new_password.len() < MIN_PASSWORD_LEN {
                return Ok(UpdateOutcome::FieldError {
                    message: "Password must contain at least 8 characters".to_string(),
                });
            }
            let hash = self.hasher.hash(new_password).map_err(RepoError::Storage)?;
            self.linker.repo().update_password_hash(recipe_user_id, &hash).await?;
        }

        Ok(UpdateOutcome::Ok)
    }

    /// Issue a password-reset token for `email`.
    ///
    /// With several candidate users the token targets the one that already
    /// owns a password method for the email; failing that, the primary user
    /// if there is one, else the first-created holder. A target without a
    /// password method must hold the email verified, because consuming the
    /// token will attach one and link it in.
    ///
    /// # Errors
    /// Fails on storage errors only; refusals are outcome variants.
    pub async fn create_password_reset_token(
        &self,
        tenant_id: &str,
        email: &str,
    ) -> Result<CreateResetTokenOutcome, EngineError> {
        let email = normalize_email(email);
        let holders = self
            .linker
            .repo()
            .list_users_by_account_info(tenant_id, &AccountInfo::from_email(email.clone()))
            .await?;
        if holders.is_empty() {
            return Ok(CreateResetTokenOutcome::UnknownEmail);
        }

        let with_password = holders.iter().find_map(|user| {
            user.login_methods
                .iter()
                .find(|method| method.recipe_id == RecipeId::EmailPassword && method.has_same_email_as(Some(&email)))
                .map(|method| (user, Some(method.recipe_user_id)))
        });
        let (target, ep_recipe_user_id) = match with_password {
            Some(found) => found,
            None => {
                let Some(target) = holders.iter().find(|user| user.is_primary_user).or_else(|| holders.first())
                else {
                    return Ok(CreateResetTokenOutcome::UnknownEmail);
                };
                let verified = target
                    .login_methods
                    .iter()
                    .any(|method| method.has_same_email_as(Some(&email)) && method.verified);
                if !verified {
                    debug!(tenant_id, "password reset refused: email unverified on its holder");
                    return Ok(CreateResetTokenOutcome::NotAllowed);
                }
                (target, None)
            }
        };

        let token = generate_reset_token().map_err(RepoError::Storage)?;
        self.reset_tokens.lock().await.insert(
            token.clone(),
            ResetTokenEntry {
                tenant_id: tenant_id.to_string(),
                user_id: target.id,
                email,
                ep_recipe_user_id,
                created_at: now_ms(),
            },
        );
        Ok(CreateResetTokenOutcome::Ok {
            token,
            user_id: target.id,
        })
    }

    /// Consume a reset token and set the new password. Tokens are single
    /// use; an expired or unknown token is [`ResetPasswordOutcome::InvalidToken`].
    ///
    /// # Errors
    /// Fails on storage errors.
    pub async fn reset_password_using_token(
        &self,
        token: &str,
        new_password: &str,
    ) -> Result<ResetPasswordOutcome, EngineError> {
        if new_password.len() < MIN_PASSWORD_LEN {
            return Ok(ResetPasswordOutcome::FieldError {
                message: "Password must contain at least 8 characters".to_string(),
            });
        }
        let Some(entry) = self.reset_tokens.lock().await.remove(token) else {
            return Ok(ResetPasswordOutcome::InvalidToken);
        };
        if now_ms() - entry.created_at > RESET_TOKEN_LIFETIME_MS {
            return Ok(ResetPasswordOutcome::InvalidToken);
        }
        let hash = self.hasher.hash(new_password).map_err(RepoError::Storage)?;

        if let Some(recipe_user_id) = entry.ep_recipe_user_id {
            self.linker.repo().update_password_hash(recipe_user_id, &hash).await?;
            // Acting on the emailed token proves ownership of the address.
            self.linker.verification().mark_verified(recipe_user_id, &entry.email).await?;
            let user = self
                .linker
                .repo()
                .get_user_by_recipe_user_id(recipe_user_id)
                .await?
                .ok_or(RepoError::UnknownLoginMethod(recipe_user_id))?;
            return Ok(ResetPasswordOutcome::Ok { user, recipe_user_id });
        }

        // The target had no password method when the token was issued;
        // attach one and link it into the target.
        let created = self
            .linker
            .repo()
            .create_user(
                &entry.tenant_id,
                NewLoginMethod {
                    recipe_id: RecipeId::EmailPassword,
                    email: Some(entry.email.clone()),
                    phone_number: None,
                    third_party: None,
                    verified: true,
                    password_hash: Some(hash),
                },
            )
            .await?;
        let recipe_user_id = created.login_methods[0].recipe_user_id;

        let Some(target) = self.linker.repo().get_user(entry.user_id).await? else {
            return Ok(ResetPasswordOutcome::Ok {
                user: created,
                recipe_user_id,
            });
        };
        let target_id = if target.is_primary_user {
            target.id
        } else {
            let oldest = target.login_methods[0].recipe_user_id;
            match self.linker.create_primary_user(oldest).await? {
                CreatePrimaryUserResult::Ok { user, .. } => user.id,
                CreatePrimaryUserResult::RecipeUserAlreadyLinked { primary_user_id }
                | CreatePrimaryUserResult::AccountInfoAlreadyAssociated { primary_user_id } => primary_user_id,
            }
        };
        match self.linker.link_accounts(recipe_user_id, target_id).await? {
            LinkAccountsResult::Ok { user, .. } => Ok(ResetPasswordOutcome::Ok { user, recipe_user_id }),
            other => {
                debug!(?other, "reset token target could not be linked; password method stays standalone");
                let user = self
                    .linker
                    .repo()
                    .get_user_by_recipe_user_id(recipe_user_id)
                    .await?
                    .ok_or(RepoError::UnknownLoginMethod(recipe_user_id))?;
                Ok(ResetPasswordOutcome::Ok { user, recipe_user_id })
            }
        }
    }
}
