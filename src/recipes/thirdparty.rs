//! Third-party (social/enterprise) recipe.
//!
//! One operation covers both sign-in and sign-up: the provider identity
//! `(provider_id, provider_user_id)` decides which one runs. A changed
//! provider email is applied to the existing method only when the change
//! guard allows it.

use tracing::debug;
use uuid::Uuid;

use crate::account::{AccountInfo, RecipeId, ThirdPartyInfo, User};
use crate::error::{EngineError, ReasonCode};
use crate::linking::{AccountLinker, EmailChangeCheck, LinkingOutcome};
use crate::policy::{AccountInfoWithRecipe, LinkingOptions};
use crate::repo::{ContactUpdate, NewLoginMethod};
use crate::session::{now_ms, resolve_session_for_linking, SessionRef};

use super::utils::{normalize_email, valid_email};

#[derive(Clone, Debug)]
pub enum SignInUpOutcome {
    Ok {
        user: User,
        recipe_user_id: Uuid,
        created_new_user: bool,
    },
    NotAllowed { reason: ReasonCode },
    FieldError { message: String },
}

pub struct ThirdParty {
    linker: AccountLinker,
}

impl ThirdParty {
    #[must_use]
    pub fn new(linker: AccountLinker) -> Self {
        Self { linker }
    }

    /// Sign in or up with a verified provider identity.
    ///
    /// `email_verified_by_provider` marks the email verified when true;
    /// false never clears an existing record.
    ///
    /// # Errors
    /// Fails on session errors, claim failures, and storage errors.
    #[allow(clippy::too_many_arguments)]
    pub async fn sign_in_up(
        &self,
        tenant_id: &str,
        provider_id: &str,
        provider_user_id: &str,
        email: &str,
        email_verified_by_provider: bool,
        session: Option<&SessionRef>,
        should_try_linking_with_session_user: Option<bool>,
        options: &LinkingOptions,
    ) -> Result<SignInUpOutcome, EngineError> {
        let email = normalize_email(email);
        if !valid_email(&email) {
            return Ok(SignInUpOutcome::FieldError {
                message: "Email is invalid".to_string(),
            });
        }
        let session = resolve_session_for_linking(session, should_try_linking_with_session_user, now_ms())
            .map_err(EngineError::Session)?;

        let identity = AccountInfo::from_third_party(provider_id, provider_user_id);
        let existing = self
            .linker
            .repo()
            .list_users_by_account_info(tenant_id, &identity)
            .await?
            .into_iter()
            .find_map(|user| {
                user.login_methods
                    .iter()
                    .find(|method| method.has_same_third_party_as(identity.third_party.as_ref()))
                    .map(|method| (method.recipe_user_id, method.email.clone()))
            });

        match existing {
            Some((recipe_user_id, current_email)) => {
                if current_email.as_deref() != Some(email.as_str()) {
                    let update = ContactUpdate::Email(email.clone());
                    match self
                        .linker
                        .is_email_change_allowed(recipe_user_id, &update, session.as_ref(), options)
                        .await?
                    {
                        EmailChangeCheck::Allowed => {
                            self.linker.repo().update_contact_info(recipe_user_id, update).await?;
                        }
                        EmailChangeCheck::NotAllowed { .. } => {
                            debug!(tenant_id, provider_id, "provider email change refused");
                            return Ok(SignInUpOutcome::NotAllowed {
                                reason: ReasonCode::ThirdPartyEmailChange,
                            });
                        }
                    }
                }
                if email_verified_by_provider {
                    self.linker.verification().mark_verified(recipe_user_id, &email).await?;
                }

                if !self
                    .linker
                    .is_sign_in_allowed(tenant_id, recipe_user_id, session.as_ref(), options)
                    .await?
                {
                    debug!(tenant_id, provider_id, "third-party sign-in refused by pre-check");
                    return Ok(SignInUpOutcome::NotAllowed {
                        reason: ReasonCode::ThirdPartySignInUp,
                    });
                }

                match self
                    .linker
                    .resolve(tenant_id, recipe_user_id, session.as_ref(), options)
                    .await?
                {
                    LinkingOutcome::Ok { user } => Ok(SignInUpOutcome::Ok {
                        user,
                        recipe_user_id,
                        created_new_user: false,
                    }),
                    LinkingOutcome::Rejected { reason } => Ok(SignInUpOutcome::NotAllowed { reason }),
                }
            }
            None => {
                let account = AccountInfoWithRecipe {
                    recipe_id: RecipeId::ThirdParty,
                    info: AccountInfo {
                        email: Some(email.clone()),
                        phone_number: None,
                        third_party: identity.third_party.clone(),
                    },
                };
                if !self
                    .linker
                    .is_sign_up_allowed(tenant_id, &account, email_verified_by_provider, session.as_ref(), options)
                    .await?
                {
                    debug!(tenant_id, provider_id, "third-party sign-up refused by pre-check");
                    return Ok(SignInUpOutcome::NotAllowed {
                        reason: ReasonCode::ThirdPartySignInUp,
                    });
                }

                let user = self
                    .linker
                    .repo()
                    .create_user(
                        tenant_id,
                        NewLoginMethod {
                            recipe_id: RecipeId::ThirdParty,
                            email: Some(email),
                            phone_number: None,
                            third_party: Some(ThirdPartyInfo {
                                provider_id: provider_id.to_string(),
                                provider_user_id: provider_user_id.to_string(),
                            }),
                            verified: email_verified_by_provider,
                            password_hash: None,
                        },
                    )
                    .await?;
                let recipe_user_id = user.login_methods[0].recipe_user_id;

                match self
                    .linker
                    .resolve(tenant_id, recipe_user_id, session.as_ref(), options)
                    .await?
                {
                    LinkingOutcome::Ok { user } => Ok(SignInUpOutcome::Ok {
                        user,
                        recipe_user_id,
                        created_new_user: true,
                    }),
                    LinkingOutcome::Rejected { reason } => Ok(SignInUpOutcome::NotAllowed { reason }),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{LinkIfVerified, LinkingOptions};
    use crate::repo::InMemoryRepository;
    use std::sync::Arc;

    fn third_party() -> ThirdParty {
        let repo = Arc::new(InMemoryRepository::new());
        ThirdParty::new(AccountLinker::new(repo, Arc::new(LinkIfVerified)))
    }

    #[tokio::test]
    async fn repeated_sign_in_is_stable() -> anyhow::Result<()> {
        let recipe = third_party();
        let opts = LinkingOptions::default();
        let first = recipe
            .sign_in_up("public", "google", "abcd", "a@example.com", true, None, None, &opts)
            .await?;
        let SignInUpOutcome::Ok { user, created_new_user, .. } = first else {
            anyhow::bail!("expected ok");
        };
        assert!(created_new_user);
        let second = recipe
            .sign_in_up("public", "google", "abcd", "a@example.com", true, None, None, &opts)
            .await?;
        let SignInUpOutcome::Ok {
            user: again,
            created_new_user,
            ..
        } = second
        else {
            anyhow::bail!("expected ok");
        };
        assert!(!created_new_user);
        assert_eq!(again.id, user.id);
        Ok(())
    }

    #[tokio::test]
    async fn provider_verification_never_unverifies() -> anyhow::Result<()> {
        let recipe = third_party();
        let opts = LinkingOptions::default();
        let first = recipe
            .sign_in_up("public", "google", "abcd", "a@example.com", true, None, None, &opts)
            .await?;
        let SignInUpOutcome::Ok { recipe_user_id, .. } = first else {
            anyhow::bail!("expected ok");
        };
        // Provider stops asserting verification; the record stays.
        let second = recipe
            .sign_in_up("public", "google", "abcd", "a@example.com", false, None, None, &opts)
            .await?;
        let SignInUpOutcome::Ok { user, .. } = second else {
            anyhow::bail!("expected ok");
        };
        let method = user.login_method(recipe_user_id).unwrap();
        assert!(method.verified);
        Ok(())
    }
}
