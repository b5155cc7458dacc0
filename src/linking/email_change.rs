//! Guard for changing a login method's email or phone number.
//!
//! The check runs before the update is written. It protects two invariants:
//! a contact value never maps to two primary users on a tenant, and an
//! unverified value can never be used to step into someone else's identity.

use tracing::debug;
use uuid::Uuid;

use crate::account::AccountInfo;
use crate::error::{EmailChangeReason, EngineError};
use crate::policy::{AccountInfoWithRecipe, LinkingOptions, PolicyDecision};
use crate::repo::{ContactUpdate, RepoError};
use crate::session::SessionRef;

use super::AccountLinker;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EmailChangeCheck {
    Allowed,
    NotAllowed { reason: EmailChangeReason },
}

impl AccountLinker {
    /// Whether `recipe_user_id` may take `update` as its new contact value.
    /// Phone numbers go through the same rules as emails.
    ///
    /// # Errors
    /// Fails when the login method does not exist or storage fails; a
    /// refusal is [`EmailChangeCheck::NotAllowed`], not an error.
    pub async fn is_email_change_allowed(
        &self,
        recipe_user_id: Uuid,
        update: &ContactUpdate,
        session: Option<&SessionRef>,
        options: &LinkingOptions,
    ) -> Result<EmailChangeCheck, EngineError> {
        let user = self
            .repo()
            .get_user_by_recipe_user_id(recipe_user_id)
            .await?
            .ok_or(RepoError::UnknownLoginMethod(recipe_user_id))?;
        let method = user
            .login_method(recipe_user_id)
            .ok_or(RepoError::UnknownLoginMethod(recipe_user_id))?
            .clone();

        let (new_value, new_info) = match update {
            ContactUpdate::Email(email) => (email.as_str(), AccountInfo::from_email(email.clone())),
            ContactUpdate::PhoneNumber(phone_number) => {
                (phone_number.as_str(), AccountInfo::from_phone_number(phone_number.clone()))
            }
        };
        // A previously held (or pre-attested) value keeps its record.
        let is_new_value_verified = self.repo().is_verified(recipe_user_id, new_value).await?;

        for tenant_id in &method.tenant_ids {
            let holders = self
                .repo()
                .list_users_by_account_info(tenant_id, &new_info)
                .await?;

            if user.is_primary_user {
                if holders.iter().any(|holder| holder.is_primary_user && holder.id != user.id) {
                    debug!(%recipe_user_id, tenant_id, "contact value belongs to another primary user");
                    return Ok(EmailChangeCheck::NotAllowed {
                        reason: EmailChangeReason::PrimaryUserConflict,
                    });
                }
                if !is_new_value_verified && holders.iter().any(|holder| holder.id != user.id) {
                    debug!(%recipe_user_id, tenant_id, "unverified contact value held by another user");
                    return Ok(EmailChangeCheck::NotAllowed {
                        reason: EmailChangeReason::AccountTakeoverRisk,
                    });
                }
                continue;
            }

            // Standalone method: dangerous only when a primary user owns the
            // value and this method would later link into it unverified.
            let primary_holder = holders
                .iter()
                .find(|holder| holder.is_primary_user && holder.id != user.id);
            let Some(primary_holder) = primary_holder else {
                continue;
            };
            if is_new_value_verified {
                continue;
            }
            let account = AccountInfoWithRecipe {
                recipe_id: method.recipe_id,
                info: new_info.clone(),
            };
            match self.policy.should_do_automatic_account_linking(
                &account,
                Some(primary_holder),
                session,
                tenant_id,
                options,
            ) {
                PolicyDecision::DoNotLink
                | PolicyDecision::Link {
                    require_verification: false,
                } => continue,
                PolicyDecision::Link { .. } => {
                    debug!(%recipe_user_id, tenant_id, "unverified contact value owned by a primary user");
                    return Ok(EmailChangeCheck::NotAllowed {
                        reason: EmailChangeReason::AccountTakeoverRisk,
                    });
                }
            }
        }

        Ok(EmailChangeCheck::Allowed)
    }
}
