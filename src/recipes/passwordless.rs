//! Passwordless (OTP over email or SMS) recipe.
//!
//! Codes live in an in-process store keyed by device id. Consuming a code
//! proves ownership of the contact value, so the login method comes out
//! verified.

use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::account::{AccountInfo, RecipeId, User};
use crate::error::{EngineError, ReasonCode};
use crate::linking::{AccountLinker, LinkingOutcome};
use crate::policy::{AccountInfoWithRecipe, LinkingOptions};
use crate::repo::NewLoginMethod;
use crate::session::{now_ms, resolve_session_for_linking, SessionRef};

use super::utils::{generate_otp, normalize_email, valid_email, valid_phone_number};

const CODE_LIFETIME_MS: i64 = 15 * 60 * 1_000;
const MAX_CODE_ATTEMPTS: u32 = 5;

/// Where the one-time code is delivered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PasswordlessContact {
    Email(String),
    PhoneNumber(String),
}

impl PasswordlessContact {
    fn value(&self) -> &str {
        match self {
            Self::Email(email) => email,
            Self::PhoneNumber(phone_number) => phone_number,
        }
    }

    fn account_info(&self) -> AccountInfo {
        match self {
            Self::Email(email) => AccountInfo::from_email(email.clone()),
            Self::PhoneNumber(phone_number) => AccountInfo::from_phone_number(phone_number.clone()),
        }
    }
}

#[derive(Clone, Debug)]
pub enum CreateCodeOutcome {
    Ok {
        device_id: Uuid,
        /// Returned so the caller can deliver it; never logged.
        code: String,
    },
    NotAllowed { reason: ReasonCode },
    FieldError { message: String },
}

#[derive(Clone, Debug)]
pub enum ConsumeCodeOutcome {
    Ok {
        user: User,
        recipe_user_id: Uuid,
        created_new_user: bool,
    },
    IncorrectCode { failed_attempts: u32 },
    ExpiredCode,
    RestartFlow,
    NotAllowed { reason: ReasonCode },
}

struct CodeEntry {
    tenant_id: String,
    contact: PasswordlessContact,
    code: String,
    created_at: i64,
    failed_attempts: u32,
}

pub struct Passwordless {
    linker: AccountLinker,
    codes: Mutex<HashMap<Uuid, CodeEntry>>,
}

impl Passwordless {
    #[must_use]
    pub fn new(linker: AccountLinker) -> Self {
        Self {
            linker,
            codes: Mutex::new(HashMap::new()),
        }
    }

    /// Start a passwordless flow by issuing a one-time code for the contact.
    ///
    /// The pre-check treats the attempt as verified: ownership of the
    /// contact value is proven before any account is touched, at consume
    /// time.
    ///
    /// # Errors
    /// Fails on session errors and storage errors.
    pub async fn create_code(
        &self,
        tenant_id: &str,
        contact: PasswordlessContact,
        session: Option<&SessionRef>,
        should_try_linking_with_session_user: Option<bool>,
        options: &LinkingOptions,
    ) -> Result<CreateCodeOutcome, EngineError> {
        let contact = match contact {
            PasswordlessContact::Email(email) => {
                let email = normalize_email(&email);
                if !valid_email(&email) {
                    return Ok(CreateCodeOutcome::FieldError {
                        message: "Email is invalid".to_string(),
                    });
                }
                PasswordlessContact::Email(email)
            }
            PasswordlessContact::PhoneNumber(phone_number) => {
                if !valid_phone_number(&phone_number) {
                    return Ok(CreateCodeOutcome::FieldError {
                        message: "Phone number is invalid".to_string(),
                    });
                }
                PasswordlessContact::PhoneNumber(phone_number)
            }
        };
        let session = resolve_session_for_linking(session, should_try_linking_with_session_user, now_ms())
            .map_err(EngineError::Session)?;
        let reason = if session.is_some() {
            ReasonCode::PasswordlessSessionPreCheck
        } else {
            ReasonCode::PasswordlessCreateCode
        };

        let info = contact.account_info();
        let existing = self
            .linker
            .repo()
            .list_users_by_account_info(tenant_id, &info)
            .await?
            .into_iter()
            .find_map(|user| {
                user.login_methods
                    .iter()
                    .find(|method| method.recipe_id == RecipeId::Passwordless && method.shares_contact_value(&info))
                    .map(|method| method.recipe_user_id)
            });

        let allowed = match existing {
            Some(recipe_user_id) => {
                self.linker
                    .is_sign_in_allowed(tenant_id, recipe_user_id, session.as_ref(), options)
                    .await?
            }
            None => {
                let account = AccountInfoWithRecipe {
                    recipe_id: RecipeId::Passwordless,
                    info,
                };
                self.linker
                    .is_sign_up_allowed(tenant_id, &account, true, session.as_ref(), options)
                    .await?
            }
        };
        if !allowed {
            debug!(tenant_id, "passwordless code creation refused by pre-check");
            return Ok(CreateCodeOutcome::NotAllowed { reason });
        }

        let code = generate_otp().map_err(crate::repo::RepoError::Storage)?;
        let device_id = Uuid::new_v4();
        self.codes.lock().await.insert(
            device_id,
            CodeEntry {
                tenant_id: tenant_id.to_string(),
                contact,
                code: code.clone(),
                created_at: now_ms(),
                failed_attempts: 0,
            },
        );
        Ok(CreateCodeOutcome::Ok { device_id, code })
    }

    /// Consume a one-time code and resolve the login method.
    ///
    /// # Errors
    /// Fails on session errors, claim failures, and storage errors.
    pub async fn consume_code(
        &self,
        tenant_id: &str,
        device_id: Uuid,
        code: &str,
        session: Option<&SessionRef>,
        should_try_linking_with_session_user: Option<bool>,
        options: &LinkingOptions,
    ) -> Result<ConsumeCodeOutcome, EngineError> {
        let session = resolve_session_for_linking(session, should_try_linking_with_session_user, now_ms())
            .map_err(EngineError::Session)?;

        let contact = {
            let mut codes = self.codes.lock().await;
            let Some(entry) = codes.get_mut(&device_id) else {
                return Ok(ConsumeCodeOutcome::RestartFlow);
            };
            if entry.tenant_id != tenant_id {
                return Ok(ConsumeCodeOutcome::RestartFlow);
            }
            if now_ms() - entry.created_at > CODE_LIFETIME_MS {
                codes.remove(&device_id);
                return Ok(ConsumeCodeOutcome::ExpiredCode);
            }
            if entry.code != code {
                entry.failed_attempts += 1;
                let failed_attempts = entry.failed_attempts;
                if failed_attempts >= MAX_CODE_ATTEMPTS {
                    codes.remove(&device_id);
                    return Ok(ConsumeCodeOutcome::RestartFlow);
                }
                return Ok(ConsumeCodeOutcome::IncorrectCode { failed_attempts });
            }
            match codes.remove(&device_id) {
                Some(entry) => entry.contact,
                None => return Ok(ConsumeCodeOutcome::RestartFlow),
            }
        };

        let info = contact.account_info();
        let existing = self
            .linker
            .repo()
            .list_users_by_account_info(tenant_id, &info)
            .await?
            .into_iter()
            .find_map(|user| {
                user.login_methods
                    .iter()
                    .find(|method| method.recipe_id == RecipeId::Passwordless && method.shares_contact_value(&info))
                    .map(|method| method.recipe_user_id)
            });

        let (recipe_user_id, created_new_user) = match existing {
            Some(recipe_user_id) => {
                // Consuming the code proves ownership of the value.
                self.linker
                    .verification()
                    .mark_verified(recipe_user_id, contact.value())
                    .await?;
                if !self
                    .linker
                    .is_sign_in_allowed(tenant_id, recipe_user_id, session.as_ref(), options)
                    .await?
                {
                    debug!(tenant_id, "passwordless sign-in refused by post-check");
                    return Ok(ConsumeCodeOutcome::NotAllowed {
                        reason: ReasonCode::PasswordlessConsumeCode,
                    });
                }
                (recipe_user_id, false)
            }
            None => {
                // The contact value may have been claimed between code
                // creation and consumption; re-run the allow check before
                // any account is created.
                let account = AccountInfoWithRecipe {
                    recipe_id: RecipeId::Passwordless,
                    info,
                };
                if !self
                    .linker
                    .is_sign_up_allowed(tenant_id, &account, true, session.as_ref(), options)
                    .await?
                {
                    debug!(tenant_id, "passwordless sign-up refused by post-check");
                    return Ok(ConsumeCodeOutcome::NotAllowed {
                        reason: ReasonCode::PasswordlessConsumeCode,
                    });
                }
                let (email, phone_number) = match &contact {
                    PasswordlessContact::Email(email) => (Some(email.clone()), None),
                    PasswordlessContact::PhoneNumber(phone_number) => (None, Some(phone_number.clone())),
                };
                let user = self
                    .linker
                    .repo()
                    .create_user(
                        tenant_id,
                        NewLoginMethod {
                            recipe_id: RecipeId::Passwordless,
                            email,
                            phone_number,
                            third_party: None,
                            verified: true,
                            password_hash: None,
                        },
                    )
                    .await?;
                (user.login_methods[0].recipe_user_id, true)
            }
        };

        match self
            .linker
            .resolve(tenant_id, recipe_user_id, session.as_ref(), options)
            .await?
        {
            LinkingOutcome::Ok { user } => Ok(ConsumeCodeOutcome::Ok {
                user,
                recipe_user_id,
                created_new_user,
            }),
            LinkingOutcome::Rejected { reason } => Ok(ConsumeCodeOutcome::NotAllowed { reason }),
        }
    }
}
