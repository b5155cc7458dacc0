//! Automatic-linking policy: the pluggable predicate every linking decision
//! consults, plus the shipped reference policies.
//!
//! Policies are pure: they must not touch the repository or mutate state.
//! They are consulted once per candidate target user, so different
//! candidates may receive different answers.

use crate::account::{AccountInfo, RecipeId, User};
use crate::session::SessionRef;

/// The account being evaluated for linking, before or after creation.
#[derive(Clone, Debug)]
pub struct AccountInfoWithRecipe {
    pub recipe_id: RecipeId,
    pub info: AccountInfo,
}

/// Per-call flags that suppress or force default linking behavior.
///
/// This replaces an untyped context bag: each flag is named and total, and
/// the shipped policies consume them uniformly.
#[derive(Clone, Copy, Debug, Default)]
pub struct LinkingOptions {
    /// Never link on this attempt, whatever the policy default.
    pub do_not_link: bool,
    /// Link, but waive the verification requirement on this attempt.
    pub link_without_verification: bool,
    /// Link even under a policy that is otherwise disabled.
    pub force_link: bool,
}

impl LinkingOptions {
    #[must_use]
    pub fn with_do_not_link(mut self) -> Self {
        self.do_not_link = true;
        self
    }

    #[must_use]
    pub fn with_link_without_verification(mut self) -> Self {
        self.link_without_verification = true;
        self
    }

    #[must_use]
    pub fn with_force_link(mut self) -> Self {
        self.force_link = true;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PolicyDecision {
    DoNotLink,
    Link { require_verification: bool },
}

pub trait LinkingPolicy: Send + Sync {
    /// Decide whether `new_account` should be automatically linked to
    /// `candidate` (or promoted standalone when `candidate` is `None`).
    fn should_do_automatic_account_linking(
        &self,
        new_account: &AccountInfoWithRecipe,
        candidate: Option<&User>,
        session: Option<&SessionRef>,
        tenant_id: &str,
        options: &LinkingOptions,
    ) -> PolicyDecision;
}

/// Linking switched off; `force_link` still opts a single call in.
#[derive(Clone, Copy, Debug, Default)]
pub struct LinkingDisabled;

impl LinkingPolicy for LinkingDisabled {
    fn should_do_automatic_account_linking(
        &self,
        _new_account: &AccountInfoWithRecipe,
        _candidate: Option<&User>,
        _session: Option<&SessionRef>,
        _tenant_id: &str,
        options: &LinkingOptions,
    ) -> PolicyDecision {
        if options.force_link {
            PolicyDecision::Link {
                require_verification: true,
            }
        } else {
            PolicyDecision::DoNotLink
        }
    }
}

/// Always link, ignoring verification state.
#[derive(Clone, Copy, Debug, Default)]
pub struct LinkWithoutVerification;

impl LinkingPolicy for LinkWithoutVerification {
    fn should_do_automatic_account_linking(
        &self,
        _new_account: &AccountInfoWithRecipe,
        _candidate: Option<&User>,
        _session: Option<&SessionRef>,
        _tenant_id: &str,
        options: &LinkingOptions,
    ) -> PolicyDecision {
        if options.do_not_link {
            PolicyDecision::DoNotLink
        } else {
            PolicyDecision::Link {
                require_verification: false,
            }
        }
    }
}

/// Link only once the new login method's contact info is verified.
#[derive(Clone, Copy, Debug, Default)]
pub struct LinkIfVerified;

impl LinkingPolicy for LinkIfVerified {
    fn should_do_automatic_account_linking(
        &self,
        _new_account: &AccountInfoWithRecipe,
        _candidate: Option<&User>,
        _session: Option<&SessionRef>,
        _tenant_id: &str,
        options: &LinkingOptions,
    ) -> PolicyDecision {
        if options.do_not_link {
            PolicyDecision::DoNotLink
        } else if options.link_without_verification {
            PolicyDecision::Link {
                require_verification: false,
            }
        } else {
            PolicyDecision::Link {
                require_verification: true,
            }
        }
    }
}

/// Link, except when the candidate is the session's own user.
#[derive(Clone, Copy, Debug)]
pub struct SkipWhenCandidateIsSessionUser {
    pub require_verification: bool,
}

impl LinkingPolicy for SkipWhenCandidateIsSessionUser {
    fn should_do_automatic_account_linking(
        &self,
        _new_account: &AccountInfoWithRecipe,
        candidate: Option<&User>,
        session: Option<&SessionRef>,
        _tenant_id: &str,
        options: &LinkingOptions,
    ) -> PolicyDecision {
        if options.do_not_link {
            return PolicyDecision::DoNotLink;
        }
        if let (Some(candidate), Some(session)) = (candidate, session) {
            if candidate.id == session.user_id {
                return PolicyDecision::DoNotLink;
            }
        }
        PolicyDecision::Link {
            require_verification: self.require_verification,
        }
    }
}

/// Link, except when there is no candidate and the new account's email
/// equals a fixed value. Exists for staged migrations where one address
/// must keep its standalone account.
#[derive(Clone, Debug)]
pub struct SkipFixedEmail {
    pub email: String,
    pub require_verification: bool,
}

impl LinkingPolicy for SkipFixedEmail {
    fn should_do_automatic_account_linking(
        &self,
        new_account: &AccountInfoWithRecipe,
        candidate: Option<&User>,
        _session: Option<&SessionRef>,
        _tenant_id: &str,
        options: &LinkingOptions,
    ) -> PolicyDecision {
        if options.do_not_link {
            return PolicyDecision::DoNotLink;
        }
        if candidate.is_none() && new_account.info.email.as_deref() == Some(self.email.as_str()) {
            return PolicyDecision::DoNotLink;
        }
        PolicyDecision::Link {
            require_verification: self.require_verification,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use uuid::Uuid;

    fn account(email: &str) -> AccountInfoWithRecipe {
        AccountInfoWithRecipe {
            recipe_id: RecipeId::EmailPassword,
            info: AccountInfo::from_email(email),
        }
    }

    fn user(id: Uuid) -> User {
        User {
            id,
            is_primary_user: true,
            time_joined: 0,
            login_methods: vec![crate::account::LoginMethod {
                recipe_user_id: id,
                recipe_id: RecipeId::EmailPassword,
                tenant_ids: BTreeSet::from(["public".to_string()]),
                email: Some("a@example.com".to_string()),
                phone_number: None,
                third_party: None,
                verified: true,
                time_joined: 0,
            }],
        }
    }

    #[test]
    fn disabled_policy_never_links_unless_forced() {
        let policy = LinkingDisabled;
        let opts = LinkingOptions::default();
        assert_eq!(
            policy.should_do_automatic_account_linking(&account("a@example.com"), None, None, "public", &opts),
            PolicyDecision::DoNotLink
        );
        let forced = LinkingOptions {
            force_link: true,
            ..LinkingOptions::default()
        };
        assert_eq!(
            policy.should_do_automatic_account_linking(&account("a@example.com"), None, None, "public", &forced),
            PolicyDecision::Link {
                require_verification: true
            }
        );
    }

    #[test]
    fn if_verified_policy_honors_overrides() {
        let policy = LinkIfVerified;
        let skip = LinkingOptions {
            do_not_link: true,
            ..LinkingOptions::default()
        };
        assert_eq!(
            policy.should_do_automatic_account_linking(&account("a@example.com"), None, None, "public", &skip),
            PolicyDecision::DoNotLink
        );
        let waive = LinkingOptions {
            link_without_verification: true,
            ..LinkingOptions::default()
        };
        assert_eq!(
            policy.should_do_automatic_account_linking(&account("a@example.com"), None, None, "public", &waive),
            PolicyDecision::Link {
                require_verification: false
            }
        );
    }

    #[test]
    fn session_user_candidate_is_skipped() {
        let policy = SkipWhenCandidateIsSessionUser {
            require_verification: false,
        };
        let id = Uuid::new_v4();
        let candidate = user(id);
        let session = SessionRef {
            user_id: id,
            recipe_user_id: id,
            expires_at: i64::MAX,
        };
        let opts = LinkingOptions::default();
        assert_eq!(
            policy.should_do_automatic_account_linking(
                &account("a@example.com"),
                Some(&candidate),
                Some(&session),
                "public",
                &opts
            ),
            PolicyDecision::DoNotLink
        );
        let other = user(Uuid::new_v4());
        assert_eq!(
            policy.should_do_automatic_account_linking(
                &account("a@example.com"),
                Some(&other),
                Some(&session),
                "public",
                &opts
            ),
            PolicyDecision::Link {
                require_verification: false
            }
        );
    }

    #[test]
    fn fixed_email_is_skipped_only_without_candidate() {
        let policy = SkipFixedEmail {
            email: "test2@example.com".to_string(),
            require_verification: false,
        };
        let opts = LinkingOptions::default();
        assert_eq!(
            policy.should_do_automatic_account_linking(&account("test2@example.com"), None, None, "public", &opts),
            PolicyDecision::DoNotLink
        );
        let candidate = user(Uuid::new_v4());
        assert_eq!(
            policy.should_do_automatic_account_linking(
                &account("test2@example.com"),
                Some(&candidate),
                None,
                "public",
                &opts
            ),
            PolicyDecision::Link {
                require_verification: false
            }
        );
    }
}
