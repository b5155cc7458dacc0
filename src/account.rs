//! Domain types for users, login methods, and account-info lookup keys.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Authentication recipe a login method belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipeId {
    EmailPassword,
    ThirdParty,
    Passwordless,
}

impl RecipeId {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EmailPassword => "emailpassword",
            Self::ThirdParty => "thirdparty",
            Self::Passwordless => "passwordless",
        }
    }
}

/// Identity at an external provider, unique per `(provider_id, provider_user_id)`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThirdPartyInfo {
    pub provider_id: String,
    pub provider_user_id: String,
}

/// Lookup key for account matching. Two login methods match if any one
/// populated field is exactly equal; there is no fuzzy matching.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub third_party: Option<ThirdPartyInfo>,
}

impl AccountInfo {
    #[must_use]
    pub fn from_email(email: impl Into<String>) -> Self {
        Self {
            email: Some(email.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn from_phone_number(phone_number: impl Into<String>) -> Self {
        Self {
            phone_number: Some(phone_number.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn from_third_party(provider_id: impl Into<String>, provider_user_id: impl Into<String>) -> Self {
        Self {
            third_party: Some(ThirdPartyInfo {
                provider_id: provider_id.into(),
                provider_user_id: provider_user_id.into(),
            }),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.email.is_none() && self.phone_number.is_none() && self.third_party.is_none()
    }

    /// Contact-info values (email, phone) carried by this key. Third-party
    /// ids are identities, not contact info, and are excluded.
    pub fn contact_values(&self) -> impl Iterator<Item = &str> {
        self.email
            .as_deref()
            .into_iter()
            .chain(self.phone_number.as_deref())
    }
}

/// One authentication factor instance. `verified` is scoped to the current
/// contact-info value; changing the value resets it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginMethod {
    pub recipe_user_id: Uuid,
    pub recipe_id: RecipeId,
    pub tenant_ids: BTreeSet<String>,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub third_party: Option<ThirdPartyInfo>,
    pub verified: bool,
    pub time_joined: i64,
}

impl LoginMethod {
    #[must_use]
    pub fn account_info(&self) -> AccountInfo {
        AccountInfo {
            email: self.email.clone(),
            phone_number: self.phone_number.clone(),
            third_party: self.third_party.clone(),
        }
    }

    #[must_use]
    pub fn has_same_email_as(&self, email: Option<&str>) -> bool {
        match (self.email.as_deref(), email) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    #[must_use]
    pub fn has_same_phone_number_as(&self, phone_number: Option<&str>) -> bool {
        match (self.phone_number.as_deref(), phone_number) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    #[must_use]
    pub fn has_same_third_party_as(&self, third_party: Option<&ThirdPartyInfo>) -> bool {
        match (self.third_party.as_ref(), third_party) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// Exact match on any populated field of `info`.
    #[must_use]
    pub fn matches(&self, info: &AccountInfo) -> bool {
        self.has_same_email_as(info.email.as_deref())
            || self.has_same_phone_number_as(info.phone_number.as_deref())
            || self.has_same_third_party_as(info.third_party.as_ref())
    }

    /// Match restricted to contact-info fields (email/phone), ignoring
    /// third-party identity. Used by verification and takeover checks.
    #[must_use]
    pub fn shares_contact_value(&self, info: &AccountInfo) -> bool {
        self.has_same_email_as(info.email.as_deref())
            || self.has_same_phone_number_as(info.phone_number.as_deref())
    }

    pub fn contact_values(&self) -> impl Iterator<Item = &str> {
        self.email
            .as_deref()
            .into_iter()
            .chain(self.phone_number.as_deref())
    }
}

/// One or more login methods sharing an identity.
///
/// A non-primary user has exactly one login method; a primary user may have
/// several, possibly spanning tenants. `id` equals the `recipe_user_id` of
/// the method that became primary (or the standalone method's id).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub is_primary_user: bool,
    pub time_joined: i64,
    pub login_methods: Vec<LoginMethod>,
}

impl User {
    #[must_use]
    pub fn login_method(&self, recipe_user_id: Uuid) -> Option<&LoginMethod> {
        self.login_methods
            .iter()
            .find(|method| method.recipe_user_id == recipe_user_id)
    }

    #[must_use]
    pub fn has_login_method(&self, recipe_user_id: Uuid) -> bool {
        self.login_method(recipe_user_id).is_some()
    }

    #[must_use]
    pub fn matches(&self, info: &AccountInfo) -> bool {
        self.login_methods.iter().any(|method| method.matches(info))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn method(email: Option<&str>, phone: Option<&str>) -> LoginMethod {
        LoginMethod {
            recipe_user_id: Uuid::new_v4(),
            recipe_id: RecipeId::EmailPassword,
            tenant_ids: BTreeSet::from(["public".to_string()]),
            email: email.map(str::to_string),
            phone_number: phone.map(str::to_string),
            third_party: None,
            verified: false,
            time_joined: 0,
        }
    }

    #[test]
    fn recipe_id_names() {
        assert_eq!(RecipeId::EmailPassword.as_str(), "emailpassword");
        assert_eq!(RecipeId::ThirdParty.as_str(), "thirdparty");
        assert_eq!(RecipeId::Passwordless.as_str(), "passwordless");
    }

    #[test]
    fn matching_is_exact_per_field() {
        let lm = method(Some("a@example.com"), None);
        assert!(lm.matches(&AccountInfo::from_email("a@example.com")));
        assert!(!lm.matches(&AccountInfo::from_email("b@example.com")));
        assert!(!lm.matches(&AccountInfo::from_phone_number("+3615551234")));
    }

    #[test]
    fn third_party_matches_on_both_parts() {
        let mut lm = method(Some("a@example.com"), None);
        lm.third_party = Some(ThirdPartyInfo {
            provider_id: "google".to_string(),
            provider_user_id: "abcd".to_string(),
        });
        assert!(lm.matches(&AccountInfo::from_third_party("google", "abcd")));
        assert!(!lm.matches(&AccountInfo::from_third_party("github", "abcd")));
        assert!(!lm.matches(&AccountInfo::from_third_party("google", "efgh")));
    }

    #[test]
    fn contact_values_exclude_third_party() {
        let info = AccountInfo {
            email: Some("a@example.com".to_string()),
            phone_number: Some("+3615551234".to_string()),
            third_party: Some(ThirdPartyInfo {
                provider_id: "google".to_string(),
                provider_user_id: "abcd".to_string(),
            }),
        };
        let values: Vec<&str> = info.contact_values().collect();
        assert_eq!(values, vec!["a@example.com", "+3615551234"]);
    }

    #[test]
    fn user_lookup_by_recipe_user_id() {
        let lm = method(Some("a@example.com"), None);
        let rid = lm.recipe_user_id;
        let user = User {
            id: rid,
            is_primary_user: false,
            time_joined: 0,
            login_methods: vec![lm],
        };
        assert!(user.has_login_method(rid));
        assert!(!user.has_login_method(Uuid::new_v4()));
    }
}
