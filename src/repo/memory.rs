//! In-memory repository used by tests and the dev server.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, HashSet};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::account::{AccountInfo, LoginMethod, User};

use super::{
    ContactUpdate, CreatePrimaryUserResult, LinkAccountsResult, NewLoginMethod, RepoError,
    UserRepository,
};

#[derive(Clone, Debug)]
struct MethodRow {
    method: LoginMethod,
    /// `None` while standalone, the primary user id once linked or promoted.
    primary_user_id: Option<Uuid>,
}

#[derive(Default)]
struct Store {
    methods: HashMap<Uuid, MethodRow>,
    /// Verification records keyed by (recipe user, contact value).
    verified: HashSet<(Uuid, String)>,
    password_hashes: HashMap<Uuid, String>,
    clock: i64,
}

impl Store {
    fn next_time_joined(&mut self) -> i64 {
        self.clock += 1;
        self.clock
    }

    /// Assemble the `User` view for the method, with linked siblings and
    /// per-value verification applied. Methods ordered by join time.
    fn assemble(&self, recipe_user_id: Uuid) -> Option<User> {
        let row = self.methods.get(&recipe_user_id)?;
        match row.primary_user_id {
            Some(primary_user_id) => {
                let mut methods: Vec<LoginMethod> = self
                    .methods
                    .values()
                    .filter(|other| other.primary_user_id == Some(primary_user_id))
                    .map(|other| self.with_verified(&other.method))
                    .collect();
                methods.sort_by_key(|method| method.time_joined);
                let time_joined = methods.iter().map(|method| method.time_joined).min().unwrap_or(0);
                Some(User {
                    id: primary_user_id,
                    is_primary_user: true,
                    time_joined,
                    login_methods: methods,
                })
            }
            None => Some(User {
                id: recipe_user_id,
                is_primary_user: false,
                time_joined: row.method.time_joined,
                login_methods: vec![self.with_verified(&row.method)],
            }),
        }
    }

    fn with_verified(&self, method: &LoginMethod) -> LoginMethod {
        let mut method = method.clone();
        method.verified = method
            .contact_values()
            .any(|value| self.verified.contains(&(method.recipe_user_id, value.to_string())))
            || (method.third_party.is_some()
                && method.email.is_none()
                && method.phone_number.is_none()
                && method.verified);
        method
    }

    /// Primary users on `tenant_id` whose account info overlaps `info`,
    /// excluding `exclude_primary`.
    fn conflicting_primary(
        &self,
        tenant_ids: &BTreeSet<String>,
        info: &AccountInfo,
        exclude_primary: Option<Uuid>,
    ) -> Option<Uuid> {
        self.methods.values().find_map(|row| {
            let primary_user_id = row.primary_user_id?;
            if Some(primary_user_id) == exclude_primary {
                return None;
            }
            let shares_tenant = row.method.tenant_ids.iter().any(|tenant| tenant_ids.contains(tenant));
            if shares_tenant && row.method.matches(info) {
                Some(primary_user_id)
            } else {
                None
            }
        })
    }
}

/// Mutex-backed map store. Suitable for tests and single-process dev runs.
#[derive(Default)]
pub struct InMemoryRepository {
    store: Mutex<Store>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepository for InMemoryRepository {
    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, RepoError> {
        let store = self.store.lock().await;
        // `user_id` is either a primary user id or a standalone method id.
        if let Some(user) = store.assemble(user_id) {
            if user.id == user_id {
                return Ok(Some(user));
            }
        }
        let primary_method = store
            .methods
            .values()
            .find(|row| row.primary_user_id == Some(user_id))
            .map(|row| row.method.recipe_user_id);
        Ok(primary_method.and_then(|rid| store.assemble(rid)))
    }

    async fn get_user_by_recipe_user_id(&self, recipe_user_id: Uuid) -> Result<Option<User>, RepoError> {
        let store = self.store.lock().await;
        Ok(store.assemble(recipe_user_id))
    }

    async fn list_users_by_account_info(
        &self,
        tenant_id: &str,
        info: &AccountInfo,
    ) -> Result<Vec<User>, RepoError> {
        let store = self.store.lock().await;
        let mut seen: HashSet<Uuid> = HashSet::new();
        let mut users: Vec<User> = Vec::new();
        for row in store.methods.values() {
            if !row.method.tenant_ids.contains(tenant_id) || !row.method.matches(info) {
                continue;
            }
            if let Some(user) = store.assemble(row.method.recipe_user_id) {
                if seen.insert(user.id) {
                    users.push(user);
                }
            }
        }
        users.sort_by_key(|user| user.time_joined);
        Ok(users)
    }

    async fn create_user(&self, tenant_id: &str, method: NewLoginMethod) -> Result<User, RepoError> {
        let mut store = self.store.lock().await;
        let recipe_user_id = Uuid::new_v4();
        let time_joined = store.next_time_joined();
        let login_method = LoginMethod {
            recipe_user_id,
            recipe_id: method.recipe_id,
            tenant_ids: BTreeSet::from([tenant_id.to_string()]),
            email: method.email.clone(),
            phone_number: method.phone_number.clone(),
            third_party: method.third_party.clone(),
            verified: method.verified,
            time_joined,
        };
        if method.verified {
            for value in login_method.contact_values() {
                store.verified.insert((recipe_user_id, value.to_string()));
            }
        }
        if let Some(hash) = method.password_hash {
            store.password_hashes.insert(recipe_user_id, hash);
        }
        store.methods.insert(
            recipe_user_id,
            MethodRow {
                method: login_method,
                primary_user_id: None,
            },
        );
        store
            .assemble(recipe_user_id)
            .ok_or(RepoError::UnknownUser(recipe_user_id))
    }

    async fn create_primary_user(&self, recipe_user_id: Uuid) -> Result<CreatePrimaryUserResult, RepoError> {
        let mut store = self.store.lock().await;
        let row = store
            .methods
            .get(&recipe_user_id)
            .ok_or(RepoError::UnknownLoginMethod(recipe_user_id))?
            .clone();
        if let Some(primary_user_id) = row.primary_user_id {
            if primary_user_id == recipe_user_id {
                let user = store
                    .assemble(recipe_user_id)
                    .ok_or(RepoError::UnknownUser(recipe_user_id))?;
                return Ok(CreatePrimaryUserResult::Ok {
                    user,
                    was_already_primary: true,
                });
            }
            return Ok(CreatePrimaryUserResult::RecipeUserAlreadyLinked { primary_user_id });
        }
        if let Some(primary_user_id) =
            store.conflicting_primary(&row.method.tenant_ids, &row.method.account_info(), None)
        {
            return Ok(CreatePrimaryUserResult::AccountInfoAlreadyAssociated { primary_user_id });
        }
        if let Some(row) = store.methods.get_mut(&recipe_user_id) {
            row.primary_user_id = Some(recipe_user_id);
        }
        let user = store
            .assemble(recipe_user_id)
            .ok_or(RepoError::UnknownUser(recipe_user_id))?;
        Ok(CreatePrimaryUserResult::Ok {
            user,
            was_already_primary: false,
        })
    }

    async fn link_accounts(
        &self,
        recipe_user_id: Uuid,
        primary_user_id: Uuid,
    ) -> Result<LinkAccountsResult, RepoError> {
        let mut store = self.store.lock().await;
        let target_is_primary = store
            .methods
            .values()
            .any(|row| row.primary_user_id == Some(primary_user_id));
        if !target_is_primary {
            return Ok(LinkAccountsResult::TargetNotPrimary);
        }
        let row = store
            .methods
            .get(&recipe_user_id)
            .ok_or(RepoError::UnknownLoginMethod(recipe_user_id))?
            .clone();
        if let Some(linked_to) = row.primary_user_id {
            let user = store
                .assemble(recipe_user_id)
                .ok_or(RepoError::UnknownUser(recipe_user_id))?;
            if linked_to == primary_user_id {
                return Ok(LinkAccountsResult::Ok {
                    user,
                    accounts_already_linked: true,
                });
            }
            return Ok(LinkAccountsResult::RecipeUserAlreadyLinked {
                primary_user_id: linked_to,
                user,
            });
        }
        if let Some(conflict) = store.conflicting_primary(
            &row.method.tenant_ids,
            &row.method.account_info(),
            Some(primary_user_id),
        ) {
            return Ok(LinkAccountsResult::AccountInfoAlreadyAssociated {
                primary_user_id: conflict,
            });
        }
        if let Some(row) = store.methods.get_mut(&recipe_user_id) {
            row.primary_user_id = Some(primary_user_id);
        }
        let user = store
            .assemble(recipe_user_id)
            .ok_or(RepoError::UnknownUser(recipe_user_id))?;
        Ok(LinkAccountsResult::Ok {
            user,
            accounts_already_linked: false,
        })
    }

    async fn update_contact_info(&self, recipe_user_id: Uuid, update: ContactUpdate) -> Result<User, RepoError> {
        let mut store = self.store.lock().await;
        {
            let row = store
                .methods
                .get_mut(&recipe_user_id)
                .ok_or(RepoError::UnknownLoginMethod(recipe_user_id))?;
            match update {
                ContactUpdate::Email(email) => row.method.email = Some(email),
                ContactUpdate::PhoneNumber(phone_number) => row.method.phone_number = Some(phone_number),
            }
        }
        store
            .assemble(recipe_user_id)
            .ok_or(RepoError::UnknownUser(recipe_user_id))
    }

    async fn is_verified(&self, recipe_user_id: Uuid, value: &str) -> Result<bool, RepoError> {
        let store = self.store.lock().await;
        Ok(store.verified.contains(&(recipe_user_id, value.to_string())))
    }

    async fn set_verified(&self, recipe_user_id: Uuid, value: &str, verified: bool) -> Result<(), RepoError> {
        let mut store = self.store.lock().await;
        if verified {
            store.verified.insert((recipe_user_id, value.to_string()));
        } else {
            store.verified.remove(&(recipe_user_id, value.to_string()));
        }
        Ok(())
    }

    async fn password_hash(&self, recipe_user_id: Uuid) -> Result<Option<String>, RepoError> {
        let store = self.store.lock().await;
        Ok(store.password_hashes.get(&recipe_user_id).cloned())
    }

    async fn update_password_hash(&self, recipe_user_id: Uuid, password_hash: &str) -> Result<(), RepoError> {
        let mut store = self.store.lock().await;
        if !store.methods.contains_key(&recipe_user_id) {
            return Err(RepoError::UnknownLoginMethod(recipe_user_id));
        }
        store.password_hashes.insert(recipe_user_id, password_hash.to_string());
        Ok(())
    }
}
