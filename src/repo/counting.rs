//! Repository wrapper that counts round trips.
//!
//! Authentication flows budget their storage calls; tests wrap the real
//! repository with this to assert the ceilings hold.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::account::{AccountInfo, User};

use super::{
    ContactUpdate, CreatePrimaryUserResult, LinkAccountsResult, NewLoginMethod, RepoError,
    UserRepository,
};

pub struct CountingRepository {
    inner: Arc<dyn UserRepository>,
    calls: AtomicU64,
}

impl CountingRepository {
    #[must_use]
    pub fn new(inner: Arc<dyn UserRepository>) -> Self {
        Self {
            inner,
            calls: AtomicU64::new(0),
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.calls.store(0, Ordering::Relaxed);
    }

    fn tick(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
    }
}

#[async_trait]
impl UserRepository for CountingRepository {
    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, RepoError> {
        self.tick();
        self.inner.get_user(user_id).await
    }

    async fn get_user_by_recipe_user_id(&self, recipe_user_id: Uuid) -> Result<Option<User>, RepoError> {
        self.tick();
        self.inner.get_user_by_recipe_user_id(recipe_user_id).await
    }

    async fn list_users_by_account_info(
        &self,
        tenant_id: &str,
        info: &AccountInfo,
    ) -> Result<Vec<User>, RepoError> {
        self.tick();
        self.inner.list_users_by_account_info(tenant_id, info).await
    }

    async fn create_user(&self, tenant_id: &str, method: NewLoginMethod) -> Result<User, RepoError> {
        self.tick();
        self.inner.create_user(tenant_id, method).await
    }

    async fn create_primary_user(&self, recipe_user_id: Uuid) -> Result<CreatePrimaryUserResult, RepoError> {
        self.tick();
        self.inner.create_primary_user(recipe_user_id).await
    }

    async fn link_accounts(
        &self,
        recipe_user_id: Uuid,
        primary_user_id: Uuid,
    ) -> Result<LinkAccountsResult, RepoError> {
        self.tick();
        self.inner.link_accounts(recipe_user_id, primary_user_id).await
    }

    async fn update_contact_info(&self, recipe_user_id: Uuid, update: ContactUpdate) -> Result<User, RepoError> {
        self.tick();
        self.inner.update_contact_info(recipe_user_id, update).await
    }

    async fn is_verified(&self, recipe_user_id: Uuid, value: &str) -> Result<bool, RepoError> {
        self.tick();
        self.inner.is_verified(recipe_user_id, value).await
    }

    async fn set_verified(&self, recipe_user_id: Uuid, value: &str, verified: bool) -> Result<(), RepoError> {
        self.tick();
        self.inner.set_verified(recipe_user_id, value, verified).await
    }

    async fn password_hash(&self, recipe_user_id: Uuid) -> Result<Option<String>, RepoError> {
        self.tick();
        self.inner.password_hash(recipe_user_id).await
    }

    async fn update_password_hash(&self, recipe_user_id: Uuid, password_hash: &str) -> Result<(), RepoError> {
        self.tick();
        self.inner.update_password_hash(recipe_user_id, password_hash).await
    }
}
