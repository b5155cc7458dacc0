//! Postgres-backed repository.
//!
//! Link topology writes run in a transaction that locks the affected login
//! methods, so the one-primary-per-account-info constraint holds under
//! concurrent promotion attempts.

use anyhow::Context;
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use std::collections::BTreeSet;
use tracing::Instrument;
use uuid::Uuid;

use crate::account::{AccountInfo, LoginMethod, RecipeId, ThirdPartyInfo, User};

use super::{
    ContactUpdate, CreatePrimaryUserResult, LinkAccountsResult, NewLoginMethod, RepoError,
    UserRepository,
};

pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const METHOD_COLUMNS: &str = r"
    lm.recipe_user_id,
    lm.recipe_id,
    lm.email,
    lm.phone_number,
    lm.third_party_id,
    lm.third_party_user_id,
    lm.primary_user_id,
    lm.time_joined,
    ARRAY(SELECT tenant_id FROM login_method_tenants t WHERE t.recipe_user_id = lm.recipe_user_id) AS tenant_ids,
    (
        EXISTS (
            SELECT 1 FROM verified_values v
            WHERE v.recipe_user_id = lm.recipe_user_id
              AND v.value IN (lm.email, lm.phone_number)
        )
        OR (lm.third_party_id IS NOT NULL AND lm.email IS NULL AND lm.phone_number IS NULL AND lm.provider_verified)
    ) AS verified
";

fn recipe_id_from_str(value: &str) -> Result<RecipeId, RepoError> {
    match value {
        "emailpassword" => Ok(RecipeId::EmailPassword),
        "thirdparty" => Ok(RecipeId::ThirdParty),
        "passwordless" => Ok(RecipeId::Passwordless),
        other => Err(RepoError::Storage(anyhow::anyhow!("unknown recipe id {other}"))),
    }
}

fn method_from_row(row: &PgRow) -> Result<LoginMethod, RepoError> {
    let recipe_id: String = row.get("recipe_id");
    let tenant_ids: Vec<String> = row.get("tenant_ids");
    let third_party = match (
        row.get::<Option<String>, _>("third_party_id"),
        row.get::<Option<String>, _>("third_party_user_id"),
    ) {
        (Some(provider_id), Some(provider_user_id)) => Some(ThirdPartyInfo {
            provider_id,
            provider_user_id,
        }),
        _ => None,
    };
    Ok(LoginMethod {
        recipe_user_id: row.get("recipe_user_id"),
        recipe_id: recipe_id_from_str(&recipe_id)?,
        tenant_ids: tenant_ids.into_iter().collect::<BTreeSet<_>>(),
        email: row.get("email"),
        phone_number: row.get("phone_number"),
        third_party,
        verified: row.get("verified"),
        time_joined: row.get("time_joined"),
    })
}

fn user_from_methods(methods: Vec<(LoginMethod, Option<Uuid>)>) -> Option<User> {
    let (first, primary_user_id) = methods.first().cloned()?;
    match primary_user_id {
        Some(primary_user_id) => {
            let mut login_methods: Vec<LoginMethod> =
                methods.into_iter().map(|(method, _)| method).collect();
            login_methods.sort_by_key(|method| method.time_joined);
            let time_joined = login_methods.iter().map(|method| method.time_joined).min()?;
            Some(User {
                id: primary_user_id,
                is_primary_user: true,
                time_joined,
                login_methods,
            })
        }
        None => Some(User {
            id: first.recipe_user_id,
            is_primary_user: false,
            time_joined: first.time_joined,
            login_methods: vec![first],
        }),
    }
}

/// Fetch the full user view for one login method: its row plus, when
/// linked, all sibling rows under the same primary user.
async fn fetch_user_for_method(
    pool: &PgPool,
    recipe_user_id: Uuid,
) -> Result<Option<User>, RepoError> {
    let query = format!(
        r"
        SELECT {METHOD_COLUMNS}
        FROM login_methods lm
        WHERE lm.recipe_user_id = $1
           OR lm.primary_user_id = (
                SELECT primary_user_id FROM login_methods WHERE recipe_user_id = $1
           )
        "
    );
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let rows = sqlx::query(&query)
        .bind(recipe_user_id)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to fetch user by recipe user id")?;

    let mut methods = Vec::with_capacity(rows.len());
    for row in &rows {
        let primary: Option<Uuid> = row.get("primary_user_id");
        methods.push((method_from_row(row)?, primary));
    }
    // Keep the requested method first so the standalone case picks it.
    methods.sort_by_key(|(method, _)| (method.recipe_user_id != recipe_user_id, method.time_joined));
    Ok(user_from_methods(methods))
}

/// Primary user (other than `exclude`) owning matching account info on any
/// of the method's tenants. Locks nothing; call inside a transaction when
/// the answer gates a write.
async fn conflicting_primary(
    tx: &mut Transaction<'_, Postgres>,
    recipe_user_id: Uuid,
    exclude: Option<Uuid>,
) -> Result<Option<Uuid>, RepoError> {
    let query = r"
        SELECT other.primary_user_id
        FROM login_methods me
        JOIN login_methods other
          ON other.primary_user_id IS NOT NULL
         AND other.recipe_user_id <> me.recipe_user_id
         AND (
               (me.email IS NOT NULL AND other.email = me.email)
            OR (me.phone_number IS NOT NULL AND other.phone_number = me.phone_number)
            OR (me.third_party_id IS NOT NULL
                AND other.third_party_id = me.third_party_id
                AND other.third_party_user_id = me.third_party_user_id)
         )
        JOIN login_method_tenants mt ON mt.recipe_user_id = me.recipe_user_id
        JOIN login_method_tenants ot
          ON ot.recipe_user_id = other.recipe_user_id AND ot.tenant_id = mt.tenant_id
        WHERE me.recipe_user_id = $1
          AND ($2::uuid IS NULL OR other.primary_user_id <> $2)
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(recipe_user_id)
        .bind(exclude)
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .context("failed to check for conflicting primary user")?;
    Ok(row.map(|row| row.get("primary_user_id")))
}

async fn method_link_state(
    tx: &mut Transaction<'_, Postgres>,
    recipe_user_id: Uuid,
) -> Result<Option<Uuid>, RepoError> {
    let query = "SELECT primary_user_id FROM login_methods WHERE recipe_user_id = $1 FOR UPDATE";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(recipe_user_id)
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .context("failed to lock login method")?
        .ok_or(RepoError::UnknownLoginMethod(recipe_user_id))?;
    Ok(row.get("primary_user_id"))
}

#[async_trait]
impl UserRepository for PostgresRepository {
    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, RepoError> {
        // The id is either a primary user id or a standalone method id;
        // resolve a member method first, then assemble around it.
        let query = r"
            SELECT recipe_user_id FROM login_methods
            WHERE primary_user_id = $1 OR (primary_user_id IS NULL AND recipe_user_id = $1)
            LIMIT 1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to resolve user id")?;
        match row {
            Some(row) => fetch_user_for_method(&self.pool, row.get("recipe_user_id")).await,
            None => Ok(None),
        }
    }

    async fn get_user_by_recipe_user_id(&self, recipe_user_id: Uuid) -> Result<Option<User>, RepoError> {
        fetch_user_for_method(&self.pool, recipe_user_id).await
    }

    async fn list_users_by_account_info(
        &self,
        tenant_id: &str,
        info: &AccountInfo,
    ) -> Result<Vec<User>, RepoError> {
        let query = r"
            SELECT DISTINCT lm.recipe_user_id, COALESCE(lm.primary_user_id, lm.recipe_user_id) AS user_id
            FROM login_methods lm
            JOIN login_method_tenants t ON t.recipe_user_id = lm.recipe_user_id
            WHERE t.tenant_id = $1
              AND (
                    ($2::text IS NOT NULL AND lm.email = $2)
                 OR ($3::text IS NOT NULL AND lm.phone_number = $3)
                 OR ($4::text IS NOT NULL AND lm.third_party_id = $4 AND lm.third_party_user_id = $5)
              )
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let rows = sqlx::query(query)
            .bind(tenant_id)
            .bind(info.email.as_deref())
            .bind(info.phone_number.as_deref())
            .bind(info.third_party.as_ref().map(|tp| tp.provider_id.as_str()))
            .bind(info.third_party.as_ref().map(|tp| tp.provider_user_id.as_str()))
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .context("failed to list users by account info")?;

        let mut users: Vec<User> = Vec::new();
        for row in rows {
            let recipe_user_id: Uuid = row.get("recipe_user_id");
            let user_id: Uuid = row.get("user_id");
            if users.iter().any(|user| user.id == user_id) {
                continue;
            }
            if let Some(user) = fetch_user_for_method(&self.pool, recipe_user_id).await? {
                if !users.iter().any(|existing| existing.id == user.id) {
                    users.push(user);
                }
            }
        }
        users.sort_by_key(|user| user.time_joined);
        Ok(users)
    }

    async fn create_user(&self, tenant_id: &str, method: NewLoginMethod) -> Result<User, RepoError> {
        let mut tx = self.pool.begin().await.context("begin create user")?;
        let recipe_user_id = Uuid::new_v4();
        let query = r"
            INSERT INTO login_methods
                (recipe_user_id, recipe_id, email, phone_number,
                 third_party_id, third_party_user_id, provider_verified,
                 password_hash, time_joined)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8,
                    (EXTRACT(EPOCH FROM clock_timestamp()) * 1000)::bigint)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(recipe_user_id)
            .bind(method.recipe_id.as_str())
            .bind(method.email.as_deref())
            .bind(method.phone_number.as_deref())
            .bind(method.third_party.as_ref().map(|tp| tp.provider_id.as_str()))
            .bind(method.third_party.as_ref().map(|tp| tp.provider_user_id.as_str()))
            .bind(method.verified)
            .bind(method.password_hash.as_deref())
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to insert login method")?;

        sqlx::query("INSERT INTO login_method_tenants (recipe_user_id, tenant_id) VALUES ($1, $2)")
            .bind(recipe_user_id)
            .bind(tenant_id)
            .execute(&mut *tx)
            .await
            .context("failed to insert tenant membership")?;

        if method.verified {
            for value in method.email.iter().chain(method.phone_number.iter()) {
                sqlx::query(
                    "INSERT INTO verified_values (recipe_user_id, value) VALUES ($1, $2) ON CONFLICT DO NOTHING",
                )
                .bind(recipe_user_id)
                .bind(value)
                .execute(&mut *tx)
                .await
                .context("failed to insert verification record")?;
            }
        }

        tx.commit().await.context("commit create user")?;
        fetch_user_for_method(&self.pool, recipe_user_id)
            .await?
            .ok_or(RepoError::UnknownUser(recipe_user_id))
    }

    async fn create_primary_user(&self, recipe_user_id: Uuid) -> Result<CreatePrimaryUserResult, RepoError> {
        let mut tx = self.pool.begin().await.context("begin promote user")?;
        match method_link_state(&mut tx, recipe_user_id).await? {
            Some(primary_user_id) if primary_user_id == recipe_user_id => {
                tx.commit().await.context("commit promote user")?;
                let user = fetch_user_for_method(&self.pool, recipe_user_id)
                    .await?
                    .ok_or(RepoError::UnknownUser(recipe_user_id))?;
                return Ok(CreatePrimaryUserResult::Ok {
                    user,
                    was_already_primary: true,
                });
            }
            Some(primary_user_id) => {
                let _ = tx.rollback().await;
                return Ok(CreatePrimaryUserResult::RecipeUserAlreadyLinked { primary_user_id });
            }
            None => {}
        }
        if let Some(primary_user_id) = conflicting_primary(&mut tx, recipe_user_id, None).await? {
            let _ = tx.rollback().await;
            return Ok(CreatePrimaryUserResult::AccountInfoAlreadyAssociated { primary_user_id });
        }
        sqlx::query("UPDATE login_methods SET primary_user_id = recipe_user_id WHERE recipe_user_id = $1")
            .bind(recipe_user_id)
            .execute(&mut *tx)
            .await
            .context("failed to promote login method")?;
        tx.commit().await.context("commit promote user")?;
        let user = fetch_user_for_method(&self.pool, recipe_user_id)
            .await?
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
        let mut tx = self.pool.begin().await.context("begin link accounts")?;
        let target_exists = sqlx::query(
            "SELECT 1 AS present FROM login_methods WHERE primary_user_id = $1 LIMIT 1",
        )
        .bind(primary_user_id)
        .fetch_optional(&mut *tx)
        .await
        .context("failed to check link target")?
        .is_some();
        if !target_exists {
            let _ = tx.rollback().await;
            return Ok(LinkAccountsResult::TargetNotPrimary);
        }
        match method_link_state(&mut tx, recipe_user_id).await? {
            Some(linked_to) => {
                tx.commit().await.context("commit link accounts")?;
                let user = fetch_user_for_method(&self.pool, recipe_user_id)
                    .await?
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
            None => {}
        }
        if let Some(conflict) = conflicting_primary(&mut tx, recipe_user_id, Some(primary_user_id)).await? {
            let _ = tx.rollback().await;
            return Ok(LinkAccountsResult::AccountInfoAlreadyAssociated {
                primary_user_id: conflict,
            });
        }
        sqlx::query("UPDATE login_methods SET primary_user_id = $2 WHERE recipe_user_id = $1")
            .bind(recipe_user_id)
            .bind(primary_user_id)
            .execute(&mut *tx)
            .await
            .context("failed to link login method")?;
        tx.commit().await.context("commit link accounts")?;
        let user = fetch_user_for_method(&self.pool, recipe_user_id)
            .await?
            .ok_or(RepoError::UnknownUser(recipe_user_id))?;
        Ok(LinkAccountsResult::Ok {
            user,
            accounts_already_linked: false,
        })
    }

    async fn update_contact_info(&self, recipe_user_id: Uuid, update: ContactUpdate) -> Result<User, RepoError> {
        let (column, value) = match &update {
            ContactUpdate::Email(email) => ("email", email.clone()),
            ContactUpdate::PhoneNumber(phone_number) => ("phone_number", phone_number.clone()),
        };
        let query = format!("UPDATE login_methods SET {column} = $2 WHERE recipe_user_id = $1");
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query.as_str()
        );
        let result = sqlx::query(&query)
            .bind(recipe_user_id)
            .bind(value)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to update contact info")?;
        if result.rows_affected() == 0 {
            return Err(RepoError::UnknownLoginMethod(recipe_user_id));
        }
        fetch_user_for_method(&self.pool, recipe_user_id)
            .await?
            .ok_or(RepoError::UnknownUser(recipe_user_id))
    }

    async fn is_verified(&self, recipe_user_id: Uuid, value: &str) -> Result<bool, RepoError> {
        let query = "SELECT 1 AS present FROM verified_values WHERE recipe_user_id = $1 AND value = $2";
        let row = sqlx::query(query)
            .bind(recipe_user_id)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .context("failed to read verification record")?;
        Ok(row.is_some())
    }

    async fn set_verified(&self, recipe_user_id: Uuid, value: &str, verified: bool) -> Result<(), RepoError> {
        if verified {
            sqlx::query(
                "INSERT INTO verified_values (recipe_user_id, value) VALUES ($1, $2) ON CONFLICT DO NOTHING",
            )
            .bind(recipe_user_id)
            .bind(value)
            .execute(&self.pool)
            .await
            .context("failed to insert verification record")?;
        } else {
            sqlx::query("DELETE FROM verified_values WHERE recipe_user_id = $1 AND value = $2")
                .bind(recipe_user_id)
                .bind(value)
                .execute(&self.pool)
                .await
                .context("failed to delete verification record")?;
        }
        Ok(())
    }

    async fn password_hash(&self, recipe_user_id: Uuid) -> Result<Option<String>, RepoError> {
        let query = "SELECT password_hash FROM login_methods WHERE recipe_user_id = $1";
        let row = sqlx::query(query)
            .bind(recipe_user_id)
            .fetch_optional(&self.pool)
            .await
            .context("failed to read password hash")?
            .ok_or(RepoError::UnknownLoginMethod(recipe_user_id))?;
        Ok(row.get("password_hash"))
    }

    async fn update_password_hash(&self, recipe_user_id: Uuid, password_hash: &str) -> Result<(), RepoError> {
        let query = "UPDATE login_methods SET password_hash = $2 WHERE recipe_user_id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(recipe_user_id)
            .bind(password_hash)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to update password hash")?;
        if result.rows_affected() == 0 {
            return Err(RepoError::UnknownLoginMethod(recipe_user_id));
        }
        Ok(())
    }
}
