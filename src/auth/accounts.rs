use rocket_db_pools::sqlx::{self, PgConnection};

use crate::auth::AuthResult;
use crate::models::{Account, NewAccount};

const ACCOUNT_COLUMNS: &str = "id, name, email, password_hash, registered_at, \
     is_verified_author, is_admin, avatar, external_id";

/// Row-level access to `users`. Uniqueness of `email` and `external_id` is
/// enforced by the table; violations surface as `AuthError::Conflict`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccountStore;

impl AccountStore {
    pub async fn find_by_id(&self, conn: &mut PgConnection, id: i32) -> AuthResult<Option<Account>> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM users WHERE id = $1");
        Ok(sqlx::query_as::<_, Account>(&sql)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?)
    }

    pub async fn find_by_email(
        &self,
        conn: &mut PgConnection,
        email: &str,
    ) -> AuthResult<Option<Account>> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM users WHERE email = $1");
        Ok(sqlx::query_as::<_, Account>(&sql)
            .bind(normalize_email(email))
            .fetch_optional(&mut *conn)
            .await?)
    }

    pub async fn find_by_external_id(
        &self,
        conn: &mut PgConnection,
        external_id: &str,
    ) -> AuthResult<Option<Account>> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM users WHERE external_id = $1");
        Ok(sqlx::query_as::<_, Account>(&sql)
            .bind(external_id)
            .fetch_optional(&mut *conn)
            .await?)
    }

    pub async fn insert(&self, conn: &mut PgConnection, new: &NewAccount) -> AuthResult<Account> {
        let sql = format!(
            "INSERT INTO users (name, email, password_hash, avatar, external_id, is_verified_author, is_admin) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING {ACCOUNT_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, Account>(&sql)
            .bind(&new.name)
            .bind(normalize_email(&new.email))
            .bind(new.password_hash.as_deref())
            .bind(new.avatar.as_deref())
            .bind(new.external_id.as_deref())
            .bind(new.is_verified_author)
            .bind(new.is_admin)
            .fetch_one(&mut *conn)
            .await?)
    }

    /// Attach `external_id` to an account that has none (or already has this one).
    /// Returns `None` when the account is bound to a different external identity.
    pub async fn link_external_id(
        &self,
        conn: &mut PgConnection,
        account_id: i32,
        external_id: &str,
    ) -> AuthResult<Option<Account>> {
        let sql = format!(
            "UPDATE users SET external_id = $2 \
             WHERE id = $1 AND (external_id IS NULL OR external_id = $2) \
             RETURNING {ACCOUNT_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, Account>(&sql)
            .bind(account_id)
            .bind(external_id)
            .fetch_optional(&mut *conn)
            .await?)
    }

    /// Persist the profile fields of `account` (name, email, avatar, verified flag).
    pub async fn update_profile(
        &self,
        conn: &mut PgConnection,
        account: &Account,
    ) -> AuthResult<Option<Account>> {
        let sql = format!(
            "UPDATE users SET name = $2, email = $3, avatar = $4, is_verified_author = $5 \
             WHERE id = $1 \
             RETURNING {ACCOUNT_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, Account>(&sql)
            .bind(account.id)
            .bind(&account.name)
            .bind(normalize_email(&account.email))
            .bind(account.avatar.as_deref())
            .bind(account.is_verified_author)
            .fetch_optional(&mut *conn)
            .await?)
    }

    /// Delete the account; sessions and content go with it via ON DELETE CASCADE.
    pub async fn delete(&self, conn: &mut PgConnection, account_id: i32) -> AuthResult<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(account_id)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
