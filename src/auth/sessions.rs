use std::time::Duration as StdDuration;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use rocket_db_pools::sqlx::{self, PgConnection, PgPool};
use sha2::{Digest, Sha256};

use crate::auth::{AuthError, AuthResult};
use crate::models::Session;

const SESSION_COLUMNS: &str = "id, user_id, client, issued_at, expires_at";

/// Refresh-token sessions. Token strings are persisted only as their SHA-256
/// digest; every lookup is an exact match on the unique digest index.
#[derive(Debug, Clone)]
pub struct SessionStore {
    pool: PgPool,
}

impl SessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a session for `token`. A token digest that already exists yields
    /// `Conflict` without aborting the surrounding transaction.
    pub async fn open(
        &self,
        conn: &mut PgConnection,
        account_id: i32,
        token: &str,
        client: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> AuthResult<Session> {
        let sql = format!(
            "INSERT INTO sessions (user_id, token_hash, client, issued_at, expires_at) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (token_hash) DO NOTHING \
             RETURNING {SESSION_COLUMNS}"
        );

        sqlx::query_as::<_, Session>(&sql)
            .bind(account_id)
            .bind(token_digest(token))
            .bind(client)
            .bind(now)
            .bind(now + ttl)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| AuthError::Conflict("sessions_token_hash_key".into()))
    }

    pub async fn find_by_token(
        &self,
        conn: &mut PgConnection,
        token: &str,
    ) -> AuthResult<Option<Session>> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE token_hash = $1");
        let session = sqlx::query_as::<_, Session>(&sql)
            .bind(token_digest(token))
            .fetch_optional(&mut *conn)
            .await?;
        Ok(session)
    }

    pub async fn find_by_id(
        &self,
        conn: &mut PgConnection,
        session_id: i32,
    ) -> AuthResult<Option<Session>> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1");
        let session = sqlx::query_as::<_, Session>(&sql)
            .bind(session_id)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(session)
    }

    /// Swap the session holding `old_token` over to `new_token` in place.
    ///
    /// The match and the update are one statement, so of two concurrent
    /// rotations of the same token exactly one sees a row; the other gets `None`.
    pub async fn rotate(
        &self,
        conn: &mut PgConnection,
        old_token: &str,
        new_token: &str,
        client: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> AuthResult<Option<Session>> {
        let sql = format!(
            "UPDATE sessions SET token_hash = $2, client = $3, expires_at = $4 \
             WHERE token_hash = $1 \
             RETURNING {SESSION_COLUMNS}"
        );

        let session = sqlx::query_as::<_, Session>(&sql)
            .bind(token_digest(old_token))
            .bind(token_digest(new_token))
            .bind(client)
            .bind(now + ttl)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(session)
    }

    /// Delete the session for `token`; reports whether a row was removed.
    pub async fn close(&self, conn: &mut PgConnection, token: &str) -> AuthResult<bool> {
        let result = sqlx::query("DELETE FROM sessions WHERE token_hash = $1")
            .bind(token_digest(token))
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn close_by_id(&self, conn: &mut PgConnection, session_id: i32) -> AuthResult<bool> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(session_id)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn close_all_for_account(
        &self,
        conn: &mut PgConnection,
        account_id: i32,
    ) -> AuthResult<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE user_id = $1")
            .bind(account_id)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected())
    }

    /// Sessions of `account_id` that are still live at `now`, most recently
    /// renewed first. Expired rows are filtered, not deleted.
    pub async fn list_active(
        &self,
        conn: &mut PgConnection,
        account_id: i32,
        now: DateTime<Utc>,
    ) -> AuthResult<Vec<Session>> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions \
             WHERE user_id = $1 AND expires_at > $2 \
             ORDER BY expires_at DESC, id DESC"
        );
        let sessions = sqlx::query_as::<_, Session>(&sql)
            .bind(account_id)
            .bind(now)
            .fetch_all(&mut *conn)
            .await?;
        Ok(sessions)
    }

    pub async fn purge_expired(&self, now: DateTime<Utc>) -> AuthResult<u64> {
        let mut conn = self.pool.acquire().await?;
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= $1")
            .bind(now)
            .execute(&mut *conn)
            .await?;

        Ok(result.rows_affected())
    }

    /// Periodically delete expired sessions until the runtime shuts down.
    pub async fn run_sweeper(self, interval: StdDuration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match self.purge_expired(Utc::now()).await {
                Ok(0) => {}
                Ok(removed) => log::info!("session sweep removed {} expired sessions", removed),
                Err(err) => log::warn!("session sweep failed: {}", err),
            }
        }
    }
}

/// Digest stored in place of the refresh token itself.
pub fn token_digest(token: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(token.as_bytes()))
}
