//! Auth flows: register, login, external login, refresh, logout, plus the
//! guarded account operations. Each flow runs in a single transaction.
//!
//! Session lifecycle: a session row is created on any login, rotated in place
//! on refresh, deleted on logout, and treated as expired once `expires_at`
//! passes (checked when used; the sweeper deletes such rows later).

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rocket_db_pools::sqlx::{PgConnection, PgPool};

use crate::auth::accounts::{AccountStore, normalize_email};
use crate::auth::identity::IdentityResolver;
use crate::auth::jwt::{TokenCodec, TokenKind, TokenPair};
use crate::auth::policy;
use crate::auth::sessions::SessionStore;
use crate::auth::{AuthError, AuthResult, PasswordService, TokenError};
use crate::models::{
    Account, AccountPatch, MAX_AVATAR_LEN, MAX_EMAIL_LEN, MAX_NAME_LEN, NewAccount,
    ProviderIdentity, Session,
};

const SESSION_OPEN_ATTEMPTS: usize = 3;

/// Password registration input.
#[derive(Debug, Clone)]
pub struct Registration {
    pub name: String,
    pub email: String,
    pub password: String,
    pub avatar: Option<String>,
}

/// Result of any flow that logs an account in.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub account: Account,
    pub session: Session,
    pub tokens: TokenPair,
}

#[derive(Clone)]
pub struct AuthService {
    pool: PgPool,
    codec: Arc<TokenCodec>,
    identity: IdentityResolver,
    accounts: AccountStore,
    sessions: SessionStore,
}

impl AuthService {
    pub fn new(
        pool: PgPool,
        codec: Arc<TokenCodec>,
        passwords: Arc<PasswordService>,
        external_email_domain: &str,
    ) -> Self {
        Self {
            sessions: SessionStore::new(pool.clone()),
            pool,
            codec,
            identity: IdentityResolver::new(passwords, external_email_domain),
            accounts: AccountStore,
        }
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn register(&self, registration: &Registration, client: &str) -> AuthResult<IssuedSession> {
        let email = normalize_email(&registration.email);
        let name = registration.name.trim();
        if !email.contains('@') {
            return Err(AuthError::Validation("a valid email is required".into()));
        }
        if registration.password.is_empty() {
            return Err(AuthError::Validation("a password is required".into()));
        }
        if name.is_empty() {
            return Err(AuthError::Validation("a name is required".into()));
        }
        check_length("name", name, MAX_NAME_LEN)?;
        check_length("email", &email, MAX_EMAIL_LEN)?;
        if let Some(avatar) = registration.avatar.as_deref() {
            check_length("avatar", avatar, MAX_AVATAR_LEN)?;
        }

        let password_hash = self.identity.passwords().hash_password(&registration.password)?;
        let new_account = NewAccount {
            name: name.to_string(),
            email,
            password_hash: Some(password_hash),
            avatar: registration.avatar.clone(),
            external_id: None,
            is_verified_author: false,
            is_admin: false,
        };
        let new_account = &new_account;

        retry_transient("register", move || async move {
            let now = Utc::now();
            let mut tx = self.pool.begin().await?;

            if self
                .accounts
                .find_by_email(&mut *tx, &new_account.email)
                .await?
                .is_some()
            {
                return Err(AuthError::Conflict("users_email_key".into()));
            }

            let account = self.accounts.insert(&mut *tx, new_account).await?;
            let issued = self.open_session(&mut *tx, account, client, now).await?;
            tx.commit().await?;

            log::info!(
                "registered account {} with session {}",
                issued.account.id,
                issued.session.id
            );
            Ok(issued)
        })
        .await
    }

    pub async fn login(&self, email: &str, password: &str, client: &str) -> AuthResult<IssuedSession> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(AuthError::Validation("email and password are required".into()));
        }

        retry_transient("login", move || async move {
            let now = Utc::now();
            let mut tx = self.pool.begin().await?;

            let account = self
                .identity
                .resolve_password_login(&mut *tx, email, password)
                .await?;
            let issued = self.open_session(&mut *tx, account, client, now).await?;
            tx.commit().await?;

            log::info!(
                "account {} logged in with session {}",
                issued.account.id,
                issued.session.id
            );
            Ok(issued)
        })
        .await
    }

    /// A uniqueness conflict means a concurrent login created or linked the same
    /// identity first; the retry resolves to that account.
    pub async fn external_login(
        &self,
        identity: &ProviderIdentity,
        client: &str,
    ) -> AuthResult<IssuedSession> {
        retry_transient("external_login", move || async move {
            match self.external_login_once(identity, client).await {
                Err(AuthError::Conflict(constraint)) => {
                    log::warn!(
                        "external login lost a race on {}; resolving again",
                        constraint
                    );
                    self.external_login_once(identity, client).await
                }
                other => other,
            }
        })
        .await
    }

    async fn external_login_once(
        &self,
        identity: &ProviderIdentity,
        client: &str,
    ) -> AuthResult<IssuedSession> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let account = self.identity.resolve_external_login(&mut *tx, identity).await?;
        let issued = self.open_session(&mut *tx, account, client, now).await?;
        tx.commit().await?;

        log::info!(
            "account {} logged in externally with session {}",
            issued.account.id,
            issued.session.id
        );
        Ok(issued)
    }

    /// Exchange a live refresh token for a new pair, rotating its session row.
    /// A token that is validly signed but no longer stored was already rotated
    /// or revoked and fails as `TokenReplay`.
    pub async fn refresh(&self, refresh_token: &str, client: &str) -> AuthResult<TokenPair> {
        retry_transient("refresh", move || self.refresh_once(refresh_token, client)).await
    }

    async fn refresh_once(&self, refresh_token: &str, client: &str) -> AuthResult<TokenPair> {
        let now = Utc::now();
        let claims = self
            .codec
            .verify_at(refresh_token, now)
            .map_err(|err| match err {
                TokenError::Expired => AuthError::TokenExpired,
                other => AuthError::Token(other),
            })?;
        if claims.kind != TokenKind::Refresh {
            return Err(AuthError::Token(TokenError::WrongKind));
        }

        let mut tx = self.pool.begin().await?;

        let session = match self.sessions.find_by_token(&mut *tx, refresh_token).await? {
            Some(session) => session,
            None => {
                log::warn!("refresh token for account {} is not live", claims.uid);
                return Err(AuthError::TokenReplay);
            }
        };
        if !session.is_live_at(now) {
            return Err(AuthError::TokenExpired);
        }

        let tokens = self.codec.issue_pair(session.user_id, now)?;
        let rotated = self
            .sessions
            .rotate(
                &mut *tx,
                refresh_token,
                &tokens.refresh.token,
                client,
                now,
                self.codec.refresh_token_ttl(),
            )
            .await?;

        let Some(session) = rotated else {
            log::warn!(
                "refresh token for account {} was rotated concurrently",
                claims.uid
            );
            return Err(AuthError::TokenReplay);
        };
        tx.commit().await?;

        log::info!(
            "rotated session {} for account {}",
            session.id,
            session.user_id
        );
        Ok(tokens)
    }

    /// Close the session behind `refresh_token` (idempotent) and optionally every
    /// other session of the caller. Returns the number of sessions removed.
    pub async fn logout(
        &self,
        caller: &Account,
        refresh_token: &str,
        all_devices: bool,
    ) -> AuthResult<u64> {
        retry_transient("logout", move || async move {
            let mut tx = self.pool.begin().await?;

            let mut closed = 0;
            if let Some(session) = self.sessions.find_by_token(&mut *tx, refresh_token).await? {
                policy::ensure(policy::can_mutate_owned(caller, session.user_id))?;
                if self.sessions.close(&mut *tx, refresh_token).await? {
                    closed += 1;
                }
            }
            if all_devices {
                closed += self
                    .sessions
                    .close_all_for_account(&mut *tx, caller.id)
                    .await?;
            }
            tx.commit().await?;

            log::info!("account {} closed {} sessions", caller.id, closed);
            Ok(closed)
        })
        .await
    }

    pub async fn list_sessions(&self, caller: &Account) -> AuthResult<Vec<Session>> {
        retry_transient("list_sessions", move || async move {
            let mut conn = self.pool.acquire().await?;
            self.sessions
                .list_active(&mut *conn, caller.id, Utc::now())
                .await
        })
        .await
    }

    pub async fn close_session(&self, caller: &Account, session_id: i32) -> AuthResult<()> {
        retry_transient("close_session", move || async move {
            let mut tx = self.pool.begin().await?;

            let session = self
                .sessions
                .find_by_id(&mut *tx, session_id)
                .await?
                .ok_or(AuthError::NotFound)?;
            policy::ensure(policy::can_mutate_owned(caller, session.user_id))?;
            self.sessions.close_by_id(&mut *tx, session_id).await?;
            tx.commit().await?;
            Ok(())
        })
        .await
    }

    /// Load the account an access token belongs to.
    pub async fn authenticate(&self, access_token: &str) -> AuthResult<Account> {
        let account_id = self.codec.verify_kind(access_token, TokenKind::Access)?.uid;
        retry_transient("authenticate", move || async move {
            let mut conn = self.pool.acquire().await?;
            self.accounts
                .find_by_id(&mut *conn, account_id)
                .await?
                .ok_or(AuthError::Unauthenticated)
        })
        .await
    }

    pub async fn account(&self, caller: &Account, account_id: i32) -> AuthResult<Account> {
        policy::ensure(policy::can_access_account(caller, account_id))?;
        retry_transient("account", move || async move {
            let mut conn = self.pool.acquire().await?;
            self.accounts
                .find_by_id(&mut *conn, account_id)
                .await?
                .ok_or(AuthError::NotFound)
        })
        .await
    }

    pub async fn update_account(
        &self,
        caller: &Account,
        account_id: i32,
        patch: &AccountPatch,
    ) -> AuthResult<Account> {
        policy::ensure(policy::can_access_account(caller, account_id))?;
        if patch.touches_verification() {
            policy::ensure(policy::can_change_verification_flag(caller))?;
        }

        let mut patch = patch.clone();
        if let Some(email) = patch.email.as_deref() {
            let email = normalize_email(email);
            if !email.contains('@') {
                return Err(AuthError::Validation("a valid email is required".into()));
            }
            check_length("email", &email, MAX_EMAIL_LEN)?;
            patch.email = Some(email);
        }
        if let Some(name) = patch.name.as_deref() {
            if name.trim().is_empty() {
                return Err(AuthError::Validation("name must not be empty".into()));
            }
            check_length("name", name, MAX_NAME_LEN)?;
        }
        if let Some(Some(avatar)) = patch.avatar.as_ref() {
            check_length("avatar", avatar, MAX_AVATAR_LEN)?;
        }
        let patch = &patch;

        retry_transient("update_account", move || async move {
            let mut tx = self.pool.begin().await?;

            let mut account = self
                .accounts
                .find_by_id(&mut *tx, account_id)
                .await?
                .ok_or(AuthError::NotFound)?;

            if let Some(email) = patch.email.as_deref() {
                if email != account.email {
                    if let Some(other) = self.accounts.find_by_email(&mut *tx, email).await? {
                        if other.id != account.id {
                            return Err(AuthError::Conflict("users_email_key".into()));
                        }
                    }
                }
            }

            if patch.apply(&mut account) {
                account = self
                    .accounts
                    .update_profile(&mut *tx, &account)
                    .await?
                    .ok_or(AuthError::NotFound)?;
            }
            tx.commit().await?;
            Ok(account)
        })
        .await
    }

    pub async fn delete_account(&self, caller: &Account, account_id: i32) -> AuthResult<()> {
        policy::ensure(policy::can_access_account(caller, account_id))?;
        retry_transient("delete_account", move || async move {
            let mut tx = self.pool.begin().await?;
            if !self.accounts.delete(&mut *tx, account_id).await? {
                return Err(AuthError::NotFound);
            }
            tx.commit().await?;
            log::info!("account {} deleted by account {}", account_id, caller.id);
            Ok(())
        })
        .await
    }

    /// Mint a pair for `account` and record its refresh half. Token digests are
    /// unique; on the unlikely collision a fresh pair is minted.
    async fn open_session(
        &self,
        conn: &mut PgConnection,
        account: Account,
        client: &str,
        now: DateTime<Utc>,
    ) -> AuthResult<IssuedSession> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let tokens = self.codec.issue_pair(account.id, now)?;
            match self
                .sessions
                .open(
                    conn,
                    account.id,
                    &tokens.refresh.token,
                    client,
                    now,
                    self.codec.refresh_token_ttl(),
                )
                .await
            {
                Ok(session) => {
                    return Ok(IssuedSession {
                        account,
                        session,
                        tokens,
                    });
                }
                Err(AuthError::Conflict(_)) if attempt < SESSION_OPEN_ATTEMPTS => {
                    log::warn!("refresh token collision for account {}; reissuing", account.id);
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn check_length(field: &str, value: &str, max: usize) -> AuthResult<()> {
    if value.chars().count() > max {
        return Err(AuthError::Validation(format!(
            "{field} must be at most {max} characters"
        )));
    }
    Ok(())
}

/// Run `attempt`, repeating it once if it failed on a transient storage error.
/// A second transient failure is reported as `Unavailable`.
async fn retry_transient<T, F, Fut>(operation: &'static str, mut attempt: F) -> AuthResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AuthResult<T>>,
{
    match attempt().await {
        Err(err) if err.is_transient() => {
            log::warn!("{}: transient storage error, retrying: {}", operation, err);
            attempt().await.map_err(|err| {
                if err.is_transient() {
                    AuthError::Unavailable(err.to_string())
                } else {
                    err
                }
            })
        }
        other => other,
    }
}
