use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::auth::jwt::{TokenMetadata, TokenPair};
use crate::models::{Account, Session};

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LogoutRequest {
    pub refresh_token: String,
    #[serde(default)]
    pub all_devices: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub access_token_expires_at: DateTime<Utc>,
    pub refresh_token_expires_at: DateTime<Utc>,
}

impl From<TokenPair> for TokenResponse {
    fn from(pair: TokenPair) -> Self {
        Self {
            access_token: pair.access.token,
            refresh_token: pair.refresh.token,
            token_type: "bearer".to_string(),
            access_token_expires_at: pair.access.expires_at,
            refresh_token_expires_at: pair.refresh.expires_at,
        }
    }
}

/// One of the caller's live sessions.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionInfo {
    pub id: i32,
    pub client: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl From<Session> for SessionInfo {
    fn from(session: Session) -> Self {
        Self {
            id: session.id,
            client: session.client,
            issued_at: session.issued_at,
            expires_at: session.expires_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LogoutResponse {
    pub message: String,
    pub sessions_closed: u64,
}

/// Public view of an account; never carries the password hash.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AccountView {
    pub id: i32,
    pub name: String,
    pub email: String,
    pub registered_at: DateTime<Utc>,
    pub is_verified_author: bool,
    pub is_admin: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    pub has_password: bool,
    pub linked_external: bool,
}

impl From<Account> for AccountView {
    fn from(account: Account) -> Self {
        Self {
            has_password: account.has_password(),
            linked_external: account.external_id.is_some(),
            id: account.id,
            name: account.name,
            email: account.email,
            registered_at: account.registered_at,
            is_verified_author: account.is_verified_author,
            is_admin: account.is_admin,
            avatar: account.avatar,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TokenSettings {
    pub algorithm: String,
    pub issuer: String,
    pub audience: String,
    pub access_token_ttl_secs: i64,
    pub refresh_token_ttl_secs: i64,
}

impl From<TokenMetadata> for TokenSettings {
    fn from(meta: TokenMetadata) -> Self {
        Self {
            algorithm: meta.algorithm,
            issuer: meta.issuer,
            audience: meta.audience,
            access_token_ttl_secs: meta.access_token_ttl_secs,
            refresh_token_ttl_secs: meta.refresh_token_ttl_secs,
        }
    }
}
