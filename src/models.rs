use chrono::{DateTime, Utc};
use rocket_db_pools::sqlx::FromRow;
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};

// ===== Accounts =====

// Column widths of the `users` table, in characters.
pub const MAX_NAME_LEN: usize = 128;
pub const MAX_EMAIL_LEN: usize = 256;
pub const MAX_AVATAR_LEN: usize = 512;

/// Local identity record. `password_hash` is absent for provider-only accounts.
#[derive(Debug, Clone, FromRow)]
pub struct Account {
    pub id: i32,
    pub name: String,
    pub email: String,
    pub password_hash: Option<String>,
    pub registered_at: DateTime<Utc>,
    pub is_verified_author: bool,
    pub is_admin: bool,
    pub avatar: Option<String>,
    pub external_id: Option<String>,
}

impl Account {
    pub fn has_password(&self) -> bool {
        self.password_hash.is_some()
    }
}

/// Values for a fresh `users` row.
#[derive(Debug, Clone, Default)]
pub struct NewAccount {
    pub name: String,
    pub email: String,
    pub password_hash: Option<String>,
    pub avatar: Option<String>,
    pub external_id: Option<String>,
    pub is_verified_author: bool,
    pub is_admin: bool,
}

/// Partial profile update. Only the fields that are present are applied.
///
/// `avatar` distinguishes an absent field (`None`, keep) from an explicit
/// `null` (`Some(None)`, clear).
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct AccountPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(
        default,
        deserialize_with = "present_field",
        skip_serializing_if = "Option::is_none"
    )]
    #[schemars(with = "Option<String>")]
    pub avatar: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_verified_author: Option<bool>,
}

impl AccountPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.email.is_none()
            && self.avatar.is_none()
            && self.is_verified_author.is_none()
    }

    pub fn touches_verification(&self) -> bool {
        self.is_verified_author.is_some()
    }

    /// Apply the present fields to `account`, returning whether anything changed.
    /// The email is expected to be normalised already.
    pub fn apply(&self, account: &mut Account) -> bool {
        let mut changed = false;

        if let Some(name) = &self.name {
            if *name != account.name {
                account.name = name.clone();
                changed = true;
            }
        }
        if let Some(email) = &self.email {
            if *email != account.email {
                account.email = email.clone();
                changed = true;
            }
        }
        if let Some(avatar) = &self.avatar {
            if account.avatar != *avatar {
                account.avatar = avatar.clone();
                changed = true;
            }
        }
        if let Some(flag) = self.is_verified_author {
            if flag != account.is_verified_author {
                account.is_verified_author = flag;
                changed = true;
            }
        }

        changed
    }
}

/// A field that is present deserializes to `Some`, even when its value is `null`.
fn present_field<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// Identity asserted by an external provider after its own consent flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderIdentity {
    pub external_id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

// ===== Sessions =====

/// One refresh-token session (a logged-in device or browser).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Session {
    pub id: i32,
    pub user_id: i32,
    pub client: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}
