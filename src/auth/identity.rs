//! Maps inbound credentials to local accounts.
//!
//! Two entry points: the password path, which never reveals whether the email
//! exists, and the external-provider path, which finds, links or creates the
//! account for a provider identity. The provider path is the only
//! find-or-create routine in the crate.

use std::sync::Arc;

use rocket_db_pools::sqlx::PgConnection;

use crate::auth::accounts::{AccountStore, normalize_email};
use crate::auth::{AuthError, AuthResult, PasswordService};
use crate::models::{Account, MAX_AVATAR_LEN, MAX_NAME_LEN, NewAccount, ProviderIdentity};

#[derive(Clone)]
pub struct IdentityResolver {
    accounts: AccountStore,
    passwords: Arc<PasswordService>,
    external_email_domain: String,
}

impl IdentityResolver {
    pub fn new(passwords: Arc<PasswordService>, external_email_domain: impl Into<String>) -> Self {
        Self {
            accounts: AccountStore,
            passwords,
            external_email_domain: external_email_domain.into(),
        }
    }

    pub fn passwords(&self) -> &PasswordService {
        &self.passwords
    }

    /// Unknown email, provider-only account and wrong password all yield
    /// `InvalidCredentials`.
    pub async fn resolve_password_login(
        &self,
        conn: &mut PgConnection,
        email: &str,
        password: &str,
    ) -> AuthResult<Account> {
        let account = self.accounts.find_by_email(conn, email).await?;

        let (account, hash) = match account {
            Some(account) => match account.password_hash.clone() {
                Some(hash) => (account, hash),
                None => {
                    self.passwords.verify_against_dummy(password);
                    return Err(AuthError::InvalidCredentials);
                }
            },
            None => {
                self.passwords.verify_against_dummy(password);
                return Err(AuthError::InvalidCredentials);
            }
        };

        if self.passwords.verify_password(password, &hash)? {
            Ok(account)
        } else {
            Err(AuthError::InvalidCredentials)
        }
    }

    /// Find by external id, else link by email, else create.
    ///
    /// A concurrent creator of the same identity makes the insert fail with
    /// `Conflict`; the caller rolls back and resolves again, which then takes
    /// the find or link branch.
    pub async fn resolve_external_login(
        &self,
        conn: &mut PgConnection,
        identity: &ProviderIdentity,
    ) -> AuthResult<Account> {
        let external_id = identity.external_id.trim();
        if external_id.is_empty() {
            return Err(AuthError::Validation("external identity has no id".into()));
        }

        if let Some(account) = self.accounts.find_by_external_id(conn, external_id).await? {
            return Ok(account);
        }

        let provided_email = identity
            .email
            .as_deref()
            .map(normalize_email)
            .filter(|email| !email.is_empty());

        if let Some(email) = &provided_email {
            if let Some(existing) = self.accounts.find_by_email(conn, email).await? {
                return match self
                    .accounts
                    .link_external_id(conn, existing.id, external_id)
                    .await?
                {
                    Some(linked) => {
                        log::info!(
                            "linked external identity to existing account {}",
                            linked.id
                        );
                        Ok(linked)
                    }
                    None => Err(AuthError::Conflict("users_external_id_key".into())),
                };
            }
        }

        let new_account = self.new_external_account(identity, external_id, provided_email);
        let account = self.accounts.insert(conn, &new_account).await?;
        log::info!("created account {} from external identity", account.id);
        Ok(account)
    }

    fn new_external_account(
        &self,
        identity: &ProviderIdentity,
        external_id: &str,
        provided_email: Option<String>,
    ) -> NewAccount {
        let email = provided_email
            .unwrap_or_else(|| placeholder_email(external_id, &self.external_email_domain));
        let name = identity
            .display_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .or_else(|| identity.email.clone().filter(|email| !email.trim().is_empty()))
            .unwrap_or_else(|| placeholder_name(external_id))
            .chars()
            .take(MAX_NAME_LEN)
            .collect();
        // Provider avatars are optional; one that does not fit is dropped.
        let avatar = identity
            .avatar_url
            .clone()
            .filter(|url| url.chars().count() <= MAX_AVATAR_LEN);

        NewAccount {
            name,
            email,
            password_hash: None,
            avatar,
            external_id: Some(external_id.to_string()),
            is_verified_author: true,
            is_admin: false,
        }
    }
}

/// Unique per external id because external ids are unique.
pub fn placeholder_email(external_id: &str, domain: &str) -> String {
    format!("{}@{}", external_id, domain).to_lowercase()
}

pub fn placeholder_name(external_id: &str) -> String {
    format!("user_{}", external_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> IdentityResolver {
        let passwords = PasswordService::new().expect("password service");
        IdentityResolver::new(Arc::new(passwords), "github.user")
    }

    fn identity(email: Option<&str>, display_name: Option<&str>) -> ProviderIdentity {
        ProviderIdentity {
            external_id: "583231".into(),
            email: email.map(str::to_string),
            display_name: display_name.map(str::to_string),
            avatar_url: Some("https://avatars.example.com/u/583231".into()),
        }
    }

    #[test]
    fn new_external_accounts_are_verified_and_passwordless() {
        let account = resolver().new_external_account(
            &identity(Some("octo@example.com"), Some("Octo Cat")),
            "583231",
            Some("octo@example.com".into()),
        );
        assert_eq!(account.name, "Octo Cat");
        assert_eq!(account.email, "octo@example.com");
        assert!(account.is_verified_author);
        assert!(!account.is_admin);
        assert!(account.password_hash.is_none());
        assert_eq!(account.external_id.as_deref(), Some("583231"));
        assert!(account.avatar.is_some());
    }

    #[test]
    fn name_falls_back_to_email_then_placeholder() {
        let resolver = resolver();
        let by_email = resolver.new_external_account(
            &identity(Some("octo@example.com"), Some("  ")),
            "583231",
            Some("octo@example.com".into()),
        );
        assert_eq!(by_email.name, "octo@example.com");

        let anonymous = resolver.new_external_account(&identity(None, None), "583231", None);
        assert_eq!(anonymous.name, "user_583231");
        assert_eq!(anonymous.email, "583231@github.user");
    }

    #[test]
    fn oversized_provider_profile_fields_are_fitted_to_columns() {
        let mut long = identity(Some("octo@example.com"), None);
        long.display_name = Some("n".repeat(MAX_NAME_LEN + 40));
        long.avatar_url = Some(format!("https://avatars.example.com/{}", "a".repeat(MAX_AVATAR_LEN)));

        let account = resolver().new_external_account(&long, "583231", None);
        assert_eq!(account.name.chars().count(), MAX_NAME_LEN);
        assert!(account.avatar.is_none());
    }

    #[test]
    fn placeholder_emails_differ_per_external_id() {
        assert_ne!(
            placeholder_email("1", "github.user"),
            placeholder_email("2", "github.user")
        );
    }
}
