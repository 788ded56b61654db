use crate::auth::{AuthError, AuthResult};

const MIN_SECRET_LEN: usize = 32;
/// Ten years. Longer lifetimes overflow date arithmetic long before they are useful.
pub const MAX_TTL_SECS: i64 = 10 * 365 * 24 * 60 * 60;

/// Authentication configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub issuer: String,
    pub audience: String,
    pub access_token_ttl_secs: i64,
    pub refresh_token_ttl_secs: i64,
    pub session_sweep_interval_secs: u64,
    pub external_email_domain: String,
    pub oauth_state_cookie_name: String,
    pub cookie_secure: bool,
    pub github: Option<GithubConfig>,
}

/// OAuth application credentials for GitHub login.
#[derive(Debug, Clone)]
pub struct GithubConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

impl AuthConfig {
    pub fn from_env() -> AuthResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> AuthResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let jwt_secret = lookup("NEWSDESK_JWT_SECRET")
            .ok_or_else(|| AuthError::Config("NEWSDESK_JWT_SECRET is required".into()))?;
        if jwt_secret.len() < MIN_SECRET_LEN {
            return Err(AuthError::Config(format!(
                "NEWSDESK_JWT_SECRET must be at least {MIN_SECRET_LEN} bytes"
            )));
        }

        let issuer = lookup("NEWSDESK_JWT_ISSUER").unwrap_or_else(|| "newsdesk".into());
        let audience = lookup("NEWSDESK_JWT_AUDIENCE").unwrap_or_else(|| "newsdesk-api".into());
        let access_token_ttl_secs = positive_secs(&lookup, "NEWSDESK_ACCESS_TOKEN_TTL_SECS", 30 * 60)?;
        let refresh_token_ttl_secs = positive_secs(
            &lookup,
            "NEWSDESK_REFRESH_TOKEN_TTL_SECS",
            7 * 24 * 60 * 60,
        )?;
        let session_sweep_interval_secs = lookup("NEWSDESK_SESSION_SWEEP_INTERVAL_SECS")
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(60 * 60);
        let external_email_domain = lookup("NEWSDESK_EXTERNAL_EMAIL_DOMAIN")
            .unwrap_or_else(|| "github.user".into());
        let oauth_state_cookie_name = lookup("NEWSDESK_OAUTH_STATE_COOKIE_NAME")
            .unwrap_or_else(|| "newsdesk_oauth_state".into());
        let cookie_secure = lookup("NEWSDESK_COOKIE_SECURE")
            .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "on"))
            .unwrap_or(true);

        let github = match (
            lookup("NEWSDESK_GITHUB_CLIENT_ID"),
            lookup("NEWSDESK_GITHUB_CLIENT_SECRET"),
        ) {
            (Some(client_id), Some(client_secret)) => Some(GithubConfig {
                client_id,
                client_secret,
                redirect_uri: lookup("NEWSDESK_GITHUB_REDIRECT_URI").unwrap_or_else(|| {
                    "http://localhost:8000/api/v1/auth/github/callback".into()
                }),
            }),
            _ => None,
        };

        Ok(Self {
            jwt_secret,
            issuer,
            audience,
            access_token_ttl_secs,
            refresh_token_ttl_secs,
            session_sweep_interval_secs,
            external_email_domain,
            oauth_state_cookie_name,
            cookie_secure,
            github,
        })
    }

    pub fn access_token_ttl(&self) -> chrono::Duration {
        ttl_from_secs(self.access_token_ttl_secs)
    }

    pub fn refresh_token_ttl(&self) -> chrono::Duration {
        ttl_from_secs(self.refresh_token_ttl_secs)
    }
}

/// Out-of-range values saturate; token issuance then rejects the ttl as a
/// config error instead of panicking.
fn ttl_from_secs(secs: i64) -> chrono::Duration {
    chrono::Duration::try_seconds(secs).unwrap_or(chrono::Duration::MAX)
}

fn positive_secs<F>(lookup: &F, key: &str, default: i64) -> AuthResult<i64>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => match raw.parse::<i64>() {
            Ok(value) if value > 0 && value <= MAX_TTL_SECS => Ok(value),
            _ => Err(AuthError::Config(format!(
                "{key} must be a positive number of seconds no greater than {MAX_TTL_SECS}"
            ))),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn config_from(pairs: &[(&str, &str)]) -> AuthResult<AuthConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AuthConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_only_secret_is_set() {
        let config = config_from(&[("NEWSDESK_JWT_SECRET", SECRET)]).expect("config");
        assert_eq!(config.access_token_ttl_secs, 1800);
        assert_eq!(config.refresh_token_ttl_secs, 604_800);
        assert_eq!(config.issuer, "newsdesk");
        assert_eq!(config.external_email_domain, "github.user");
        assert!(config.cookie_secure);
        assert!(config.github.is_none());
    }

    #[test]
    fn missing_or_short_secret_is_rejected() {
        assert!(matches!(config_from(&[]), Err(AuthError::Config(_))));
        assert!(matches!(
            config_from(&[("NEWSDESK_JWT_SECRET", "short")]),
            Err(AuthError::Config(_))
        ));
    }

    #[test]
    fn non_positive_ttl_is_a_config_error() {
        let result = config_from(&[
            ("NEWSDESK_JWT_SECRET", SECRET),
            ("NEWSDESK_ACCESS_TOKEN_TTL_SECS", "0"),
        ]);
        assert!(matches!(result, Err(AuthError::Config(_))));
    }

    #[test]
    fn ttl_beyond_ten_years_is_a_config_error() {
        for raw in ["10000000000000", "9223372036854775807", "315360001"] {
            let result = config_from(&[
                ("NEWSDESK_JWT_SECRET", SECRET),
                ("NEWSDESK_REFRESH_TOKEN_TTL_SECS", raw),
            ]);
            assert!(matches!(result, Err(AuthError::Config(_))), "{raw} accepted");
        }

        let longest = config_from(&[
            ("NEWSDESK_JWT_SECRET", SECRET),
            ("NEWSDESK_ACCESS_TOKEN_TTL_SECS", "315360000"),
        ])
        .expect("ten years is accepted");
        assert_eq!(longest.access_token_ttl().num_seconds(), MAX_TTL_SECS);
    }

    #[test]
    fn oversized_ttl_fields_saturate_instead_of_panicking() {
        let mut config = config_from(&[("NEWSDESK_JWT_SECRET", SECRET)]).expect("config");
        config.access_token_ttl_secs = i64::MAX;
        assert_eq!(config.access_token_ttl(), chrono::Duration::MAX);
    }

    #[test]
    fn github_needs_both_id_and_secret() {
        let partial = config_from(&[
            ("NEWSDESK_JWT_SECRET", SECRET),
            ("NEWSDESK_GITHUB_CLIENT_ID", "abc"),
        ])
        .expect("config");
        assert!(partial.github.is_none());

        let full = config_from(&[
            ("NEWSDESK_JWT_SECRET", SECRET),
            ("NEWSDESK_GITHUB_CLIENT_ID", "abc"),
            ("NEWSDESK_GITHUB_CLIENT_SECRET", "shh"),
        ])
        .expect("config");
        let github = full.github.expect("github enabled");
        assert_eq!(github.client_id, "abc");
        assert!(github.redirect_uri.ends_with("/auth/github/callback"));
    }
}
