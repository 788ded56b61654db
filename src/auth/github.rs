//! GitHub as the external identity provider: authorize redirect, code exchange
//! and profile lookup. Produces a [`ProviderIdentity`] for the identity resolver.

use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::{Client, Url};
use serde::Deserialize;

use crate::auth::config::GithubConfig;
use crate::auth::{AuthError, AuthResult};
use crate::models::ProviderIdentity;

const AUTHORIZE_URL: &str = "https://github.com/login/oauth/authorize";
const TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
const API_BASE: &str = "https://api.github.com";
const SCOPE: &str = "read:user user:email";
const CLIENT_NAME: &str = "newsdesk-api";

pub struct GithubClient {
    http: Client,
    config: GithubConfig,
    authorize_url: String,
    token_url: String,
    api_base: String,
}

#[derive(Debug, Deserialize)]
struct TokenExchange {
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GithubUser {
    id: u64,
    login: String,
    name: Option<String>,
    email: Option<String>,
    avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GithubEmail {
    email: String,
    primary: bool,
    verified: bool,
}

impl GithubClient {
    pub fn new(config: GithubConfig) -> AuthResult<Self> {
        Self::with_endpoints(config, AUTHORIZE_URL, TOKEN_URL, API_BASE)
    }

    pub fn with_endpoints(
        config: GithubConfig,
        authorize_url: &str,
        token_url: &str,
        api_base: &str,
    ) -> AuthResult<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|err| AuthError::Config(format!("github http client: {err}")))?;

        Ok(Self {
            http,
            config,
            authorize_url: authorize_url.to_string(),
            token_url: token_url.to_string(),
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }

    pub fn authorize_url(&self, state: &str) -> AuthResult<String> {
        let url = Url::parse_with_params(
            &self.authorize_url,
            &[
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("scope", SCOPE),
                ("state", state),
            ],
        )
        .map_err(|err| AuthError::Config(format!("github authorize url: {err}")))?;
        Ok(url.to_string())
    }

    /// Exchange the callback `code` and fetch the identity behind it.
    pub async fn identity_for_code(&self, code: &str) -> AuthResult<ProviderIdentity> {
        let access_token = self.exchange_code(code).await?;
        let user: GithubUser = self
            .http
            .get(format!("{}/user", self.api_base))
            .bearer_auth(&access_token)
            .header(ACCEPT, "application/vnd.github+json")
            .header(USER_AGENT, CLIENT_NAME)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let email = match user.email.clone() {
            Some(email) => Some(email),
            None => self.primary_email(&access_token).await?,
        };

        Ok(identity_from(user, email))
    }

    async fn exchange_code(&self, code: &str) -> AuthResult<String> {
        let body = serde_json::json!({
            "client_id": self.config.client_id,
            "client_secret": self.config.client_secret,
            "code": code,
            "redirect_uri": self.config.redirect_uri,
        });

        let exchange: TokenExchange = self
            .http
            .post(&self.token_url)
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, CLIENT_NAME)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        match exchange {
            TokenExchange {
                access_token: Some(token),
                ..
            } => Ok(token),
            TokenExchange {
                error,
                error_description,
                ..
            } => Err(AuthError::Provider(
                error_description
                    .or(error)
                    .unwrap_or_else(|| "code exchange returned no token".into()),
            )),
        }
    }

    async fn primary_email(&self, access_token: &str) -> AuthResult<Option<String>> {
        let emails: Vec<GithubEmail> = self
            .http
            .get(format!("{}/user/emails", self.api_base))
            .bearer_auth(access_token)
            .header(ACCEPT, "application/vnd.github+json")
            .header(USER_AGENT, CLIENT_NAME)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(pick_primary_email(emails))
    }
}

fn identity_from(user: GithubUser, email: Option<String>) -> ProviderIdentity {
    ProviderIdentity {
        external_id: user.id.to_string(),
        email,
        display_name: user.name.filter(|name| !name.trim().is_empty()).or(Some(user.login)),
        avatar_url: user.avatar_url,
    }
}

fn pick_primary_email(emails: Vec<GithubEmail>) -> Option<String> {
    emails
        .into_iter()
        .find(|entry| entry.primary && entry.verified)
        .map(|entry| entry.email)
}
