//! Authentication and session handling: token codec, session store, identity
//! resolution, authorization policy, the orchestrating service, Rocket request
//! guards and HTTP route handlers.

use std::sync::Arc;

use rocket_db_pools::sqlx::PgPool;

pub mod accounts;
pub mod config;
pub mod error;
pub mod github;
pub mod guards;
pub mod identity;
pub mod jwt;
pub mod passwords;
pub mod policy;
pub mod responses;
pub mod routes;
pub mod service;
pub mod sessions;

pub use config::{AuthConfig, GithubConfig};
pub use error::{AuthError, AuthResult, TokenError};
pub use github::GithubClient;
pub use guards::{AuthUser, ClientDescriptor, RequireAdmin};
pub use jwt::TokenCodec;
pub use passwords::PasswordService;
pub use service::AuthService;
pub use sessions::SessionStore;

#[derive(Clone)]
pub struct AuthState {
    pub config: AuthConfig,
    pub service: AuthService,
    pub github: Option<Arc<GithubClient>>,
}

impl AuthState {
    pub fn new(config: AuthConfig, service: AuthService, github: Option<GithubClient>) -> Self {
        Self {
            config,
            service,
            github: github.map(Arc::new),
        }
    }

    /// Build every auth component from `config` on top of `pool`.
    pub fn from_config(config: AuthConfig, pool: PgPool) -> AuthResult<Self> {
        let passwords = Arc::new(PasswordService::new()?);
        let codec = Arc::new(TokenCodec::from_config(&config));
        let github = config.github.clone().map(GithubClient::new).transpose()?;
        let service = AuthService::new(pool, codec, passwords, &config.external_email_domain);
        Ok(Self::new(config, service, github))
    }
}
