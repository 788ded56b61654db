#[macro_use]
extern crate rocket;

pub mod auth;
pub mod db;
pub mod models;
pub mod request_logger;
pub mod routes;

use crate::auth::{AuthConfig, AuthState};
use crate::db::NewsdeskDb;
use crate::request_logger::RequestLogger;
use env_logger::Env;
use rocket::fairing::AdHoc;
use rocket::http::Method;
use rocket::{Build, Rocket, Route};
use rocket_cors::{AllowedOrigins, CorsOptions};
use rocket_db_pools::Database;
use rocket_okapi::{
    openapi_get_routes,
    rapidoc::{GeneralConfig, HideShowConfig, RapiDocConfig, make_rapidoc},
    settings::UrlObject,
    swagger_ui::{SwaggerUIConfig, make_swagger_ui},
};
use std::sync::Once;
use std::time::Duration;

static LOGGER: Once = Once::new();

fn init_logger() {
    LOGGER.call_once(|| {
        env_logger::Builder::from_env(
            Env::default().default_filter_or("info,rocket::server=warn,rocket::request=warn"),
        )
        .init();
    });
}

/// Every `/api/v1` route, including the generated `openapi.json`.
pub fn api_routes() -> Vec<Route> {
    let mut mounted = openapi_get_routes![
        routes::health::health_check,
        // Auth routes
        auth::routes::register,
        auth::routes::login,
        auth::routes::refresh,
        auth::routes::logout,
        auth::routes::list_sessions,
        auth::routes::close_session,
        auth::routes::token_config,
        // Account routes
        routes::accounts::current_user,
        routes::accounts::get_user,
        routes::accounts::update_user,
        routes::accounts::delete_user,
    ];
    // Redirect-based OAuth endpoints stay out of the OpenAPI document.
    mounted.extend(rocket::routes![
        auth::routes::github_start,
        auth::routes::github_callback,
    ]);
    mounted
}

pub fn rocket() -> Rocket<Build> {
    init_logger();

    let cors = CorsOptions::default()
        .allowed_origins(AllowedOrigins::all())
        .allowed_methods(
            vec![Method::Get, Method::Post, Method::Put, Method::Delete]
                .into_iter()
                .map(From::from)
                .collect(),
        )
        .allow_credentials(true)
        .to_cors()
        .expect("Error creating CORS");

    rocket::build()
        .attach(RequestLogger)
        .attach(NewsdeskDb::init())
        .attach(cors)
        .attach(AdHoc::try_on_ignite("Run Migrations", |rocket| async move {
            match NewsdeskDb::fetch(&rocket) {
                Some(db) => match db::run_migrations(&**db).await {
                    Ok(_) => {
                        log::info!("database migrations successful");
                        Ok(rocket)
                    }
                    Err(e) => {
                        log::error!("database migrations failed: {}", e);
                        Err(rocket)
                    }
                },
                None => {
                    log::error!("database pool not available for migrations");
                    Err(rocket)
                }
            }
        }))
        .attach(AdHoc::try_on_ignite("Auth State", |rocket| async move {
            let pool = match NewsdeskDb::fetch(&rocket) {
                Some(db) => (**db).clone(),
                None => {
                    log::error!("database pool not available for auth state");
                    return Err(rocket);
                }
            };

            let config = match AuthConfig::from_env() {
                Ok(config) => config,
                Err(err) => {
                    log::error!("invalid auth configuration: {}", err);
                    return Err(rocket);
                }
            };
            if config.github.is_none() {
                log::info!("GitHub login disabled: no client credentials configured");
            }

            match AuthState::from_config(config, pool) {
                Ok(state) => Ok(rocket.manage(state)),
                Err(err) => {
                    log::error!("failed to initialise auth state: {}", err);
                    Err(rocket)
                }
            }
        }))
        .attach(AdHoc::on_liftoff("Spawn Session Sweeper", |rocket| {
            Box::pin(async move {
                let Some(state) = rocket.state::<AuthState>() else {
                    log::error!("failed to spawn session sweeper: auth state not found");
                    return;
                };
                let interval = state.config.session_sweep_interval_secs;
                if interval == 0 {
                    log::info!("session sweeper disabled");
                    return;
                }
                let sessions = state.service.sessions().clone();
                tokio::spawn(async move {
                    log::info!("starting session sweeper every {}s", interval);
                    sessions.run_sweeper(Duration::from_secs(interval)).await
                });
            })
        }))
        .mount("/api/v1", api_routes())
        .register("/", catchers![auth::routes::json_catcher])
        .mount(
            "/api/docs/swagger/",
            make_swagger_ui(&SwaggerUIConfig {
                url: "../../v1/openapi.json".to_owned(),
                ..Default::default()
            }),
        )
        .mount(
            "/api/docs/rapidoc/",
            make_rapidoc(&RapiDocConfig {
                general: GeneralConfig {
                    spec_urls: vec![UrlObject::new("Newsdesk API", "../../v1/openapi.json")],
                    ..Default::default()
                },
                hide_show: HideShowConfig {
                    allow_spec_url_load: false,
                    allow_spec_file_load: false,
                    ..Default::default()
                },
                ..Default::default()
            }),
        )
}

#[cfg_attr(not(test), allow(dead_code))]
pub mod test_support {
    use std::collections::HashMap;

    use chrono::{DateTime, Utc};
    use rocket::config::LogLevel;
    use rocket::figment::Figment;
    use rocket::local::asynchronous::Client as AsyncClient;
    use rocket::local::blocking::Client;
    use rocket::{Build, Rocket, Route};
    use rocket_db_pools::sqlx::{self, PgPool};

    use crate::auth::sessions::token_digest;
    use crate::auth::{AuthConfig, AuthState};

    pub use database::{TestDatabase, TestDatabaseError};

    pub const TEST_JWT_SECRET: &str = "test-secret-that-is-at-least-32-bytes-long";

    /// Auth configuration for tests: fixed secret, GitHub disabled, no sweeper.
    pub fn test_auth_config() -> AuthConfig {
        test_auth_config_with(&[])
    }

    /// Like [`test_auth_config`] with extra `NEWSDESK_*` overrides.
    pub fn test_auth_config_with(overrides: &[(&str, &str)]) -> AuthConfig {
        let mut vars: HashMap<String, String> = HashMap::from([
            ("NEWSDESK_JWT_SECRET".to_string(), TEST_JWT_SECRET.to_string()),
            ("NEWSDESK_SESSION_SWEEP_INTERVAL_SECS".to_string(), "0".to_string()),
            ("NEWSDESK_COOKIE_SECURE".to_string(), "false".to_string()),
        ]);
        for (key, value) in overrides {
            vars.insert(key.to_string(), value.to_string());
        }
        AuthConfig::from_lookup(|key| vars.get(key).cloned()).expect("valid test auth config")
    }

    /// Auth state wired to `pool` with [`test_auth_config`].
    pub fn test_auth_state(pool: PgPool) -> AuthState {
        AuthState::from_config(test_auth_config(), pool).expect("auth state")
    }

    /// Helpers for seeding account and session rows directly.
    pub struct TestFixtures<'a> {
        pool: &'a PgPool,
    }

    impl<'a> TestFixtures<'a> {
        pub fn new(pool: &'a PgPool) -> Self {
            Self { pool }
        }

        /// Insert an account row, returning its id.
        pub async fn insert_user(
            &self,
            name: &str,
            email: &str,
            password_hash: Option<&str>,
            is_admin: bool,
        ) -> Result<i32, sqlx::Error> {
            sqlx::query_scalar(
                "INSERT INTO users (name, email, password_hash, is_admin) VALUES ($1, $2, $3, $4) RETURNING id",
            )
            .bind(name)
            .bind(email)
            .bind(password_hash)
            .bind(is_admin)
            .fetch_one(self.pool)
            .await
        }

        /// Insert a session for `token` with an explicit expiry.
        pub async fn insert_session(
            &self,
            user_id: i32,
            token: &str,
            issued_at: DateTime<Utc>,
            expires_at: DateTime<Utc>,
        ) -> Result<i32, sqlx::Error> {
            sqlx::query_scalar(
                "INSERT INTO sessions (user_id, token_hash, client, issued_at, expires_at) VALUES ($1, $2, '', $3, $4) RETURNING id",
            )
            .bind(user_id)
            .bind(token_digest(token))
            .bind(issued_at)
            .bind(expires_at)
            .fetch_one(self.pool)
            .await
        }

        pub async fn count_sessions(&self, user_id: i32) -> Result<i64, sqlx::Error> {
            sqlx::query_scalar("SELECT COUNT(*) FROM sessions WHERE user_id = $1")
                .bind(user_id)
                .fetch_one(self.pool)
                .await
        }

        pub async fn count_users(&self) -> Result<i64, sqlx::Error> {
            sqlx::query_scalar("SELECT COUNT(*) FROM users")
                .fetch_one(self.pool)
                .await
        }
    }

    pub mod database {
        use std::path::Path;

        use log::LevelFilter;
        use rocket_db_pools::sqlx::postgres::{PgConnectOptions, PgPoolOptions};
        use rocket_db_pools::sqlx::{self, ConnectOptions, PgPool};
        use testcontainers_modules::postgres::Postgres;
        use testcontainers_modules::testcontainers::{
            ContainerAsync, core::error::TestcontainersError, runners::AsyncRunner,
        };
        use thiserror::Error;
        use tokio::runtime::Handle;
        use uuid::Uuid;

        use crate::db::MIGRATOR;

        #[derive(Debug, Error)]
        pub enum TestDatabaseError {
            #[error("TEST_DATABASE_URL not set and no container runtime found")]
            MissingUrl,
            #[error("database error: {0}")]
            Sqlx(#[from] sqlx::Error),
            #[error("migration error: {0}")]
            Migration(#[from] sqlx::migrate::MigrateError),
            #[error("container error: {0}")]
            Container(#[from] TestcontainersError),
        }

        /// Ephemeral, migrated database for integration tests.
        pub struct TestDatabase {
            pool: Option<PgPool>,
            admin_options: PgConnectOptions,
            database_name: String,
            container: Option<ContainerAsync<Postgres>>,
        }

        impl TestDatabase {
            /// Use `TEST_DATABASE_URL` when set, otherwise start a Postgres container.
            ///
            /// Only the absence of both yields `MissingUrl`. A configured database
            /// or container that fails to come up is reported as its own error.
            pub async fn new_from_env() -> Result<Self, TestDatabaseError> {
                match std::env::var("TEST_DATABASE_URL") {
                    Ok(url) => Self::from_url(&url, None).await,
                    Err(_) if container_runtime_configured() => Self::new().await,
                    Err(_) => Err(TestDatabaseError::MissingUrl),
                }
            }

            /// Provision a fresh database in a disposable Postgres container.
            pub async fn new() -> Result<Self, TestDatabaseError> {
                let container = Postgres::default().start().await?;
                let host = container.get_host().await?.to_string();
                let port = container.get_host_port_ipv4(5432).await?;
                let url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);
                Self::from_url(&url, Some(container)).await
            }

            async fn from_url(
                url: &str,
                container: Option<ContainerAsync<Postgres>>,
            ) -> Result<Self, TestDatabaseError> {
                let base_options: PgConnectOptions = url.parse()?;
                let base_options = base_options.log_statements(LevelFilter::Off);

                let base_name = base_options
                    .get_database()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "postgres".to_string());

                let admin_options = base_options.clone().database("postgres");
                let admin_pool = PgPoolOptions::new()
                    .max_connections(1)
                    .connect_with(admin_options.clone())
                    .await?;

                let new_db_name = format!("{}_{}", base_name, Uuid::new_v4().simple());
                let create_sql = format!("CREATE DATABASE \"{}\" TEMPLATE template0", new_db_name);
                sqlx::query(&create_sql).execute(&admin_pool).await?;
                admin_pool.close().await;

                let pool = PgPoolOptions::new()
                    .max_connections(10)
                    .connect_with(base_options.database(&new_db_name))
                    .await?;

                MIGRATOR.run(&pool).await?;

                Ok(Self {
                    pool: Some(pool),
                    admin_options,
                    database_name: new_db_name,
                    container,
                })
            }

            pub fn pool(&self) -> &PgPool {
                self.pool.as_ref().expect("test database pool is available")
            }

            pub fn pool_clone(&self) -> PgPool {
                self.pool().clone()
            }

            /// Close pool connections and drop the ephemeral database.
            pub async fn close(mut self) -> Result<(), TestDatabaseError> {
                if let Some(pool) = self.pool.take() {
                    pool.close().await;
                }

                drop_database_with_fallback(self.admin_options.clone(), &self.database_name)
                    .await?;

                if let Some(container) = self.container.take() {
                    drop(container);
                }

                Ok(())
            }
        }

        fn container_runtime_configured() -> bool {
            std::env::var_os("DOCKER_HOST").is_some()
                || Path::new("/var/run/docker.sock").exists()
        }

        async fn drop_database_with_fallback(
            admin_options: PgConnectOptions,
            database_name: &str,
        ) -> Result<(), sqlx::Error> {
            let admin_pool = PgPoolOptions::new()
                .max_connections(1)
                .connect_with(admin_options)
                .await?;

            let drop_force = format!("DROP DATABASE \"{}\" WITH (FORCE)", database_name);
            match sqlx::query(&drop_force).execute(&admin_pool).await {
                Ok(_) => Ok(()),
                Err(err) if force_drop_unsupported(&err) => {
                    let drop_sql = format!("DROP DATABASE \"{}\"", database_name);
                    sqlx::query(&drop_sql).execute(&admin_pool).await?;
                    Ok(())
                }
                Err(err) => Err(err),
            }
        }

        fn force_drop_unsupported(err: &sqlx::Error) -> bool {
            matches!(
                err,
                sqlx::Error::Database(db_err)
                    if db_err
                        .code()
                        .map(|code| code == "42601" || code == "0A000")
                        .unwrap_or(false)
            )
        }

        impl Drop for TestDatabase {
            fn drop(&mut self) {
                if let Some(pool) = self.pool.take() {
                    let admin_options = self.admin_options.clone();
                    let db_name = self.database_name.clone();
                    if let Ok(handle) = Handle::try_current() {
                        handle.spawn(async move {
                            pool.close().await;
                            let _ = drop_database_with_fallback(admin_options, &db_name).await;
                        });
                    }
                }

                if let Some(container) = self.container.take() {
                    drop(container);
                }
            }
        }
    }

    /// Builder for Rocket instances used by route tests.
    #[derive(Default)]
    pub struct TestRocketBuilder {
        figment: Figment,
        mounts: Vec<(String, Vec<Route>)>,
        auth_state: Option<AuthState>,
    }

    impl TestRocketBuilder {
        /// Random port, logging off, JSON catchers registered.
        pub fn new() -> Self {
            let figment = rocket::Config::figment()
                .merge(("port", 0))
                .merge(("log_level", LogLevel::Off))
                .merge(("cli_colors", false));

            Self {
                figment,
                mounts: Vec::new(),
                auth_state: None,
            }
        }

        /// Mount routes under `/api/v1`.
        pub fn mount_api_routes(mut self, routes: Vec<Route>) -> Self {
            self.mounts.push(("/api/v1".to_string(), routes));
            self
        }

        /// Manage an [`AuthState`] for guarded routes.
        pub fn manage_auth_state(mut self, state: AuthState) -> Self {
            self.auth_state = Some(state);
            self
        }

        pub fn build(self) -> Rocket<Build> {
            let mut rocket = rocket::custom(self.figment)
                .register("/", catchers![crate::auth::routes::json_catcher]);

            for (base, routes) in self.mounts {
                rocket = rocket.mount(base, routes);
            }

            if let Some(state) = self.auth_state {
                rocket = rocket.manage(state);
            }

            rocket
        }

        pub fn blocking_client(self) -> Client {
            Client::tracked(self.build()).expect("valid Rocket instance")
        }

        pub async fn async_client(self) -> AsyncClient {
            AsyncClient::tracked(self.build())
                .await
                .expect("valid Rocket instance")
        }
    }
}
