use rocket::http::Status;
use rocket_db_pools::sqlx;
use thiserror::Error;

pub type AuthResult<T> = Result<T, AuthError>;

const UNIQUE_VIOLATION: &str = "23505";
const STRING_DATA_RIGHT_TRUNCATION: &str = "22001";
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";

/// Why a token failed verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("token is malformed")]
    Malformed,
    #[error("token signature is invalid")]
    BadSignature,
    #[error("token has expired")]
    Expired,
    #[error("token is of the wrong kind")]
    WrongKind,
}

impl TokenError {
    pub fn reason(&self) -> &'static str {
        match self {
            TokenError::Malformed => "malformed",
            TokenError::BadSignature => "bad_signature",
            TokenError::Expired => "expired",
            TokenError::WrongKind => "wrong_kind",
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("authentication required")]
    Unauthenticated,
    #[error("invalid token: {0}")]
    Token(#[from] TokenError),
    #[error("refresh token is no longer live")]
    TokenReplay,
    #[error("session expired")]
    TokenExpired,
    #[error("forbidden")]
    Forbidden,
    #[error("not found")]
    NotFound,
    #[error("conflict on {0}")]
    Conflict(String),
    #[error("{0}")]
    Validation(String),
    #[error("identity provider error: {0}")]
    Provider(String),
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("database error: {0}")]
    Sqlx(sqlx::Error),
    #[error("jwt error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error("argon2 parameter error: {0}")]
    Argon2(String),
    #[error("password hashing error: {0}")]
    PasswordHash(String),
}

impl AuthError {
    pub fn status(&self) -> Status {
        match self {
            AuthError::InvalidCredentials
            | AuthError::Unauthenticated
            | AuthError::Token(_)
            | AuthError::TokenReplay
            | AuthError::TokenExpired => Status::Unauthorized,
            AuthError::Forbidden => Status::Forbidden,
            AuthError::NotFound => Status::NotFound,
            AuthError::Conflict(_) => Status::Conflict,
            AuthError::Validation(_) => Status::UnprocessableEntity,
            AuthError::Provider(_) => Status::BadGateway,
            AuthError::Unavailable(_) => Status::ServiceUnavailable,
            AuthError::Config(_)
            | AuthError::Sqlx(_)
            | AuthError::Jwt(_)
            | AuthError::Argon2(_)
            | AuthError::PasswordHash(_) => Status::InternalServerError,
        }
    }

    /// Stable identifier clients branch on.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::Unauthenticated | AuthError::Token(_) => "unauthenticated",
            AuthError::TokenReplay => "token_replay",
            AuthError::TokenExpired => "token_expired",
            AuthError::Forbidden => "forbidden",
            AuthError::NotFound => "not_found",
            AuthError::Conflict(_) => "conflict",
            AuthError::Validation(_) => "validation",
            AuthError::Provider(_) => "provider_error",
            AuthError::Unavailable(_) => "service_unavailable",
            AuthError::Config(_)
            | AuthError::Sqlx(_)
            | AuthError::Jwt(_)
            | AuthError::Argon2(_)
            | AuthError::PasswordHash(_) => "internal",
        }
    }

    /// Storage failures worth one transparent retry.
    pub fn is_transient(&self) -> bool {
        match self {
            AuthError::Sqlx(err) => is_transient_sqlx(err),
            _ => false,
        }
    }
}

fn is_transient_sqlx(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db_err) => db_err
            .code()
            .map(|code| {
                code.starts_with("08") || code == SERIALIZATION_FAILURE || code == DEADLOCK_DETECTED
            })
            .unwrap_or(false),
        _ => false,
    }
}

impl From<sqlx::Error> for AuthError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            match db_err.code().as_deref() {
                Some(UNIQUE_VIOLATION) => {
                    let constraint = db_err.constraint().unwrap_or("unique constraint");
                    return AuthError::Conflict(constraint.to_string());
                }
                Some(STRING_DATA_RIGHT_TRUNCATION) => {
                    return AuthError::Validation(db_err.message().to_string());
                }
                _ => {}
            }
        }
        AuthError::Sqlx(err)
    }
}

impl From<argon2::Error> for AuthError {
    fn from(err: argon2::Error) -> Self {
        AuthError::Argon2(err.to_string())
    }
}

impl From<argon2::password_hash::Error> for AuthError {
    fn from(err: argon2::password_hash::Error) -> Self {
        AuthError::PasswordHash(err.to_string())
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        AuthError::Provider(err.to_string())
    }
}
