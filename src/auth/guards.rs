use rocket::Request;
use rocket::State;
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome};
use rocket_okapi::request::OpenApiFromRequest;

use crate::auth::{AuthError, AuthResult, AuthState};
use crate::models::Account;

const MAX_CLIENT_LEN: usize = 512;

/// Caller authenticated by a bearer access token, with its account row loaded.
#[derive(Debug, Clone, OpenApiFromRequest)]
pub struct AuthUser {
    pub account: Account,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.account.is_admin
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AuthUser {
    type Error = AuthError;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        match extract_user(request).await {
            Ok(account) => Outcome::Success(AuthUser { account }),
            Err(err) => fail(request, err),
        }
    }
}

#[derive(Debug, Clone, OpenApiFromRequest)]
pub struct RequireAdmin(pub AuthUser);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for RequireAdmin {
    type Error = AuthError;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        match AuthUser::from_request(request).await {
            Outcome::Success(user) if user.is_admin() => Outcome::Success(RequireAdmin(user)),
            Outcome::Success(_) => fail(request, AuthError::Forbidden),
            Outcome::Error(err) => Outcome::Error(err),
            Outcome::Forward(_) => fail(request, AuthError::Unauthenticated),
        }
    }
}

/// Free-text description of the calling client, taken from `User-Agent`.
#[derive(Debug, Clone, OpenApiFromRequest)]
pub struct ClientDescriptor(pub String);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for ClientDescriptor {
    type Error = std::convert::Infallible;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let agent = request.headers().get_one("User-Agent").unwrap_or_default();
        Outcome::Success(ClientDescriptor(
            agent.chars().take(MAX_CLIENT_LEN).collect(),
        ))
    }
}

/// Failure recorded by a guard so the catcher can render the precise kind.
#[derive(Debug, Clone, Default)]
pub struct GuardFailure {
    pub code: Option<&'static str>,
    pub message: Option<String>,
}

fn fail<T>(request: &Request<'_>, err: AuthError) -> Outcome<T, AuthError> {
    let status = err.status();
    let code = err.code();
    let message = err.to_string();
    request.local_cache(|| GuardFailure {
        code: Some(code),
        message: Some(message),
    });
    Outcome::Error((status, err))
}

async fn extract_user(request: &Request<'_>) -> AuthResult<Account> {
    let token = bearer_token_from_request(request)?;

    let auth_state = request
        .guard::<&State<AuthState>>()
        .await
        .succeeded()
        .ok_or_else(|| AuthError::Config("AuthState missing from state".into()))?;

    auth_state.service.authenticate(token).await
}

fn bearer_token_from_request<'a>(request: &'a Request<'_>) -> AuthResult<&'a str> {
    let header = request
        .headers()
        .get_one("Authorization")
        .ok_or(AuthError::Unauthenticated)?;
    let mut parts = header.splitn(2, ' ');
    let scheme = parts.next().unwrap_or_default();
    let token = parts.next().unwrap_or_default().trim();
    if scheme.eq_ignore_ascii_case("Bearer") && !token.is_empty() {
        Ok(token)
    } else {
        Err(AuthError::Unauthenticated)
    }
}

/// Error code and message for a catcher, preferring what the guard recorded.
pub fn describe_failure(failure: &GuardFailure, fallback: Status) -> (&'static str, String) {
    match (failure.code, &failure.message) {
        (Some(code), Some(message)) => (code, message.clone()),
        _ => (
            default_code(fallback),
            fallback.reason().unwrap_or("error").to_lowercase(),
        ),
    }
}

fn default_code(status: Status) -> &'static str {
    match status.code {
        401 => "unauthenticated",
        403 => "forbidden",
        404 => "not_found",
        409 => "conflict",
        422 => "validation",
        503 => "service_unavailable",
        _ => "internal",
    }
}
