use base64::Engine;
use rand::RngCore;
use rocket::http::{Cookie, CookieJar, SameSite, Status};
use rocket::request::Request;
use rocket::response::{Redirect, status};
use rocket::serde::json::Json;
use rocket::{State, catch, delete, get, post};
use rocket_okapi::okapi::schemars::JsonSchema;
use rocket_okapi::openapi;
use time::Duration as TimeDuration;

use crate::auth::guards::{AuthUser, ClientDescriptor, GuardFailure, RequireAdmin, describe_failure};
use crate::auth::responses::{
    LoginRequest, LogoutRequest, LogoutResponse, MessageResponse, RefreshRequest,
    RegisterRequest, SessionInfo, TokenResponse, TokenSettings,
};
use crate::auth::service::Registration;
use crate::auth::{AuthError, AuthState};

const OAUTH_STATE_PATH: &str = "/api/v1/auth/github";
const OAUTH_STATE_TTL_MINUTES: i64 = 10;

pub type ApiResult<T> = Result<Json<T>, status::Custom<Json<ErrorResponse>>>;

#[derive(Debug, serde::Serialize, serde::Deserialize, JsonSchema)]
pub struct ErrorResponse {
    pub status: u16,
    pub error: String,
    pub message: String,
}

#[openapi(tag = "Auth")]
#[post("/auth/register", data = "<payload>")]
pub async fn register(
    state: &State<AuthState>,
    client: ClientDescriptor,
    payload: Json<RegisterRequest>,
) -> ApiResult<TokenResponse> {
    let payload = payload.into_inner();
    let registration = Registration {
        name: payload.name,
        email: payload.email,
        password: payload.password,
        avatar: payload.avatar,
    };

    let issued = state
        .service
        .register(&registration, &client.0)
        .await
        .map_err(respond_error)?;

    Ok(Json(issued.tokens.into()))
}

#[openapi(tag = "Auth")]
#[post("/auth/login", data = "<payload>")]
pub async fn login(
    state: &State<AuthState>,
    client: ClientDescriptor,
    payload: Json<LoginRequest>,
) -> ApiResult<TokenResponse> {
    let issued = state
        .service
        .login(&payload.email, &payload.password, &client.0)
        .await
        .map_err(respond_error)?;

    Ok(Json(issued.tokens.into()))
}

#[openapi(tag = "Auth")]
#[post("/auth/refresh", data = "<payload>")]
pub async fn refresh(
    state: &State<AuthState>,
    client: ClientDescriptor,
    payload: Json<RefreshRequest>,
) -> ApiResult<TokenResponse> {
    let tokens = state
        .service
        .refresh(payload.refresh_token.trim(), &client.0)
        .await
        .map_err(respond_error)?;

    Ok(Json(tokens.into()))
}

#[openapi(tag = "Auth")]
#[post("/auth/logout", data = "<payload>")]
pub async fn logout(
    state: &State<AuthState>,
    user: AuthUser,
    payload: Json<LogoutRequest>,
) -> ApiResult<LogoutResponse> {
    let sessions_closed = state
        .service
        .logout(
            &user.account,
            payload.refresh_token.trim(),
            payload.all_devices.unwrap_or(false),
        )
        .await
        .map_err(respond_error)?;

    Ok(Json(LogoutResponse {
        message: "logged out".to_string(),
        sessions_closed,
    }))
}

#[openapi(tag = "Auth")]
#[get("/auth/sessions")]
pub async fn list_sessions(state: &State<AuthState>, user: AuthUser) -> ApiResult<Vec<SessionInfo>> {
    let sessions = state
        .service
        .list_sessions(&user.account)
        .await
        .map_err(respond_error)?;

    Ok(Json(sessions.into_iter().map(SessionInfo::from).collect()))
}

#[openapi(tag = "Auth")]
#[delete("/auth/sessions/<session_id>")]
pub async fn close_session(
    state: &State<AuthState>,
    user: AuthUser,
    session_id: i32,
) -> ApiResult<MessageResponse> {
    state
        .service
        .close_session(&user.account, session_id)
        .await
        .map_err(respond_error)?;

    Ok(Json(MessageResponse {
        message: format!("session {session_id} closed"),
    }))
}

#[openapi(tag = "Auth")]
#[get("/auth/config")]
pub async fn token_config(
    state: &State<AuthState>,
    _admin: RequireAdmin,
) -> ApiResult<TokenSettings> {
    Ok(Json(state.service.codec().metadata().into()))
}

/// Start a GitHub login: remember a random state in a cookie and redirect.
#[get("/auth/github")]
pub async fn github_start(
    state: &State<AuthState>,
    cookies: &CookieJar<'_>,
) -> Result<Redirect, status::Custom<Json<ErrorResponse>>> {
    let github = state.github.as_ref().ok_or_else(|| respond_error(AuthError::NotFound))?;

    let oauth_state = generate_random_token();
    let location = github.authorize_url(&oauth_state).map_err(respond_error)?;

    let cookie = Cookie::build((state.config.oauth_state_cookie_name.clone(), oauth_state))
        .path(OAUTH_STATE_PATH)
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(state.config.cookie_secure)
        .max_age(TimeDuration::minutes(OAUTH_STATE_TTL_MINUTES))
        .build();
    cookies.add(cookie);

    Ok(Redirect::to(location))
}

#[get("/auth/github/callback?<code>&<state>")]
pub async fn github_callback(
    auth: &State<AuthState>,
    cookies: &CookieJar<'_>,
    client: ClientDescriptor,
    code: &str,
    state: &str,
) -> ApiResult<TokenResponse> {
    let github = auth.github.as_ref().ok_or_else(|| respond_error(AuthError::NotFound))?;

    let cookie_name = auth.config.oauth_state_cookie_name.clone();
    let expected = cookies.get(&cookie_name).map(|cookie| cookie.value().to_string());
    cookies.add(
        Cookie::build((cookie_name, String::new()))
            .path(OAUTH_STATE_PATH)
            .removal()
            .build(),
    );

    match expected {
        Some(expected) if !state.is_empty() && expected == state => {}
        _ => {
            return Err(respond_error(AuthError::Validation(
                "oauth state does not match".into(),
            )));
        }
    }

    let identity = github.identity_for_code(code).await.map_err(respond_error)?;
    let issued = auth
        .service
        .external_login(&identity, &client.0)
        .await
        .map_err(respond_error)?;

    Ok(Json(issued.tokens.into()))
}

/// JSON body for every error status, using the kind recorded by a failing guard
/// when there is one.
#[catch(default)]
pub fn json_catcher(status: Status, request: &Request<'_>) -> status::Custom<Json<ErrorResponse>> {
    let failure = request.local_cache(GuardFailure::default);
    let (code, message) = describe_failure(failure, status);
    status::Custom(
        status,
        Json(ErrorResponse {
            status: status.code,
            error: code.to_string(),
            message,
        }),
    )
}

pub fn respond_error(err: AuthError) -> status::Custom<Json<ErrorResponse>> {
    let status = err.status();
    if status.code >= 500 {
        log::error!("request failed: {}", err);
    } else {
        log::debug!("request rejected: {}", err);
    }

    status::Custom(
        status,
        Json(ErrorResponse {
            status: status.code,
            error: err.code().to_string(),
            message: err.to_string(),
        }),
    )
}

fn generate_random_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}
