use newsdesk_api::api_routes;
use newsdesk_api::auth::responses::{AccountView, SessionInfo, TokenResponse};
use newsdesk_api::auth::{AuthState, GithubClient};
use newsdesk_api::test_support::{
    TestDatabase, TestDatabaseError, TestRocketBuilder, test_auth_config_with, test_auth_state,
};
use reqwest::Url;
use rocket::http::{ContentType, Header, Status};
use rocket::local::asynchronous::Client;
use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const STATE_COOKIE: &str = "newsdesk_oauth_state";

async fn test_database(test: &str) -> Option<TestDatabase> {
    match TestDatabase::new_from_env().await {
        Ok(db) => Some(db),
        Err(err @ TestDatabaseError::MissingUrl) => {
            eprintln!("skipping {test}: {err}");
            None
        }
        Err(err) => panic!("{test}: test database failed to start: {err}"),
    }
}

async fn client_with(state: AuthState) -> Client {
    TestRocketBuilder::new()
        .mount_api_routes(api_routes())
        .manage_auth_state(state)
        .async_client()
        .await
}

async fn provision(test: &str) -> Option<(TestDatabase, Client)> {
    let test_db = test_database(test).await?;
    let client = client_with(test_auth_state(test_db.pool_clone())).await;
    Some((test_db, client))
}

/// Client whose GitHub endpoints all point at `github`.
async fn provision_with_github(
    test: &str,
    github: &MockServer,
) -> Option<(TestDatabase, Client)> {
    let test_db = test_database(test).await?;
    let config = test_auth_config_with(&[
        ("NEWSDESK_GITHUB_CLIENT_ID", "Iv1.test"),
        ("NEWSDESK_GITHUB_CLIENT_SECRET", "shh"),
    ]);
    let github_client = GithubClient::with_endpoints(
        config.github.clone().expect("github configured"),
        &format!("{}/login/oauth/authorize", github.uri()),
        &format!("{}/login/oauth/access_token", github.uri()),
        &github.uri(),
    )
    .expect("github client");
    let service = AuthState::from_config(config.clone(), test_db.pool_clone())
        .expect("auth state")
        .service;

    let client = client_with(AuthState::new(config, service, Some(github_client))).await;
    Some((test_db, client))
}

/// Follow the GitHub start redirect and return the state it carries.
async fn start_github_login(client: &Client) -> String {
    let response = client.get("/api/v1/auth/github").dispatch().await;
    assert_eq!(response.status(), Status::SeeOther);

    let location = response.headers().get_one("Location").expect("redirect target");
    let state = Url::parse(location)
        .expect("absolute redirect")
        .query_pairs()
        .find(|(key, _)| key == "state")
        .map(|(_, value)| value.into_owned())
        .expect("state parameter");

    let cookie = response.cookies().get(STATE_COOKIE).expect("state cookie");
    assert_eq!(cookie.value(), state);
    assert_eq!(cookie.http_only(), Some(true));
    state
}

fn bearer(token: &str) -> Header<'static> {
    Header::new("Authorization", format!("Bearer {token}"))
}

async fn register(client: &Client, email: &str) -> TokenResponse {
    let response = client
        .post("/api/v1/auth/register")
        .header(ContentType::JSON)
        .header(Header::new("User-Agent", "route-tests/1.0"))
        .body(
            json!({
                "name": "Ada Lovelace",
                "email": email,
                "password": "correct horse battery staple"
            })
            .to_string(),
        )
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    response.into_json().await.expect("token response")
}

#[tokio::test]
async fn register_and_read_own_account() {
    let Some((test_db, client)) = provision("register_and_read_own_account").await else {
        return;
    };

    let tokens = register(&client, "ada@example.com").await;
    assert_eq!(tokens.token_type, "bearer");

    let response = client
        .get("/api/v1/users/me")
        .header(bearer(&tokens.access_token))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    let account: AccountView = response.into_json().await.expect("account view");
    assert_eq!(account.email, "ada@example.com");
    assert!(account.has_password);

    let body: Value = client
        .get(format!("/api/v1/users/{}", account.id))
        .header(bearer(&tokens.access_token))
        .dispatch()
        .await
        .into_json()
        .await
        .expect("json");
    assert!(body.get("password_hash").is_none());

    let sessions: Vec<SessionInfo> = client
        .get("/api/v1/auth/sessions")
        .header(bearer(&tokens.access_token))
        .dispatch()
        .await
        .into_json()
        .await
        .expect("sessions");
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].client, "route-tests/1.0");

    test_db.close().await.expect("drop test database");
}

#[tokio::test]
async fn guard_failures_render_json_errors() {
    let Some((test_db, client)) = provision("guard_failures_render_json_errors").await else {
        return;
    };

    let response = client.get("/api/v1/users/me").dispatch().await;
    assert_eq!(response.status(), Status::Unauthorized);
    let body: Value = response.into_json().await.expect("json");
    assert_eq!(body["error"], "unauthenticated");

    let response = client
        .get("/api/v1/users/me")
        .header(bearer("not-a-token"))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Unauthorized);

    let tokens = register(&client, "ada@example.com").await;
    let response = client
        .get("/api/v1/auth/config")
        .header(bearer(&tokens.access_token))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Forbidden);
    let body: Value = response.into_json().await.expect("json");
    assert_eq!(body["error"], "forbidden");

    let response = client
        .get("/api/v1/users/me")
        .header(bearer(&tokens.refresh_token))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Unauthorized);

    test_db.close().await.expect("drop test database");
}

#[tokio::test]
async fn refresh_rotates_and_rejects_replay() {
    let Some((test_db, client)) = provision("refresh_rotates_and_rejects_replay").await else {
        return;
    };

    let tokens = register(&client, "ada@example.com").await;
    let refresh_body = json!({ "refresh_token": &tokens.refresh_token }).to_string();

    let response = client
        .post("/api/v1/auth/refresh")
        .header(ContentType::JSON)
        .body(refresh_body.clone())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    let rotated: TokenResponse = response.into_json().await.expect("tokens");
    assert_ne!(rotated.refresh_token, tokens.refresh_token);

    let response = client
        .post("/api/v1/auth/refresh")
        .header(ContentType::JSON)
        .body(refresh_body)
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Unauthorized);
    let body: Value = response.into_json().await.expect("json");
    assert_eq!(body["error"], "token_replay");

    let response = client
        .post("/api/v1/auth/logout")
        .header(ContentType::JSON)
        .header(bearer(&rotated.access_token))
        .body(json!({ "refresh_token": &rotated.refresh_token }).to_string())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    let body: Value = response.into_json().await.expect("json");
    assert_eq!(body["sessions_closed"], 1);

    test_db.close().await.expect("drop test database");
}

#[tokio::test]
async fn github_login_is_absent_without_credentials() {
    let Some((test_db, client)) = provision("github_login_is_absent_without_credentials").await
    else {
        return;
    };

    let response = client.get("/api/v1/auth/github").dispatch().await;
    assert_eq!(response.status(), Status::NotFound);

    let response = client
        .get("/api/v1/auth/github/callback?code=abc&state=xyz")
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::NotFound);

    test_db.close().await.expect("drop test database");
}

#[tokio::test]
async fn github_callback_rejects_a_mismatched_state() {
    let github = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login/oauth/access_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "access_token": "x" })))
        .expect(0)
        .mount(&github)
        .await;
    let Some((test_db, client)) =
        provision_with_github("github_callback_rejects_a_mismatched_state", &github).await
    else {
        return;
    };

    let state = start_github_login(&client).await;

    let response = client
        .get("/api/v1/auth/github/callback?code=abc&state=forged")
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::UnprocessableEntity);
    let body: Value = response.into_json().await.expect("json");
    assert_eq!(body["error"], "validation");

    // A failed callback consumes the stored state.
    let response = client
        .get(format!("/api/v1/auth/github/callback?code=abc&state={state}"))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::UnprocessableEntity);

    test_db.close().await.expect("drop test database");
}

#[tokio::test]
async fn github_callback_with_matching_state_logs_in() {
    let github = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login/oauth/access_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "access_token": "gho_stub" })))
        .expect(1)
        .mount(&github)
        .await;
    Mock::given(method("GET"))
        .and(path("/user"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 583231,
            "login": "octocat",
            "name": "The Octocat",
            "email": "octocat@example.com",
            "avatar_url": null
        })))
        .mount(&github)
        .await;
    let Some((test_db, client)) =
        provision_with_github("github_callback_with_matching_state_logs_in", &github).await
    else {
        return;
    };

    let state = start_github_login(&client).await;
    let response = client
        .get(format!("/api/v1/auth/github/callback?code=abc&state={state}"))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    let tokens: TokenResponse = response.into_json().await.expect("tokens");

    let account: AccountView = client
        .get("/api/v1/users/me")
        .header(bearer(&tokens.access_token))
        .dispatch()
        .await
        .into_json()
        .await
        .expect("account view");
    assert_eq!(account.email, "octocat@example.com");
    assert_eq!(account.name, "The Octocat");
    assert!(!account.has_password);

    test_db.close().await.expect("drop test database");
}

#[tokio::test]
async fn null_avatar_in_profile_update_clears_it() {
    let Some((test_db, client)) = provision("null_avatar_in_profile_update_clears_it").await
    else {
        return;
    };

    let tokens = register(&client, "ada@example.com").await;
    let me: AccountView = client
        .get("/api/v1/users/me")
        .header(bearer(&tokens.access_token))
        .dispatch()
        .await
        .into_json()
        .await
        .expect("account view");
    let update = |body: Value| {
        client
            .put(format!("/api/v1/users/{}", me.id))
            .header(ContentType::JSON)
            .header(bearer(&tokens.access_token))
            .body(body.to_string())
            .dispatch()
    };

    let account: AccountView = update(json!({ "avatar": "https://img.example.com/ada.png" }))
        .await
        .into_json()
        .await
        .expect("account view");
    assert_eq!(account.avatar.as_deref(), Some("https://img.example.com/ada.png"));

    let account: AccountView = update(json!({ "name": "Countess" }))
        .await
        .into_json()
        .await
        .expect("account view");
    assert_eq!(account.avatar.as_deref(), Some("https://img.example.com/ada.png"));

    let account: AccountView = update(json!({ "avatar": null }))
        .await
        .into_json()
        .await
        .expect("account view");
    assert_eq!(account.avatar, None);
    assert_eq!(account.name, "Countess");

    let response = update(json!({ "avatar": "x".repeat(513) })).await;
    assert_eq!(response.status(), Status::UnprocessableEntity);

    test_db.close().await.expect("drop test database");
}
