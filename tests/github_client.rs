use newsdesk_api::auth::{AuthError, GithubClient, GithubConfig};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config() -> GithubConfig {
    GithubConfig {
        client_id: "Iv1.test".into(),
        client_secret: "shh".into(),
        redirect_uri: "http://localhost:8000/api/v1/auth/github/callback".into(),
    }
}

fn client_for(server: &MockServer) -> GithubClient {
    GithubClient::with_endpoints(
        config(),
        &format!("{}/login/oauth/authorize", server.uri()),
        &format!("{}/login/oauth/access_token", server.uri()),
        &server.uri(),
    )
    .expect("github client")
}

async fn mount_token_exchange(server: &MockServer, code: &str) {
    Mock::given(method("POST"))
        .and(path("/login/oauth/access_token"))
        .and(body_partial_json(json!({
            "client_id": "Iv1.test",
            "client_secret": "shh",
            "code": code,
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "gho_stub",
            "token_type": "bearer",
        })))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn code_exchange_falls_back_to_the_verified_primary_email() {
    let server = MockServer::start().await;
    mount_token_exchange(&server, "code-123").await;
    Mock::given(method("GET"))
        .and(path("/user"))
        .and(header("authorization", "Bearer gho_stub"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 583231,
            "login": "octocat",
            "name": "The Octocat",
            "email": null,
            "avatar_url": "https://avatars.githubusercontent.com/u/583231"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/user/emails"))
        .and(header("authorization", "Bearer gho_stub"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"email": "old@example.com", "primary": false, "verified": true},
            {"email": "octocat@example.com", "primary": true, "verified": true}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let identity = client_for(&server)
        .identity_for_code("code-123")
        .await
        .expect("identity");

    assert_eq!(identity.external_id, "583231");
    assert_eq!(identity.email.as_deref(), Some("octocat@example.com"));
    assert_eq!(identity.display_name.as_deref(), Some("The Octocat"));
    assert_eq!(
        identity.avatar_url.as_deref(),
        Some("https://avatars.githubusercontent.com/u/583231")
    );
}

#[tokio::test]
async fn public_profile_email_skips_the_email_listing() {
    let server = MockServer::start().await;
    mount_token_exchange(&server, "code-456").await;
    Mock::given(method("GET"))
        .and(path("/user"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 1,
            "login": "mona",
            "name": null,
            "email": "mona@example.com",
            "avatar_url": null
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/user/emails"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&server)
        .await;

    let identity = client_for(&server)
        .identity_for_code("code-456")
        .await
        .expect("identity");

    assert_eq!(identity.email.as_deref(), Some("mona@example.com"));
    assert_eq!(identity.display_name.as_deref(), Some("mona"));
}

#[tokio::test]
async fn rejected_code_is_a_provider_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login/oauth/access_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "error": "bad_verification_code",
            "error_description": "The code passed is incorrect or expired."
        })))
        .mount(&server)
        .await;

    let result = client_for(&server).identity_for_code("stale").await;
    match result {
        Err(AuthError::Provider(message)) => assert!(message.contains("incorrect or expired")),
        other => panic!("expected provider error, got {other:?}"),
    }
}

#[tokio::test]
async fn failing_profile_endpoint_is_a_provider_error() {
    let server = MockServer::start().await;
    mount_token_exchange(&server, "code-789").await;
    Mock::given(method("GET"))
        .and(path("/user"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let result = client_for(&server).identity_for_code("code-789").await;
    assert!(matches!(result, Err(AuthError::Provider(_))));
}
