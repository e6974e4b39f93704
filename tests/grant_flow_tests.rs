//! Integration tests for the OAuth grant lifecycle: authorization URL
//! construction, code exchange, upsert semantics, and refresh-on-demand.

use std::sync::Arc;

use analytics_connector::models::connection;
use analytics_connector::oauth::{GrantManager, state};
use chrono::{Duration, Utc};
use sea_orm::EntityTrait;
use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[path = "test_utils/mod.rs"]
mod test_utils;

use test_utils::{TEST_SERVICE_SECRET, seed_connection, setup_test_db, test_config, test_repository};

struct TestContext {
    grants: GrantManager,
    repo: Arc<analytics_connector::repositories::ConnectionRepository>,
    db: sea_orm::DatabaseConnection,
    _dir: tempfile::TempDir,
}

async fn setup(mock: &MockServer) -> TestContext {
    let (db, dir) = setup_test_db().await.expect("test db");
    let repo = test_repository(&db);
    let config = Arc::new(test_config(&mock.uri()));
    let grants = GrantManager::new(config, Arc::clone(&repo), reqwest::Client::new());

    TestContext {
        grants,
        repo,
        db,
        _dir: dir,
    }
}

fn issue_state(website_id: &str) -> String {
    state::issue_correlation_token(TEST_SERVICE_SECRET, website_id, 300).expect("state token")
}

fn token_response() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "access_token": "ya29.fresh-access-token",
        "expires_in": 3600,
        "refresh_token": "1//fresh-refresh-token",
        "scope": "https://www.googleapis.com/auth/webmasters.readonly https://www.googleapis.com/auth/analytics.readonly https://www.googleapis.com/auth/userinfo.email",
        "token_type": "Bearer"
    }))
}

fn userinfo_response() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "email": "owner@example.com" }))
}

#[tokio::test]
async fn authorization_url_carries_offline_consent_and_state() {
    let mock = MockServer::start().await;
    let ctx = setup(&mock).await;

    let url = ctx.grants.begin_authorization("site-1").expect("authorize url");

    let query: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    let get = |key: &str| {
        query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .unwrap_or_default()
    };

    assert_eq!(get("client_id"), "test-client-id");
    assert_eq!(get("response_type"), "code");
    assert_eq!(get("access_type"), "offline");
    assert_eq!(get("prompt"), "consent");
    assert!(get("scope").contains("webmasters.readonly"));
    assert!(get("scope").contains("analytics.readonly"));
    assert!(get("scope").contains("userinfo.email"));

    // The state token round-trips back to the website it was issued for
    let website_id =
        state::verify_correlation_token(TEST_SERVICE_SECRET, &get("state")).expect("valid state");
    assert_eq!(website_id, "site-1");
}

#[tokio::test]
async fn completing_authorization_persists_a_full_connection() {
    let mock = MockServer::start().await;
    let ctx = setup(&mock).await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .respond_with(token_response())
        .expect(1)
        .mount(&mock)
        .await;
    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .respond_with(userinfo_response())
        .expect(1)
        .mount(&mock)
        .await;

    let model = ctx
        .grants
        .complete_authorization("auth-code-1", &issue_state("site-1"))
        .await
        .expect("grant completes");

    assert_eq!(model.website_id, "site-1");
    assert_eq!(model.google_user_email.as_deref(), Some("owner@example.com"));

    let stored = ctx
        .repo
        .find_by_website_id("site-1")
        .await
        .expect("query")
        .expect("connection exists");
    let (access, refresh) = ctx.repo.decrypt_tokens(&stored).expect("decrypt");
    assert_eq!(access, "ya29.fresh-access-token");
    assert_eq!(refresh, "1//fresh-refresh-token");
    assert!(stored.expires_at.with_timezone(&Utc) > Utc::now() + Duration::minutes(50));
    assert!(stored.scopes.is_some());
}

#[tokio::test]
async fn completing_twice_results_in_exactly_one_row() {
    let mock = MockServer::start().await;
    let ctx = setup(&mock).await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(token_response())
        .expect(2)
        .mount(&mock)
        .await;
    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .respond_with(userinfo_response())
        .mount(&mock)
        .await;

    ctx.grants
        .complete_authorization("auth-code-1", &issue_state("site-1"))
        .await
        .expect("first grant");
    ctx.grants
        .complete_authorization("auth-code-2", &issue_state("site-1"))
        .await
        .expect("second grant");

    let rows = connection::Entity::find().all(&ctx.db).await.expect("query");
    assert_eq!(rows.len(), 1, "re-consent must upsert, not append");
}

#[tokio::test]
async fn incomplete_token_response_persists_nothing() {
    let mock = MockServer::start().await;
    let ctx = setup(&mock).await;

    // No refresh token: the provider silently re-granted
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "ya29.fresh-access-token",
            "expires_in": 3600,
            "token_type": "Bearer"
        })))
        .expect(1)
        .mount(&mock)
        .await;

    let error = ctx
        .grants
        .complete_authorization("auth-code-1", &issue_state("site-1"))
        .await
        .expect_err("incomplete grant is terminal");

    assert_eq!(error.code.as_ref(), "INCOMPLETE_GRANT");
    assert!(
        ctx.repo
            .find_by_website_id("site-1")
            .await
            .expect("query")
            .is_none(),
        "a partial grant must never be persisted"
    );
}

#[tokio::test]
async fn rejected_code_surfaces_token_exchange_failed() {
    let mock = MockServer::start().await;
    let ctx = setup(&mock).await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "Code was already redeemed."
        })))
        .expect(1)
        .mount(&mock)
        .await;

    let error = ctx
        .grants
        .complete_authorization("used-code", &issue_state("site-1"))
        .await
        .expect_err("exchange rejected");

    assert_eq!(error.code.as_ref(), "TOKEN_EXCHANGE_FAILED");
}

#[tokio::test]
async fn forged_or_garbage_state_is_rejected_before_any_exchange() {
    let mock = MockServer::start().await;
    let ctx = setup(&mock).await;

    // No token endpoint mock mounted: any request to it would 404 and the
    // expect(0) below would fail the test.
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&mock)
        .await;

    let forged =
        state::issue_correlation_token("some-other-secret", "site-1", 300).expect("forged token");
    let error = ctx
        .grants
        .complete_authorization("auth-code", &forged)
        .await
        .expect_err("forged state");
    assert_eq!(error.code.as_ref(), "INVALID_STATE");

    let error = ctx
        .grants
        .complete_authorization("auth-code", "garbage")
        .await
        .expect_err("garbage state");
    assert_eq!(error.code.as_ref(), "INVALID_STATE");
}

#[tokio::test]
async fn failed_email_lookup_degrades_gracefully() {
    let mock = MockServer::start().await;
    let ctx = setup(&mock).await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(token_response())
        .mount(&mock)
        .await;
    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock)
        .await;

    let model = ctx
        .grants
        .complete_authorization("auth-code-1", &issue_state("site-1"))
        .await
        .expect("grant still completes");

    assert_eq!(model.google_user_email, None);
    assert!(
        ctx.repo
            .find_by_website_id("site-1")
            .await
            .expect("query")
            .is_some()
    );
}

#[tokio::test]
async fn fresh_token_is_returned_without_any_network_call() {
    let mock = MockServer::start().await;
    let ctx = setup(&mock).await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(token_response())
        .expect(0)
        .mount(&mock)
        .await;

    seed_connection(&ctx.repo, "site-1", Utc::now() + Duration::hours(1))
        .await
        .expect("seed");

    let token = ctx
        .grants
        .ensure_fresh_access_token("site-1")
        .await
        .expect("token");
    assert_eq!(token, "ya29.seeded-access-token");
}

#[tokio::test]
async fn near_expiry_token_triggers_exactly_one_refresh() {
    let mock = MockServer::start().await;
    let ctx = setup(&mock).await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "ya29.refreshed-access-token",
            "expires_in": 3600,
            "token_type": "Bearer"
        })))
        .expect(1)
        .mount(&mock)
        .await;

    // Inside the 5 minute buffer
    seed_connection(&ctx.repo, "site-1", Utc::now() + Duration::seconds(60))
        .await
        .expect("seed");

    let token = ctx
        .grants
        .ensure_fresh_access_token("site-1")
        .await
        .expect("refreshed token");
    assert_eq!(token, "ya29.refreshed-access-token");

    // The persisted expiry moved forward, so a second call needs no refresh
    let token = ctx
        .grants
        .ensure_fresh_access_token("site-1")
        .await
        .expect("cached token");
    assert_eq!(token, "ya29.refreshed-access-token");

    // Refresh token was not rotated by the provider, so the old one remains
    let stored = ctx
        .repo
        .find_by_website_id("site-1")
        .await
        .expect("query")
        .expect("connection");
    let (_, refresh) = ctx.repo.decrypt_tokens(&stored).expect("decrypt");
    assert_eq!(refresh, "1//seeded-refresh-token");
}

#[tokio::test]
async fn rotated_refresh_token_is_persisted() {
    let mock = MockServer::start().await;
    let ctx = setup(&mock).await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "ya29.refreshed-access-token",
            "expires_in": 3600,
            "refresh_token": "1//rotated-refresh-token",
            "token_type": "Bearer"
        })))
        .expect(1)
        .mount(&mock)
        .await;

    seed_connection(&ctx.repo, "site-1", Utc::now() - Duration::minutes(5))
        .await
        .expect("seed");

    ctx.grants
        .ensure_fresh_access_token("site-1")
        .await
        .expect("refresh");

    let stored = ctx
        .repo
        .find_by_website_id("site-1")
        .await
        .expect("query")
        .expect("connection");
    let (access, refresh) = ctx.repo.decrypt_tokens(&stored).expect("decrypt");
    assert_eq!(access, "ya29.refreshed-access-token");
    assert_eq!(refresh, "1//rotated-refresh-token");
}

#[tokio::test]
async fn rejected_refresh_requires_reauthorization() {
    let mock = MockServer::start().await;
    let ctx = setup(&mock).await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "Token has been expired or revoked."
        })))
        .expect(1)
        .mount(&mock)
        .await;

    seed_connection(&ctx.repo, "site-1", Utc::now() - Duration::minutes(5))
        .await
        .expect("seed");

    let error = ctx
        .grants
        .ensure_fresh_access_token("site-1")
        .await
        .expect_err("revoked refresh token");

    assert_eq!(error.code.as_ref(), "REAUTHORIZATION_REQUIRED");
}

#[tokio::test]
async fn unknown_website_is_not_connected() {
    let mock = MockServer::start().await;
    let ctx = setup(&mock).await;

    let error = ctx
        .grants
        .ensure_fresh_access_token("nobody")
        .await
        .expect_err("no connection");

    assert_eq!(error.code.as_ref(), "NOT_CONNECTED");
}
