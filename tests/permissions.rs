use std::sync::Arc;
use chrono::{Duration, TimeZone, Utc};
use hsdp_iam::{
    Credentials, HttpResponse, IamConfig, IamError, InMemoryHttpClient, ManualClock, PermissionEvaluator,
    RequestBuilder, SessionManager, TokenState,
};
use serde_json::json;

const IAM: &str = "https://iam.test";

fn introspect_url() -> String {
    format!("{IAM}/authorize/oauth2/introspect")
}

fn introspection_body() -> serde_json::Value {
    json!({
        "active": true,
        "scope": "auth_iam_organization",
        "sub": "user-1",
        "username": "jane",
        "token_type": "access_token",
        "identity_type": "user",
        "organizations": {
            "managingOrganization": "org-A",
            "organizationList": [
                {
                    "organizationId": "org-A",
                    "organizationName": "Alpha",
                    "permissions": ["X.READ", "X.WRITE"],
                    "groups": ["admins"],
                    "roles": ["ADMIN"]
                }
            ]
        }
    })
}

async fn session(client: &InMemoryHttpClient) -> Arc<SessionManager<InMemoryHttpClient>> {
    let start = Utc.with_ymd_and_hms(2024, 2, 1, 10, 0, 0).unwrap();
    let creds = Credentials::builder("client", "secret").build().unwrap();
    let state = TokenState {
        access_token: "T1".into(),
        refresh_token: "R1".into(),
        expires_at: Some(start + Duration::minutes(30)),
        ..Default::default()
    };
    let session = SessionManager::new(IamConfig::new(IAM), Arc::new(creds), client.clone())
        .with_clock(Arc::new(ManualClock::new(start)))
        .with_token_state(state)
        .await;
    Arc::new(session)
}

#[tokio::test]
async fn permissions_follow_introspection() {
    let client = InMemoryHttpClient::new();
    client.insert_response(introspect_url(), HttpResponse::json(200, &introspection_body()));
    let evaluator = PermissionEvaluator::new(session(&client).await);

    assert!(evaluator.has_permissions("org-A", &["X.READ"]).await);
    assert!(!evaluator.has_permissions("org-A", &["X.DELETE"]).await);
    assert!(!evaluator.has_permissions("org-B", &["X.READ"]).await);
    assert!(evaluator.has_permissions::<&str>("org-A", &[]).await);
    assert!(evaluator.has_scopes_active(&["auth_iam_organization"]).await);

    // Every check introspects again.
    assert_eq!(client.calls(&introspect_url()), 5);

    let sent = client.recorded_requests().await;
    assert_eq!(sent[0].header("Api-Version"), Some("4"));
    assert_eq!(String::from_utf8(sent[0].body.clone().unwrap()).unwrap(), "token=T1");
    assert!(sent[0].header("Authorization").unwrap().starts_with("Basic "));
}

#[tokio::test]
async fn introspection_failure_denies() {
    let client = InMemoryHttpClient::new();
    client.fail_url(introspect_url(), "connection refused");
    let evaluator = PermissionEvaluator::new(session(&client).await);

    assert!(!evaluator.has_permissions("org-A", &["X.READ"]).await);
    let err = evaluator.check_permissions("org-A", &["X.READ"]).await.unwrap_err();
    assert!(matches!(err, IamError::IntrospectionFailed(_)));
    assert!(err.to_string().contains("connection refused"));

    client.clear_failure(&introspect_url());
    client.insert_response(introspect_url(), HttpResponse::json(500, &json!({})));
    assert!(!evaluator.has_permissions("org-A", &["X.READ"]).await);

    let client = InMemoryHttpClient::new();
    client.insert_response(introspect_url(), HttpResponse { status: 200, headers: vec![], body: b"not json".to_vec() });
    let evaluator = PermissionEvaluator::new(session(&client).await);
    assert!(!evaluator.has_permissions("org-A", &["X.READ"]).await);
}

#[tokio::test]
async fn inactive_token_denies() {
    let client = InMemoryHttpClient::new();
    let mut body = introspection_body();
    body["active"] = json!(false);
    client.insert_response(introspect_url(), HttpResponse::json(200, &body));
    let evaluator = PermissionEvaluator::new(session(&client).await);
    assert_eq!(evaluator.check_permissions("org-A", &["X.READ"]).await, Ok(false));
}

#[tokio::test]
async fn request_builder_exposes_both_checks() {
    let client = InMemoryHttpClient::new();
    client.insert_response(introspect_url(), HttpResponse::json(200, &introspection_body()));
    let builder = RequestBuilder::new(session(&client).await);
    assert!(builder.has_permissions("org-A", &["X.WRITE"]).await);
    assert!(!builder.has_scopes(&["mail"]).await);
    let snapshot = builder.permissions().introspect().await.unwrap();
    assert_eq!(snapshot.organization("org-A").unwrap().roles, vec!["ADMIN".to_string()]);
}
