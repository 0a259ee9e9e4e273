mod common;

use axum::{
    body::{Body, to_bytes},
    http::{Request, StatusCode},
};
use common::{FakeConnector, params};
use lease_rotor::db::ConnectionManager;
use lease_rotor::server::{RotorState, rotor_router};
use lease_rotor::DatabaseCredentials;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

async fn healthz(app: axum::Router) -> (StatusCode, Value) {
    let resp = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/healthz")
                .body(Body::empty())
                .expect("build request"),
        )
        .await
        .expect("router response");
    let status = resp.status();
    let body = to_bytes(resp.into_body(), 64 * 1024)
        .await
        .expect("read response body");
    let json = serde_json::from_slice(&body).expect("health body is json");
    (status, json)
}

#[tokio::test]
async fn healthz_reports_status_of_the_active_connection() {
    let connector = FakeConnector::new();
    let connections = Arc::new(
        ConnectionManager::connect(
            connector.clone(),
            params(Duration::from_secs(2)),
            Duration::from_millis(50),
            &DatabaseCredentials::new("user-0", "pw-0"),
            &CancellationToken::new(),
        )
        .await
        .expect("initial connect"),
    );
    let app = rotor_router(RotorState::new(connections.clone()));

    let (status, body) = healthz(app.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(connections.active_connection().expect("active connection").pings(), 2);

    connections.close().await.expect("close");

    let (status, body) = healthz(app).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "DATABASE_UNAVAILABLE");
}
