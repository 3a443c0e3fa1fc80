//! HTTP-surface smoke tests that need no database: the router is built over
//! a lazy connection pool and only routes that never touch storage are
//! exercised.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::middleware;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::PgConnection;
use std::sync::Arc;
use tower::ServiceExt;

use erpserver::api_router::configure_api_routes;
use erpserver::core::config::AppConfig;
use erpserver::core::shared::state::AppState;
use erpserver::security::auth_middleware;

fn test_app() -> axum::Router {
    // build_unchecked defers connections; no Postgres is needed for the
    // routes under test.
    let manager = ConnectionManager::<PgConnection>::new("postgres://localhost/unused");
    let pool = Pool::builder().build_unchecked(manager);

    std::env::set_var("JWT_SECRET", "surface-test-secret");
    let config = AppConfig::from_env();
    let state = Arc::new(AppState::new(pool, config));

    configure_api_routes()
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .with_state(state)
}

#[tokio::test]
async fn health_is_public() {
    let app = test_app();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn missing_bearer_token_is_unauthorized() {
    let app = test_app();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/leads")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn garbage_bearer_token_is_unauthorized() {
    let app = test_app();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/kickoff-requests")
                .header(header::AUTHORIZATION, "Bearer not-a-jwt")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
