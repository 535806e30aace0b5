use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use fleetwatch_core::clock::system_clock;
use fleetwatch_core::config::MonitorConfig;
use fleetwatch_db::{MemoryStore, SharedStore};
use fleetwatch_events::{AlertBus, InAppProvider, NotificationDispatcher};
use fleetwatch_monitor::{Orchestrator, StaticAccountRegistry};
use http_body_util::BodyExt;
use tower::ServiceExt;

use fleetwatch_api::config::ServerConfig;
use fleetwatch_api::router::build_app_router;
use fleetwatch_api::state::AppState;

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 30,
    }
}

/// The router plus the orchestrator behind it, so tests can drive cycles
/// directly. The scheduler is not started.
pub struct TestApp {
    pub router: Router,
    pub orchestrator: Arc<Orchestrator>,
    pub store: Arc<MemoryStore>,
}

/// Build the full application router over an in-memory store, using the
/// same middleware stack as the binary.
pub fn build_test_app() -> TestApp {
    let clock = system_clock();
    let backing = Arc::new(MemoryStore::new());
    let store: SharedStore = backing.clone();

    let dispatcher = NotificationDispatcher::new(MonitorConfig::default().notifications, clock.clone())
        .with_store(store.clone())
        .with_provider(Arc::new(InAppProvider::new(Arc::new(AlertBus::default()))));

    let orchestrator = Orchestrator::new(
        MonitorConfig::default(),
        Arc::new(StaticAccountRegistry::default()),
        Arc::new(dispatcher),
        Some(store.clone()),
        clock,
    )
    .expect("default config is valid");

    let config = test_config();
    let state = AppState {
        orchestrator: Arc::clone(&orchestrator),
        store: Some(store),
        config: Arc::new(config.clone()),
    };
    let router = build_app_router(state, &config).expect("test CORS origins are valid");

    TestApp {
        router,
        orchestrator,
        store: backing,
    }
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
