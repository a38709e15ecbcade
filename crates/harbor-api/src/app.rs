use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use harbor_config::Settings;
use harbor_driver::Driver;
use harbor_proxy::Proxy;
use harbor_resolver::Resolver;
use harbor_scheduler::Scheduler;
use harbor_store::StateStore;
use tower_http::trace::TraceLayer;

use crate::auth::require_bearer_token;
use crate::handlers;
use crate::state::AppState;

/// Builds the full router: `/health` and `/stat` stay outside the auth
/// layer (spec.md §6 marks them "public"/"liveness"), everything else is
/// gated by `require_bearer_token`.
pub fn build_app(
    store: Arc<dyn StateStore>,
    driver: Arc<dyn Driver>,
    scheduler: Arc<Scheduler>,
    resolver: Arc<Resolver>,
    proxy: Arc<Proxy>,
    settings: Arc<Settings>,
) -> Router {
    let upload_cap = settings.max_upload_size_bytes as usize;
    let state = AppState { store, driver, scheduler, resolver, proxy, settings };

    let public = Router::new().route("/health", get(handlers::health)).route("/stat", get(handlers::stat));

    let authed = Router::new()
        .route("/stat/overview", get(handlers::stat_overview))
        .route("/ships", get(handlers::list_ships))
        .route("/ship", post(handlers::create_ship))
        .route("/ship/:id", get(handlers::get_ship).delete(handlers::delete_ship))
        .route("/ship/:id/permanent", delete(handlers::delete_ship_permanent))
        .route("/ship/:id/exec", post(handlers::exec))
        .route("/ship/logs/:id", get(handlers::logs))
        .route("/ship/:id/extend-ttl", post(handlers::ship_extend_ttl))
        .route("/ship/:id/start", post(handlers::start))
        .route(
            "/ship/:id/upload",
            post(handlers::upload).layer(DefaultBodyLimit::max(upload_cap)),
        )
        .route("/ship/:id/download", get(handlers::download))
        .route("/ship/:id/term", get(handlers::term))
        .route("/ship/:id/sessions", get(handlers::ship_sessions))
        .route("/sessions", get(handlers::list_sessions))
        .route("/sessions/:id", get(handlers::get_session).delete(handlers::delete_session))
        .route("/sessions/:id/extend-ttl", post(handlers::session_extend_ttl))
        .route("/sessions/:id/history", get(handlers::history))
        .route("/sessions/:id/history/last", get(handlers::history_last))
        .route("/sessions/:id/history/:exec_id", get(handlers::history_entry).patch(handlers::annotate))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_bearer_token));

    public.merge(authed).layer(TraceLayer::new_for_http()).with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use harbor_driver::LocalDriver;
    use harbor_store::InMemoryStore;
    use std::time::Duration;
    use tower::util::ServiceExt;

    const TEST_TOKEN: &str = "test-token";

    fn test_app() -> Router {
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStore::new());
        let driver: Arc<dyn Driver> = Arc::new(LocalDriver::new());
        let scheduler = Scheduler::new(store.clone(), driver.clone());
        let resolver = Arc::new(Resolver::new(
            store.clone(),
            driver.clone(),
            scheduler.clone(),
            8123,
            10,
            harbor_config::OverflowPolicy::Reject,
            Duration::from_millis(200),
            Duration::from_millis(10),
        ));
        let proxy = Arc::new(Proxy::new(store.clone(), scheduler.clone(), 8123));
        let mut settings = Settings::default();
        settings.access_token = TEST_TOKEN.to_string();
        build_app(store, driver, scheduler, resolver, proxy, Arc::new(settings))
    }

    fn authed(req: axum::http::request::Builder) -> axum::http::request::Builder {
        req.header("Authorization", format!("Bearer {TEST_TOKEN}"))
    }

    #[tokio::test]
    async fn health_is_public() {
        let app = test_app();
        let resp = app.oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn stat_is_public() {
        let app = test_app();
        let resp = app.oneshot(Request::builder().uri("/stat").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn ships_requires_auth() {
        let app = test_app();
        let resp = app.oneshot(Request::builder().uri("/ships").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn ships_empty_list_with_auth() {
        let app = test_app();
        let resp = app
            .oneshot(authed(Request::builder().uri("/ships")).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn ship_not_found_returns_404() {
        let app = test_app();
        let resp = app
            .oneshot(authed(Request::builder().uri("/ship/nonexistent")).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn create_ship_rejects_non_positive_ttl() {
        let app = test_app();
        let body = serde_json::json!({ "ttl": 0 });
        let resp = app
            .oneshot(
                authed(
                    Request::builder()
                        .method("POST")
                        .uri("/ship")
                        .header("content-type", "application/json")
                        .header("X-SESSION-ID", "s1"),
                )
                .body(Body::from(body.to_string()))
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn create_ship_succeeds_and_is_fetchable() {
        let app = test_app();
        let body = serde_json::json!({ "ttl": 60 });
        let resp = app
            .clone()
            .oneshot(
                authed(
                    Request::builder()
                        .method("POST")
                        .uri("/ship")
                        .header("content-type", "application/json")
                        .header("X-SESSION-ID", "s1"),
                )
                .body(Body::from(body.to_string()))
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let ship: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        let id = ship["id"].as_str().unwrap().to_string();

        let resp = app
            .oneshot(authed(Request::builder().uri(format!("/ship/{id}"))).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
