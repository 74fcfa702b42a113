use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::api::{self, AppState};
use crate::config::AppConfig;
use crate::db::{DbHandle, Store};
use crate::pipeline::Pipeline;
use crate::reasoning::{DeterministicReasoner, GeminiReasoner, OpenAiReasoner, Reasoner};
use crate::sources::{FeedbackSource, FixtureSource, RedditJsonSource};
use crate::taxonomy::Taxonomy;
use crate::vcs::{GitHubVcs, SourceControl, StubVcs};

/// Configuration for the trigger-interface server.
pub struct ServerConfig {
    pub port: u16,
    pub db_path: std::path::PathBuf,
    pub dev_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            db_path: std::path::PathBuf::from(".threadsmith/pipeline.db"),
            dev_mode: false,
        }
    }
}

/// Ordered reasoner chain: primary provider, secondary provider, then the
/// deterministic tier. The deterministic tier is always present so the
/// pipeline never blocks on an unavailable provider.
fn build_reasoners(config: &AppConfig) -> Vec<Arc<dyn Reasoner>> {
    let mut chain: Vec<Arc<dyn Reasoner>> = Vec::new();
    if !config.demo_mode {
        if let Some(key) = &config.gemini_api_key {
            chain.push(Arc::new(GeminiReasoner::new(key.clone())));
        }
        if let Some(key) = &config.openai_api_key {
            chain.push(Arc::new(OpenAiReasoner::new(key.clone())));
        }
    }
    chain.push(Arc::new(DeterministicReasoner::new()));
    chain
}

fn build_source(config: &AppConfig) -> Arc<dyn FeedbackSource> {
    if config.demo_mode {
        Arc::new(FixtureSource::new())
    } else {
        Arc::new(RedditJsonSource::new(
            &config.user_agent,
            config.reddit_token.clone(),
        ))
    }
}

fn build_vcs(config: &AppConfig) -> Arc<dyn SourceControl> {
    match (&config.github_token, config.demo_mode) {
        (Some(token), false) => Arc::new(GitHubVcs::new(token.clone(), &config.user_agent)),
        _ => Arc::new(StubVcs::new()),
    }
}

/// Wire the pipeline against the configured capability providers.
pub fn build_state(config: AppConfig, store: Store) -> Arc<AppState> {
    let config = Arc::new(config);
    let db = DbHandle::new(store);
    let pipeline = Pipeline::new(
        db,
        Arc::clone(&config),
        Arc::new(Taxonomy::default()),
        build_source(&config),
        build_reasoners(&config),
        build_vcs(&config),
    );
    Arc::new(AppState {
        pipeline,
        demo_mode: config.demo_mode,
    })
}

pub fn build_router(state: Arc<AppState>) -> Router {
    api::api_router().with_state(state)
}

/// Start the trigger-interface server.
pub async fn start_server(server: ServerConfig, config: AppConfig) -> Result<()> {
    if let Some(parent) = server.db_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    config.ensure_directories()?;

    let store = Store::open(&server.db_path).context("Failed to open pipeline database")?;
    let state = build_state(config, store);

    let mut app = build_router(state);
    if server.dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let host = if server.dev_mode { "0.0.0.0" } else { "127.0.0.1" };
    let addr = format!("{}:{}", host, server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!(addr = %listener.local_addr()?, "threadsmith listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install Ctrl+C handler");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_router() -> Router {
        let config = AppConfig {
            demo_mode: true,
            plan_dir: std::env::temp_dir().join(format!("ts-srv-{}", uuid::Uuid::new_v4())),
            ..AppConfig::default()
        };
        let store = Store::open_in_memory().unwrap();
        build_router(build_state(config, store))
    }

    async fn body_json(resp: axum::response::Response) -> serde_json::Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_demo_mode() {
        let app = test_router();
        let resp = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["demo_mode"], true);
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let app = test_router();
        let resp = app
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_create_repo_config() {
        let app = test_router();
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/repo-config")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::json!({"owner": "octo", "repo": "widgets"}).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let json = body_json(resp).await;
        assert_eq!(json["owner"], "octo");
        assert_eq!(json["base_branch"], "main");
        assert_eq!(json["require_approval"], true);
    }

    #[tokio::test]
    async fn test_ingest_url_in_demo_mode() {
        let app = test_router();
        let resp = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/feedback/ingest-url")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::json!({"url": "https://www.reddit.com/r/webappfans/comments/demo/x"})
                            .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["collected"], 5);
        assert_eq!(json["created"], 5);

        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/api/feedback?limit=10")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let json = body_json(resp).await;
        assert_eq!(json["count"], 5);
    }

    #[tokio::test]
    async fn test_invalid_status_filter_is_400() {
        let app = test_router();
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/api/feedback?status=bogus")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_workflow_approve_unknown_action_is_400() {
        let app = test_router();
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/workflows/approve")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::json!({"insight_id": 1, "action": "maybe"}).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8000);
        assert_eq!(
            config.db_path,
            std::path::PathBuf::from(".threadsmith/pipeline.db")
        );
        assert!(!config.dev_mode);
    }
}
