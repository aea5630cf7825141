//! Change-feed server: exposes a [`ChangeHub`] over HTTP and WebSocket.
//!
//! - `GET  /health`
//! - `GET  /api/topics`
//! - `POST /api/topics/{topic}/changes`
//! - `GET  /ws/{topic}` (WebSocket, see [`precast_common::FeedFrame`])

pub mod api;
pub mod ws;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

pub use api::{AppState, PublishRequest, PublishResponse, SharedState};
pub use ws::Keepalive;

use crate::config::LiveConfig;
use crate::hub::ChangeHub;

/// Configuration for the change-feed server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub keepalive: Keepalive,
    pub broadcast_capacity: usize,
    pub dev_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4180,
            keepalive: Keepalive::default(),
            broadcast_capacity: crate::hub::DEFAULT_CAPACITY,
            dev_mode: false,
        }
    }
}

impl ServerConfig {
    pub fn from_config(config: &LiveConfig) -> Self {
        let server = &config.toml.server;
        Self {
            host: server.host.clone(),
            port: config.port(),
            keepalive: Keepalive {
                ping_interval: Duration::from_secs(server.ping_interval_secs.max(1)),
                pong_timeout: Duration::from_secs(server.pong_timeout_secs),
            },
            broadcast_capacity: server.broadcast_capacity,
            dev_mode: server.dev,
        }
    }
}

/// Build the full application router.
pub fn build_router(state: SharedState, dev_mode: bool) -> Router {
    let app = api::api_router().with_state(state);
    if dev_mode {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}

/// Serve on an already-bound listener until `shutdown` resolves, then
/// close the hub so attached subscribers are told.
pub async fn serve(
    listener: TcpListener,
    hub: ChangeHub,
    keepalive: Keepalive,
    dev_mode: bool,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let state = Arc::new(AppState {
        hub: hub.clone(),
        keepalive,
    });
    let app = build_router(state, dev_mode);

    let closing = hub.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            closing.close();
        })
        .await
        .context("Server error")?;

    Ok(())
}

/// Start the change-feed server and run until Ctrl+C.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    tracing::info!(addr = %local_addr, dev = config.dev_mode, "change feed listening");
    println!("precast-live change feed running at http://{}", local_addr);

    let hub = ChangeHub::new(config.broadcast_capacity);
    serve(listener, hub, config.keepalive, config.dev_mode, shutdown_signal()).await?;

    println!("Server shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    println!("\nShutting down...");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn test_state() -> SharedState {
        Arc::new(AppState {
            hub: ChangeHub::new(8),
            keepalive: Keepalive::default(),
        })
    }

    #[tokio::test]
    async fn test_health_via_full_router() {
        let app = build_router(test_state(), false);
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_dev_mode_adds_cors_headers() {
        let app = build_router(test_state(), true);
        let req = Request::builder()
            .uri("/health")
            .header("origin", "http://localhost:5173")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert!(resp.headers().contains_key("access-control-allow-origin"));
    }

    #[tokio::test]
    async fn test_unknown_route_is_not_found() {
        let app = build_router(test_state(), false);
        let req = Request::builder()
            .uri("/nope")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_server_config_from_live_config() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = LiveConfig::load(LiveConfig::default_path(dir.path()))
            .unwrap()
            .with_cli_args(Some(9100), None, false);
        config.toml.server.ping_interval_secs = 5;
        config.toml.server.dev = true;

        let server = ServerConfig::from_config(&config);
        assert_eq!(server.port, 9100);
        assert_eq!(server.keepalive.ping_interval, Duration::from_secs(5));
        assert!(server.dev_mode);
    }

    #[tokio::test]
    async fn test_websocket_subscribers_release_their_topics() {
        use futures_util::StreamExt;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hub = ChangeHub::new(8);
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(serve(
            listener,
            hub.clone(),
            Keepalive::default(),
            false,
            async move {
                let _ = stop_rx.await;
            },
        ));

        for n in 0..5 {
            let url = format!("ws://{}/ws/elements:project_id={}", addr, n);
            let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
            let hello = ws.next().await.unwrap().unwrap();
            assert!(hello.to_text().unwrap().contains("Subscribed"));
            ws.close(None).await.unwrap();
            while ws.next().await.is_some() {}
        }

        let released = async {
            while hub.topic_entries() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(5), released)
            .await
            .expect("topics still held after subscribers left");

        stop_tx.send(()).unwrap();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_serve_stops_and_closes_hub_on_shutdown() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let hub = ChangeHub::new(8);
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(serve(
            listener,
            hub.clone(),
            Keepalive::default(),
            false,
            async move {
                let _ = stop_rx.await;
            },
        ));

        stop_tx.send(()).unwrap();
        server.await.unwrap().unwrap();
        assert!(hub.is_closed());
    }
}
