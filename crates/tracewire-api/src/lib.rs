//! HTTP/JSON gateway — the same control operations the native RPC carries,
//! as a REST-ish surface. The two front-ends are interchangeable views over
//! one `DecoderService`; no logic lives here beyond translation.

pub mod handlers;

use axum::routing::{delete, get, put};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

pub use handlers::ApiState;

pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/schema", put(handlers::handle_upsert_schema))
        .route("/v1/stream", put(handlers::handle_bind_stream))
        .route("/v1/stream", delete(handlers::handle_unbind_stream))
        .route("/v1/status", get(handlers::handle_status))
        .with_state(state)
        .layer(cors)
}

/// Serve the gateway until the shutdown channel fires.
pub async fn serve(
    state: ApiState,
    bind: &str,
    shutdown: tokio::sync::broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    serve_on(listener, state, shutdown).await
}

/// Serve the gateway on an already-bound listener.
pub async fn serve_on(
    listener: tokio::net::TcpListener,
    state: ApiState,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    tracing::info!(addr = %listener.local_addr()?, "gateway listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;
    Ok(())
}
