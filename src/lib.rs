pub mod api;
pub mod app_state;
pub mod chat;
pub mod comments;
pub mod config;
pub mod coordinator;
pub mod credentials;
pub mod egress;
pub mod error;
pub mod ingest;
pub mod model;
pub mod store;
pub mod streams;

#[cfg(test)]
mod testing;

use axum::Router;
use axum::extract::Extension;
use axum::routing::{get, patch, post, put};
use tokio::net::TcpListener;
use tower_http::cors::Any;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

//
// Re-export
//
pub use app_state::AppState;
pub use config::Config;
pub use coordinator::DestinationCoordinator;
pub use error::{CredentialError, GatewayError, ServiceError};
pub use ingest::{IngestionScheduler, IngestionService};

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/status", get(api::status))
        .route("/streams", post(api::create_stream).get(api::list_streams))
        .route(
            "/streams/{stream_id}",
            get(api::get_stream).delete(api::delete_stream),
        )
        .route(
            "/streams/{stream_id}/destinations",
            post(api::create_destination).get(api::list_destinations),
        )
        .route(
            "/streams/{stream_id}/destinations/{destination_id}",
            get(api::get_destination).delete(api::delete_destination),
        )
        .route(
            "/streams/{stream_id}/destinations/{destination_id}/start",
            post(api::start_destination),
        )
        .route(
            "/streams/{stream_id}/destinations/{destination_id}/stop",
            post(api::stop_destination),
        )
        .route(
            "/streams/{stream_id}/destinations/{destination_id}/health",
            get(api::destination_health),
        )
        .route("/streams/{stream_id}/comments", get(api::list_comments))
        .route("/streams/{stream_id}/comments/ws", get(api::comments_ws))
        .route(
            "/streams/{stream_id}/comments/recent",
            get(api::recent_comments),
        )
        .route(
            "/streams/{stream_id}/comments/bulk-update",
            post(api::bulk_update_comments),
        )
        .route(
            "/streams/{stream_id}/comments/{comment_id}",
            axum::routing::delete(api::delete_comment),
        )
        .route(
            "/streams/{stream_id}/comments/{comment_id}/status",
            patch(api::update_comment_status),
        )
        .route(
            "/streams/{stream_id}/ingestion/{platform}",
            post(api::start_ingestion).delete(api::stop_ingestion),
        )
        .route(
            "/connections/{provider}",
            put(api::save_connection).delete(api::revoke_connection),
        )
        .layer(axum::middleware::from_fn(api::log_request_errors))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(Extension(state))
}

pub async fn run(config: Config) -> anyhow::Result<()> {
    let state = AppState::new(&config).await?;

    let addr = format!("0.0.0.0:{}", config.listen_on_port);
    let listener = TcpListener::bind(&addr).await?;
    info!("API listening on {addr}");

    axum::serve(listener, app(state.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.shutdown().await;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        error!(?error, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
