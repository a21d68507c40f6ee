pub mod handlers;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

pub use handlers::ApiState;

pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/status", get(handlers::status::handle_status))
        .route("/altlocs/{hash}", get(handlers::altlocs::handle_altlocs))
        .route("/proxies/{addr}", get(handlers::altlocs::handle_proxies))
        .route("/push/{addr}", post(handlers::altlocs::handle_push))
        .route("/filter/reload", post(handlers::filter::handle_filter_reload))
        .route(
            "/reply-cache/clear",
            post(handlers::filter::handle_reply_cache_clear),
        )
        .with_state(state);

    Router::new().nest("/api", api_routes).layer(cors)
}

pub async fn serve(state: ApiState, port: u16) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    tracing::info!(port, "API listening on 127.0.0.1");
    axum::serve(listener, app).await?;
    Ok(())
}
