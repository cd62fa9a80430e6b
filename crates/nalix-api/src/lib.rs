pub mod handlers;

use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

pub use handlers::ApiState;

pub async fn serve(state: ApiState, port: u16) -> anyhow::Result<()> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/status", get(handlers::handle_status))
        .route("/opcodes", get(handlers::handle_opcodes))
        .route("/connections", get(handlers::handle_connections))
        .route(
            "/connections/{id}",
            get(handlers::handle_connection_inspect),
        )
        .with_state(state);

    let app = Router::new().nest("/api", api_routes).layer(cors);

    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{port}")).await?;
    tracing::info!(port, "API listening on 127.0.0.1");
    axum::serve(listener, app).await?;
    Ok(())
}
