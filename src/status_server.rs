use anyhow::Result;
use axum::{extract::State, routing::get, Json, Router};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};

use crate::domain::models::MonitorStatus;

pub async fn run(port: u16, status: watch::Receiver<MonitorStatus>) -> Result<()> {
    let addr = format!("127.0.0.1:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    log::info!("Status server listening on http://{}", addr);

    serve(listener, status).await
}

pub async fn serve(listener: TcpListener, status: watch::Receiver<MonitorStatus>) -> Result<()> {
    axum::serve(listener, router(status)).await?;
    Ok(())
}

fn router(status: watch::Receiver<MonitorStatus>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any);

    Router::new()
        .route("/status", get(get_status))
        .route("/health", get(health_check))
        .layer(cors)
        .with_state(status)
}

async fn get_status(State(status): State<watch::Receiver<MonitorStatus>>) -> Json<MonitorStatus> {
    Json(status.borrow().clone())
}

async fn health_check() -> &'static str {
    "ok"
}
