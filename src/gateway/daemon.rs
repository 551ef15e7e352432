//! The HTTP gateway daemon.

use std::{fs, net::SocketAddr, path::PathBuf, sync::Arc};

use axum::{
    Router, middleware,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

use crate::runtime::Runtime;

use super::{auth::auth_middleware, routes};

const MAX_PORT_ATTEMPTS: u16 = 10;

/// Path to the PID file written on daemon start.
pub fn pid_path() -> PathBuf {
    crate::config::engram_dir().join("daemon.pid")
}

/// Build the full router (also used directly by the integration tests).
pub fn router(runtime: Arc<Runtime>) -> Router {
    let protected = Router::new()
        .route("/sessions", get(routes::list_sessions).post(routes::create_session))
        .route("/sessions/current", get(routes::current_session))
        .route("/sessions/stats", get(routes::session_stats))
        .route(
            "/sessions/{id}",
            get(routes::get_session).delete(routes::delete_session),
        )
        .route("/sessions/{id}/load", post(routes::load_session))
        .route("/sessions/{id}/history", get(routes::session_history))
        .route("/sessions/{id}/run", post(routes::run_session))
        .layer(middleware::from_fn_with_state(
            runtime.clone(),
            auth_middleware,
        ))
        .with_state(runtime.clone());

    let public = Router::new().route("/health", get(routes::health));

    Router::new()
        .merge(public)
        .merge(protected)
        .layer(CorsLayer::permissive())
}

/// Start the gateway, binding to `127.0.0.1` starting at the configured
/// port.  If that port is taken, increments up to [`MAX_PORT_ATTEMPTS`]
/// times before returning an error.
///
/// Writes `daemon.pid` on successful bind.  Blocks until the server shuts
/// down.
pub async fn start_gateway(runtime: Arc<Runtime>) -> Result<(), String> {
    let port = runtime.config.gateway.port;
    let app = router(runtime);

    let listener = bind_with_fallback(port).await?;
    let addr = listener.local_addr().map_err(|e| e.to_string())?;

    write_pid_file(addr.port())?;
    log::info!("engram gateway listening on {addr}");

    axum::serve(listener, app)
        .await
        .map_err(|e| format!("gateway error: {e}"))
}

async fn bind_with_fallback(start_port: u16) -> Result<TcpListener, String> {
    for offset in 0..MAX_PORT_ATTEMPTS {
        let port = start_port.saturating_add(offset);
        let addr: SocketAddr = SocketAddr::from(([127, 0, 0, 1], port));
        match TcpListener::bind(addr).await {
            Ok(listener) => return Ok(listener),
            Err(_) if offset + 1 < MAX_PORT_ATTEMPTS => continue,
            Err(e) => {
                return Err(format!(
                    "could not bind to any port in {start_port}–{}: {e}",
                    start_port.saturating_add(MAX_PORT_ATTEMPTS - 1)
                ));
            }
        }
    }
    unreachable!()
}

fn write_pid_file(port: u16) -> Result<(), String> {
    let path = pid_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| format!("failed to create state dir: {e}"))?;
    }
    let content = format!("{}\n{}\n", std::process::id(), port);
    fs::write(&path, content).map_err(|e| format!("failed to write PID file: {e}"))
}
