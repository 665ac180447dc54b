use crate::app::App;
use crate::routes;
use axum::http::{Method, header::CONTENT_TYPE};
use eyre::WrapErr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Serve the REST interface on `address` until interrupted.
pub async fn serve(app: Arc<App>, address: &str) -> eyre::Result<()> {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60));

    let router = routes::router(app)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let listener = TcpListener::bind(address)
        .await
        .wrap_err_with(|| format!("cannot bind to {address}"))?;
    info!("server running on {address}");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .wrap_err("server failure")?;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        info!("received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("received terminate signal, shutting down");
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
