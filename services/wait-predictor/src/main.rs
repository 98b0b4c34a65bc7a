use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use waitline_core::{clear_ready, init_tracing, mark_not_live, mark_ready};

use wait_predictor::config::SERVICE_NAME;
use wait_predictor::http::{self, AppState};
use wait_predictor::{QueueSizeEstimator, ServiceConfig, WaitTimePredictor};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing(SERVICE_NAME)?;

    let cfg = ServiceConfig::load()?;
    info!(?cfg, "config loaded");

    let predictor = Arc::new(WaitTimePredictor::from_config(&cfg));
    let estimator = Arc::new(QueueSizeEstimator::from_config(&cfg.vision));

    let boot = Arc::clone(&predictor);
    match tokio::task::spawn_blocking(move || boot.ensure_model()).await? {
        Ok(model) => {
            info!(model_type = %model.kind(), "active model ready");
            mark_ready();
        }
        // stays live so an operator can POST /train once the data is fixed
        Err(e) => error!(error = %e, "bootstrap failed, service not ready"),
    }

    let app = http::router(AppState { predictor, estimator, vision: cfg.vision.clone() });
    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.http_port));
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            clear_ready();
            mark_not_live();
            error!(%addr, error = %e, "bind failed");
            return Err(e.into());
        }
    };
    info!(%addr, "wait predictor listening");

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    info!("shutdown");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "ctrl-c handler failed");
    }
    clear_ready();
}
