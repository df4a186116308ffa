pub mod config;
pub mod errors;
pub mod handlers;
pub mod metrics_defs;
pub mod refresh;
pub mod router;
pub mod sdmx;
pub mod supervisor;
pub mod templates;
pub mod upstream;
pub mod validation;

use crate::config::Config;
use crate::handlers::AppState;
use crate::supervisor::{Supervisor, SupervisorError};
use shared::http::run_http_service;
use tokio_util::sync::CancellationToken;

#[derive(thiserror::Error, Debug)]
pub enum GatewayRunError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("supervisor error: {0}")]
    Supervisor(#[from] SupervisorError),
}

/// Serves the gateway until `shutdown` is cancelled.
///
/// When supervision is enabled the plot service is launched first and
/// stopped once the listener has drained.
pub async fn run(state: AppState, shutdown: CancellationToken) -> Result<(), GatewayRunError> {
    let config: &Config = &state.config;
    let host = config.listener.host.clone();
    let port = config.listener.port;
    let drain_timeout = config.shutdown_timeout();

    let mut companion = None;
    if config.supervisor.enabled {
        let mut supervisor = Supervisor::new(supervisor::platform_manager());
        supervisor.start(config).await?;
        companion = Some(supervisor);
    }

    let router = router::build_router(state);
    let result = run_http_service(&host, port, router, shutdown, drain_timeout).await;

    if let Some(mut supervisor) = companion {
        supervisor.stop().await;
    }
    tracing::info!("gateway stopped");
    Ok(result?)
}
