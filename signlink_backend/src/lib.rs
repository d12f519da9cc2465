mod annotate;
mod frame;
mod routes;
mod server;

pub mod config;
pub mod model_service;

use std::sync::Arc;
use tokio::sync::broadcast;

pub use model_service::{Detection, ModelService, StaticModelService};
pub use routes::BackendState;
pub use server::BackendServer;

/// Serves the webcam endpoint until `shutdown_rx` fires.
pub async fn start_service(
    config: config::Settings,
    shutdown_rx: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let model = StaticModelService::new(config.model.label.clone(), config.model.confidence);
    let state = BackendState {
        model: Arc::new(model),
    };

    let server = BackendServer::new(state, &config.service.get_address()).await?;
    server.run(shutdown_rx).await??;

    Ok(())
}
