use crate::{
    camera::{CameraPlatform, SyntheticCamera},
    config::{CameraConfig, CameraSource, Config},
    frame::FrameEncoder,
    server::{HttpServer, SharedState},
    session::SessionManager,
    telemetry::Metrics,
    websocket::WebSocketConnector,
};
use std::sync::Arc;
use tokio::{
    signal,
    sync::{broadcast, watch, Mutex},
};

pub async fn start_app(config: Config) -> anyhow::Result<()> {
    let metrics = Arc::new(Metrics::new()?);
    let encoder = Arc::new(FrameEncoder::new(&config.stream));
    let connector = Arc::new(WebSocketConnector::new(config.stream.connect_timeout()));

    let mut manager = SessionManager::new(
        camera_platform(&config.camera),
        connector,
        encoder.clone(),
        metrics.clone(),
        config.render.size(),
    )
    .with_preview_interval(config.camera.get_feed_delay());
    manager.apply(config.session.clone()).await;

    let view = manager.view();
    let manager = Arc::new(Mutex::new(manager));
    let (feed_shutdown_tx, feed_shutdown_rx) = watch::channel(false);

    let state = SharedState {
        manager: manager.clone(),
        view,
        encoder,
        metrics,
        feed_delay: config.camera.get_feed_delay(),
        shutdown: feed_shutdown_rx,
    };
    let server = HttpServer::new(state, &config.server).await?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let server_handle = server.run(shutdown_tx.subscribe()).await?;

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown.");

    manager.lock().await.stop().await;
    let _ = feed_shutdown_tx.send(true);
    let _ = shutdown_tx.send(());
    match server_handle.await {
        Ok(result) => result?,
        Err(e) => tracing::error!("Control server task failed: {:?}", e),
    }

    Ok(())
}

fn camera_platform(config: &CameraConfig) -> Arc<dyn CameraPlatform> {
    match config.source {
        CameraSource::Synthetic => Arc::new(SyntheticCamera::new(
            config.synthetic_width,
            config.synthetic_height,
        )),
        #[cfg(feature = "opencv_camera")]
        CameraSource::Device => Arc::new(crate::camera::OpenCvCamera::new(config.device_index)),
        #[cfg(not(feature = "opencv_camera"))]
        CameraSource::Device => {
            tracing::warn!(
                "Built without the `opencv_camera` feature, camera {} replaced by a test pattern",
                config.device_index
            );
            Arc::new(SyntheticCamera::new(
                config.synthetic_width,
                config.synthetic_height,
            ))
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
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
