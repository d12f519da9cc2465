use crate::routes::{api_routes, BackendState};
use axum::Router;
use std::net::SocketAddr;
use tokio::{net::TcpListener, sync::broadcast::Receiver, task::JoinHandle};

pub struct BackendServer {
    router: Router,
    listener: TcpListener,
}

impl BackendServer {
    pub async fn new(state: BackendState, addr: &str) -> anyhow::Result<Self> {
        let router = Router::new().merge(api_routes()).with_state(state);
        let listener = TcpListener::bind(addr).await?;

        Ok(Self { router, listener })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn run(self, mut shutdown_rx: Receiver<()>) -> JoinHandle<anyhow::Result<()>> {
        let listener = self.listener;
        let router = self.router;
        tokio::spawn(async move {
            tracing::info!("Inference backend listening on {}", listener.local_addr()?);
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    shutdown_rx.recv().await.ok();
                })
                .await?;
            Ok(())
        })
    }
}
