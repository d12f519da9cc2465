use crate::{
    config::ServerConfig, frame::FrameEncoder, routes::api_routes, session::SessionManager,
    session::SessionView, telemetry::Metrics,
};
use axum::{
    extract::{MatchedPath, Request, State},
    middleware::{self, Next},
    response::Response,
    Router,
};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{
    net::TcpListener,
    sync::{broadcast::Receiver, watch, Mutex},
    task::JoinHandle,
};

#[derive(Clone)]
pub struct SharedState {
    pub manager: Arc<Mutex<SessionManager>>,
    pub view: Arc<SessionView>,
    pub encoder: Arc<FrameEncoder>,
    pub metrics: Arc<Metrics>,
    pub feed_delay: Duration,
    pub shutdown: watch::Receiver<bool>,
}

pub struct HttpServer {
    router: Router,
    listener: TcpListener,
}

impl HttpServer {
    pub async fn new(state: SharedState, config: &ServerConfig) -> anyhow::Result<Self> {
        let addr = config.get_address();

        let router = Router::new()
            .merge(api_routes())
            .layer(middleware::from_fn_with_state(state.clone(), track_requests))
            .with_state(state);

        let listener = TcpListener::bind(addr).await?;

        Ok(Self { router, listener })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(
        self,
        shutdown_rx: Receiver<()>,
    ) -> anyhow::Result<JoinHandle<anyhow::Result<()>>> {
        tracing::info!("Starting control server on {}", self.listener.local_addr()?);

        let listener = self.listener;
        let router = self.router;
        let server_handle = tokio::spawn({
            let mut shutdown_rx = shutdown_rx.resubscribe();
            async move {
                axum::serve(listener, router)
                    .with_graceful_shutdown(async move {
                        shutdown_rx.recv().await.ok();
                    })
                    .await?;
                Ok(())
            }
        });

        Ok(server_handle)
    }
}

async fn track_requests(
    State(state): State<SharedState>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".into());

    let response = next.run(request).await;

    state
        .metrics
        .record_http_request(&method, &route, response.status().as_u16());
    response
}
