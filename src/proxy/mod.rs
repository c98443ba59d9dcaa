use crate::error::{ProxyError, Result};
use crate::state::AppState;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

pub mod capture;
pub mod handler;
pub mod headers;

pub use capture::{CaptureStream, CapturedBody};

pub struct ProxyServer {
    state: Arc<AppState>,
}

impl ProxyServer {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    pub async fn run(self) -> Result<()> {
        let addr: SocketAddr = self.state.config.bind_address().parse().map_err(|e| {
            ProxyError::Config(crate::error::ConfigError::Parse(format!(
                "Invalid listen address: {e}"
            )))
        })?;

        let mut shutdown_rx = self.state.shutdown_tx.subscribe();
        let (addr, server) = warp::serve(routes(self.state.clone()))
            .try_bind_with_graceful_shutdown(addr, async move {
                let _ = shutdown_rx.recv().await;
            })
            .map_err(|e| ProxyError::Server(format!("Failed to bind {addr}: {e}")))?;

        tracing::info!(
            "Proxy server listening on {}, forwarding to {}",
            addr,
            self.state.config.anthropic_api_base
        );

        server.await;

        tracing::info!("Proxy server stopped");
        Ok(())
    }
}

pub fn routes(
    state: Arc<AppState>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let health = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .map(|| warp::reply::json(&serde_json::json!({ "status": "ok" })));

    let relay = warp::path("v1")
        .and(warp::path::tail())
        .and(allowed_methods())
        .and(warp::method())
        .and(raw_query())
        .and(warp::header::headers_cloned())
        .and(warp::body::bytes())
        .and(with_state(state))
        .and_then(handler::relay);

    health.or(relay).recover(handle_rejection)
}

fn allowed_methods() -> impl Filter<Extract = (), Error = Rejection> + Clone {
    warp::get()
        .or(warp::post())
        .unify()
        .or(warp::put())
        .unify()
        .or(warp::delete())
        .unify()
        .or(warp::patch())
        .unify()
}

fn raw_query() -> impl Filter<Extract = (Option<String>,), Error = Infallible> + Clone {
    warp::query::raw()
        .map(Some)
        .or(warp::any().map(|| None))
        .unify()
}

fn with_state(
    state: Arc<AppState>,
) -> impl Filter<Extract = (Arc<AppState>,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

/// Relay failures surface as a bare 500; the client never sees proxy
/// internals. Everything else keeps warp's default handling.
async fn handle_rejection(err: Rejection) -> std::result::Result<impl Reply, Rejection> {
    if err.find::<ProxyError>().is_some() {
        return Ok(warp::reply::with_status(
            "Internal Server Error",
            StatusCode::INTERNAL_SERVER_ERROR,
        ));
    }
    Err(err)
}
