//! Router assembly and the startup install

use std::future::Future;
use std::sync::Arc;

use axum::Router;
use offcache::{LifecycleState, Network};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::handler::{intercept, Controller};

/// Every path and method goes to the controller
pub fn router<N: Network + 'static>(controller: Controller<N>) -> Router {
    Router::new()
        .fallback(intercept::<N>)
        .with_state(controller)
        .layer(TraceLayer::new_for_http())
}

/// Run the install event in the background unless the store is already active
///
/// A failed install is logged and the controller keeps passing requests
/// through to the network.
pub fn spawn_install<N: Network + 'static>(
    controller: Controller<N>,
    reinstall: bool,
) -> Option<JoinHandle<LifecycleState>> {
    if controller.state() == LifecycleState::Active && !reinstall {
        info!("Cache already installed, skipping install");
        return None;
    }

    Some(tokio::spawn(async move {
        if let Err(e) = controller.on_install().await {
            warn!("Install failed, serving from network only: {}", e);
        }
        controller.state()
    }))
}

/// Serve the proxy on `listener` until `shutdown` resolves
pub async fn serve<N: Network + 'static>(
    listener: TcpListener,
    controller: Controller<N>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(listener, router(controller))
        .with_graceful_shutdown(shutdown)
        .await
}
