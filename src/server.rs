//! Server
use crate::core::config::{APP_NAME, APP_VERSION};
use crate::core::container::Container;
use tokio_util::sync::CancellationToken;

/// Run the enabled services until the shutdown token is cancelled.
pub async fn server(container: Container, shutdown_token: CancellationToken) {
    log::info!("{APP_NAME} v{APP_VERSION} started");

    let config = container.config();
    let mut handles = Vec::new();
    if config.realtime_enabled {
        handles.push(container.realtime_service().start(&shutdown_token));
    }
    if config.history_enabled {
        handles.push(container.history_service().start(&shutdown_token));
    }
    if handles.is_empty() {
        log::warn!("No service enabled, set REALTIME_ENABLED or HISTORY_ENABLED");
    }

    shutdown_token.cancelled().await;

    for handle in handles {
        handle.stop().await;
    }
    log::info!("{APP_NAME} stopped");
}
