//! Background services.
pub mod history;
pub mod realtime;

pub use history::{DeviceHistoryFetcher, HistoryBackgroundService, HistorySettings, LogSink};
pub use realtime::{EventDispatcher, PollState, RealtimeBackgroundService, RealtimeEvent};

use std::future::Future;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Handle on a spawned background service.
pub struct ServiceHandle {
    name: &'static str,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl ServiceHandle {
    /// Spawns a service task with a child token of `shutdown`.
    pub fn spawn<F, Fut>(name: &'static str, shutdown: &CancellationToken, service: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = shutdown.child_token();
        let task = tokio::spawn(service(token.clone()));
        log::info!("{name} service started");
        ServiceHandle { name, token, task }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancels the service and waits for it to finish.
    pub async fn stop(self) {
        self.token.cancel();
        match self.task.await {
            Ok(()) => log::info!("{} service stopped", self.name),
            Err(e) => log::error!("{} service crashed: {e}", self.name),
        }
    }
}
