//! Realtime Background Service.
//! This service watches the user's devices and notifies registered handlers when new data arrives.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::{Duration, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

use super::ServiceHandle;
use crate::integration::ambient::{self, UserDevice};

/// Event emitted by the realtime service.
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    /// First successful poll, with every device of the account.
    Subscribed(Vec<UserDevice>),
    /// A device reported a new observation.
    DataReceived(UserDevice),
}

type Handler = Box<dyn Fn(&RealtimeEvent) + Send + Sync>;

/// Ordered list of event handlers.
/// Handlers run synchronously, in registration order, for each dispatched event.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: Vec<Handler>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatcher with the logging handler registered.
    pub fn with_logging() -> Self {
        let mut dispatcher = Self::new();
        dispatcher.on_event(log_event);
        dispatcher
    }

    pub fn on_event<H>(&mut self, handler: H)
    where
        H: Fn(&RealtimeEvent) + Send + Sync + 'static,
    {
        self.handlers.push(Box::new(handler));
    }

    pub fn dispatch(&self, event: &RealtimeEvent) {
        for handler in &self.handlers {
            handler(event);
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Logs subscription and data events.
pub fn log_event(event: &RealtimeEvent) {
    match event {
        RealtimeEvent::Subscribed(devices) => {
            let macs: Vec<_> = devices.iter().map(|d| d.mac_address.as_str()).collect();
            log::info!("Subscribed to {} device(s): {macs:?}", devices.len());
        }
        RealtimeEvent::DataReceived(device) => match &device.last_data {
            Some(data) => match serde_json::to_string(data) {
                Ok(json) => log::info!("Data received from {}: {json}", device.mac_address),
                Err(e) => log::warn!("Data received from {}, cannot encode: {e}", device.mac_address),
            },
            None => log::info!("Data received from {}", device.mac_address),
        },
    }
}

/// State carried between polls.
#[derive(Debug, Default)]
pub struct PollState {
    subscribed: bool,
    last_seen: HashMap<String, DateTime<Utc>>,
}

impl PollState {
    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }
}

pub struct RealtimeBackgroundService {
    client: Arc<ambient::Client>,
    poll_interval: Duration,
    dispatcher: EventDispatcher,
}

impl RealtimeBackgroundService {
    /// Creates a new instance of `RealtimeBackgroundService`.
    pub fn new(
        client: Arc<ambient::Client>,
        poll_interval: Duration,
        dispatcher: EventDispatcher,
    ) -> Self {
        RealtimeBackgroundService {
            client,
            poll_interval,
            dispatcher,
        }
    }

    /// Spawns the polling loop as a background task.
    pub fn start(self: Arc<Self>, shutdown: &CancellationToken) -> ServiceHandle {
        ServiceHandle::spawn("Realtime", shutdown, move |token| async move {
            self.run(token).await;
        })
    }

    /// Polls the devices at the configured interval until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut state = PollState::default();
        let mut interval = interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }
            match self.poll(&mut state).await {
                Ok(0) => log::debug!("No new device data"),
                Ok(events) => log::debug!("Dispatched {events} event(s)"),
                Err(e) => log::error!("Error polling devices: {e}"),
            }
        }
    }

    /// Polls the devices once and dispatches the resulting events.
    /// Returns the number of dispatched events.
    pub async fn poll(&self, state: &mut PollState) -> Result<usize, anyhow::Error> {
        let devices = self.client.list_devices().await?;
        let mut events = Vec::new();
        if !state.subscribed {
            state.subscribed = true;
            events.push(RealtimeEvent::Subscribed(devices.clone()));
        }
        for device in devices {
            if Self::is_new_data(state, &device) {
                events.push(RealtimeEvent::DataReceived(device));
            }
        }
        for event in &events {
            self.dispatcher.dispatch(event);
        }
        Ok(events.len())
    }

    /// Records the device's latest timestamp and returns `true` if it changed.
    fn is_new_data(state: &mut PollState, device: &UserDevice) -> bool {
        let Some(timestamp) = device.last_data.as_ref().and_then(|d| d.timestamp()) else {
            return false;
        };
        let previous = state.last_seen.insert(device.mac_address.clone(), timestamp);
        previous != Some(timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integration::ambient::Observation;
    use chrono::TimeZone;
    use std::sync::Mutex;

    fn device(mac: &str, minute: Option<u32>) -> UserDevice {
        UserDevice {
            mac_address: mac.to_string(),
            info: None,
            last_data: minute.map(|m| Observation {
                utc_date: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, m, 0).unwrap()),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_dispatch_runs_handlers_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = EventDispatcher::new();
        for name in ["first", "second"] {
            let seen = Arc::clone(&seen);
            dispatcher.on_event(move |event| {
                if let RealtimeEvent::DataReceived(device) = event {
                    seen.lock().unwrap().push(format!("{name}:{}", device.mac_address));
                }
            });
        }

        dispatcher.dispatch(&RealtimeEvent::DataReceived(device("a", Some(0))));
        dispatcher.dispatch(&RealtimeEvent::DataReceived(device("b", Some(0))));

        assert_eq!(dispatcher.len(), 2);
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["first:a", "second:a", "first:b", "second:b"]
        );
    }

    #[test]
    fn test_empty_dispatcher() {
        let dispatcher = EventDispatcher::new();
        assert!(dispatcher.is_empty());
        dispatcher.dispatch(&RealtimeEvent::Subscribed(Vec::new()));
        assert!(!EventDispatcher::with_logging().is_empty());
    }

    #[test]
    fn test_is_new_data() {
        let mut state = PollState::default();

        assert!(RealtimeBackgroundService::is_new_data(&mut state, &device("a", Some(0))));
        assert!(!RealtimeBackgroundService::is_new_data(&mut state, &device("a", Some(0))));
        assert!(RealtimeBackgroundService::is_new_data(&mut state, &device("a", Some(5))));
        assert!(RealtimeBackgroundService::is_new_data(&mut state, &device("b", Some(5))));
        assert!(!RealtimeBackgroundService::is_new_data(&mut state, &device("c", None)));
    }
}
