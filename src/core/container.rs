//! Dependency injection container for cirrusfeed.

use std::sync::Arc;

use super::config::{Config, ConfigError};
use crate::integration::ambient;
use crate::services;

/// Container for application dependencies.
pub struct Container {
    config: Arc<Config>,
    ambient: Arc<ambient::Client>,
    history_service: Arc<services::HistoryBackgroundService>,
    realtime_service: Arc<services::RealtimeBackgroundService>,
}

impl Container {
    /// Creates a new instance of the dependency injection container.
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        let config = Arc::new(config);
        let history_settings = config.history_settings()?;

        let ambient = Arc::new(ambient::Client::new(
            config.ambient_url.clone(),
            config.ambient_api_key.clone(),
            config.ambient_application_key.clone(),
        ));

        let history_service = Arc::new(services::HistoryBackgroundService::new(
            Arc::clone(&ambient),
            config.ambient_mac_address.clone(),
            history_settings,
        ));

        let realtime_service = Arc::new(services::RealtimeBackgroundService::new(
            Arc::clone(&ambient),
            config.realtime_poll_interval()?,
            services::EventDispatcher::with_logging(),
        ));

        Ok(Self {
            config,
            ambient,
            history_service,
            realtime_service,
        })
    }

    /// Returns a reference to the application config.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns a reference to the Ambient Weather client.
    pub fn ambient_client(&self) -> Arc<ambient::Client> {
        Arc::clone(&self.ambient)
    }

    /// Returns a reference to the history service.
    pub fn history_service(&self) -> Arc<services::HistoryBackgroundService> {
        Arc::clone(&self.history_service)
    }

    /// Returns a reference to the realtime service.
    pub fn realtime_service(&self) -> Arc<services::RealtimeBackgroundService> {
        Arc::clone(&self.realtime_service)
    }
}
