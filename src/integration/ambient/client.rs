//! Ambient Weather Client.
//! This client is the higher level API client for Ambient Weather.
use super::Result;
use super::http_client::HttpClient;
use super::schemas::{Observation, UserDevice};
use chrono::{DateTime, Utc};
use reqwest::Url;

/// Maximum number of observations the API returns for one history request.
pub const MAX_HISTORY_LIMIT: u32 = 288;

pub struct Client {
    http: HttpClient,
}

impl Client {
    /// Creates a new instance of `Client`.
    pub fn new(url: Url, api_key: String, application_key: String) -> Self {
        let http = HttpClient::new(url, api_key, application_key);
        Client { http }
    }

    /// List the devices of the user, each with its most recent observation.
    pub async fn list_devices(&self) -> Result<Vec<UserDevice>> {
        self.http.get("v1/devices", &[]).await
    }

    /// Fetch the observations of a device recorded before `end_date`, newest first.
    /// At most `limit` observations are returned, capped at [`MAX_HISTORY_LIMIT`].
    ///
    /// The request is attempted once, callers decide on retries.
    pub async fn fetch_device_history(
        &self,
        mac_address: &str,
        end_date: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Observation>> {
        let path = Self::device_path(mac_address);
        let params = Self::history_params(end_date, limit);
        self.http.get_once(&path, &params).await
    }

    fn device_path(mac_address: &str) -> String {
        format!("v1/devices/{mac_address}")
    }

    fn history_params(end_date: DateTime<Utc>, limit: u32) -> [(&'static str, String); 2] {
        [
            ("endDate", end_date.timestamp_millis().to_string()),
            ("limit", limit.clamp(1, MAX_HISTORY_LIMIT).to_string()),
        ]
    }
}
