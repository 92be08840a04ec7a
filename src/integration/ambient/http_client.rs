//! Ambient Weather HTTP client.
//! This is the lower level client for the Ambient Weather REST API.
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

use failsafe::{
    backoff::{self, Constant},
    failure_policy::{self, ConsecutiveFailures},
    futures::CircuitBreaker,
};
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio_retry::RetryIf;
use tokio_retry::strategy::{ExponentialBackoff, jitter};

use super::{Error, Result};

pub struct HttpClient {
    client: Client,
    base_url: Url,
    api_key: String,
    application_key: String,
    circuit_breaker: failsafe::StateMachine<ConsecutiveFailures<Constant>, ()>,
}

impl HttpClient {
    /// Creates a new instance of `HttpClient`.
    pub fn new(url: Url, api_key: String, application_key: String) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(2)
            .timeout(Duration::from_secs(5))
            .build()
            .expect("Failed to create HTTP client");
        HttpClient {
            client,
            base_url: url,
            api_key,
            application_key,
            circuit_breaker: Self::circuit_breaker(),
        }
    }

    /// GET a JSON resource, retrying transient errors.
    /// Use for idempotent polling where the caller has no retry policy of its own.
    pub async fn get<T: DeserializeOwned>(&self, path: &str, params: &[(&str, String)]) -> Result<T> {
        let body = RetryIf::spawn(
            Self::retry_strategy(),
            move || self.guarded_get(path, params),
            Self::is_retryable_error,
        )
        .await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// GET a JSON resource with a single attempt.
    pub async fn get_once<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        let body = self.guarded_get(path, params).await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Performs the request through the circuit breaker.
    async fn guarded_get(&self, path: &str, params: &[(&str, String)]) -> Result<String> {
        self.circuit_breaker
            .call_with(Self::is_recorded_error, self.request_get(path, params))
            .await
            .map_err(|err| match err {
                failsafe::Error::Rejected => Error::RequestRejected,
                failsafe::Error::Inner(e) => e,
            })
    }

    /// Internal method to send the GET request with the credentials.
    async fn request_get(&self, path: &str, params: &[(&str, String)]) -> Result<String> {
        log::debug!("Sending GET request to '{path}' with {params:?}");
        let url = self
            .base_url
            .join(path)
            .map_err(|e| Error::InvalidUrl(format!("{path}: {e}")))?;
        let text = self
            .client
            .get(url)
            .query(&[
                ("apiKey", self.api_key.as_str()),
                ("applicationKey", self.application_key.as_str()),
            ])
            .query(params)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        log::trace!("Response from '{path}': {text}");
        Ok(text)
    }

    /// Creates a circuit breaker that opens after 5 consecutive failures and will retry after 60 seconds.
    fn circuit_breaker() -> failsafe::StateMachine<ConsecutiveFailures<Constant>, ()> {
        let backoff = backoff::constant(Duration::from_secs(60));
        let policy = failure_policy::consecutive_failures(5, backoff);
        failsafe::Config::new().failure_policy(policy).build()
    }

    /// Create a retry strategy with exponential backoff starting at 10 milliseconds, with jitter, and a maximum of 3 retries.
    fn retry_strategy() -> impl Iterator<Item = Duration> {
        ExponentialBackoff::from_millis(10).map(jitter).take(3)
    }

    // Predicate function for the retry strategy to determine if an error is retryable.
    fn is_retryable_error(error: &Error) -> bool {
        match error {
            Error::RequestRejected => false, // Don't retry on circuit breaker rejection
            other => other.is_transient(),
        }
    }

    /// Predicate function for the circuit breaker to record only transient request errors.
    fn is_recorded_error(error: &Error) -> bool {
        match error {
            Error::RequestFailed(_) => error.is_transient(),
            Error::RequestRejected => false,
            Error::ResponseJsonError(_) => false,
            Error::InvalidUrl(_) => false,
        }
    }
}
