//! Ambient Weather Integration Module
//! The integration is done via the Ambient Weather REST JSON API.
mod client;
mod error;
mod http_client;
mod schemas;

pub use client::{Client, MAX_HISTORY_LIMIT};
pub use error::{Error, Result};
pub use schemas::{DeviceInfo, Observation, UserDevice};
