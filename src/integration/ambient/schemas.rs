//! Ambient Weather API Schemas
//! The schemas module defines the data structures returned by the Ambient Weather API.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One weather observation as reported by a station.
///
/// Every field is optional: stations only report the sensors they have, and a
/// missing sensor is `None`, never zero. Units follow the API (Fahrenheit,
/// inches, mph).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Epoch time in milliseconds.
    #[serde(rename = "dateutc")]
    pub epoch_milliseconds: Option<i64>,
    #[serde(rename = "tempinf")]
    pub indoor_temperature_fahrenheit: Option<f64>,
    #[serde(rename = "humidityin")]
    pub indoor_humidity: Option<i32>,
    /// Relative barometric pressure in inHg.
    #[serde(rename = "baromrelin")]
    pub relative_barometric_pressure: Option<f64>,
    /// Absolute barometric pressure in inHg.
    #[serde(rename = "baromabsin")]
    pub absolute_barometric_pressure: Option<f64>,
    #[serde(rename = "tempf")]
    pub outdoor_temperature_fahrenheit: Option<f64>,
    /// Outdoor sensor battery: 1 is OK, 0 is low (inverted on Meteobridge).
    #[serde(rename = "battout")]
    pub battery_low_indicator: Option<i32>,
    #[serde(rename = "humidity")]
    pub outdoor_humidity: Option<i32>,
    /// Wind direction in degrees.
    #[serde(rename = "winddir")]
    pub wind_direction: Option<i32>,
    #[serde(rename = "windspeedmph")]
    pub wind_speed_mph: Option<f64>,
    #[serde(rename = "windgustmph")]
    pub wind_gust_mph: Option<f64>,
    #[serde(rename = "maxdailygust")]
    pub max_daily_gust: Option<f64>,
    #[serde(rename = "hourlyrainin")]
    pub hourly_rainfall: Option<f64>,
    #[serde(rename = "eventrainin")]
    pub event_rainfall: Option<f64>,
    #[serde(rename = "dailyrainin")]
    pub daily_rainfall: Option<f64>,
    #[serde(rename = "weeklyrainin")]
    pub weekly_rainfall: Option<f64>,
    #[serde(rename = "monthlyrainin")]
    pub monthly_rainfall: Option<f64>,
    #[serde(rename = "yearlyrainin")]
    pub yearly_rainfall: Option<f64>,
    #[serde(rename = "totalrainin")]
    pub total_rainfall: Option<f64>,
    /// Solar radiation in W/m^2.
    #[serde(rename = "solarradiation")]
    pub solar_radiation: Option<f64>,
    #[serde(rename = "uv")]
    pub ultraviolet_radiation_index: Option<i32>,
    /// Wind chill below 50ºF, heat index above 68ºF.
    #[serde(rename = "feelsLike")]
    pub outdoor_feels_like_temperature_fahrenheit: Option<f64>,
    #[serde(rename = "dewPoint")]
    pub dew_point_fahrenheit: Option<f64>,
    #[serde(rename = "feelsLikein")]
    pub indoor_feels_like_temperature_fahrenheit: Option<f64>,
    #[serde(rename = "dewPointin")]
    pub indoor_dew_point_temperature_fahrenheit: Option<f64>,
    /// Last time hourly rainfall was above zero.
    #[serde(rename = "lastRain")]
    pub last_rain: Option<DateTime<Utc>>,
    #[serde(rename = "loc")]
    pub loc: Option<String>,
    #[serde(rename = "date")]
    pub utc_date: Option<DateTime<Utc>>,
}

impl Observation {
    /// Instant of the observation, from `dateutc` or else `date`.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.epoch_milliseconds
            .and_then(DateTime::from_timestamp_millis)
            .or(self.utc_date)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: Option<String>,
    pub location: Option<String>,
}

/// A device registered on the user's account, with its latest observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserDevice {
    #[serde(rename = "macAddress")]
    pub mac_address: String,
    pub info: Option<DeviceInfo>,
    #[serde(rename = "lastData")]
    pub last_data: Option<Observation>,
}
