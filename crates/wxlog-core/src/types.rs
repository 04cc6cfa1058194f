//! Core data types for decoded weather readings

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::timestamp::Timestamp;

/// One decoded sensor reading.
///
/// Fields a device format does not carry stay at zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WeatherRecord {
    /// Station time of the reading, with the configured hour offset applied
    pub record_time: Timestamp,

    /// Wind direction in degrees
    pub wind_direction: u16,

    /// Wind speed in knots
    pub wind_speed: f32,

    /// Solar sensor, raw device units
    pub solar: u16,

    /// Inside temperature (°F)
    pub inside_temp: f32,

    /// Outside temperature (°F)
    pub outside_temp: f32,

    /// Relative humidity (%)
    pub humidity: u16,

    /// Barometric pressure (inHg)
    pub pressure: f32,

    /// Rainfall (in)
    pub rainfall: f32,
}

/// Line format produced by the attached device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamFormat {
    OldWeatherDevice,
    WeatherReportLogger,
    #[default]
    Unknown,
}

impl StreamFormat {
    pub fn name(self) -> &'static str {
        match self {
            StreamFormat::OldWeatherDevice => "OldWeatherDevice",
            StreamFormat::WeatherReportLogger => "WeatherReportLogger",
            StreamFormat::Unknown => "UnknownDevice",
        }
    }
}

impl fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StreamFormat {
    type Err = std::convert::Infallible;

    /// Names are case-insensitive; anything unrecognised is `Unknown`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let format = if s.eq_ignore_ascii_case("OldWeatherDevice") {
            StreamFormat::OldWeatherDevice
        } else if s.eq_ignore_ascii_case("WeatherReportLogger") {
            StreamFormat::WeatherReportLogger
        } else {
            StreamFormat::Unknown
        };
        Ok(format)
    }
}
