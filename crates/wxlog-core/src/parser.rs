//! Text parsers for the supported device line formats
//!
//! Both formats start with a `yy/mm/dd hh:mm:ss` stamp and are split on
//! whitespace, `/` and `:`. The old device format is positional and keeps
//! empty tokens produced by runs of separators; the report logger format
//! drops them.

use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime, TimeDelta};

use crate::compass::CompassPoint;
use crate::timestamp::Timestamp;
use crate::types::{StreamFormat, WeatherRecord};

/// Divisor converting miles per hour to knots, as used by the station firmware
pub const MPH_PER_KNOT: f32 = 1.15;

const LINE_TRIM: &[char] = &[' ', '\n', '\r', '\t'];
const SEPARATORS: &[char] = &[' ', '\n', '\r', '\t', '/', ':'];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("field {index} ({name}) missing from {line:?}")]
    MissingField {
        index: usize,
        name: &'static str,
        line: String,
    },

    #[error("field {index} ({name}) has invalid value {value:?} in {line:?}")]
    InvalidField {
        index: usize,
        name: &'static str,
        value: String,
        line: String,
    },

    #[error("field {index} has unknown compass point {value:?} in {line:?}")]
    UnknownCompassPoint {
        index: usize,
        value: String,
        line: String,
    },

    #[error("record time out of range in {line:?}")]
    InvalidTime { line: String },
}

impl ParseError {
    /// The raw line that failed to parse
    pub fn line(&self) -> &str {
        match self {
            ParseError::MissingField { line, .. }
            | ParseError::InvalidField { line, .. }
            | ParseError::UnknownCompassPoint { line, .. }
            | ParseError::InvalidTime { line } => line,
        }
    }

    /// Index of the offending token, when one token is to blame
    pub fn field(&self) -> Option<usize> {
        match self {
            ParseError::MissingField { index, .. }
            | ParseError::InvalidField { index, .. }
            | ParseError::UnknownCompassPoint { index, .. } => Some(*index),
            ParseError::InvalidTime { .. } => None,
        }
    }
}

impl StreamFormat {
    /// Decode one raw device line.
    ///
    /// Returns `Ok(None)` for [`StreamFormat::Unknown`], which carries no
    /// extractable fields. `hour_offset` is added to the station time and
    /// may be fractional.
    pub fn parse_line(
        self,
        line: &str,
        hour_offset: f64,
    ) -> Result<Option<WeatherRecord>, ParseError> {
        match self {
            StreamFormat::OldWeatherDevice => parse_old_weather_device(line, hour_offset).map(Some),
            StreamFormat::WeatherReportLogger => {
                parse_weather_report_logger(line, hour_offset).map(Some)
            }
            StreamFormat::Unknown => Ok(None),
        }
    }
}

/// Old weather device: `yy/mm/dd hh:mm:ss DDD SSSKTS  LLLK IIIF OOOF HH% PP.PP"  RR.RR"`
pub fn parse_old_weather_device(line: &str, hour_offset: f64) -> Result<WeatherRecord, ParseError> {
    let fields = Fields::positional(line);

    Ok(WeatherRecord {
        record_time: fields.record_time(hour_offset)?,
        wind_direction: fields.number(6, "wind direction", fields.get(6, "wind direction")?)?,
        wind_speed: fields.number(7, "wind speed", trim_unit_letters(fields.get(7, "wind speed")?))?,
        solar: fields.number(9, "solar", trim_unit_letters(fields.get(9, "solar")?))?,
        inside_temp: fields.number(
            10,
            "inside temperature",
            fields.get(10, "inside temperature")?.trim_end_matches('F'),
        )?,
        outside_temp: fields.number(
            11,
            "outside temperature",
            fields.get(11, "outside temperature")?.trim_end_matches('F'),
        )?,
        humidity: fields.number(12, "humidity", fields.get(12, "humidity")?.trim_end_matches('%'))?,
        pressure: fields.number(13, "pressure", fields.get(13, "pressure")?.trim_end_matches('"'))?,
        rainfall: fields.number(15, "rainfall", fields.get(15, "rainfall")?.trim_end_matches('"'))?,
    })
}

/// Weather report logger: `yy/mm/dd hh:mm:ss CMP SSMPH XXXF IIIF OOOF HH% PP.PPR RR.RR"D ...`
pub fn parse_weather_report_logger(
    line: &str,
    hour_offset: f64,
) -> Result<WeatherRecord, ParseError> {
    let fields = Fields::compact(line);

    let compass = fields.get(6, "wind direction")?;
    let wind_direction = compass
        .parse::<CompassPoint>()
        .map_err(|_| ParseError::UnknownCompassPoint {
            index: 6,
            value: compass.to_string(),
            line: line.to_string(),
        })?
        .degrees();

    let speed = fields.get(7, "wind speed")?;
    let wind_speed = if speed.contains("MPH") {
        fields.number::<f32>(7, "wind speed", speed.trim_end_matches(&['M', 'P', 'H'][..]))?
            / MPH_PER_KNOT
    } else if speed.contains("KTS") {
        fields.number(7, "wind speed", speed.trim_end_matches(&['K', 'T', 'S'][..]))?
    } else {
        0.0
    };

    // The pressure unit is a single trailing character
    let pressure = fields.get(12, "pressure")?;
    let mut pressure_chars = pressure.chars();
    pressure_chars.next_back();

    Ok(WeatherRecord {
        record_time: fields.record_time(hour_offset)?,
        wind_direction,
        wind_speed,
        solar: 0,
        inside_temp: fields.number(
            9,
            "inside temperature",
            fields.get(9, "inside temperature")?.trim_end_matches('F'),
        )?,
        outside_temp: fields.number(
            10,
            "outside temperature",
            fields.get(10, "outside temperature")?.trim_end_matches('F'),
        )?,
        humidity: fields.number(11, "humidity", fields.get(11, "humidity")?.trim_end_matches('%'))?,
        pressure: fields.number(12, "pressure", pressure_chars.as_str())?,
        rainfall: fields.number(
            13,
            "rainfall",
            fields.get(13, "rainfall")?.trim_end_matches(&['"', 'D', 'M', 'T'][..]),
        )?,
    })
}

fn trim_unit_letters(token: &str) -> &str {
    token.trim_end_matches(|c: char| c.is_ascii_alphabetic())
}

struct Fields<'a> {
    line: &'a str,
    tokens: Vec<&'a str>,
}

impl<'a> Fields<'a> {
    fn positional(line: &'a str) -> Self {
        Self {
            line,
            tokens: line.trim_matches(LINE_TRIM).split(SEPARATORS).collect(),
        }
    }

    fn compact(line: &'a str) -> Self {
        Self {
            line,
            tokens: line
                .trim_matches(LINE_TRIM)
                .split(SEPARATORS)
                .filter(|token| !token.is_empty())
                .collect(),
        }
    }

    fn get(&self, index: usize, name: &'static str) -> Result<&'a str, ParseError> {
        self.tokens
            .get(index)
            .copied()
            .ok_or_else(|| ParseError::MissingField {
                index,
                name,
                line: self.line.to_string(),
            })
    }

    /// Parse `value`, which was cut from token `index`
    fn number<T: FromStr>(&self, index: usize, name: &'static str, value: &str) -> Result<T, ParseError> {
        value.parse().map_err(|_| ParseError::InvalidField {
            index,
            name,
            value: value.to_string(),
            line: self.line.to_string(),
        })
    }

    fn time_part<T: FromStr>(&self, index: usize, name: &'static str) -> Result<T, ParseError> {
        self.number(index, name, self.get(index, name)?)
    }

    /// Tokens 0..=5 hold a two-digit year, month, day, hour, minute and second
    fn record_time(&self, hour_offset: f64) -> Result<Timestamp, ParseError> {
        let year: u16 = self.time_part(0, "year")?;
        let month: u32 = self.time_part(1, "month")?;
        let day: u32 = self.time_part(2, "day")?;
        let hour: u32 = self.time_part(3, "hour")?;
        let minute: u32 = self.time_part(4, "minute")?;
        let second: u32 = self.time_part(5, "second")?;

        let invalid = || ParseError::InvalidTime {
            line: self.line.to_string(),
        };

        let station_time = NaiveDate::from_ymd_opt(year as i32 + 2000, month, day)
            .and_then(|date| date.and_hms_opt(hour, minute, second))
            .ok_or_else(invalid)?;
        let shifted = apply_hour_offset(station_time, hour_offset).ok_or_else(invalid)?;

        Ok(Timestamp::from_datetime(&shifted))
    }
}

fn apply_hour_offset(time: NaiveDateTime, hour_offset: f64) -> Option<NaiveDateTime> {
    let millis = (hour_offset * 3_600_000.0).round();
    if !millis.is_finite() || millis.abs() > i64::MAX as f64 {
        return None;
    }
    time.checked_add_signed(TimeDelta::try_milliseconds(millis as i64)?)
}
