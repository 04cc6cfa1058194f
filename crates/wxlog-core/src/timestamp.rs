//! Explicit-field timestamps as carried on the wire

use bytes::{Buf, BufMut};
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

/// Encoded size of a [`Timestamp`] in bytes (eight `u16` fields)
pub const TIMESTAMP_SIZE: usize = 16;

/// A point in time broken into the fields downstream readers expect.
///
/// The weekday is always derived from the date (Sunday = 0) and cannot be
/// set independently. The all-zero value is used for records that were never
/// parsed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    year: u16,
    month: u16,
    weekday: u16,
    day: u16,
    hour: u16,
    minute: u16,
    second: u16,
    millisecond: u16,
}

impl Timestamp {
    /// Build a timestamp from calendar fields, returning `None` if the date
    /// or time does not exist.
    pub fn new(
        year: u16,
        month: u16,
        day: u16,
        hour: u16,
        minute: u16,
        second: u16,
        millisecond: u16,
    ) -> Option<Self> {
        let date = NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)?;
        let datetime = date.and_hms_milli_opt(
            hour as u32,
            minute as u32,
            second as u32,
            millisecond as u32,
        )?;
        Some(Self::from_datetime(&datetime))
    }

    pub fn from_datetime(datetime: &NaiveDateTime) -> Self {
        // Leap seconds show up as nanosecond values past one second
        let millisecond = (datetime.nanosecond() / 1_000_000).min(999);
        Self {
            year: datetime.year().clamp(0, u16::MAX as i32) as u16,
            month: datetime.month() as u16,
            weekday: datetime.weekday().num_days_from_sunday() as u16,
            day: datetime.day() as u16,
            hour: datetime.hour() as u16,
            minute: datetime.minute() as u16,
            second: datetime.second() as u16,
            millisecond: millisecond as u16,
        }
    }

    /// Current UTC wall-clock time
    pub fn now_utc() -> Self {
        Self::from_datetime(&chrono::Utc::now().naive_utc())
    }

    /// Convert back into a `NaiveDateTime`, if the fields describe a real instant
    pub fn to_datetime(&self) -> Option<NaiveDateTime> {
        NaiveDate::from_ymd_opt(self.year as i32, self.month as u32, self.day as u32)?
            .and_hms_milli_opt(
                self.hour as u32,
                self.minute as u32,
                self.second as u32,
                self.millisecond as u32,
            )
    }

    pub fn year(&self) -> u16 {
        self.year
    }

    pub fn month(&self) -> u16 {
        self.month
    }

    /// Day of week, Sunday = 0
    pub fn weekday(&self) -> u16 {
        self.weekday
    }

    pub fn day(&self) -> u16 {
        self.day
    }

    pub fn hour(&self) -> u16 {
        self.hour
    }

    pub fn minute(&self) -> u16 {
        self.minute
    }

    pub fn second(&self) -> u16 {
        self.second
    }

    pub fn millisecond(&self) -> u16 {
        self.millisecond
    }

    pub(crate) fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u16_le(self.year);
        buf.put_u16_le(self.month);
        buf.put_u16_le(self.weekday);
        buf.put_u16_le(self.day);
        buf.put_u16_le(self.hour);
        buf.put_u16_le(self.minute);
        buf.put_u16_le(self.second);
        buf.put_u16_le(self.millisecond);
    }

    /// Read the fields exactly as written, weekday included. Callers must
    /// have checked that `TIMESTAMP_SIZE` bytes remain.
    pub(crate) fn decode<B: Buf>(buf: &mut B) -> Self {
        Self {
            year: buf.get_u16_le(),
            month: buf.get_u16_le(),
            weekday: buf.get_u16_le(),
            day: buf.get_u16_le(),
            hour: buf.get_u16_le(),
            minute: buf.get_u16_le(),
            second: buf.get_u16_le(),
            millisecond: buf.get_u16_le(),
        }
    }
}
