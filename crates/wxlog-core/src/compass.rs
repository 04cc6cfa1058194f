//! Sixteen-point compass rose used by the report logger format

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A named compass point. Discriminants are the bearing in whole degrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
#[allow(clippy::upper_case_acronyms)]
pub enum CompassPoint {
    N = 0,
    NNE = 23,
    NE = 45,
    ENE = 68,
    E = 90,
    ESE = 113,
    SE = 135,
    SSE = 158,
    S = 180,
    SSW = 203,
    SW = 225,
    WSW = 248,
    W = 270,
    WNW = 293,
    NW = 315,
    NNW = 338,
}

impl CompassPoint {
    pub const ALL: [CompassPoint; 16] = [
        CompassPoint::N,
        CompassPoint::NNE,
        CompassPoint::NE,
        CompassPoint::ENE,
        CompassPoint::E,
        CompassPoint::ESE,
        CompassPoint::SE,
        CompassPoint::SSE,
        CompassPoint::S,
        CompassPoint::SSW,
        CompassPoint::SW,
        CompassPoint::WSW,
        CompassPoint::W,
        CompassPoint::WNW,
        CompassPoint::NW,
        CompassPoint::NNW,
    ];

    pub fn degrees(self) -> u16 {
        self as u16
    }

    pub fn code(self) -> &'static str {
        match self {
            CompassPoint::N => "N",
            CompassPoint::NNE => "NNE",
            CompassPoint::NE => "NE",
            CompassPoint::ENE => "ENE",
            CompassPoint::E => "E",
            CompassPoint::ESE => "ESE",
            CompassPoint::SE => "SE",
            CompassPoint::SSE => "SSE",
            CompassPoint::S => "S",
            CompassPoint::SSW => "SSW",
            CompassPoint::SW => "SW",
            CompassPoint::WSW => "WSW",
            CompassPoint::W => "W",
            CompassPoint::WNW => "WNW",
            CompassPoint::NW => "NW",
            CompassPoint::NNW => "NNW",
        }
    }
}

impl fmt::Display for CompassPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown compass point: {0}")]
pub struct UnknownCompassPoint(pub String);

impl FromStr for CompassPoint {
    type Err = UnknownCompassPoint;

    /// Codes are matched case-insensitively
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CompassPoint::ALL
            .iter()
            .copied()
            .find(|point| point.code().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownCompassPoint(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compass_degrees() {
        assert_eq!(CompassPoint::N.degrees(), 0);
        assert_eq!(CompassPoint::NNE.degrees(), 23);
        assert_eq!(CompassPoint::ESE.degrees(), 113);
        assert_eq!(CompassPoint::W.degrees(), 270);
        assert_eq!(CompassPoint::NNW.degrees(), 338);
    }

    #[test]
    fn test_compass_parse() {
        assert_eq!("W".parse::<CompassPoint>(), Ok(CompassPoint::W));
        assert_eq!("wsw".parse::<CompassPoint>(), Ok(CompassPoint::WSW));
        assert!("X".parse::<CompassPoint>().is_err());
        assert!("".parse::<CompassPoint>().is_err());
    }

    #[test]
    fn test_every_code_round_trips() {
        for point in CompassPoint::ALL {
            assert_eq!(point.code().parse::<CompassPoint>(), Ok(point));
            assert!(point.degrees() < 360);
        }
    }
}
