//! # Fix Types and Constants
//!
//! Core definitions for raw receiver fixes, normalized position samples and the
//! last-known-position snapshot.

use serde::{Deserialize, Serialize};

/// GSA fix type reported when there is no fix
pub const GSA_FIX_NONE: u8 = 1;

/// GSA fix type for a 2D fix
pub const GSA_FIX_2D: u8 = 2;

/// GSA fix type for a 3D fix
pub const GSA_FIX_3D: u8 = 3;

/// GGA fix quality for a differentially corrected fix
pub const GGA_QUALITY_DGPS: u8 = 2;

/// Kilometres per mile, speed is reported in km/h and tracked in mph
pub const KPH_PER_MPH: f64 = 1.609;

/// Minutes per hour, pace is minutes per mile
pub const MINUTES_PER_HOUR: f64 = 60.0;

/// Fixed-point value as delivered by the receiver parser (`value / scale`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScaledValue {
    pub value: i64,
    pub scale: i64,
}

impl ScaledValue {
    pub const fn new(value: i64, scale: i64) -> Self {
        Self { value, scale }
    }

    /// Plain decimal value.
    pub fn to_f64(self) -> f64 {
        if self.scale == 0 {
            return 0.0;
        }
        self.value as f64 / self.scale as f64
    }

    /// Converts a `dddmm.mmmm` coordinate into decimal degrees.
    ///
    /// `whole = trunc(value / scale / 100)`,
    /// `decimal = whole + (value - whole * scale * 100) / scale / 60`.
    /// Truncation toward zero keeps southern and western coordinates symmetric.
    ///
    /// # Examples
    ///
    /// ```
    /// use telemetry_tracker::fix::protocol::ScaledValue;
    ///
    /// let lat = ScaledValue::new(51_301_234, 10_000); // 5130.1234
    /// assert!((lat.degrees_minutes_to_decimal() - 51.50206).abs() < 1e-4);
    /// ```
    pub fn degrees_minutes_to_decimal(self) -> f64 {
        if self.scale == 0 {
            return 0.0;
        }
        let whole = self.value / self.scale / 100;
        let minutes = (self.value - whole * self.scale * 100) as f64 / self.scale as f64;
        whole as f64 + minutes / 60.0
    }
}

/// UTC date as reported by the receiver (two-digit year).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FixDate {
    pub year: u8,
    pub month: u8,
    pub day: u8,
}

/// UTC time of day as reported by the receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FixTime {
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
}

/// Raw fix record delivered by the receiver at its output cadence.
///
/// Only the parsed fields the tracker consumes; sentence parsing belongs to the
/// receiver collaborator.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawFix {
    /// GSA fix type per satellite subsystem (1 = none, 2 = 2D, 3 = 3D)
    #[serde(default)]
    pub gsa_fix_types: Vec<u8>,

    /// GGA fix quality (1 = GPS, 2 = DGPS)
    #[serde(default)]
    pub fix_quality: u8,

    /// Satellites used in the solution (GGA)
    #[serde(default)]
    pub satellites_tracked: u32,

    /// Satellites in view (GSV)
    #[serde(default)]
    pub satellites_in_view: u32,

    #[serde(default)]
    pub latitude: ScaledValue,

    #[serde(default)]
    pub longitude: ScaledValue,

    /// Altitude in metres
    #[serde(default)]
    pub altitude: ScaledValue,

    /// Ground speed in km/h
    #[serde(default)]
    pub speed_kph: ScaledValue,

    #[serde(default)]
    pub date: FixDate,

    #[serde(default)]
    pub time: FixTime,
}

/// Fix quality class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixQuality {
    None,
    TwoD,
    ThreeD,
    Dgps,
}

impl FixQuality {
    /// Classifies a raw record.
    ///
    /// The best GSA fix type across all subsystems decides whether the fix is usable;
    /// a 3D fix is promoted to DGPS when GGA reports a corrected solution.
    pub fn classify(raw: &RawFix) -> Self {
        let best = raw.gsa_fix_types.iter().copied().max().unwrap_or(0);
        match best {
            GSA_FIX_2D => FixQuality::TwoD,
            b if b >= GSA_FIX_3D => {
                if raw.fix_quality == GGA_QUALITY_DGPS {
                    FixQuality::Dgps
                } else {
                    FixQuality::ThreeD
                }
            }
            _ => FixQuality::None,
        }
    }

    /// True for any 2D or better fix.
    pub fn is_usable(self) -> bool {
        !matches!(self, FixQuality::None)
    }

    /// Label used in the wire record.
    pub fn label(self) -> &'static str {
        match self {
            FixQuality::None => "no fix",
            FixQuality::TwoD => "2D fix",
            FixQuality::ThreeD => "3D fix",
            FixQuality::Dgps => "3D/DGPS fix",
        }
    }

    /// Validity flag used in the wire record (`A` active, `V` void).
    pub fn flag(self) -> char {
        if self.is_usable() {
            'A'
        } else {
            'V'
        }
    }
}

/// Normalized position sample, emitted once per debounce interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionSample {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub quality: FixQuality,
    /// Ground speed in mph
    pub speed: f64,
    /// Minutes per mile, 0 when stationary
    pub pace: f64,
    pub date: FixDate,
    pub time: FixTime,
}

impl PositionSample {
    /// Normalizes a raw record.
    pub fn from_raw(raw: &RawFix) -> Self {
        let speed = raw.speed_kph.to_f64() / KPH_PER_MPH;
        let pace = if speed > 0.0 { MINUTES_PER_HOUR / speed } else { 0.0 };

        Self {
            latitude: raw.latitude.degrees_minutes_to_decimal(),
            longitude: raw.longitude.degrees_minutes_to_decimal(),
            altitude: raw.altitude.to_f64(),
            quality: FixQuality::classify(raw),
            speed,
            pace,
            date: raw.date,
            time: raw.time,
        }
    }
}

/// UTC timestamp of the last good fix (four-digit year).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FixTimestamp {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

/// Last known good position, persisted after every cache append.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PersistedState {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub time: FixTimestamp,
}

impl PersistedState {
    /// Snapshot of a usable sample.
    pub fn from_sample(sample: &PositionSample) -> Self {
        Self {
            latitude: sample.latitude,
            longitude: sample.longitude,
            altitude: sample.altitude,
            time: FixTimestamp {
                year: 2000 + u16::from(sample.date.year),
                month: sample.date.month,
                day: sample.date.day,
                hour: sample.time.hours,
                minute: sample.time.minutes,
                second: sample.time.seconds,
            },
        }
    }

    /// True if a position is known and can seed a hot start.
    pub fn has_position(&self) -> bool {
        self.latitude != 0.0 && self.longitude != 0.0
    }

    /// Forgets the position (cold reacquisition).
    pub fn clear_position(&mut self) {
        self.latitude = 0.0;
        self.longitude = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_with(types: &[u8], quality: u8) -> RawFix {
        RawFix {
            gsa_fix_types: types.to_vec(),
            fix_quality: quality,
            ..RawFix::default()
        }
    }

    #[test]
    fn test_degrees_minutes_conversion() {
        let lat = ScaledValue::new(51_301_234, 10_000);
        assert!((lat.degrees_minutes_to_decimal() - 51.50206).abs() < 1e-4);
    }

    #[test]
    fn test_degrees_minutes_negative() {
        let lon = ScaledValue::new(-12_345_000, 10_000); // -1234.5 -> -12 deg 34.5 min
        let decimal = lon.degrees_minutes_to_decimal();
        assert!((decimal - (-12.575)).abs() < 1e-9, "got {}", decimal);
    }

    #[test]
    fn test_zero_scale_is_zero() {
        assert_eq!(ScaledValue::new(1234, 0).to_f64(), 0.0);
        assert_eq!(ScaledValue::new(1234, 0).degrees_minutes_to_decimal(), 0.0);
    }

    #[test]
    fn test_classify_uses_best_subsystem() {
        assert_eq!(FixQuality::classify(&raw_with(&[1, 1], 0)), FixQuality::None);
        assert_eq!(FixQuality::classify(&raw_with(&[1, 2], 1)), FixQuality::TwoD);
        assert_eq!(FixQuality::classify(&raw_with(&[3, 1], 1)), FixQuality::ThreeD);
        assert_eq!(FixQuality::classify(&raw_with(&[2, 3], 2)), FixQuality::Dgps);
        assert_eq!(FixQuality::classify(&raw_with(&[], 2)), FixQuality::None);
    }

    #[test]
    fn test_quality_labels_and_flags() {
        assert_eq!(FixQuality::None.label(), "no fix");
        assert_eq!(FixQuality::Dgps.label(), "3D/DGPS fix");
        assert_eq!(FixQuality::None.flag(), 'V');
        assert_eq!(FixQuality::TwoD.flag(), 'A');
    }

    #[test]
    fn test_pace_from_speed() {
        let mut raw = raw_with(&[3], 1);
        raw.speed_kph = ScaledValue::new(16090, 1000); // 16.09 km/h = 10 mph
        let sample = PositionSample::from_raw(&raw);
        assert!((sample.speed - 10.0).abs() < 1e-9);
        assert!((sample.pace - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_stationary_pace_is_zero() {
        let sample = PositionSample::from_raw(&raw_with(&[3], 1));
        assert_eq!(sample.pace, 0.0);
    }

    #[test]
    fn test_persisted_state_position() {
        let mut state = PersistedState {
            latitude: 51.5,
            longitude: -0.12,
            ..PersistedState::default()
        };
        assert!(state.has_position());
        state.clear_position();
        assert!(!state.has_position());
    }

    #[test]
    fn test_raw_fix_from_json() {
        let json = r#"{"gsa_fix_types":[3,1],"fix_quality":1,"satellites_tracked":7,
            "latitude":{"value":51301234,"scale":10000},
            "date":{"year":24,"month":5,"day":17}}"#;
        let raw: RawFix = serde_json::from_str(json).unwrap();
        assert_eq!(raw.satellites_tracked, 7);
        assert_eq!(raw.date.year, 24);
        assert_eq!(raw.speed_kph, ScaledValue::default());
    }
}
