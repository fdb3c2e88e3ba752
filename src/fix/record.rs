//! # Wire Record Encoder
//!
//! Formats position samples into the newline-terminated ASCII records sent to
//! the collector:
//!
//! ```text
//! *IVR,<imei>,<YYMMDDHHMMSS>,<lat>,<lon>,<A|V>,<pace>,<alt>,<fix label>,<battery %>#
//! ```

use std::fmt::Write as _;

use super::protocol::PositionSample;

/// Record prefix
pub const RECORD_PREFIX: &str = "*IVR";

/// Record terminator (before the newline)
pub const RECORD_TERMINATOR: char = '#';

/// Typical record length, used to size the string up front
const RECORD_CAPACITY: usize = 96;

/// Encodes a sample as a wire record, including the trailing newline.
///
/// # Examples
///
/// ```
/// use telemetry_tracker::fix::protocol::{FixDate, FixQuality, FixTime, PositionSample};
/// use telemetry_tracker::fix::record::encode_record;
///
/// let sample = PositionSample {
///     latitude: 51.50206,
///     longitude: -0.12345,
///     altitude: 35.5,
///     quality: FixQuality::ThreeD,
///     speed: 0.0,
///     pace: 0.0,
///     date: FixDate { year: 24, month: 5, day: 17 },
///     time: FixTime { hours: 9, minutes: 3, seconds: 7 },
/// };
/// let record = encode_record("123456789012345", &sample, 80);
/// assert_eq!(
///     record,
///     "*IVR,123456789012345,240517090307,51.50206,-0.12345,A,0.00,35.50,3D fix,80#\n"
/// );
/// ```
pub fn encode_record(imei: &str, sample: &PositionSample, battery_percent: u8) -> String {
    let mut record = String::with_capacity(RECORD_CAPACITY);
    let _ = writeln!(
        record,
        "{},{},{},{:.5},{:.5},{},{:.2},{:5.2},{},{}{}",
        RECORD_PREFIX,
        imei,
        encode_timestamp(sample),
        sample.latitude,
        sample.longitude,
        sample.quality.flag(),
        sample.pace,
        sample.altitude,
        sample.quality.label(),
        battery_percent,
        RECORD_TERMINATOR,
    );
    record
}

/// Encodes the receiver date and time as `YYMMDDHHMMSS`.
pub fn encode_timestamp(sample: &PositionSample) -> String {
    format!(
        "{:02}{:02}{:02}{:02}{:02}{:02}",
        sample.date.year,
        sample.date.month,
        sample.date.day,
        sample.time.hours,
        sample.time.minutes,
        sample.time.seconds
    )
}

/// Encodes the start-of-track announcement sent once per session.
pub fn encode_announce(imei: &str) -> String {
    format!("{}:{}{}\n", RECORD_PREFIX, imei, RECORD_TERMINATOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fix::protocol::{FixDate, FixQuality, FixTime};

    fn sample(quality: FixQuality) -> PositionSample {
        PositionSample {
            latitude: 51.502057,
            longitude: -2.5,
            altitude: 7.25,
            quality,
            speed: 6.0,
            pace: 10.0,
            date: FixDate { year: 1, month: 2, day: 3 },
            time: FixTime { hours: 4, minutes: 5, seconds: 6 },
        }
    }

    #[test]
    fn test_record_layout() {
        let record = encode_record("42", &sample(FixQuality::Dgps), 99);
        assert_eq!(record, "*IVR,42,010203040506,51.50206,-2.50000,A,10.00, 7.25,3D/DGPS fix,99#\n");
    }

    #[test]
    fn test_record_without_fix() {
        let record = encode_record("42", &sample(FixQuality::None), 5);
        assert!(record.contains(",V,"));
        assert!(record.contains(",no fix,5#"));
    }

    #[test]
    fn test_record_is_single_line() {
        let record = encode_record("42", &sample(FixQuality::TwoD), 50);
        assert!(record.ends_with("#\n"));
        assert_eq!(record.matches('\n').count(), 1);
    }

    #[test]
    fn test_announce() {
        assert_eq!(encode_announce("123"), "*IVR:123#\n");
    }
}
