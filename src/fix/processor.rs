//! # Fix Processor
//!
//! Turns raw receiver records into position samples and wire records.
//!
//! ## Debounce
//!
//! The receiver pushes a record every `cadence` seconds. An accumulator grows by
//! the cadence on every record; a sample is emitted only once it reaches the
//! configured sample interval, then it restarts from zero.
//!
//! ## Side Effects
//!
//! - Fix state and satellite count are published to [`DeviceStatus`] on every
//!   record, independently of the debounce gate (display refresh on change).
//! - A usable fix refreshes the last-known-position snapshot on every record so
//!   the warm start hint is as fresh as possible.

use tracing::debug;

use super::protocol::{FixQuality, PersistedState, PositionSample, RawFix};
use super::record::encode_record;
use crate::status::DeviceStatus;

/// What a raw record produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FixOutcome {
    /// Updated last-known position (usable fixes only)
    pub snapshot: Option<PersistedState>,
    /// Sample emitted by the debounce gate
    pub sample: Option<PositionSample>,
    /// Wire record for the emitted sample
    pub record: Option<String>,
    /// Fix state or satellite count changed
    pub refreshed: bool,
}

/// Debounces and normalizes receiver fixes.
#[derive(Debug, Clone)]
pub struct FixProcessor {
    imei: String,
    cadence_s: u32,
    accumulator_s: u32,
}

impl FixProcessor {
    /// Creates a processor for a receiver pushing records every `cadence_s` seconds.
    pub fn new(imei: impl Into<String>, cadence_s: u32) -> Self {
        Self {
            imei: imei.into(),
            cadence_s,
            accumulator_s: 0,
        }
    }

    /// Seconds accumulated since the last emitted sample.
    pub fn accumulated(&self) -> u32 {
        self.accumulator_s
    }

    /// Processes one raw record.
    ///
    /// # Arguments
    ///
    /// * `raw` - Parsed receiver fields
    /// * `sample_interval_s` - Configured interval between emitted samples
    /// * `battery_percent` - Battery level to embed in the record
    /// * `status` - Shared device status (fix flags and counters)
    pub fn process(
        &mut self,
        raw: &RawFix,
        sample_interval_s: u32,
        battery_percent: u8,
        status: &DeviceStatus,
    ) -> FixOutcome {
        let quality = FixQuality::classify(raw);
        let usable = quality.is_usable();

        if usable {
            status.record_fix();
        } else {
            status.record_no_fix();
        }

        let satellites = if usable {
            raw.satellites_tracked
        } else {
            raw.satellites_in_view
        };
        let refreshed = status.set_fix(usable, satellites);

        let sample = PositionSample::from_raw(raw);
        let snapshot = usable.then(|| PersistedState::from_sample(&sample));

        self.accumulator_s = self.accumulator_s.saturating_add(self.cadence_s);
        if self.accumulator_s < sample_interval_s {
            return FixOutcome {
                snapshot,
                sample: None,
                record: None,
                refreshed,
            };
        }
        self.accumulator_s = 0;

        let record = encode_record(&self.imei, &sample, battery_percent);
        debug!(
            "Sample {} lat {:.5} lon {:.5} alt {:.2} sats {}",
            quality.label(), sample.latitude, sample.longitude, sample.altitude, satellites
        );

        FixOutcome {
            snapshot,
            sample: Some(sample),
            record: Some(record),
            refreshed,
        }
    }
}
