//! # Receiver Control
//!
//! Control calls the tracker issues to the positioning receiver, and the
//! initialisation sequence run before fixes are accepted.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{info, warn};

use super::protocol::PersistedState;
use crate::error::Result;
use crate::status::DeviceStatus;

/// Attempts for receiver calls that are known to be flaky right after power-up
pub const RECEIVER_RETRIES: u32 = 5;

/// Receiver dynamic model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixMode {
    Normal,
    /// Balloon
    Elevation,
    /// Aviation
    HighSpeed,
    /// Fitness
    LowSpeed,
}

/// Receiver power profile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LowPowerMode {
    Normal,
    LowPower,
    SuperLowPower,
}

/// Satellite systems to search
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchMode {
    pub gps: bool,
    pub glonass: bool,
    pub galileo: bool,
    pub beidou: bool,
}

impl Default for SearchMode {
    fn default() -> Self {
        Self {
            gps: true,
            glonass: true,
            galileo: false,
            beidou: true,
        }
    }
}

/// Receiver reset depth
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebootMode {
    /// Discard almanac, ephemeris and position
    Cold,
    /// Keep almanac and position
    Warm,
}

/// Last known position and current time used to seed a fast fix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FastFixHint {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub time: DateTime<Utc>,
}

/// Control calls accepted by the positioning receiver.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReceiverControl: Send + Sync {
    async fn set_fix_mode(&self, mode: FixMode) -> Result<()>;

    async fn set_low_power_mode(&self, mode: LowPowerMode) -> Result<()>;

    async fn set_search_mode(&self, mode: SearchMode) -> Result<()>;

    async fn set_fast_fix_hint(&self, hint: FastFixHint) -> Result<()>;

    async fn set_output_interval(&self, interval: Duration) -> Result<()>;

    async fn reboot(&self, mode: RebootMode) -> Result<()>;
}

/// Configures the receiver and marks it ready.
///
/// Uses the last known position (if any) for a hot start. Individual failures are
/// logged and do not abort the sequence; a receiver that ignores a setting still
/// produces fixes.
///
/// # Arguments
///
/// * `receiver` - Receiver control
/// * `status` - Device status (`receiver_ready`, status message)
/// * `state` - Last known position
/// * `cadence` - Receiver output interval
/// * `retry_pause` - Pause between retries of flaky calls
pub async fn initialise(
    receiver: &dyn ReceiverControl,
    status: &DeviceStatus,
    state: &PersistedState,
    cadence: Duration,
    retry_pause: Duration,
) {
    info!("Initialising receiver");
    status.set_receiver_ready(false);

    if let Err(e) = receiver.set_fix_mode(FixMode::LowSpeed).await {
        warn!("Set fix mode failed: {}", e);
    }

    if let Err(e) = receiver.set_low_power_mode(LowPowerMode::SuperLowPower).await {
        warn!("Set low power mode failed: {}", e);
    }

    let tries = retry(retry_pause, || receiver.set_search_mode(SearchMode::default())).await;
    info!("Set search mode {}", outcome(tries));

    if state.has_position() {
        status.set_message("GPS hot start");
        let hint = FastFixHint {
            latitude: state.latitude,
            longitude: state.longitude,
            altitude: state.altitude,
            time: Utc::now(),
        };
        let tries = retry(retry_pause, || receiver.set_fast_fix_hint(hint)).await;
        info!("Set fast fix {}", outcome(tries));
    } else {
        status.set_message("GPS cold start");
    }

    let tries = retry(retry_pause, || receiver.set_output_interval(cadence)).await;
    info!("Set output interval {}", outcome(tries));

    info!("Receiver init ok");
    status.set_receiver_ready(true);
}

/// Runs `call` up to [`RECEIVER_RETRIES`] times.
///
/// Returns the number of attempts used, or `None` if all failed.
async fn retry<F, Fut>(pause: Duration, mut call: F) -> Option<u32>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    for attempt in 1..=RECEIVER_RETRIES {
        match call().await {
            Ok(()) => return Some(attempt),
            Err(e) => {
                warn!("Receiver call failed (attempt {}): {}", attempt, e);
                if attempt < RECEIVER_RETRIES {
                    tokio::time::sleep(pause).await;
                }
            }
        }
    }
    None
}

fn outcome(tries: Option<u32>) -> String {
    match tries {
        Some(n) => format!("ok ({} tries)", n),
        None => format!("fail ({} tries)", RECEIVER_RETRIES),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TrackerError;
    use mockall::Sequence;

    fn accepting_receiver() -> MockReceiverControl {
        let mut receiver = MockReceiverControl::new();
        receiver.expect_set_fix_mode().returning(|_| Ok(()));
        receiver.expect_set_low_power_mode().returning(|_| Ok(()));
        receiver.expect_set_search_mode().returning(|_| Ok(()));
        receiver.expect_set_output_interval().returning(|_| Ok(()));
        receiver
    }

    #[tokio::test]
    async fn test_cold_start_without_position() {
        let mut receiver = accepting_receiver();
        receiver.expect_set_fast_fix_hint().times(0);
        let status = DeviceStatus::new();

        initialise(&receiver, &status, &PersistedState::default(), Duration::from_secs(10), Duration::ZERO).await;

        assert!(status.receiver_ready());
        assert_eq!(status.message(), "GPS cold start");
    }

    #[tokio::test]
    async fn test_hot_start_with_position() {
        let mut receiver = accepting_receiver();
        receiver
            .expect_set_fast_fix_hint()
            .withf(|hint| (hint.latitude - 51.5).abs() < 1e-9 && (hint.longitude + 0.1).abs() < 1e-9)
            .times(1)
            .returning(|_| Ok(()));
        let status = DeviceStatus::new();
        let state = PersistedState {
            latitude: 51.5,
            longitude: -0.1,
            ..PersistedState::default()
        };

        initialise(&receiver, &status, &state, Duration::from_secs(10), Duration::ZERO).await;

        assert_eq!(status.message(), "GPS hot start");
    }

    #[tokio::test]
    async fn test_search_mode_retried_until_success() {
        let mut receiver = MockReceiverControl::new();
        receiver.expect_set_fix_mode().returning(|_| Ok(()));
        receiver.expect_set_low_power_mode().returning(|_| Ok(()));
        receiver.expect_set_output_interval().returning(|_| Ok(()));

        let mut seq = Sequence::new();
        receiver
            .expect_set_search_mode()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_| Err(TrackerError::Receiver("busy".to_string())));
        receiver
            .expect_set_search_mode()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let status = DeviceStatus::new();
        initialise(&receiver, &status, &PersistedState::default(), Duration::from_secs(10), Duration::ZERO).await;
        assert!(status.receiver_ready());
    }

    #[tokio::test]
    async fn test_output_interval_gives_up_after_retries() {
        let mut receiver = MockReceiverControl::new();
        receiver.expect_set_fix_mode().returning(|_| Ok(()));
        receiver.expect_set_low_power_mode().returning(|_| Ok(()));
        receiver.expect_set_search_mode().returning(|_| Ok(()));
        receiver
            .expect_set_output_interval()
            .with(mockall::predicate::eq(Duration::from_secs(10)))
            .times(RECEIVER_RETRIES as usize)
            .returning(|_| Err(TrackerError::Receiver("nak".to_string())));

        let status = DeviceStatus::new();
        initialise(&receiver, &status, &PersistedState::default(), Duration::from_secs(10), Duration::ZERO).await;
        assert!(status.receiver_ready());
    }
}
