//! # Cache Store
//!
//! Bounded in-memory record buffer with spill-over to a persistent cache file,
//! the rotating permanent log of sent records, and the last-known-position
//! snapshot.
//!
//! ## Files
//!
//! | Name              | Contents                                         |
//! |-------------------|--------------------------------------------------|
//! | `cache`           | Buffered records not yet delivered (append-only) |
//! | `state`           | Last known position, JSON, atomically replaced   |
//! | `gps-current.log` | Every record sent to the collector               |
//! | `gps-*.log`       | Rotated permanent logs                           |
//!
//! ## Ordering
//!
//! The cache file always holds older records than the buffer: records only
//! reach the file by flushing the whole buffer, and the uploader drains the file
//! before it touches the buffer.
//!
//! `CacheStore` itself is not synchronized. It lives behind a
//! `tokio::sync::Mutex`; the reactive loop reaches it through the
//! [`worker::CacheHandle`] channel and the upload loop locks it for a whole
//! attempt.

pub mod buffer;
pub mod worker;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub use buffer::RecordBuffer;
pub use worker::{CacheHandle, CacheRequest};

use crate::error::Result;
use crate::fix::protocol::PersistedState;
use crate::status::DeviceStatus;
use crate::storage::Storage;

/// Unsent records overflowed from the buffer
pub const CACHE_FILE: &str = "cache";

/// Last known position snapshot
pub const STATE_FILE: &str = "state";

/// Permanent log of sent records
pub const PERMANENT_LOG: &str = "gps-current.log";

/// Prefix shared by the permanent log and its rotations
pub const LOG_PREFIX: &str = "gps";

/// What happened to a record passed to [`CacheStore::append`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Record added to the buffer
    Buffered,
    /// Buffer was full; its contents went to the cache file first
    Flushed,
    /// Buffer was full and could not be written; its contents were discarded
    FlushFailed,
}

/// Owner of the buffer, cache file, permanent log and position snapshot.
pub struct CacheStore {
    storage: Arc<dyn Storage>,
    buffer: RecordBuffer,
    state: PersistedState,
    status: DeviceStatus,
    log_roll_size: u64,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("buffered", &self.buffer.len())
            .field("capacity", &self.buffer.capacity())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl CacheStore {
    /// Creates an empty store. Nothing is read from storage.
    ///
    /// # Arguments
    ///
    /// * `storage` - Persistent storage
    /// * `capacity` - Buffer capacity in bytes
    /// * `log_roll_size` - Permanent log size that triggers rotation
    /// * `status` - Device status (unsent-disk-data flag)
    pub fn new(storage: Arc<dyn Storage>, capacity: usize, log_roll_size: u64, status: DeviceStatus) -> Self {
        Self {
            storage,
            buffer: RecordBuffer::new(capacity),
            state: PersistedState::default(),
            status,
            log_roll_size,
        }
    }

    /// Boot-time load.
    ///
    /// Ensures the permanent log exists, restores the position snapshot and
    /// raises the unsent-disk-data flag if a cache file survived a restart.
    /// Storage problems are logged, never fatal.
    pub fn load(&mut self) {
        if let Err(e) = self.storage.touch(PERMANENT_LOG) {
            error!("Unable to create {}: {}", PERMANENT_LOG, e);
        }

        match self.storage.read(STATE_FILE) {
            Ok(Some(bytes)) => match serde_json::from_slice::<PersistedState>(&bytes) {
                Ok(state) => {
                    info!(
                        "Last known position {:.5} {:.5} at {:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                        state.latitude, state.longitude,
                        state.time.year, state.time.month, state.time.day,
                        state.time.hour, state.time.minute, state.time.second
                    );
                    self.state = state;
                }
                Err(e) => warn!("Ignoring unreadable {}: {}", STATE_FILE, e),
            },
            Ok(None) => debug!("No saved position"),
            Err(e) => warn!("Unable to read {}: {}", STATE_FILE, e),
        }

        let dirty = self.storage.size(CACHE_FILE).ok().flatten().unwrap_or(0) > 0;
        if dirty {
            info!("Unsent records found in {}", CACHE_FILE);
        }
        self.status.set_disk_dirty(dirty);
    }

    pub fn buffer(&self) -> &RecordBuffer {
        &self.buffer
    }

    pub fn persisted_state(&self) -> PersistedState {
        self.state
    }

    /// Replaces the in-memory position snapshot. Written out on the next append.
    pub fn update_state(&mut self, state: PersistedState) {
        self.state = state;
    }

    /// Forgets the last known position and persists the result.
    pub fn clear_position(&mut self) -> Result<()> {
        self.state.clear_position();
        self.persist_state()
    }

    /// Buffers a record.
    ///
    /// If the record does not fit, the current buffer is flushed to the cache file
    /// and emptied first. The new record is never dropped; a record larger than
    /// the whole buffer is written straight to the cache file. The position
    /// snapshot is persisted after every append.
    pub fn append(&mut self, record: &[u8]) -> AppendOutcome {
        let mut outcome = AppendOutcome::Buffered;

        if !self.buffer.fits(record.len()) {
            let pending = self.buffer.take();
            outcome = match self.write_cache(&pending) {
                Ok(()) => {
                    info!("Cached {} unsent bytes", pending.len());
                    AppendOutcome::Flushed
                }
                Err(e) => {
                    error!("Unable to cache, discarded {} bytes: {}", pending.len(), e);
                    AppendOutcome::FlushFailed
                }
            };
        }

        if !self.buffer.push(record) {
            warn!("Record of {} bytes exceeds buffer, writing to cache", record.len());
            if let Err(e) = self.write_cache(record) {
                error!("Unable to cache oversize record: {}", e);
            }
        }

        if let Err(e) = self.persist_state() {
            warn!("Unable to save {}: {}", STATE_FILE, e);
        }
        outcome
    }

    /// Moves the whole buffer to the cache file.
    ///
    /// An empty buffer is a no-op that succeeds. On failure the buffer is kept.
    pub fn flush_to_persistent(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.write_cache(self.buffer.as_bytes())?;
        debug!("Flushed {} bytes to {}", self.buffer.len(), CACHE_FILE);
        self.buffer.clear();
        Ok(())
    }

    /// Reads the cache file. `None` if it is absent or empty.
    pub fn read_cache_file(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.storage.read(CACHE_FILE)?.filter(|data| !data.is_empty()))
    }

    /// Deletes the cache file after it was fully delivered.
    pub fn delete_cache_file(&mut self) -> Result<()> {
        self.storage.delete(CACHE_FILE)?;
        self.status.set_disk_dirty(false);
        Ok(())
    }

    /// Re-creates the cache file from the records that were not delivered.
    pub fn restore_cache_file(&mut self, unsent: &[u8]) -> Result<()> {
        if unsent.is_empty() {
            return self.delete_cache_file();
        }
        self.storage.write_atomic(CACHE_FILE, unsent)?;
        self.status.set_disk_dirty(true);
        Ok(())
    }

    /// Takes the buffered records for transmission.
    pub fn take_buffer(&mut self) -> Bytes {
        self.buffer.take()
    }

    /// Puts undelivered records back at the front of the buffer.
    pub fn requeue(&mut self, unsent: &[u8]) {
        self.buffer.requeue(unsent);
    }

    pub fn clear_buffer(&mut self) {
        self.buffer.clear();
    }

    /// Appends sent records to the permanent log, then checks rotation.
    pub fn append_permanent_log(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        self.storage.append(PERMANENT_LOG, data)?;
        self.rotate_log_if_needed(Utc::now())?;
        Ok(())
    }

    /// Rotates the permanent log once it exceeds the roll size.
    ///
    /// The log is renamed to `gps-YYYYMMDD-HHMMSS.log` (with a `-N` suffix when
    /// that name is taken) and an empty log takes its place. Returns the rotated
    /// name.
    pub fn rotate_log_if_needed(&self, now: DateTime<Utc>) -> Result<Option<String>> {
        let size = self.storage.size(PERMANENT_LOG)?.unwrap_or(0);
        if size <= self.log_roll_size {
            return Ok(None);
        }

        let stamp = now.format("%Y%m%d-%H%M%S").to_string();
        let mut rolled = format!("{}-{}.log", LOG_PREFIX, stamp);
        let mut n = 1;
        while self.storage.exists(&rolled) {
            rolled = format!("{}-{}-{}.log", LOG_PREFIX, stamp, n);
            n += 1;
        }
        self.storage.rename(PERMANENT_LOG, &rolled)?;
        self.storage.touch(PERMANENT_LOG)?;
        info!("GPS logfile rolled to {}", rolled);
        Ok(Some(rolled))
    }

    /// Clears the permanent log.
    ///
    /// With `include_data` also deletes the cache file, the position snapshot and
    /// every rotated log, and empties the buffer. The caller restarts the device
    /// afterwards.
    pub fn wipe(&mut self, include_data: bool) -> Result<()> {
        self.storage.delete(PERMANENT_LOG)?;
        self.storage.touch(PERMANENT_LOG)?;
        info!("{} cleared", PERMANENT_LOG);

        if !include_data {
            return Ok(());
        }

        self.storage.delete(STATE_FILE)?;
        self.storage.delete(CACHE_FILE)?;
        for name in self.storage.list()? {
            if name.starts_with(LOG_PREFIX) && name != PERMANENT_LOG {
                self.storage.delete(&name)?;
                info!("file: {} deleted", name);
            }
        }
        self.buffer.clear();
        self.state = PersistedState::default();
        self.status.set_disk_dirty(false);
        Ok(())
    }

    fn write_cache(&self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        self.storage.append(CACHE_FILE, data)?;
        self.status.set_disk_dirty(true);
        Ok(())
    }

    fn persist_state(&self) -> Result<()> {
        let json = serde_json::to_vec(&self.state)?;
        self.storage.write_atomic(STATE_FILE, &json)
    }
}
