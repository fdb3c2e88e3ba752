//! Bounded in-memory record buffer.

use bytes::{Bytes, BytesMut};

/// Ordered record lines bounded by a byte capacity.
///
/// The buffer never grows past its capacity through [`RecordBuffer::push`]; the
/// caller checks [`RecordBuffer::fits`] and flushes first.
#[derive(Debug, Clone)]
pub struct RecordBuffer {
    data: BytesMut,
    capacity: usize,
}

impl RecordBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// True if `additional` bytes can be pushed without exceeding capacity.
    pub fn fits(&self, additional: usize) -> bool {
        self.data.len() + additional <= self.capacity
    }

    /// Appends bytes. Returns false (and leaves the buffer untouched) if they do not fit.
    pub fn push(&mut self, record: &[u8]) -> bool {
        if !self.fits(record.len()) {
            return false;
        }
        self.data.extend_from_slice(record);
        true
    }

    /// Takes the contents, leaving the buffer empty.
    pub fn take(&mut self) -> Bytes {
        self.data.split().freeze()
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Puts unsent bytes back in front of whatever is buffered.
    ///
    /// Requeued data came out of this buffer, so capacity is not re-checked.
    pub fn requeue(&mut self, unsent: &[u8]) {
        if unsent.is_empty() {
            return;
        }
        let mut data = BytesMut::with_capacity(self.capacity.max(unsent.len() + self.data.len()));
        data.extend_from_slice(unsent);
        data.extend_from_slice(&self.data);
        self.data = data;
    }
}
