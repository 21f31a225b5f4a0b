//! # Bundle Accumulator
//!
//! Fixed-capacity buffer of newline-framed sentences awaiting a single push.
//!
//! Appends are all-or-nothing: a line that does not fit (including its
//! terminator) is rejected and the bundle is left exactly as it was.

use bytes::BytesMut;

use crate::error::{CourierError, Result};

/// Default bundle capacity in bytes
pub const DEFAULT_BUNDLE_CAPACITY: usize = 8192;

/// Accumulated sentences for one delivery unit
#[derive(Debug)]
pub struct Bundle {
    buffer: BytesMut,
    capacity: usize,
    record_count: usize,
}

impl Bundle {
    /// Create an empty bundle able to hold `capacity` bytes
    ///
    /// The storage is allocated once here and reused across resets.
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
            capacity,
            record_count: 0,
        }
    }

    /// Discard every record, keeping the allocated storage
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.record_count = 0;
    }

    /// Current content size in bytes
    pub fn length(&self) -> usize {
        self.buffer.len()
    }

    /// Number of lines currently held
    pub fn record_count(&self) -> usize {
        self.record_count
    }

    /// Maximum content size in bytes
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Framed content, every line followed by `\n`
    pub fn content(&self) -> &[u8] {
        &self.buffer
    }

    /// Append a line followed by a newline terminator
    ///
    /// # Arguments
    ///
    /// * `line` - Sentence text without its terminator
    ///
    /// # Returns
    ///
    /// * `Result<usize>` - Record count after the append
    ///
    /// # Errors
    ///
    /// Returns `BundleOverflow` if `length() + line.len() + 1` exceeds the
    /// capacity. The bundle is unchanged in that case.
    ///
    /// # Examples
    ///
    /// ```
    /// use nmea_courier::bundle::Bundle;
    ///
    /// let mut bundle = Bundle::new(64);
    /// assert_eq!(bundle.append("$GPGGA,1,2,3").unwrap(), 1);
    /// assert_eq!(bundle.content(), b"$GPGGA,1,2,3\n");
    /// ```
    pub fn append(&mut self, line: &str) -> Result<usize> {
        let needed = self.length() + line.len() + 1;
        if needed > self.capacity {
            return Err(CourierError::BundleOverflow {
                needed,
                capacity: self.capacity,
            });
        }

        self.buffer.extend_from_slice(line.as_bytes());
        self.buffer.extend_from_slice(b"\n");
        self.record_count += 1;

        Ok(self.record_count)
    }
}

impl Default for Bundle {
    fn default() -> Self {
        Self::new(DEFAULT_BUNDLE_CAPACITY)
    }
}
