//! # Line Reassembler
//!
//! Turns the chunked byte stream of a serial receiver into one sentence per
//! call. Chunks may split a sentence anywhere or carry several sentences;
//! leftovers are kept for the next call so lines come out in arrival order.

use bytes::BytesMut;
use tracing::debug;

use super::port_trait::SerialPortIO;
use crate::error::{CourierError, Result};

/// Default maximum line length in bytes
pub const DEFAULT_MAX_LINE_LENGTH: usize = 2048;

/// Line reader over a blocking byte source
pub struct LineReader<S> {
    source: S,
    pending: BytesMut,
    chunk: Vec<u8>,
    max_line_length: usize,
    discarding: bool,
}

impl<S: SerialPortIO> LineReader<S> {
    /// Create a reader that rejects lines longer than `max_line_length`
    pub fn new(source: S, max_line_length: usize) -> Self {
        Self {
            source,
            pending: BytesMut::with_capacity(max_line_length),
            chunk: vec![0u8; max_line_length.max(1)],
            max_line_length,
            discarding: false,
        }
    }

    /// Read the next non-empty line, waiting for the device as needed
    ///
    /// The terminator is stripped. Empty lines, including the second half of
    /// a `\r\n` pair, are skipped rather than returned.
    ///
    /// # Returns
    ///
    /// * `Result<String>` - Next line without its terminator
    ///
    /// # Errors
    ///
    /// - `Serial` if the device read fails
    /// - `SerialClosed` if the device reports end of stream
    /// - `LineTooLong` if a line exceeds `max_line_length` bytes; everything
    ///   up to the next terminator is dropped and the reader stays usable
    /// - `NonAsciiLine` if a line carries bytes outside ASCII; the line is
    ///   dropped
    pub async fn read_line(&mut self) -> Result<String> {
        loop {
            while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
                let framed = self.pending.split_to(pos + 1);
                let line = &framed[..pos];

                // Tail of a line already reported as too long
                if self.discarding {
                    self.discarding = false;
                    continue;
                }

                if line.is_empty() {
                    continue;
                }

                if pos > self.max_line_length {
                    return Err(CourierError::LineTooLong {
                        limit: self.max_line_length,
                    });
                }

                if !line.is_ascii() {
                    return Err(CourierError::NonAsciiLine { length: pos });
                }

                return Ok(line.iter().map(|&b| b as char).collect());
            }

            if self.discarding {
                self.pending.clear();
            } else if self.pending.len() > self.max_line_length {
                self.pending.clear();
                self.discarding = true;
                return Err(CourierError::LineTooLong {
                    limit: self.max_line_length,
                });
            }

            let n = self
                .source
                .read(&mut self.chunk)
                .await
                .map_err(|e| CourierError::Serial(format!("Failed to read device: {}", e)))?;

            if n == 0 {
                return Err(CourierError::SerialClosed);
            }

            debug!("Read {} bytes from serial device", n);

            // The receiver line discipline folds CR into NL
            self.pending.extend(
                self.chunk[..n]
                    .iter()
                    .map(|&b| if b == b'\r' { b'\n' } else { b }),
            );
        }
    }

    /// Bytes received but not yet returned as a line
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
