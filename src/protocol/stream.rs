// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Envelope extraction from a continuous byte stream.

use tracing::{debug, warn};

use super::envelope::{decode, decode_header, Envelope, EnvelopeError, HEADER_LEN, MAX_ENVELOPE_LEN};

/// Splits a self-delimiting byte stream into envelopes.
///
/// Malformed headers cost one byte each: the decoder drops the offending
/// byte and retries from the next one.
pub struct EnvelopeStream {
    buffer: Vec<u8>,
    dropped: usize,
}

impl EnvelopeStream {
    /// Create an empty stream decoder.
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(2 * MAX_ENVELOPE_LEN),
            dropped: 0,
        }
    }

    /// Append bytes read from the host.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Pop the next complete envelope.
    ///
    /// Returns `None` when more bytes are needed, `Some(Err(_))` when a
    /// malformed header was skipped.
    pub fn next_envelope(&mut self) -> Option<Result<Envelope, EnvelopeError>> {
        if self.buffer.is_empty() {
            return None;
        }

        let length = match decode_header(&self.buffer) {
            Ok((_, length)) => length,
            Err(EnvelopeError::Truncated { .. }) => return None,
            Err(e) => {
                warn!("Dropping byte 0x{:02x}: {}", self.buffer[0], e);
                self.buffer.remove(0);
                self.dropped += 1;
                return Some(Err(e));
            }
        };

        let total = HEADER_LEN + length;
        if self.buffer.len() < total {
            return None;
        }

        let frame: Vec<u8> = self.buffer.drain(..total).collect();
        let result = decode(&frame);
        if let Ok(ref envelope) = result {
            debug!(
                "Decoded {} envelope ({} bytes)",
                envelope.kind().as_str(),
                envelope.len()
            );
        }
        Some(result)
    }

    /// Discard any partially received envelope.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Bytes waiting for the rest of their envelope.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Total bytes skipped while resynchronising.
    pub fn dropped(&self) -> usize {
        self.dropped
    }
}

impl Default for EnvelopeStream {
    fn default() -> Self {
        Self::new()
    }
}
