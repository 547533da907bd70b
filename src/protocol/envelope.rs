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

//! Command envelope definitions and binary encoding.
//!
//! Wire layout: `[kind: u8][length: u16 LE][payload]`.

use thiserror::Error;

/// Maximum payload carried by a single envelope.
pub const MAX_PAYLOAD: usize = 256;

/// Kind byte plus the little-endian length.
pub const HEADER_LEN: usize = 3;

/// Largest buffer `encode` can produce.
pub const MAX_ENVELOPE_LEN: usize = HEADER_LEN + MAX_PAYLOAD;

/// Envelope discriminators. The set is closed: anything else is malformed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandKind {
    /// Payload is an already-encoded envelope, forwarded untouched.
    RawEnvelope = 0x00,
    /// Opaque bytes for (or from) the DitooPro.
    PeerPayload = 0x01,
    /// Start listing nearby devices.
    ListDevices = 0x02,
    /// Connect to the 6-byte address in the payload.
    SelectDevice = 0x03,
    /// A matching device was seen while scanning.
    DeviceFound = 0x04,
    /// Link lifecycle report.
    LinkStatus = 0x05,
}

impl CommandKind {
    /// Parse a discriminator byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::RawEnvelope),
            0x01 => Some(Self::PeerPayload),
            0x02 => Some(Self::ListDevices),
            0x03 => Some(Self::SelectDevice),
            0x04 => Some(Self::DeviceFound),
            0x05 => Some(Self::LinkStatus),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RawEnvelope => "RAW_ENVELOPE",
            Self::PeerPayload => "PEER_PAYLOAD",
            Self::ListDevices => "LIST_DEVICES",
            Self::SelectDevice => "SELECT_DEVICE",
            Self::DeviceFound => "DEVICE_FOUND",
            Self::LinkStatus => "LINK_STATUS",
        }
    }
}

/// Errors raised while encoding or decoding envelopes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    #[error("payload of {0} bytes exceeds the {MAX_PAYLOAD} byte limit")]
    PayloadTooLarge(usize),

    #[error("malformed envelope: unknown kind 0x{0:02x}")]
    UnknownKind(u8),

    #[error("malformed envelope: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("malformed envelope: {0} trailing bytes")]
    TrailingBytes(usize),
}

/// The unit exchanged on both queues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    kind: CommandKind,
    payload: Vec<u8>,
}

impl Envelope {
    /// Create an envelope, rejecting oversized payloads.
    pub fn new(kind: CommandKind, payload: impl Into<Vec<u8>>) -> Result<Self, EnvelopeError> {
        let payload = payload.into();
        if payload.len() > MAX_PAYLOAD {
            return Err(EnvelopeError::PayloadTooLarge(payload.len()));
        }
        Ok(Self { kind, payload })
    }

    /// Wrap a pre-encoded envelope for pass-through.
    pub fn raw(encoded: impl Into<Vec<u8>>) -> Result<Self, EnvelopeError> {
        Self::new(CommandKind::RawEnvelope, encoded)
    }

    pub fn list_devices() -> Self {
        Self {
            kind: CommandKind::ListDevices,
            payload: Vec::new(),
        }
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Encode into wire bytes.
    pub fn encode(&self) -> Result<Vec<u8>, EnvelopeError> {
        encode(self.kind, &self.payload)
    }

    /// Bytes to put on the wire. Raw envelopes are already encoded and are
    /// written as-is.
    pub fn to_wire(&self) -> Result<Vec<u8>, EnvelopeError> {
        match self.kind {
            CommandKind::RawEnvelope => Ok(self.payload.clone()),
            _ => self.encode(),
        }
    }

    /// Decode the envelope nested inside a raw envelope.
    pub fn nested(&self) -> Option<Result<Envelope, EnvelopeError>> {
        match self.kind {
            CommandKind::RawEnvelope => Some(decode(&self.payload)),
            _ => None,
        }
    }
}

/// Encode `(kind, payload)` into a fresh buffer.
pub fn encode(kind: CommandKind, payload: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
    if payload.len() > MAX_PAYLOAD {
        return Err(EnvelopeError::PayloadTooLarge(payload.len()));
    }

    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.push(kind.as_u8());
    buf.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Read an envelope header: kind and declared payload length.
pub(crate) fn decode_header(buf: &[u8]) -> Result<(CommandKind, usize), EnvelopeError> {
    let first = *buf.first().ok_or(EnvelopeError::Truncated {
        needed: HEADER_LEN,
        available: 0,
    })?;
    let kind = CommandKind::from_u8(first).ok_or(EnvelopeError::UnknownKind(first))?;

    if buf.len() < HEADER_LEN {
        return Err(EnvelopeError::Truncated {
            needed: HEADER_LEN,
            available: buf.len(),
        });
    }

    let length = u16::from_le_bytes([buf[1], buf[2]]) as usize;
    if length > MAX_PAYLOAD {
        return Err(EnvelopeError::PayloadTooLarge(length));
    }

    Ok((kind, length))
}

/// Decode exactly one envelope occupying the whole buffer.
///
/// Raw envelopes are not decoded recursively; their payload is returned
/// unmodified.
pub fn decode(buf: &[u8]) -> Result<Envelope, EnvelopeError> {
    let (kind, length) = decode_header(buf)?;

    let total = HEADER_LEN + length;
    if buf.len() < total {
        return Err(EnvelopeError::Truncated {
            needed: total,
            available: buf.len(),
        });
    }
    if buf.len() > total {
        return Err(EnvelopeError::TrailingBytes(buf.len() - total));
    }

    Ok(Envelope {
        kind,
        payload: buf[HEADER_LEN..].to_vec(),
    })
}
