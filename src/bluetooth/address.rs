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

//! Bluetooth device addresses and duplicate tracking.

use std::fmt;

/// Length of a Bluetooth device address.
pub const BD_ADDR_LEN: usize = 6;

/// A 6-byte Bluetooth device address, most significant byte first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BdAddr(pub [u8; BD_ADDR_LEN]);

impl BdAddr {
    pub const fn new(octets: [u8; BD_ADDR_LEN]) -> Self {
        Self(octets)
    }

    /// Parse from a raw slice; only exactly 6 bytes are accepted.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let octets: [u8; BD_ADDR_LEN] = bytes.try_into().ok()?;
        Some(Self(octets))
    }

    pub fn octets(&self) -> [u8; BD_ADDR_LEN] {
        self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            a, b, c, d, e, g
        )
    }
}

/// Address type reported with an advertisement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressType {
    #[default]
    Public,
    Random,
}

/// Fixed-capacity set of addresses seen during one scan session.
///
/// New addresses go into the next free slot. Once full, the slot after the
/// most recent insert is reused, so the oldest entry is evicted first.
pub struct KnownAddresses {
    slots: Vec<BdAddr>,
    capacity: usize,
    next: usize,
}

impl KnownAddresses {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
            next: 0,
        }
    }

    pub fn contains(&self, addr: &BdAddr) -> bool {
        self.slots.contains(addr)
    }

    /// Record an address. Returns `false` if it was already known.
    pub fn insert(&mut self, addr: BdAddr) -> bool {
        if self.contains(&addr) {
            return false;
        }

        if self.slots.len() < self.capacity {
            self.slots.push(addr);
        } else {
            self.slots[self.next] = addr;
        }
        self.next = (self.next + 1) % self.capacity;
        true
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.next = 0;
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
