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

//! Bluetooth identifiers and timing constants for the DitooPro link.

use uuid::Uuid;

/// Standard Serial Port Profile UUID.
pub const SPP_UUID: Uuid = Uuid::from_u128(0x00001101_0000_1000_8000_00805F9B34FB);

/// Advertised local name prefix of the peripheral.
pub const TARGET_NAME: &str = "DitooPro";

/// Heartbeat period driving queue polling and send readiness.
pub const HEARTBEAT_PERIOD_MS: u64 = 1000;

/// Longest local name kept from an advertisement.
pub const MAX_NAME_LEN: usize = 30;

/// Default capacity of the known-address set.
pub const KNOWN_ADDRESS_CAPACITY: usize = 64;

/// Advertising data structure types.
pub mod ad_type {
    pub const SHORTENED_LOCAL_NAME: u8 = 0x08;
    pub const COMPLETE_LOCAL_NAME: u8 = 0x09;
}

/// LE scan parameters, in 0.625 ms units.
pub mod scan {
    /// Active scanning (request scan responses).
    pub const ACTIVE: bool = true;
    pub const INTERVAL: u16 = 0x0030;
    pub const WINDOW: u16 = 0x0030;

    /// Convert a scan timing value to milliseconds.
    pub fn units_to_ms(units: u16) -> f32 {
        units as f32 * 0.625
    }
}

/// RFCOMM defaults.
pub mod rfcomm {
    /// Channel assumed when the SPP record is present but its channel
    /// number cannot be read.
    pub const DEFAULT_CHANNEL: u8 = 1;

    /// Default RFCOMM maximum frame size.
    pub const DEFAULT_MTU: u16 = 127;
}
