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

//! Bluetooth communication module.
//!
//! Scans for the display, opens an SPP channel to it and moves payloads
//! across that channel.

pub mod address;
pub mod advertisement;
pub mod constants;
pub mod controller;
pub mod link;

pub use address::{AddressType, BdAddr, KnownAddresses};
pub use controller::{BluerController, BluetoothController};
pub use link::{
    ConnectMode, Intent, LinkEvent, LinkMachine, LinkReport, LinkSettings, LinkState, LinkStatus,
    ScanParameters,
};
