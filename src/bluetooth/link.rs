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

//! Discovery and link state machine.
//!
//! The machine never talks to the Bluetooth stack directly. Every input is a
//! [`LinkEvent`] or a host command, and every side effect comes back as an
//! [`Intent`] for the caller to execute. That keeps transitions synchronous
//! and testable without a radio.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::address::{AddressType, BdAddr, KnownAddresses};
use super::advertisement::{local_name, matches_name};
use super::constants::{scan, KNOWN_ADDRESS_CAPACITY, TARGET_NAME};
use crate::protocol::MAX_PAYLOAD;

/// How a matching advertisement turns into a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectMode {
    /// Report matches and wait for the host to select one.
    #[default]
    ManualSelect,
    /// Scan on power-up and connect to the first match.
    AutoConnect,
}

/// LE scan parameters handed to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanParameters {
    pub active: bool,
    pub interval: u16,
    pub window: u16,
}

impl Default for ScanParameters {
    fn default() -> Self {
        Self {
            active: scan::ACTIVE,
            interval: scan::INTERVAL,
            window: scan::WINDOW,
        }
    }
}

/// Construction-time settings.
#[derive(Debug, Clone)]
pub struct LinkSettings {
    pub target_name: String,
    pub mode: ConnectMode,
    pub scan: ScanParameters,
    pub known_capacity: usize,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            target_name: TARGET_NAME.to_string(),
            mode: ConnectMode::default(),
            scan: ScanParameters::default(),
            known_capacity: KNOWN_ADDRESS_CAPACITY,
        }
    }
}

/// Lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Controller not powered yet.
    Idle,
    /// Ready, not scanning, no channel.
    W4Scan,
    /// Scanning for the target name.
    W4ScanResults,
    /// Device selected, waiting for the service query slot.
    W4ScanComplete,
    /// Service lookup or channel open in progress.
    W4RfcommChannel,
    /// Channel open, nothing pending.
    WaitCmd,
    /// Channel open, payload pending.
    Send,
}

impl LinkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::W4Scan => "W4_SCAN",
            Self::W4ScanResults => "W4_SCAN_RESULTS",
            Self::W4ScanComplete => "W4_SCAN_COMPLETE",
            Self::W4RfcommChannel => "W4_RFCOMM_CHANNEL",
            Self::WaitCmd => "WAIT_CMD",
            Self::Send => "SEND",
        }
    }
}

/// Notifications from the Bluetooth stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Controller finished powering on.
    ControllerReady,
    /// LE advertisement with raw advertising data.
    AdvertisingReport {
        address: BdAddr,
        address_type: AddressType,
        data: Vec<u8>,
    },
    /// The registered service query may now run.
    ServiceQueryReady,
    /// An SPP record was found on the given RFCOMM channel.
    ServiceRecord { attempt: u16, rfcomm_channel: u8 },
    /// The service query finished; non-zero status is a failure.
    ServiceQueryComplete { attempt: u16, status: u8 },
    /// Channel open result; non-zero status is a failure.
    ChannelOpened {
        attempt: u16,
        status: u8,
        channel_id: u16,
        mtu: u16,
    },
    ChannelClosed { channel_id: u16 },
    /// The channel can accept one outgoing frame.
    CanSendNow { channel_id: u16 },
    DataReceived { channel_id: u16, data: Vec<u8> },
}

/// Link lifecycle status codes reported to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LinkStatus {
    Connected = 0,
    ServiceQueryFailed = 1,
    NoSerialPort = 2,
    ChannelOpenFailed = 3,
    ChannelClosed = 4,
}

impl LinkStatus {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Connected),
            1 => Some(Self::ServiceQueryFailed),
            2 => Some(Self::NoSerialPort),
            3 => Some(Self::ChannelOpenFailed),
            4 => Some(Self::ChannelClosed),
            _ => None,
        }
    }
}

/// Results travelling toward the USB host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkReport {
    DeviceFound { name: String, address: BdAddr },
    PeerData(Vec<u8>),
    Status {
        status: LinkStatus,
        address: Option<BdAddr>,
    },
}

/// Side effects requested by a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    SetScanParameters(ScanParameters),
    StartScan,
    StopScan,
    RegisterServiceQuery,
    /// `attempt` is echoed back in the query's result events.
    QueryRfcommService { address: BdAddr, attempt: u16 },
    /// `attempt` is echoed back in `LinkEvent::ChannelOpened`.
    CreateChannel {
        address: BdAddr,
        channel: u8,
        attempt: u16,
    },
    Disconnect { channel_id: u16 },
    Send { channel_id: u16, data: Vec<u8> },
    RequestCanSendNow { channel_id: u16 },
    Report(LinkReport),
}

/// The single live link.
#[derive(Debug, Clone, Default)]
pub struct ConnectionContext {
    pub address: BdAddr,
    pub address_type: AddressType,
    /// 0 when no channel is open.
    pub channel_id: u16,
    pub mtu: u16,
    pub server_channel: u8,
    pub pending: Option<Vec<u8>>,
}

/// Discovery and link state machine.
pub struct LinkMachine {
    settings: LinkSettings,
    state: LinkState,
    context: ConnectionContext,
    known: KnownAddresses,
    heartbeat_armed: bool,
    /// Bumped on every selection; results tagged with an older value are stale.
    attempt: u16,
}

impl LinkMachine {
    pub fn new(settings: LinkSettings) -> Self {
        let known = KnownAddresses::with_capacity(settings.known_capacity);
        Self {
            settings,
            state: LinkState::Idle,
            context: ConnectionContext::default(),
            known,
            heartbeat_armed: false,
            attempt: 0,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn context(&self) -> &ConnectionContext {
        &self.context
    }

    pub fn mode(&self) -> ConnectMode {
        self.settings.mode
    }

    pub fn heartbeat_armed(&self) -> bool {
        self.heartbeat_armed
    }

    /// Identifier of the current connection attempt.
    pub fn attempt(&self) -> u16 {
        self.attempt
    }

    fn set_state(&mut self, next: LinkState) {
        if self.state != next {
            debug!("Link state {} -> {}", self.state.as_str(), next.as_str());
            self.state = next;
        }
    }

    /// Process one Bluetooth stack event.
    pub fn handle_event(&mut self, event: LinkEvent) -> Vec<Intent> {
        match event {
            LinkEvent::ControllerReady => self.on_controller_ready(),
            LinkEvent::AdvertisingReport {
                address,
                address_type,
                data,
            } => self.on_advertisement(address, address_type, &data),
            LinkEvent::ServiceQueryReady => self.on_service_query_ready(),
            LinkEvent::ServiceRecord {
                attempt,
                rfcomm_channel,
            } => {
                if self.state == LinkState::W4RfcommChannel && attempt == self.attempt {
                    debug!("SPP record on RFCOMM channel {}", rfcomm_channel);
                    self.context.server_channel = rfcomm_channel;
                }
                Vec::new()
            }
            LinkEvent::ServiceQueryComplete { attempt, status } => {
                self.on_service_query_complete(attempt, status)
            }
            LinkEvent::ChannelOpened {
                attempt,
                status,
                channel_id,
                mtu,
            } => self.on_channel_opened(attempt, status, channel_id, mtu),
            LinkEvent::ChannelClosed { channel_id } => self.on_channel_closed(channel_id),
            LinkEvent::CanSendNow { channel_id } => self.on_can_send_now(channel_id),
            LinkEvent::DataReceived { channel_id, data } => self.on_data(channel_id, data),
        }
    }

    fn on_controller_ready(&mut self) -> Vec<Intent> {
        if self.state != LinkState::Idle {
            return Vec::new();
        }

        info!("Bluetooth controller ready");
        self.set_state(LinkState::W4Scan);

        match self.settings.mode {
            ConnectMode::AutoConnect => self.start_scan(),
            ConnectMode::ManualSelect => Vec::new(),
        }
    }

    /// Begin a scan session. Only valid while idle with the controller up.
    pub fn start_scan(&mut self) -> Vec<Intent> {
        if self.state != LinkState::W4Scan {
            debug!("Ignoring scan request in {}", self.state.as_str());
            return Vec::new();
        }

        info!("Starting scan for '{}'", self.settings.target_name);
        self.known.clear();
        self.set_state(LinkState::W4ScanResults);
        vec![
            Intent::SetScanParameters(self.settings.scan),
            Intent::StartScan,
        ]
    }

    fn on_advertisement(&mut self, address: BdAddr, address_type: AddressType, data: &[u8]) -> Vec<Intent> {
        if self.state != LinkState::W4ScanResults {
            return Vec::new();
        }

        let name = match local_name(data) {
            Some(name) if matches_name(&name, &self.settings.target_name) => name,
            _ => return Vec::new(),
        };

        if !self.known.insert(address) {
            return Vec::new();
        }

        info!("Found {} on {}", name, address);
        self.context.address = address;
        self.context.address_type = address_type;

        let mut intents = vec![Intent::Report(LinkReport::DeviceFound { name, address })];
        if self.settings.mode == ConnectMode::AutoConnect {
            intents.extend(self.select_device(address));
        }
        intents
    }

    /// Point the link at `address` and start the service lookup.
    ///
    /// Stops an active scan and disconnects any open channel first.
    pub fn select_device(&mut self, address: BdAddr) -> Vec<Intent> {
        if self.state == LinkState::Idle {
            warn!("Controller not ready, ignoring selection of {}", address);
            return Vec::new();
        }

        let mut intents = Vec::new();
        if self.state == LinkState::W4ScanResults {
            info!("Stopping scan");
            intents.push(Intent::StopScan);
        }

        self.context.address = address;
        if self.context.channel_id != 0 {
            info!(
                "Disconnecting channel 0x{:02x} before switching to {}",
                self.context.channel_id, address
            );
            intents.push(Intent::Disconnect {
                channel_id: self.context.channel_id,
            });
        }
        if self.context.pending.take().is_some() {
            warn!("Dropping pending payload for previous device");
        }

        self.attempt = self.attempt.wrapping_add(1);
        self.set_state(LinkState::W4ScanComplete);
        intents.push(Intent::RegisterServiceQuery);
        intents
    }

    fn on_service_query_ready(&mut self) -> Vec<Intent> {
        if self.state != LinkState::W4ScanComplete {
            return Vec::new();
        }

        self.context.server_channel = 0;
        self.set_state(LinkState::W4RfcommChannel);
        vec![Intent::QueryRfcommService {
            address: self.context.address,
            attempt: self.attempt,
        }]
    }

    fn on_service_query_complete(&mut self, attempt: u16, status: u8) -> Vec<Intent> {
        if self.state != LinkState::W4RfcommChannel || attempt != self.attempt {
            debug!("Ignoring service query result for attempt {}", attempt);
            return Vec::new();
        }

        if status != 0 {
            warn!("SDP query failed, status 0x{:02x}", status);
            return self.abandon(LinkStatus::ServiceQueryFailed);
        }
        if self.context.server_channel == 0 {
            warn!("No SPP service found on {}", self.context.address);
            return self.abandon(LinkStatus::NoSerialPort);
        }

        info!(
            "SDP query done, connecting to {} on channel {}",
            self.context.address, self.context.server_channel
        );
        vec![Intent::CreateChannel {
            address: self.context.address,
            channel: self.context.server_channel,
            attempt: self.attempt,
        }]
    }

    fn on_channel_opened(
        &mut self,
        attempt: u16,
        status: u8,
        channel_id: u16,
        mtu: u16,
    ) -> Vec<Intent> {
        if self.state != LinkState::W4RfcommChannel || attempt != self.attempt {
            if status == 0 {
                warn!(
                    "Channel 0x{:02x} from superseded attempt {} opened, closing it",
                    channel_id, attempt
                );
                return vec![Intent::Disconnect { channel_id }];
            }
            return Vec::new();
        }

        if status != 0 {
            warn!("RFCOMM channel open failed, status 0x{:02x}", status);
            return self.abandon(LinkStatus::ChannelOpenFailed);
        }

        info!(
            "RFCOMM channel 0x{:02x} open, max frame size {}",
            channel_id, mtu
        );
        self.context.channel_id = channel_id;
        self.context.mtu = mtu;
        self.heartbeat_armed = true;
        self.set_state(LinkState::WaitCmd);
        vec![Intent::Report(LinkReport::Status {
            status: LinkStatus::Connected,
            address: Some(self.context.address),
        })]
    }

    fn on_channel_closed(&mut self, channel_id: u16) -> Vec<Intent> {
        if self.context.channel_id == 0 || channel_id != self.context.channel_id {
            debug!("Ignoring close of stale channel 0x{:02x}", channel_id);
            return Vec::new();
        }

        info!("RFCOMM channel 0x{:02x} closed", channel_id);
        self.context.channel_id = 0;
        self.heartbeat_armed = false;
        if self.context.pending.take().is_some() {
            warn!("Dropping pending payload, channel closed");
        }
        if matches!(self.state, LinkState::WaitCmd | LinkState::Send) {
            self.set_state(LinkState::W4Scan);
        }

        vec![Intent::Report(LinkReport::Status {
            status: LinkStatus::ChannelClosed,
            address: Some(self.context.address),
        })]
    }

    /// Queue a payload for the peer. Returns `false` if it was dropped
    /// because no idle channel is available.
    pub fn submit_payload(&mut self, data: Vec<u8>) -> bool {
        if self.state != LinkState::WaitCmd || self.context.channel_id == 0 {
            warn!(
                "No channel ready in {}, dropping {} byte payload",
                self.state.as_str(),
                data.len()
            );
            return false;
        }

        debug!("Payload pending: {}", hex::encode(&data));
        self.context.pending = Some(data);
        self.set_state(LinkState::Send);
        true
    }

    /// Periodic tick: ask for send readiness while a payload is pending.
    pub fn heartbeat(&mut self) -> Vec<Intent> {
        if self.heartbeat_armed && self.context.channel_id != 0 && self.state == LinkState::Send {
            return vec![Intent::RequestCanSendNow {
                channel_id: self.context.channel_id,
            }];
        }
        Vec::new()
    }

    fn on_can_send_now(&mut self, channel_id: u16) -> Vec<Intent> {
        if self.state != LinkState::Send || channel_id == 0 || channel_id != self.context.channel_id {
            return Vec::new();
        }

        self.set_state(LinkState::WaitCmd);
        match self.context.pending.take() {
            Some(data) => vec![Intent::Send { channel_id, data }],
            None => Vec::new(),
        }
    }

    fn on_data(&mut self, channel_id: u16, data: Vec<u8>) -> Vec<Intent> {
        if channel_id != self.context.channel_id {
            debug!("Ignoring data from stale channel 0x{:02x}", channel_id);
            return Vec::new();
        }

        debug!("Data received ({} bytes): {}", data.len(), hex::encode(&data));
        data.chunks(MAX_PAYLOAD)
            .map(|chunk| Intent::Report(LinkReport::PeerData(chunk.to_vec())))
            .collect()
    }

    /// Give up on the current connection attempt.
    fn abandon(&mut self, status: LinkStatus) -> Vec<Intent> {
        self.set_state(LinkState::W4Scan);
        vec![Intent::Report(LinkReport::Status {
            status,
            address: Some(self.context.address),
        })]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::advertisement::name_structure;

    const PEER: BdAddr = BdAddr::new([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);

    fn advert(address: BdAddr, name: &str) -> LinkEvent {
        LinkEvent::AdvertisingReport {
            address,
            address_type: AddressType::Public,
            data: name_structure(name),
        }
    }

    fn scanning(mode: ConnectMode) -> LinkMachine {
        let mut machine = LinkMachine::new(LinkSettings {
            mode,
            ..Default::default()
        });
        machine.handle_event(LinkEvent::ControllerReady);
        if mode == ConnectMode::ManualSelect {
            machine.start_scan();
        }
        machine
    }

    fn connected() -> LinkMachine {
        let mut machine = scanning(ConnectMode::ManualSelect);
        machine.select_device(PEER);
        machine.handle_event(LinkEvent::ServiceQueryReady);
        machine.handle_event(LinkEvent::ServiceRecord { attempt: 1, rfcomm_channel: 3 });
        machine.handle_event(LinkEvent::ServiceQueryComplete { attempt: 1, status: 0 });
        machine.handle_event(LinkEvent::ChannelOpened {
            attempt: 1,
            status: 0,
            channel_id: 0x41,
            mtu: 127,
        });
        machine
    }

    #[test]
    fn test_controller_ready() {
        let mut machine = LinkMachine::new(LinkSettings::default());
        assert_eq!(machine.state(), LinkState::Idle);

        let intents = machine.handle_event(LinkEvent::ControllerReady);
        assert!(intents.is_empty());
        assert_eq!(machine.state(), LinkState::W4Scan);
    }

    #[test]
    fn test_scan_requires_ready_controller() {
        let mut machine = LinkMachine::new(LinkSettings::default());
        assert!(machine.start_scan().is_empty());
        assert_eq!(machine.state(), LinkState::Idle);

        machine.handle_event(LinkEvent::ControllerReady);
        let intents = machine.start_scan();
        assert_eq!(
            intents,
            vec![
                Intent::SetScanParameters(ScanParameters::default()),
                Intent::StartScan
            ]
        );
        assert_eq!(machine.state(), LinkState::W4ScanResults);
    }

    #[test]
    fn test_auto_connect_scans_on_ready() {
        let mut machine = LinkMachine::new(LinkSettings {
            mode: ConnectMode::AutoConnect,
            ..Default::default()
        });
        let intents = machine.handle_event(LinkEvent::ControllerReady);
        assert!(intents.contains(&Intent::StartScan));
        assert_eq!(machine.state(), LinkState::W4ScanResults);
    }

    #[test]
    fn test_non_matching_advertisement_ignored() {
        let mut machine = scanning(ConnectMode::ManualSelect);
        assert!(machine.handle_event(advert(PEER, "TimeBox")).is_empty());
        assert!(machine
            .handle_event(LinkEvent::AdvertisingReport {
                address: PEER,
                address_type: AddressType::Public,
                data: vec![0x02, 0x01, 0x06],
            })
            .is_empty());
    }

    #[test]
    fn test_duplicate_advertisement_reported_once() {
        let mut machine = scanning(ConnectMode::ManualSelect);

        let first = machine.handle_event(advert(PEER, "DitooPro"));
        assert_eq!(
            first,
            vec![Intent::Report(LinkReport::DeviceFound {
                name: "DitooPro".to_string(),
                address: PEER,
            })]
        );
        assert!(machine.handle_event(advert(PEER, "DitooPro")).is_empty());
        assert_eq!(machine.state(), LinkState::W4ScanResults);
    }

    #[test]
    fn test_advertisement_outside_scan_ignored() {
        let mut machine = LinkMachine::new(LinkSettings::default());
        machine.handle_event(LinkEvent::ControllerReady);
        assert!(machine.handle_event(advert(PEER, "DitooPro")).is_empty());
    }

    #[test]
    fn test_auto_connect_selects_first_match() {
        let mut machine = scanning(ConnectMode::AutoConnect);
        let intents = machine.handle_event(advert(PEER, "DitooPro-2"));

        assert!(matches!(intents[0], Intent::Report(LinkReport::DeviceFound { .. })));
        assert!(intents.contains(&Intent::StopScan));
        assert!(intents.contains(&Intent::RegisterServiceQuery));
        assert_eq!(machine.state(), LinkState::W4ScanComplete);
        assert_eq!(machine.context().address, PEER);
    }

    #[test]
    fn test_select_rejected_while_idle() {
        let mut machine = LinkMachine::new(LinkSettings::default());
        assert!(machine.select_device(PEER).is_empty());
        assert_eq!(machine.state(), LinkState::Idle);
    }

    #[test]
    fn test_select_without_scan_does_not_stop_scan() {
        let mut machine = LinkMachine::new(LinkSettings::default());
        machine.handle_event(LinkEvent::ControllerReady);

        let intents = machine.select_device(PEER);
        assert_eq!(intents, vec![Intent::RegisterServiceQuery]);
    }

    #[test]
    fn test_service_lookup_to_channel_open() {
        let mut machine = scanning(ConnectMode::ManualSelect);
        let intents = machine.select_device(PEER);
        assert_eq!(intents, vec![Intent::StopScan, Intent::RegisterServiceQuery]);

        let intents = machine.handle_event(LinkEvent::ServiceQueryReady);
        assert_eq!(intents, vec![Intent::QueryRfcommService {
                address: PEER,
                attempt: 1
            }]);
        assert_eq!(machine.state(), LinkState::W4RfcommChannel);

        machine.handle_event(LinkEvent::ServiceRecord { attempt: 1, rfcomm_channel: 3 });
        let intents =
            machine.handle_event(LinkEvent::ServiceQueryComplete { attempt: 1, status: 0 });
        assert_eq!(
            intents,
            vec![Intent::CreateChannel {
                address: PEER,
                channel: 3,
                attempt: 1
            }]
        );

        machine.handle_event(LinkEvent::ChannelOpened {
            attempt: 1,
            status: 0,
            channel_id: 0x41,
            mtu: 127,
        });
        assert_eq!(machine.state(), LinkState::WaitCmd);
        assert_eq!(machine.context().channel_id, 0x41);
        assert_eq!(machine.context().mtu, 127);
        assert!(machine.heartbeat_armed());
    }

    #[test]
    fn test_service_query_failure_abandons() {
        let mut machine = scanning(ConnectMode::ManualSelect);
        machine.select_device(PEER);
        machine.handle_event(LinkEvent::ServiceQueryReady);
        machine.handle_event(LinkEvent::ServiceRecord { attempt: 1, rfcomm_channel: 3 });

        let intents =
            machine.handle_event(LinkEvent::ServiceQueryComplete { attempt: 1, status: 0x10 });
        assert_eq!(
            intents,
            vec![Intent::Report(LinkReport::Status {
                status: LinkStatus::ServiceQueryFailed,
                address: Some(PEER),
            })]
        );
        assert_eq!(machine.state(), LinkState::W4Scan);
    }

    #[test]
    fn test_missing_spp_record_abandons() {
        let mut machine = scanning(ConnectMode::ManualSelect);
        machine.select_device(PEER);
        machine.handle_event(LinkEvent::ServiceQueryReady);

        let intents =
            machine.handle_event(LinkEvent::ServiceQueryComplete { attempt: 1, status: 0 });
        assert!(!intents
            .iter()
            .any(|i| matches!(i, Intent::CreateChannel { .. })));
        assert_eq!(machine.state(), LinkState::W4Scan);
    }

    #[test]
    fn test_channel_open_failure_leaves_heartbeat_disarmed() {
        let mut machine = scanning(ConnectMode::ManualSelect);
        machine.select_device(PEER);
        machine.handle_event(LinkEvent::ServiceQueryReady);
        machine.handle_event(LinkEvent::ServiceRecord { attempt: 1, rfcomm_channel: 3 });
        machine.handle_event(LinkEvent::ServiceQueryComplete { attempt: 1, status: 0 });

        machine.handle_event(LinkEvent::ChannelOpened {
            attempt: 1,
            status: 0x04,
            channel_id: 0,
            mtu: 0,
        });
        assert_eq!(machine.context().channel_id, 0);
        assert!(!machine.heartbeat_armed());
        assert_eq!(machine.state(), LinkState::W4Scan);
    }

    #[test]
    fn test_payload_send_cycle() {
        let mut machine = connected();
        let payload = vec![0x01, 0x04, 0x00, 0x74, 0x10, 0x88, 0x00, 0x02];

        assert!(machine.submit_payload(payload.clone()));
        assert_eq!(machine.state(), LinkState::Send);

        assert_eq!(
            machine.heartbeat(),
            vec![Intent::RequestCanSendNow { channel_id: 0x41 }]
        );

        let intents = machine.handle_event(LinkEvent::CanSendNow { channel_id: 0x41 });
        assert_eq!(
            intents,
            vec![Intent::Send {
                channel_id: 0x41,
                data: payload
            }]
        );
        assert_eq!(machine.state(), LinkState::WaitCmd);
        assert!(machine.context().pending.is_none());
        assert!(machine.heartbeat().is_empty());
    }

    #[test]
    fn test_payload_dropped_without_channel() {
        let mut machine = scanning(ConnectMode::ManualSelect);
        assert!(!machine.submit_payload(vec![1, 2, 3]));
        assert_eq!(machine.state(), LinkState::W4ScanResults);
        assert!(machine.heartbeat().is_empty());
    }

    #[test]
    fn test_second_payload_dropped_while_sending() {
        let mut machine = connected();
        assert!(machine.submit_payload(vec![1]));
        assert!(!machine.submit_payload(vec![2]));
        assert_eq!(machine.context().pending, Some(vec![1]));
    }

    #[test]
    fn test_can_send_without_pending_is_ignored() {
        let mut machine = connected();
        assert!(machine
            .handle_event(LinkEvent::CanSendNow { channel_id: 0x41 })
            .is_empty());
    }

    #[test]
    fn test_close_mid_send_drops_payload() {
        let mut machine = connected();
        machine.submit_payload(vec![9, 9]);

        let intents = machine.handle_event(LinkEvent::ChannelClosed { channel_id: 0x41 });
        assert_eq!(
            intents,
            vec![Intent::Report(LinkReport::Status {
                status: LinkStatus::ChannelClosed,
                address: Some(PEER),
            })]
        );
        assert_eq!(machine.context().channel_id, 0);
        assert!(machine.context().pending.is_none());
        assert!(!machine.heartbeat_armed());
        assert_eq!(machine.state(), LinkState::W4Scan);
        assert!(machine.heartbeat().is_empty());
        assert!(machine
            .handle_event(LinkEvent::CanSendNow { channel_id: 0x41 })
            .is_empty());
    }

    #[test]
    fn test_stale_close_ignored() {
        let mut machine = connected();
        assert!(machine
            .handle_event(LinkEvent::ChannelClosed { channel_id: 0x07 })
            .is_empty());
        assert_eq!(machine.context().channel_id, 0x41);
    }

    #[test]
    fn test_reselect_disconnects_open_channel() {
        let mut machine = connected();
        let other = BdAddr::new([1, 2, 3, 4, 5, 6]);

        let intents = machine.select_device(other);
        assert_eq!(
            intents,
            vec![
                Intent::Disconnect { channel_id: 0x41 },
                Intent::RegisterServiceQuery
            ]
        );
        assert_eq!(machine.context().address, other);
        assert_eq!(machine.state(), LinkState::W4ScanComplete);

        // Old channel closing must not knock the new attempt back to W4Scan
        machine.handle_event(LinkEvent::ChannelClosed { channel_id: 0x41 });
        assert_eq!(machine.state(), LinkState::W4ScanComplete);
    }

    #[test]
    fn test_superseded_channel_open_is_closed() {
        let other = BdAddr::new([0x02; 6]);
        let mut machine = scanning(ConnectMode::ManualSelect);
        machine.select_device(PEER);
        machine.handle_event(LinkEvent::ServiceQueryReady);
        machine.handle_event(LinkEvent::ServiceRecord { attempt: 1, rfcomm_channel: 3 });
        machine.handle_event(LinkEvent::ServiceQueryComplete { attempt: 1, status: 0 });

        // Host switches device before the first channel comes up
        machine.select_device(other);
        assert_eq!(machine.attempt(), 2);
        let intents = machine.handle_event(LinkEvent::ServiceQueryReady);
        assert_eq!(
            intents,
            vec![Intent::QueryRfcommService {
                address: other,
                attempt: 2
            }]
        );

        let intents = machine.handle_event(LinkEvent::ChannelOpened {
            attempt: 1,
            status: 0,
            channel_id: 7,
            mtu: 127,
        });
        assert_eq!(intents, vec![Intent::Disconnect { channel_id: 7 }]);
        assert_eq!(machine.state(), LinkState::W4RfcommChannel);
        assert_eq!(machine.context().channel_id, 0);
        assert!(!machine.heartbeat_armed());

        // Late results of the first query are ignored too
        machine.handle_event(LinkEvent::ServiceRecord { attempt: 1, rfcomm_channel: 9 });
        assert!(machine
            .handle_event(LinkEvent::ServiceQueryComplete { attempt: 1, status: 0 })
            .is_empty());

        machine.handle_event(LinkEvent::ServiceRecord { attempt: 2, rfcomm_channel: 5 });
        let intents =
            machine.handle_event(LinkEvent::ServiceQueryComplete { attempt: 2, status: 0 });
        assert_eq!(
            intents,
            vec![Intent::CreateChannel {
                address: other,
                channel: 5,
                attempt: 2
            }]
        );

        machine.handle_event(LinkEvent::ChannelOpened {
            attempt: 2,
            status: 0,
            channel_id: 8,
            mtu: 127,
        });
        assert_eq!(machine.state(), LinkState::WaitCmd);
        assert_eq!(machine.context().channel_id, 8);
        assert_eq!(machine.context().address, other);
    }

    #[test]
    fn test_superseded_open_failure_keeps_current_attempt() {
        let other = BdAddr::new([0x02; 6]);
        let mut machine = scanning(ConnectMode::ManualSelect);
        machine.select_device(PEER);
        machine.handle_event(LinkEvent::ServiceQueryReady);
        machine.handle_event(LinkEvent::ServiceRecord { attempt: 1, rfcomm_channel: 3 });
        machine.handle_event(LinkEvent::ServiceQueryComplete { attempt: 1, status: 0 });
        machine.select_device(other);
        machine.handle_event(LinkEvent::ServiceQueryReady);

        let intents = machine.handle_event(LinkEvent::ChannelOpened {
            attempt: 1,
            status: 0x04,
            channel_id: 0,
            mtu: 0,
        });
        assert!(intents.is_empty());
        assert_eq!(machine.state(), LinkState::W4RfcommChannel);
    }

    #[test]
    fn test_name_arriving_in_later_report_is_found() {
        let mut machine = scanning(ConnectMode::ManualSelect);

        // First sighting carries no name at all
        let intents = machine.handle_event(LinkEvent::AdvertisingReport {
            address: PEER,
            address_type: AddressType::Public,
            data: vec![0x02, 0x01, 0x06],
        });
        assert!(intents.is_empty());

        let intents = machine.handle_event(advert(PEER, "DitooPro"));
        assert_eq!(
            intents,
            vec![Intent::Report(LinkReport::DeviceFound {
                name: "DitooPro".to_string(),
                address: PEER,
            })]
        );
    }

    #[test]
    fn test_received_data_is_chunked() {
        let mut machine = connected();
        let data = vec![0x33; MAX_PAYLOAD + 10];

        let intents = machine.handle_event(LinkEvent::DataReceived {
            channel_id: 0x41,
            data,
        });
        assert_eq!(intents.len(), 2);
        assert_eq!(
            intents[1],
            Intent::Report(LinkReport::PeerData(vec![0x33; 10]))
        );
    }

    #[test]
    fn test_new_scan_session_forgets_addresses() {
        let mut machine = scanning(ConnectMode::ManualSelect);
        assert_eq!(machine.handle_event(advert(PEER, "DitooPro")).len(), 1);

        machine.select_device(PEER);
        machine.handle_event(LinkEvent::ServiceQueryReady);
        machine.handle_event(LinkEvent::ServiceQueryComplete { attempt: 1, status: 1 });
        assert_eq!(machine.state(), LinkState::W4Scan);

        machine.start_scan();
        assert_eq!(machine.handle_event(advert(PEER, "DitooPro")).len(), 1);
    }
}
