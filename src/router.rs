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

//! Command routing between the queues and the link state machine.

use async_channel::{Receiver, Sender, TryRecvError, TrySendError};
use tracing::{debug, warn};

use crate::bluetooth::address::{BdAddr, BD_ADDR_LEN};
use crate::bluetooth::constants::MAX_NAME_LEN;
use crate::bluetooth::link::{Intent, LinkMachine, LinkReport};
use crate::protocol::{encode, CommandKind, Envelope, EnvelopeError};

/// Routes host commands into the link and link reports out to the host.
///
/// Runs on the Bluetooth side, so neither direction ever waits on a queue.
pub struct Router {
    inbound: Receiver<Envelope>,
    outbound: Sender<Envelope>,
    dropped: u64,
}

impl Router {
    pub fn new(inbound: Receiver<Envelope>, outbound: Sender<Envelope>) -> Self {
        Self {
            inbound,
            outbound,
            dropped: 0,
        }
    }

    /// Take at most one envelope off the inbound queue and apply it.
    pub fn poll_inbound(&mut self, machine: &mut LinkMachine) -> Vec<Intent> {
        match self.inbound.try_recv() {
            Ok(envelope) => self.dispatch(envelope, machine),
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => Vec::new(),
        }
    }

    /// Apply one host command to the link.
    pub fn dispatch(&mut self, envelope: Envelope, machine: &mut LinkMachine) -> Vec<Intent> {
        match envelope.kind() {
            CommandKind::ListDevices => machine.start_scan(),
            CommandKind::SelectDevice => match BdAddr::from_slice(envelope.payload()) {
                Some(address) => machine.select_device(address),
                None => {
                    warn!(
                        "SELECT_DEVICE needs {} address bytes, got {}",
                        BD_ADDR_LEN,
                        envelope.len()
                    );
                    Vec::new()
                }
            },
            CommandKind::PeerPayload => {
                machine.submit_payload(envelope.into_payload());
                Vec::new()
            }
            other => {
                debug!("Ignoring {} from host", other.as_str());
                Vec::new()
            }
        }
    }

    /// Push a report toward the host. A full queue drops the report.
    pub fn publish(&mut self, report: LinkReport) {
        let envelope = match report_envelope(&report) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Failed to encode report: {}", e);
                return;
            }
        };

        match self.outbound.try_send(envelope) {
            Ok(()) => {}
            Err(TrySendError::Full(envelope)) => {
                self.dropped += 1;
                debug!(
                    "Outbound queue full, dropping {} envelope",
                    envelope.kind().as_str()
                );
            }
            Err(TrySendError::Closed(_)) => warn!("Outbound queue closed"),
        }
    }

    /// Reports dropped because the outbound queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// Convert a link report into the envelope sent to the host.
///
/// Device-found results are pre-encoded and wrapped in a raw envelope.
pub fn report_envelope(report: &LinkReport) -> Result<Envelope, EnvelopeError> {
    match report {
        LinkReport::DeviceFound { name, address } => {
            let name = &name.as_bytes()[..name.len().min(MAX_NAME_LEN)];
            let mut payload = Vec::with_capacity(1 + name.len() + BD_ADDR_LEN);
            payload.push(name.len() as u8);
            payload.extend_from_slice(name);
            payload.extend_from_slice(address.as_bytes());

            Envelope::raw(encode(CommandKind::DeviceFound, &payload)?)
        }
        LinkReport::PeerData(data) => Envelope::new(CommandKind::PeerPayload, data.clone()),
        LinkReport::Status { status, address } => {
            let mut payload = vec![status.as_u8()];
            if let Some(address) = address {
                payload.extend_from_slice(address.as_bytes());
            }
            Envelope::new(CommandKind::LinkStatus, payload)
        }
    }
}

/// Split a DEVICE_FOUND payload into name and address.
pub fn parse_device_found(payload: &[u8]) -> Option<(String, BdAddr)> {
    let (&name_len, rest) = payload.split_first()?;
    let name_len = name_len as usize;
    if rest.len() != name_len + BD_ADDR_LEN {
        return None;
    }

    let name = String::from_utf8_lossy(&rest[..name_len]).into_owned();
    let address = BdAddr::from_slice(&rest[name_len..])?;
    Some((name, address))
}
