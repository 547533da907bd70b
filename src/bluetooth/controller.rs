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

//! Bluetooth stack control operations and the BlueZ implementation.

use anyhow::{anyhow, Context, Result};
use bluer::rfcomm::{SocketAddr, Stream};
use bluer::{Adapter, AdapterEvent, Address, DiscoveryFilter, DiscoveryTransport, Session};
use futures::{pin_mut, StreamExt};
use std::collections::HashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::address::{AddressType, BdAddr};
use super::advertisement::name_structure;
use super::constants::{rfcomm, scan};
use super::link::{LinkEvent, ScanParameters};

/// Generic failure status reported in query/channel events.
const STATUS_FAILED: u8 = 0x01;

/// Read buffer for incoming RFCOMM data.
const READ_BUFFER_SIZE: usize = 1024;

/// Connection-control operations the link state machine drives.
///
/// Every operation is fire-and-forget: it must not block, and its outcome
/// arrives later as a [`LinkEvent`].
pub trait BluetoothController {
    /// Power the controller; completion is `LinkEvent::ControllerReady`.
    ///
    /// An error here is fatal for the Bluetooth loop.
    fn power_on(&mut self) -> Result<()>;

    fn set_scan_parameters(&mut self, params: ScanParameters) -> Result<()>;

    fn start_scan(&mut self) -> Result<()>;

    fn stop_scan(&mut self) -> Result<()>;

    /// Ask for a service query slot; granted by `LinkEvent::ServiceQueryReady`.
    fn register_service_query(&mut self) -> Result<()>;

    /// Results carry `attempt` back in `ServiceRecord` and `ServiceQueryComplete`.
    fn query_rfcomm_service(&mut self, address: BdAddr, uuid: Uuid, attempt: u16) -> Result<()>;

    /// The result carries `attempt` back in `ChannelOpened`.
    fn create_channel(&mut self, address: BdAddr, channel: u8, attempt: u16) -> Result<()>;

    fn disconnect(&mut self, channel_id: u16) -> Result<()>;

    fn send(&mut self, channel_id: u16, data: &[u8]) -> Result<()>;

    fn request_can_send_now(&mut self, channel_id: u16) -> Result<()>;
}

enum ChannelCommand {
    Send(Vec<u8>),
    Disconnect,
}

/// BlueZ backed controller.
pub struct BluerController {
    _session: Session,
    adapter: Adapter,
    event_tx: mpsc::UnboundedSender<LinkEvent>,
    scan_params: ScanParameters,
    scan_task: Option<JoinHandle<()>>,
    channels: HashMap<u16, mpsc::UnboundedSender<ChannelCommand>>,
    next_channel_id: u16,
    fallback_channel: u8,
}

impl BluerController {
    /// Open a BlueZ session on the default adapter.
    ///
    /// `fallback_channel` is reported as the SPP channel, since BlueZ does
    /// not expose SDP record contents over D-Bus.
    pub async fn new(event_tx: mpsc::UnboundedSender<LinkEvent>, fallback_channel: u8) -> Result<Self> {
        info!("Initializing Bluetooth controller...");

        let session = Session::new().await?;
        info!("BlueZ session created");

        let adapter = session.default_adapter().await?;
        info!("Using Bluetooth adapter: {}", adapter.name());

        if !adapter.is_powered().await? {
            info!("Powering on Bluetooth adapter...");
            adapter
                .set_powered(true)
                .await
                .with_context(|| format!("Failed to power on {}", adapter.name()))?;
        }

        let fallback_channel = if fallback_channel == 0 {
            rfcomm::DEFAULT_CHANNEL
        } else {
            fallback_channel
        };

        Ok(Self {
            _session: session,
            adapter,
            event_tx,
            scan_params: ScanParameters::default(),
            scan_task: None,
            channels: HashMap::new(),
            next_channel_id: 0,
            fallback_channel,
        })
    }

    fn emit(&self, event: LinkEvent) -> Result<()> {
        self.event_tx
            .send(event)
            .map_err(|_| anyhow!("Link event receiver dropped"))
    }

    fn allocate_channel_id(&mut self) -> u16 {
        loop {
            self.next_channel_id = self.next_channel_id.wrapping_add(1);
            if self.next_channel_id != 0 && !self.channels.contains_key(&self.next_channel_id) {
                return self.next_channel_id;
            }
        }
    }

    fn channel(&self, channel_id: u16) -> Result<&mpsc::UnboundedSender<ChannelCommand>> {
        self.channels
            .get(&channel_id)
            .filter(|tx| !tx.is_closed())
            .ok_or_else(|| anyhow!("RFCOMM channel 0x{:02x} is not open", channel_id))
    }
}

impl BluetoothController for BluerController {
    fn power_on(&mut self) -> Result<()> {
        // The adapter was powered when the controller was created.
        self.emit(LinkEvent::ControllerReady)
    }

    fn set_scan_parameters(&mut self, params: ScanParameters) -> Result<()> {
        // BlueZ picks its own interval/window; only the scan type applies.
        debug!(
            "Scan parameters: active={} interval={}ms window={}ms",
            params.active,
            scan::units_to_ms(params.interval),
            scan::units_to_ms(params.window)
        );
        self.scan_params = params;
        Ok(())
    }

    fn start_scan(&mut self) -> Result<()> {
        self.stop_scan()?;

        let adapter = self.adapter.clone();
        let event_tx = self.event_tx.clone();
        let params = self.scan_params;

        self.scan_task = Some(tokio::spawn(async move {
            if let Err(e) = scan_loop(adapter, params, event_tx).await {
                warn!("LE scan ended with error: {}", e);
            }
        }));
        Ok(())
    }

    fn stop_scan(&mut self) -> Result<()> {
        if let Some(task) = self.scan_task.take() {
            // Dropping the discovery stream stops discovery in BlueZ.
            task.abort();
        }
        Ok(())
    }

    fn register_service_query(&mut self) -> Result<()> {
        self.emit(LinkEvent::ServiceQueryReady)
    }

    fn query_rfcomm_service(&mut self, address: BdAddr, uuid: Uuid, attempt: u16) -> Result<()> {
        let adapter = self.adapter.clone();
        let event_tx = self.event_tx.clone();
        let channel = self.fallback_channel;

        tokio::spawn(async move {
            let uuids = async {
                let device = adapter.device(Address(address.octets()))?;
                device.uuids().await
            };

            let status = match uuids.await {
                Ok(Some(uuids)) if !uuids.contains(&uuid) => {
                    debug!("{} does not advertise {}", address, uuid);
                    0
                }
                Ok(_) => {
                    let _ = event_tx.send(LinkEvent::ServiceRecord {
                        attempt,
                        rfcomm_channel: channel,
                    });
                    0
                }
                Err(e) => {
                    warn!("Service lookup on {} failed: {}", address, e);
                    STATUS_FAILED
                }
            };

            let _ = event_tx.send(LinkEvent::ServiceQueryComplete { attempt, status });
        });

        Ok(())
    }

    fn create_channel(&mut self, address: BdAddr, channel: u8, attempt: u16) -> Result<()> {
        self.channels.retain(|_, tx| !tx.is_closed());

        let channel_id = self.allocate_channel_id();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        self.channels.insert(channel_id, cmd_tx);

        tokio::spawn(run_channel(
            Address(address.octets()),
            channel,
            attempt,
            channel_id,
            cmd_rx,
            self.event_tx.clone(),
        ));
        Ok(())
    }

    fn disconnect(&mut self, channel_id: u16) -> Result<()> {
        let tx = self
            .channels
            .remove(&channel_id)
            .ok_or_else(|| anyhow!("RFCOMM channel 0x{:02x} is not open", channel_id))?;
        let _ = tx.send(ChannelCommand::Disconnect);
        Ok(())
    }

    fn send(&mut self, channel_id: u16, data: &[u8]) -> Result<()> {
        self.channel(channel_id)?
            .send(ChannelCommand::Send(data.to_vec()))
            .map_err(|_| anyhow!("RFCOMM channel 0x{:02x} closed", channel_id))
    }

    fn request_can_send_now(&mut self, channel_id: u16) -> Result<()> {
        // The socket buffers writes, so an open channel is always ready.
        self.channel(channel_id)?;
        self.emit(LinkEvent::CanSendNow { channel_id })
    }
}

async fn scan_loop(
    adapter: Adapter,
    params: ScanParameters,
    event_tx: mpsc::UnboundedSender<LinkEvent>,
) -> Result<()> {
    debug!("Scan type: {}", if params.active { "active" } else { "passive" });
    adapter.set_discovery_filter(discovery_filter()).await?;

    // Changed devices are re-reported, so a name that shows up in a later
    // scan response or name resolution still reaches the link.
    let events = adapter.discover_devices_with_changes().await?;
    pin_mut!(events);
    info!("LE discovery running");

    while let Some(event) = events.next().await {
        if let AdapterEvent::DeviceAdded(addr) = event {
            match advertising_report(&adapter, addr).await {
                Ok(report) => {
                    if event_tx.send(report).is_err() {
                        break;
                    }
                }
                Err(e) => debug!("Skipping {}: {}", addr, e),
            }
        }
    }

    Ok(())
}

/// LE-only discovery that keeps reporting devices whose data changes.
fn discovery_filter() -> DiscoveryFilter {
    DiscoveryFilter {
        transport: DiscoveryTransport::Le,
        duplicate_data: true,
        ..Default::default()
    }
}

/// Rebuild advertising data from the properties BlueZ exposes.
async fn advertising_report(adapter: &Adapter, addr: Address) -> Result<LinkEvent> {
    let device = adapter.device(addr)?;

    let address_type = match device.address_type().await? {
        bluer::AddressType::LeRandom => AddressType::Random,
        _ => AddressType::Public,
    };

    let mut data = Vec::new();
    if let Some(structures) = device.advertising_data().await? {
        for (ad_type, value) in structures {
            if value.len() < u8::MAX as usize {
                data.push(value.len() as u8 + 1);
                data.push(ad_type);
                data.extend_from_slice(&value);
            }
        }
    }
    // Appended last so the resolved name wins over partial AD names.
    if let Some(name) = device.name().await? {
        data.extend(name_structure(&name));
    }

    Ok(LinkEvent::AdvertisingReport {
        address: BdAddr::new(addr.0),
        address_type,
        data,
    })
}

/// Owns one RFCOMM socket for its whole lifetime.
async fn run_channel(
    address: Address,
    channel: u8,
    attempt: u16,
    channel_id: u16,
    mut commands: mpsc::UnboundedReceiver<ChannelCommand>,
    event_tx: mpsc::UnboundedSender<LinkEvent>,
) {
    let stream = match Stream::connect(SocketAddr::new(address, channel)).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!("RFCOMM connect to {} channel {} failed: {}", address, channel, e);
            let _ = event_tx.send(LinkEvent::ChannelOpened {
                attempt,
                status: STATUS_FAILED,
                channel_id: 0,
                mtu: 0,
            });
            return;
        }
    };

    let _ = event_tx.send(LinkEvent::ChannelOpened {
        attempt,
        status: 0,
        channel_id,
        mtu: rfcomm::DEFAULT_MTU,
    });

    let (mut reader, mut writer) = stream.into_split();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        tokio::select! {
            read = reader.read(&mut buf) => match read {
                Ok(0) => {
                    info!("RFCOMM channel 0x{:02x} closed by remote", channel_id);
                    break;
                }
                Ok(n) => {
                    let _ = event_tx.send(LinkEvent::DataReceived {
                        channel_id,
                        data: buf[..n].to_vec(),
                    });
                }
                Err(e) => {
                    warn!("RFCOMM read error: {}", e);
                    break;
                }
            },
            command = commands.recv() => match command {
                Some(ChannelCommand::Send(data)) => {
                    if let Err(e) = writer.write_all(&data).await {
                        warn!("RFCOMM write error: {}", e);
                        break;
                    }
                    writer.flush().await.ok();
                }
                Some(ChannelCommand::Disconnect) | None => break,
            },
        }
    }

    let _ = event_tx.send(LinkEvent::ChannelClosed { channel_id });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discovery_filter_reports_changes() {
        let filter = discovery_filter();
        assert!(matches!(filter.transport, DiscoveryTransport::Le));
        assert!(filter.duplicate_data);
        assert!(filter.uuids.is_empty());
    }
}
