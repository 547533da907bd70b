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

//! Bluetooth-side event loop.
//!
//! Owns the link state machine, the router and the controller. Stack events
//! and the heartbeat tick are the only inputs; nothing here awaits a queue.

use anyhow::Result;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::bluetooth::constants::SPP_UUID;
use crate::bluetooth::controller::BluetoothController;
use crate::bluetooth::link::{Intent, LinkEvent, LinkMachine};
use crate::router::Router;

/// Status fed back into the machine when an operation fails synchronously.
const OPERATION_FAILED: u8 = 0x1F;

/// The Bluetooth execution context.
pub struct Bridge<C> {
    machine: LinkMachine,
    router: Router,
    controller: C,
}

impl<C: BluetoothController> Bridge<C> {
    pub fn new(machine: LinkMachine, router: Router, controller: C) -> Self {
        Self {
            machine,
            router,
            controller,
        }
    }

    pub fn machine(&self) -> &LinkMachine {
        &self.machine
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn controller(&self) -> &C {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut C {
        &mut self.controller
    }

    /// Power up the controller. Readiness arrives as an event.
    pub fn start(&mut self) -> Result<()> {
        info!("Powering on Bluetooth controller");
        self.controller.power_on()
    }

    /// Feed one stack event through the state machine.
    pub fn handle_event(&mut self, event: LinkEvent) {
        let intents = self.machine.handle_event(event);
        self.apply(intents);
    }

    /// Heartbeat: drain one host command, then poll send readiness.
    pub fn tick(&mut self) {
        let intents = self.router.poll_inbound(&mut self.machine);
        self.apply(intents);

        let intents = self.machine.heartbeat();
        self.apply(intents);
    }

    fn apply(&mut self, intents: Vec<Intent>) {
        let mut queue: VecDeque<Intent> = intents.into();

        while let Some(intent) = queue.pop_front() {
            let fallback = failure_event(&intent);
            if let Err(e) = self.execute(intent) {
                warn!("Bluetooth operation failed: {}", e);
                if let Some(event) = fallback {
                    queue.extend(self.machine.handle_event(event));
                }
            }
        }
    }

    fn execute(&mut self, intent: Intent) -> Result<()> {
        match intent {
            Intent::SetScanParameters(params) => self.controller.set_scan_parameters(params),
            Intent::StartScan => self.controller.start_scan(),
            Intent::StopScan => self.controller.stop_scan(),
            Intent::RegisterServiceQuery => self.controller.register_service_query(),
            Intent::QueryRfcommService { address, attempt } => {
                self.controller.query_rfcomm_service(address, SPP_UUID, attempt)
            }
            Intent::CreateChannel {
                address,
                channel,
                attempt,
            } => self.controller.create_channel(address, channel, attempt),
            Intent::Disconnect { channel_id } => self.controller.disconnect(channel_id),
            Intent::Send { channel_id, data } => {
                info!("Sending {} bytes on channel 0x{:02x}", data.len(), channel_id);
                self.controller.send(channel_id, &data)
            }
            Intent::RequestCanSendNow { channel_id } => {
                self.controller.request_can_send_now(channel_id)
            }
            Intent::Report(report) => {
                self.router.publish(report);
                Ok(())
            }
        }
    }

    /// Run until the stack's event stream ends.
    pub async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<LinkEvent>,
        heartbeat_period: Duration,
    ) -> Result<()> {
        self.start()?;

        let mut heartbeat = tokio::time::interval(heartbeat_period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        info!("Bluetooth event stream closed");
                        break;
                    }
                },
                _ = heartbeat.tick() => self.tick(),
            }
        }

        Ok(())
    }
}

/// Event that abandons the attempt when `intent` cannot be issued at all.
fn failure_event(intent: &Intent) -> Option<LinkEvent> {
    match intent {
        Intent::QueryRfcommService { attempt, .. } => Some(LinkEvent::ServiceQueryComplete {
            attempt: *attempt,
            status: OPERATION_FAILED,
        }),
        Intent::CreateChannel { attempt, .. } => Some(LinkEvent::ChannelOpened {
            attempt: *attempt,
            status: OPERATION_FAILED,
            channel_id: 0,
            mtu: 0,
        }),
        _ => None,
    }
}
