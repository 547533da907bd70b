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

//! Ditoo Bridge

use anyhow::Result;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ditoo_bridge::bluetooth::{BluerController, LinkMachine};
use ditoo_bridge::protocol::Envelope;
use ditoo_bridge::router::Router;
use ditoo_bridge::usb::{open_host_link, run_host_reader, run_host_writer};
use ditoo_bridge::{Bridge, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ditoo_bridge=info".parse()?),
        )
        .init();

    info!("Starting Ditoo Bridge v{}...", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Config::load()?;
    info!(
        "Configuration loaded: target '{}', mode {:?}",
        config.bluetooth.target_name, config.bluetooth.connect_mode
    );

    // Host -> Bluetooth and Bluetooth -> host
    let (inbound_tx, inbound_rx) = async_channel::bounded::<Envelope>(config.queues.depth);
    let (outbound_tx, outbound_rx) = async_channel::bounded::<Envelope>(config.queues.depth);

    let (event_tx, event_rx) = tokio::sync::mpsc::unbounded_channel();
    let controller = BluerController::new(event_tx, config.bluetooth.rfcomm_channel).await?;

    let machine = LinkMachine::new(config.bluetooth.link_settings());
    let bridge = Bridge::new(machine, Router::new(inbound_rx, outbound_tx), controller);

    let (reader, writer) = open_host_link(&config.usb.device_path)?;
    info!("USB host link: {}", config.usb.device_path.display());

    let mut bluetooth_task =
        tokio::spawn(bridge.run(event_rx, config.bluetooth.heartbeat_period()));
    let mut reader_task = tokio::spawn(run_host_reader(
        reader,
        inbound_tx,
        config.usb.host_settings(),
    ));
    let mut writer_task = tokio::spawn(run_host_writer(writer, outbound_rx));

    info!("Ready.");

    tokio::select! {
        result = &mut bluetooth_task => log_exit("Bluetooth loop", result),
        result = &mut reader_task => log_exit("Host reader", result),
        result = &mut writer_task => log_exit("Host writer", result),
        _ = tokio::signal::ctrl_c() => info!("Shutdown signal received"),
    }

    bluetooth_task.abort();
    reader_task.abort();
    writer_task.abort();

    info!("Ditoo Bridge stopped");
    Ok(())
}

fn log_exit(name: &str, result: Result<Result<()>, tokio::task::JoinError>) {
    match result {
        Ok(Ok(())) => info!("{} finished", name),
        Ok(Err(e)) => error!("{} failed: {:#}", name, e),
        Err(e) => error!("{} panicked: {}", name, e),
    }
}
