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

//! USB host side: envelope stream in, encoded reports out.

use anyhow::{anyhow, Context, Result};
use async_channel::{Receiver, Sender};
use std::path::Path;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::protocol::{Envelope, EnvelopeStream};

/// Bytes requested from the host link per read.
const READ_CHUNK: usize = 512;

/// Timing for the host reader.
#[derive(Debug, Clone, Copy)]
pub struct HostSettings {
    /// Back-off after a read returned no data.
    pub poll_interval: Duration,
    /// How long to wait for room in the inbound queue.
    pub send_timeout: Duration,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(10),
            send_timeout: Duration::from_millis(1000),
        }
    }
}

/// Open the host serial device as independent reader and writer handles.
pub fn open_host_link(path: &Path) -> Result<(File, File)> {
    let file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    split_host_link(file)
}

/// Give the reader and the writer their own file handle.
///
/// A `tokio::fs::File` runs one blocking operation at a time, so a shared
/// handle parked in a read would hold back every write until the host
/// sends something.
pub fn split_host_link(file: std::fs::File) -> Result<(File, File)> {
    let writer = file.try_clone().context("Failed to duplicate host link handle")?;
    Ok((File::from_std(file), File::from_std(writer)))
}

/// Decode envelopes from the host and push them toward the Bluetooth side.
///
/// A zero-length read means no data yet, not end of stream. Returns only
/// on a read error or when the inbound queue is closed.
pub async fn run_host_reader<R>(
    mut reader: R,
    inbound: Sender<Envelope>,
    settings: HostSettings,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    info!("Host reader started");

    let mut stream = EnvelopeStream::new();
    let mut buf = vec![0u8; READ_CHUNK];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            tokio::time::sleep(settings.poll_interval).await;
            continue;
        }

        debug!("Host sent {} bytes", n);
        stream.extend(&buf[..n]);

        while let Some(result) = stream.next_envelope() {
            match result {
                Ok(envelope) => forward(&inbound, envelope, settings.send_timeout).await?,
                Err(e) => debug!("Skipped malformed host input: {}", e),
            }
        }
    }
}

/// Push with a bounded wait; a queue that stays full drops the envelope.
async fn forward(inbound: &Sender<Envelope>, envelope: Envelope, timeout: Duration) -> Result<()> {
    let kind = envelope.kind();
    match tokio::time::timeout(timeout, inbound.send(envelope)).await {
        Ok(Ok(())) => {
            debug!("Queued {} from host", kind.as_str());
            Ok(())
        }
        Ok(Err(_)) => Err(anyhow!("Inbound queue closed")),
        Err(_) => {
            warn!(
                "Inbound queue full for {:?}, dropping {}",
                timeout,
                kind.as_str()
            );
            Ok(())
        }
    }
}

/// Drain the outbound queue onto the host link, flushing per envelope.
///
/// Returns when the queue is closed, or on the first write error.
pub async fn run_host_writer<W>(mut writer: W, outbound: Receiver<Envelope>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    info!("Host writer started");

    while let Ok(envelope) = outbound.recv().await {
        let bytes = match envelope.to_wire() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Dropping unencodable envelope: {}", e);
                continue;
            }
        };

        writer.write_all(&bytes).await?;
        writer.flush().await?;
        debug!("Wrote {} bytes to host: {}", bytes.len(), hex::encode(&bytes));
    }

    info!("Outbound queue closed, host writer stopping");
    Ok(())
}
