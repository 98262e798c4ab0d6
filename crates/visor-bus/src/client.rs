//! Bus client for edge apps
//!
//! Thin line-framed wrapper over the broker socket. Connecting sends the
//! hello frame; after that the peer exchanges typed messages.

use std::path::Path;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use visor_core::errors::BusError;
use visor_core::protocol::bus::{BusHello, BusMessage, CoreBusMessage};
use visor_core::{PackageId, VisorResult};

pub struct BusClient {
    package: PackageId,
    writer: OwnedWriteHalf,
    lines: Lines<BufReader<OwnedReadHalf>>,
}

impl BusClient {
    /// Connect and introduce this package to the broker
    pub async fn connect(socket_path: impl AsRef<Path>, package: PackageId) -> VisorResult<Self> {
        let stream = UnixStream::connect(socket_path.as_ref())
            .await
            .map_err(BusError::Io)?;
        let (read_half, writer) = stream.into_split();
        let lines = BufReader::new(read_half).lines();

        let hello = serde_json::to_string(&BusHello {
            package: package.clone(),
        })?;
        let mut client = Self {
            package,
            writer,
            lines,
        };
        client.send_line(&hello).await?;
        Ok(client)
    }

    /// Publish one message on the bus
    pub async fn send(&mut self, message: &BusMessage) -> VisorResult<()> {
        let line = serde_json::to_string(message)?;
        self.send_line(&line).await
    }

    /// Next core message addressed to this peer; `None` once the broker
    /// closes the connection
    pub async fn recv(&mut self) -> VisorResult<Option<CoreBusMessage>> {
        loop {
            let line = match self.lines.next_line().await.map_err(BusError::Io)? {
                Some(line) => line,
                None => return Ok(None),
            };
            if line.trim().is_empty() {
                continue;
            }
            return match serde_json::from_str(&line) {
                Ok(message) => Ok(Some(message)),
                Err(e) => Err(BusError::MalformedFrame {
                    reason: e.to_string(),
                }
                .into()),
            };
        }
    }

    pub fn package(&self) -> &PackageId {
        &self.package
    }

    async fn send_line(&mut self, line: &str) -> VisorResult<()> {
        self.writer
            .write_all(line.as_bytes())
            .await
            .map_err(BusError::Io)?;
        self.writer.write_all(b"\n").await.map_err(BusError::Io)?;
        Ok(())
    }
}
