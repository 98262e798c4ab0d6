//! In-process peripheral link
//!
//! Stands in for the radio when the handset manager is co-resident or when
//! tests need a deterministic central. The handle plays the central's part:
//! writes pushed into it come out as link events, and notification frames
//! the transport sends come out of the handle.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;
use visor_core::config::WirelessConfig;
use visor_core::errors::WirelessError;
use visor_core::{CentralId, VisorResult};

use super::{LinkEvent, PeripheralLink};

const HANDLE_BUFFER: usize = 32;

// ----------------------------------------------------------------------------
// Loopback Link
// ----------------------------------------------------------------------------

/// Link backed by channels instead of a radio
pub struct LoopbackLink {
    events: mpsc::Sender<LinkEvent>,
    writes: Arc<Mutex<mpsc::Receiver<(Vec<u8>, bool)>>>,
    notifications: mpsc::Sender<Vec<u8>>,
    forwarder: Option<JoinHandle<()>>,
    active: bool,
}

/// The central's end of a loopback link
pub struct LoopbackHandle {
    writes: mpsc::Sender<(Vec<u8>, bool)>,
    notifications: mpsc::Receiver<Vec<u8>>,
}

impl LoopbackLink {
    /// Create a link and the handle driving it
    pub fn pair(events: mpsc::Sender<LinkEvent>) -> (Self, LoopbackHandle) {
        let (write_tx, write_rx) = mpsc::channel(HANDLE_BUFFER);
        let (notify_tx, notify_rx) = mpsc::channel(HANDLE_BUFFER);
        let link = Self {
            events,
            writes: Arc::new(Mutex::new(write_rx)),
            notifications: notify_tx,
            forwarder: None,
            active: false,
        };
        let handle = LoopbackHandle {
            writes: write_tx,
            notifications: notify_rx,
        };
        (link, handle)
    }
}

#[async_trait::async_trait]
impl PeripheralLink for LoopbackLink {
    async fn start(&mut self, _config: &WirelessConfig) -> VisorResult<()> {
        if self.active {
            return Ok(());
        }

        let events = self.events.clone();
        let writes = Arc::clone(&self.writes);
        self.forwarder = Some(tokio::spawn(async move {
            let mut writes = writes.lock().await;
            let central = CentralId::loopback();
            if events
                .send(LinkEvent::CentralConnected {
                    central: central.clone(),
                })
                .await
                .is_err()
            {
                return;
            }
            while let Some((data, is_final)) = writes.recv().await {
                let event = LinkEvent::Write {
                    central: central.clone(),
                    data,
                    is_final,
                };
                if events.send(event).await.is_err() {
                    return;
                }
            }
            let _ = events
                .send(LinkEvent::CentralDisconnected { central })
                .await;
        }));
        self.active = true;
        debug!("Loopback link up");
        Ok(())
    }

    async fn stop(&mut self) -> VisorResult<()> {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        self.active = false;
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active
    }

    async fn notify(&mut self, frame: &[u8]) -> VisorResult<()> {
        if !self.active {
            return Err(WirelessError::NoCentral.into());
        }
        self.notifications
            .send(frame.to_vec())
            .await
            .map_err(|_| {
                WirelessError::NotifyFailed {
                    reason: "loopback handle dropped".to_string(),
                }
                .into()
            })
    }
}

impl Drop for LoopbackLink {
    fn drop(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }
}

impl LoopbackHandle {
    /// One simple write: its own final segment
    pub async fn write(&self, data: &[u8]) -> bool {
        self.writes.send((data.to_vec(), true)).await.is_ok()
    }

    /// One segment of a longer write transaction
    pub async fn write_segment(&self, data: &[u8], is_final: bool) -> bool {
        self.writes.send((data.to_vec(), is_final)).await.is_ok()
    }

    /// Next notification frame from the peripheral
    pub async fn next_notification(&mut self) -> Option<Vec<u8>> {
        self.notifications.recv().await
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_precedes_writes() {
        let (event_tx, mut event_rx) = mpsc::channel(8);
        let (mut link, handle) = LoopbackLink::pair(event_tx);
        link.start(&WirelessConfig::testing()).await.unwrap();

        assert!(handle.write(b"{}").await);

        let first = event_rx.recv().await.unwrap();
        assert!(matches!(first, LinkEvent::CentralConnected { .. }));
        let second = event_rx.recv().await.unwrap();
        assert!(matches!(
            second,
            LinkEvent::Write { data, is_final: true, .. } if data == b"{}"
        ));
    }

    #[tokio::test]
    async fn test_notify_reaches_handle() {
        let (event_tx, _event_rx) = mpsc::channel(8);
        let (mut link, mut handle) = LoopbackLink::pair(event_tx);
        link.start(&WirelessConfig::testing()).await.unwrap();

        link.notify(b"frame").await.unwrap();
        assert_eq!(handle.next_notification().await.unwrap(), b"frame");
    }

    #[tokio::test]
    async fn test_notify_before_start_is_refused() {
        let (event_tx, _event_rx) = mpsc::channel(8);
        let (mut link, _handle) = LoopbackLink::pair(event_tx);
        assert!(link.notify(b"frame").await.is_err());
    }

    #[tokio::test]
    async fn test_stop_then_start_resumes_forwarding() {
        let (event_tx, mut event_rx) = mpsc::channel(8);
        let (mut link, handle) = LoopbackLink::pair(event_tx);
        let config = WirelessConfig::testing();

        link.start(&config).await.unwrap();
        assert!(matches!(
            event_rx.recv().await.unwrap(),
            LinkEvent::CentralConnected { .. }
        ));
        link.stop().await.unwrap();
        assert!(!link.is_active());

        link.start(&config).await.unwrap();
        assert!(matches!(
            event_rx.recv().await.unwrap(),
            LinkEvent::CentralConnected { .. }
        ));
        assert!(handle.write(b"{}").await);
        assert!(matches!(
            event_rx.recv().await.unwrap(),
            LinkEvent::Write { .. }
        ));
    }
}
