//! Fallback link for platforms without peripheral-role support

use tokio::sync::mpsc;
use tracing::warn;
use visor_core::config::WirelessConfig;
use visor_core::errors::WirelessError;
use visor_core::VisorResult;

use super::{LinkEvent, PeripheralLink};

// ----------------------------------------------------------------------------
// Fallback Implementation
// ----------------------------------------------------------------------------

/// Link that can never carry traffic
pub struct FallbackLink {
    #[allow(dead_code)]
    events: mpsc::Sender<LinkEvent>,
}

impl FallbackLink {
    pub fn new(events: mpsc::Sender<LinkEvent>) -> Self {
        Self { events }
    }
}

#[async_trait::async_trait]
impl PeripheralLink for FallbackLink {
    async fn start(&mut self, config: &WirelessConfig) -> VisorResult<()> {
        warn!(
            "BLE peripheral role is not supported on this platform; '{}' will not be \
             discoverable. Pair the handset on Linux with BlueZ, or use the loopback link.",
            config.device_name
        );
        Ok(())
    }

    async fn stop(&mut self) -> VisorResult<()> {
        Ok(())
    }

    fn is_active(&self) -> bool {
        false
    }

    async fn notify(&mut self, _frame: &[u8]) -> VisorResult<()> {
        Err(WirelessError::NoCentral.into())
    }
}
