//! Linux peripheral link over BlueZ
//!
//! Registers the manager-link GATT service and advertisement through bluer.
//! The central is identified by the device address on its writes; BlueZ
//! executes prepared-write transactions before delivery, so every write the
//! callback sees is a complete segment. A pairing agent rejects PIN and
//! passkey exchanges so bonding stays just-works.

use std::sync::{Arc, Mutex as StdMutex};

use bluer::adv::Advertisement;
use bluer::agent::{Agent, AgentHandle, ReqError};
use bluer::gatt::local::{
    Application, ApplicationHandle, Characteristic, CharacteristicNotifier, CharacteristicNotify,
    CharacteristicNotifyMethod, CharacteristicRead, CharacteristicWrite, CharacteristicWriteMethod,
    Service,
};
use bluer::{Adapter, AdapterEvent, AdapterProperty, Address, DeviceEvent, DeviceProperty};
use futures::{FutureExt, StreamExt};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use visor_core::config::WirelessConfig;
use visor_core::errors::WirelessError;
use visor_core::{CentralId, VisorResult};

use crate::protocol::{READ_BANNER, VISOR_CHARACTERISTIC_UUID, VISOR_SERVICE_UUID};

use super::{LinkEvent, PeripheralLink};

// ----------------------------------------------------------------------------
// Shared Callback State
// ----------------------------------------------------------------------------

/// State the GATT callbacks update from bluer's executor
#[derive(Default)]
struct CentralState {
    address: Option<Address>,
    mtu: u16,
}

// ----------------------------------------------------------------------------
// BlueZ Link
// ----------------------------------------------------------------------------

pub struct BlueZLink {
    events: mpsc::Sender<LinkEvent>,
    session: Option<bluer::Session>,
    adapter: Option<Adapter>,
    agent_handle: Option<AgentHandle>,
    app_handle: Option<ApplicationHandle>,
    adv_handle: Option<bluer::adv::AdvertisementHandle>,
    radio_watcher: Option<JoinHandle<()>>,
    notifier: Arc<Mutex<Option<CharacteristicNotifier>>>,
    central: Arc<StdMutex<CentralState>>,
    active: bool,
}

impl BlueZLink {
    pub fn new(events: mpsc::Sender<LinkEvent>) -> Self {
        Self {
            events,
            session: None,
            adapter: None,
            agent_handle: None,
            app_handle: None,
            adv_handle: None,
            radio_watcher: None,
            notifier: Arc::new(Mutex::new(None)),
            central: Arc::new(StdMutex::new(CentralState::default())),
            active: false,
        }
    }

    /// Open the BlueZ session and start watching the radio state
    async fn initialize(&mut self) -> VisorResult<()> {
        if self.session.is_some() {
            return Ok(());
        }

        let session = bluer::Session::new().await.map_err(|e| {
            WirelessError::RadioUnavailable {
                reason: format!("BlueZ session: {}", e),
            }
        })?;
        let adapter = session.default_adapter().await.map_err(|e| {
            WirelessError::RadioUnavailable {
                reason: format!("no adapter: {}", e),
            }
        })?;

        let mut adapter_events = adapter.events().await.map_err(|e| {
            WirelessError::RadioUnavailable {
                reason: format!("adapter events: {}", e),
            }
        })?;
        let events = self.events.clone();
        self.radio_watcher = Some(tokio::spawn(async move {
            while let Some(event) = adapter_events.next().await {
                if let AdapterEvent::PropertyChanged(AdapterProperty::Powered(powered)) = event {
                    debug!("Adapter power changed: {}", powered);
                    let _ = events
                        .send(LinkEvent::RadioStateChanged { available: powered })
                        .await;
                }
            }
        }));

        self.session = Some(session);
        self.adapter = Some(adapter);
        info!("BlueZ adapter initialized");
        Ok(())
    }

    /// Register the just-works pairing agent
    async fn register_agent(&mut self) -> VisorResult<()> {
        if self.agent_handle.is_some() {
            return Ok(());
        }
        let session = match self.session.as_ref() {
            Some(session) => session,
            None => return Ok(()),
        };

        let pin_events = self.events.clone();
        let passkey_events = self.events.clone();
        let confirm_events = self.events.clone();
        let agent = Agent {
            request_default: true,
            request_pin_code: Some(Box::new(move |req| {
                let events = pin_events.clone();
                async move {
                    let _ = events
                        .send(LinkEvent::PairingFailed {
                            reason: format!("PIN requested by {}", req.device),
                        })
                        .await;
                    Err(ReqError::Rejected)
                }
                .boxed()
            })),
            request_passkey: Some(Box::new(move |req| {
                let events = passkey_events.clone();
                async move {
                    let _ = events
                        .send(LinkEvent::PairingFailed {
                            reason: format!("passkey requested by {}", req.device),
                        })
                        .await;
                    Err(ReqError::Rejected)
                }
                .boxed()
            })),
            request_confirmation: Some(Box::new(move |req| {
                let events = confirm_events.clone();
                async move {
                    let _ = events
                        .send(LinkEvent::PairingFailed {
                            reason: format!("passkey confirmation requested by {}", req.device),
                        })
                        .await;
                    Err(ReqError::Rejected)
                }
                .boxed()
            })),
            request_authorization: Some(Box::new(|_req| async move { Ok(()) }.boxed())),
            authorize_service: Some(Box::new(|_req| async move { Ok(()) }.boxed())),
            ..Default::default()
        };

        let handle = session.register_agent(agent).await.map_err(|e| {
            WirelessError::PairingRejected {
                kind: format!("agent registration failed: {}", e),
            }
        })?;
        self.agent_handle = Some(handle);
        Ok(())
    }

    /// Build the single-characteristic GATT application
    fn build_application(&self, adapter: Adapter) -> Application {
        let write_events = self.events.clone();
        let central = Arc::clone(&self.central);
        let notifier_slot = Arc::clone(&self.notifier);

        Application {
            services: vec![Service {
                uuid: VISOR_SERVICE_UUID,
                primary: true,
                characteristics: vec![Characteristic {
                    uuid: VISOR_CHARACTERISTIC_UUID,
                    read: Some(CharacteristicRead {
                        read: true,
                        fun: Box::new(move |_req| async move { Ok(READ_BANNER.to_vec()) }.boxed()),
                        ..Default::default()
                    }),
                    write: Some(CharacteristicWrite {
                        write: true,
                        write_without_response: true,
                        method: CharacteristicWriteMethod::Fun(Box::new(move |new_value, req| {
                            let events = write_events.clone();
                            let central = Arc::clone(&central);
                            let adapter = adapter.clone();
                            async move {
                                forward_write(new_value, req, events, central, adapter).await;
                                Ok(())
                            }
                            .boxed()
                        })),
                        ..Default::default()
                    }),
                    notify: Some(CharacteristicNotify {
                        notify: true,
                        method: CharacteristicNotifyMethod::Fun(Box::new(move |notifier| {
                            let slot = Arc::clone(&notifier_slot);
                            async move {
                                debug!("Notification session started");
                                *slot.lock().await = Some(notifier);
                            }
                            .boxed()
                        })),
                        ..Default::default()
                    }),
                    ..Default::default()
                }],
                ..Default::default()
            }],
            ..Default::default()
        }
    }
}

/// Surface one characteristic write as link events
///
/// The first write from a new address adopts it as the central and starts a
/// disconnect watcher for it; an MTU different from the last seen one is
/// reported before the data.
async fn forward_write(
    data: Vec<u8>,
    req: bluer::gatt::local::CharacteristicWriteRequest,
    events: mpsc::Sender<LinkEvent>,
    central: Arc<StdMutex<CentralState>>,
    adapter: Adapter,
) {
    let address = req.device_address;
    let central_id = CentralId::new(address.to_string());

    let (is_new, mtu_changed) = {
        let mut state = match central.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        let is_new = state.address != Some(address);
        let mtu_changed = state.mtu != req.mtu;
        state.address = Some(address);
        state.mtu = req.mtu;
        (is_new, mtu_changed)
    };

    if is_new {
        let _ = events
            .send(LinkEvent::CentralConnected {
                central: central_id.clone(),
            })
            .await;
        watch_disconnect(adapter, address, events.clone(), central);
    }
    if mtu_changed && req.mtu > 0 {
        let _ = events
            .send(LinkEvent::MtuChanged {
                central: central_id.clone(),
                mtu: req.mtu as usize,
            })
            .await;
    }

    let _ = events
        .send(LinkEvent::Write {
            central: central_id,
            data,
            is_final: true,
        })
        .await;
}

/// Report when the adopted central drops the connection
fn watch_disconnect(
    adapter: Adapter,
    address: Address,
    events: mpsc::Sender<LinkEvent>,
    central: Arc<StdMutex<CentralState>>,
) {
    tokio::spawn(async move {
        let device = match adapter.device(address) {
            Ok(device) => device,
            Err(e) => {
                warn!("Cannot watch central {}: {}", address, e);
                return;
            }
        };
        let mut device_events = match device.events().await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Cannot watch central {}: {}", address, e);
                return;
            }
        };
        while let Some(event) = device_events.next().await {
            if let DeviceEvent::PropertyChanged(DeviceProperty::Connected(false)) = event {
                info!("Central {} disconnected", address);
                {
                    let mut state = match central.lock() {
                        Ok(state) => state,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    if state.address == Some(address) {
                        state.address = None;
                    }
                }
                let _ = events
                    .send(LinkEvent::CentralDisconnected {
                        central: CentralId::new(address.to_string()),
                    })
                    .await;
                break;
            }
        }
    });
}

#[async_trait::async_trait]
impl PeripheralLink for BlueZLink {
    async fn start(&mut self, config: &WirelessConfig) -> VisorResult<()> {
        self.initialize().await?;
        let adapter = match self.adapter.as_ref() {
            Some(adapter) => adapter.clone(),
            None => {
                return Err(WirelessError::RadioUnavailable {
                    reason: "adapter missing".to_string(),
                }
                .into())
            }
        };

        if !adapter.is_powered().await.unwrap_or(false) {
            // The radio watcher reports when power returns.
            return Err(WirelessError::RadioUnavailable {
                reason: "adapter powered off".to_string(),
            }
            .into());
        }

        if let Err(e) = adapter.set_alias(config.device_name.clone()).await {
            warn!("Could not set adapter alias: {}", e);
        }
        self.register_agent().await?;

        let app = self.build_application(adapter.clone());
        let app_handle = adapter.serve_gatt_application(app).await.map_err(|e| {
            WirelessError::AdvertisingFailed {
                reason: format!("GATT registration: {}", e),
            }
        })?;

        let advertisement = Advertisement {
            advertisement_type: bluer::adv::Type::Peripheral,
            service_uuids: vec![VISOR_SERVICE_UUID].into_iter().collect(),
            discoverable: Some(true),
            local_name: Some(config.device_name.clone()),
            ..Default::default()
        };
        let adv_handle = adapter.advertise(advertisement).await.map_err(|e| {
            WirelessError::AdvertisingFailed {
                reason: format!("advertise: {}", e),
            }
        })?;

        self.app_handle = Some(app_handle);
        self.adv_handle = Some(adv_handle);
        self.active = true;
        info!("Advertising as '{}'", config.device_name);
        Ok(())
    }

    async fn stop(&mut self) -> VisorResult<()> {
        // Dropping the handles unregisters the advertisement and service.
        self.adv_handle.take();
        self.app_handle.take();
        *self.notifier.lock().await = None;
        {
            let mut state = match self.central.lock() {
                Ok(state) => state,
                Err(poisoned) => poisoned.into_inner(),
            };
            state.address = None;
        }
        if self.active {
            self.active = false;
            info!("Stopped advertising");
        }
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active
    }

    async fn notify(&mut self, frame: &[u8]) -> VisorResult<()> {
        let mut slot = self.notifier.lock().await;
        let notifier = match slot.as_mut() {
            Some(notifier) => notifier,
            None => return Err(WirelessError::NoCentral.into()),
        };
        if let Err(e) = notifier.notify(frame.to_vec()).await {
            // The subscription is gone; drop the notifier with it.
            *slot = None;
            return Err(WirelessError::NotifyFailed {
                reason: e.to_string(),
            }
            .into());
        }
        Ok(())
    }
}

impl Drop for BlueZLink {
    fn drop(&mut self) {
        if let Some(watcher) = self.radio_watcher.take() {
            watcher.abort();
        }
    }
}
