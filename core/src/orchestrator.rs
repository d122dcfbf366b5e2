//! Connection orchestrator
//!
//! Drives the connect → service-discovery → characteristic-read sequence for
//! each newly discovered device. Steps for one device are strictly
//! sequential; devices proceed in parallel on independent tasks. Outcomes
//! feed back into the registry: transient failures park the device in the
//! ignore set for a later retry, a missing identity service blacklists it for
//! the service lifetime.

use crate::adapter::{LinkError, RadioLink, IDENTITY_CHARACTERISTIC_UUID, SERVICE_UUID};
use crate::events::DiscoveryEvent;
use crate::registry::{DeviceRegistry, DeviceState, RegistrySet};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Where a finished protocol run leaves the device.
enum ProtocolOutcome {
    /// Identity read; payload decoded
    Found(Vec<u8>),
    /// Transient link failure; retry after the device is next evicted and
    /// re-sighted
    Transient(LinkError),
    /// Peer does not offer the identity service; never retry
    Incompatible,
}

/// Per-device protocol driver.
pub struct ConnectionOrchestrator {
    adapter: Arc<dyn RadioLink>,
    registry: Arc<DeviceRegistry>,
    events: mpsc::Sender<DiscoveryEvent>,
    connect_timeout: Duration,
    in_flight: Mutex<HashSet<String>>,
}

impl ConnectionOrchestrator {
    /// Create an orchestrator over the shared registry and radio.
    pub fn new(
        adapter: Arc<dyn RadioLink>,
        registry: Arc<DeviceRegistry>,
        events: mpsc::Sender<DiscoveryEvent>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            adapter,
            registry,
            events,
            connect_timeout,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Number of protocol runs currently in flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Kick off the protocol for a newly discovered address.
    ///
    /// At most one run per address is ever outstanding; a second call while
    /// one is in flight is a no-op.
    pub fn begin(self: &Arc<Self>, address: String) {
        if !self.in_flight.lock().insert(address.clone()) {
            debug!(address = %address, "connection already in flight");
            return;
        }

        self.registry.set_state(&address, DeviceState::Connecting);
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.drive(&address).await;
            this.in_flight.lock().remove(&address);
        });
    }

    async fn drive(&self, address: &str) {
        let outcome = self.run_protocol(address).await;
        match outcome {
            ProtocolOutcome::Found(payload) => {
                self.registry.set_identity(address, payload.clone());
                self.registry.set_state(address, DeviceState::Found);
                self.registry.move_to(address, RegistrySet::Ignore);
                info!(
                    address = %address,
                    payload = %hex::encode(&payload),
                    "device found"
                );
                if let Some(device) = self.registry.find(address) {
                    let _ = self.events.send(DiscoveryEvent::DeviceFound(device)).await;
                }
            }
            ProtocolOutcome::Transient(error) => {
                warn!(address = %address, %error, "connection attempt failed");
                self.registry.set_state(address, DeviceState::ConnectionFailed);
                self.registry.move_to(address, RegistrySet::Ignore);
            }
            ProtocolOutcome::Incompatible => {
                warn!(address = %address, "identity service missing, blacklisting");
                self.registry
                    .set_state(address, DeviceState::ServiceDiscoveryFailed);
                self.registry.move_to(address, RegistrySet::Blacklist);
            }
        }
        self.adapter.disconnect(address).await;
    }

    async fn run_protocol(&self, address: &str) -> ProtocolOutcome {
        match tokio::time::timeout(self.connect_timeout, self.adapter.connect(address)).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => return ProtocolOutcome::Transient(error),
            Err(_) => {
                return ProtocolOutcome::Transient(LinkError::ConnectFailed(format!(
                    "no response within {:?}",
                    self.connect_timeout
                )))
            }
        }
        debug!(address = %address, "connected");
        self.registry.set_state(address, DeviceState::ServiceDiscovery);

        let services = match self.adapter.discover_services(address).await {
            Ok(services) => services,
            // The link dropping mid-enumeration says nothing about the peer's
            // services; treat it like a connect failure.
            Err(error) => return ProtocolOutcome::Transient(error),
        };
        if !services.contains(&SERVICE_UUID) {
            return ProtocolOutcome::Incompatible;
        }
        debug!(address = %address, "identity service present");
        self.registry
            .set_state(address, DeviceState::ReadingCharacteristic);

        match self
            .adapter
            .read_characteristic(address, SERVICE_UUID, IDENTITY_CHARACTERISTIC_UUID)
            .await
        {
            Ok(payload) => {
                self.registry
                    .set_state(address, DeviceState::DescriptorWritten);
                ProtocolOutcome::Found(payload)
            }
            Err(error) => ProtocolOutcome::Transient(error),
        }
    }
}
