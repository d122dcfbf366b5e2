//! Discovery service
//!
//! The explicit context object owning the registry, advertiser, scanner,
//! GATT responder, connection orchestrator, and presence sweeper. Callers
//! construct one per radio, drive it through the start/stop API, and consume
//! discovery events from the returned stream. One `stop` path idempotently
//! tears down whatever subset is currently active.

use crate::adapter::{AdvertiseMode, RadioLink, ScanFilter, SERVICE_UUID};
use crate::advertiser::{AdvertiseFailure, Advertiser};
use crate::events::{DiscoveryEvent, DiscoveryEvents, StartOutcome, StopOutcome};
use crate::orchestrator::ConnectionOrchestrator;
use crate::registry::{DeviceRegistry, Upsert};
use crate::responder::GattResponder;
use crate::scanner::{Scanner, ScannerEvent};
use crate::sweeper::PresenceSweeper;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Capacity of the internal sighting channel between scanner and registry.
const SIGHTING_CHANNEL_CAPACITY: usize = 32;

/// Errors raised when constructing a service
#[derive(Debug, Error, Clone)]
pub enum ServiceError {
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Tunables for a discovery service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Presence sweep tick
    pub sweep_interval: Duration,
    /// Staleness window after which an unseen ignore-set device is evicted
    pub out_of_range_after: Duration,
    /// Upper bound on a single connect attempt
    pub connect_timeout: Duration,
    /// Capacity of the caller-facing event channel
    pub event_capacity: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(2),
            out_of_range_after: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            event_capacity: 64,
        }
    }
}

impl ServiceConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), ServiceError> {
        if self.sweep_interval.is_zero() {
            return Err(ServiceError::Config(
                "sweep_interval must be non-zero".to_string(),
            ));
        }
        if self.out_of_range_after.is_zero() {
            return Err(ServiceError::Config(
                "out_of_range_after must be non-zero".to_string(),
            ));
        }
        if self.connect_timeout.is_zero() {
            return Err(ServiceError::Config(
                "connect_timeout must be non-zero".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(ServiceError::Config(
                "event_capacity must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Peer discovery and identity exchange over one radio.
pub struct DiscoveryService {
    config: ServiceConfig,
    registry: Arc<DeviceRegistry>,
    advertiser: Advertiser,
    scanner: Scanner,
    responder: GattResponder,
    orchestrator: Arc<ConnectionOrchestrator>,
    events_tx: mpsc::Sender<DiscoveryEvent>,
    sweeper_task: Mutex<Option<JoinHandle<()>>>,
    scan_consumer: Mutex<Option<JoinHandle<()>>>,
}

impl DiscoveryService {
    /// Build a service over the given radio, returning it together with the
    /// event stream the caller consumes.
    pub fn new(
        adapter: Arc<dyn RadioLink>,
        config: ServiceConfig,
    ) -> Result<(Self, DiscoveryEvents), ServiceError> {
        config.validate()?;

        let registry = Arc::new(DeviceRegistry::new());
        let (events_tx, events_rx) = mpsc::channel(config.event_capacity);
        let orchestrator = Arc::new(ConnectionOrchestrator::new(
            Arc::clone(&adapter),
            Arc::clone(&registry),
            events_tx.clone(),
            config.connect_timeout,
        ));

        let service = Self {
            advertiser: Advertiser::new(Arc::clone(&adapter)),
            scanner: Scanner::new(Arc::clone(&adapter)),
            responder: GattResponder::new(adapter),
            orchestrator,
            registry,
            events_tx,
            config,
            sweeper_task: Mutex::new(None),
            scan_consumer: Mutex::new(None),
        };
        Ok((service, DiscoveryEvents::new(events_rx)))
    }

    /// Shared handle to the device registry.
    pub fn registry(&self) -> Arc<DeviceRegistry> {
        Arc::clone(&self.registry)
    }

    /// True while the identity advertisement is broadcasting.
    pub fn is_advertising(&self) -> bool {
        self.advertiser.is_running()
    }

    /// True while the scan subscription is active.
    pub fn is_scanning(&self) -> bool {
        self.scanner.is_running()
    }

    /// Publish the identity service and start advertising it.
    ///
    /// The identity payload is what peers read back after connecting; it must
    /// be non-empty.
    pub async fn start_advertise(&self, identity: &[u8], mode: AdvertiseMode) -> StartOutcome {
        if identity.is_empty() {
            warn!("advertise rejected: empty identity");
            return StartOutcome::failure("identity must not be empty", false);
        }
        if self.advertiser.is_running() {
            let failure = AdvertiseFailure::already_started();
            return StartOutcome::failure(failure.to_string(), failure.unknown_error);
        }

        if let Err(code) = self.responder.start(identity.to_vec()).await {
            let failure = AdvertiseFailure::from_code(code);
            warn!(%code, "GATT server failed to open");
            return StartOutcome::failure(failure.to_string(), failure.unknown_error);
        }

        match self.advertiser.start(mode).await {
            Ok(()) => StartOutcome::success("Advertisement successful"),
            Err(failure) => {
                // No advertisement, no reason to keep serving reads.
                self.responder.stop().await;
                StartOutcome::failure(failure.to_string(), failure.unknown_error)
            }
        }
    }

    /// Stop advertising and close the identity service. Idempotent: a stop
    /// while idle still reports completion.
    pub async fn stop_advertise(&self) -> StopOutcome {
        if self.advertiser.stop().await {
            self.responder.stop().await;
        }
        StopOutcome::stopped("Advertisement Stopped")
    }

    /// Start scanning for peers advertising the identity service; also arms
    /// the presence sweeper.
    pub async fn start_scan(&self) -> StartOutcome {
        let (sink_tx, mut sink_rx) = mpsc::channel(SIGHTING_CHANNEL_CAPACITY);
        let filter = ScanFilter::for_service(SERVICE_UUID);

        if let Err(failure) = self.scanner.start(filter, sink_tx).await {
            return StartOutcome::failure(failure.to_string(), failure.unknown_error);
        }

        let registry = Arc::clone(&self.registry);
        let orchestrator = Arc::clone(&self.orchestrator);
        let events = self.events_tx.clone();
        let consumer = tokio::spawn(async move {
            while let Some(event) = sink_rx.recv().await {
                match event {
                    ScannerEvent::Sighting(sighting) => {
                        if registry.upsert_sighting(&sighting) == Upsert::New {
                            orchestrator.begin(sighting.address.clone());
                        }
                    }
                    ScannerEvent::Failed(failure) => {
                        let outcome =
                            StartOutcome::failure(failure.to_string(), failure.unknown_error);
                        let _ = events.send(DiscoveryEvent::ScanFailed(outcome)).await;
                        break;
                    }
                }
            }
        });
        *self.scan_consumer.lock() = Some(consumer);

        self.ensure_sweeper();
        StartOutcome::success("Scanning Started")
    }

    /// Cancel the scan subscription. The presence sweeper keeps running so
    /// already-tracked devices still age out; `stop` tears it down.
    pub async fn stop_scan(&self) -> StopOutcome {
        if let Some(consumer) = self.scan_consumer.lock().take() {
            consumer.abort();
        }
        self.scanner.stop().await;
        StopOutcome::stopped("Scanning Stopped")
    }

    /// Tear down everything that is running: sweeper, advertisement plus
    /// identity service, and scan. Reports `status: false` when nothing was
    /// running; calling it twice in succession is safe.
    pub async fn stop(&self) -> StopOutcome {
        let advertising = self.advertiser.is_running();
        let scanning = self.scanner.is_running();
        let sweeping = self.sweeper_active();

        if !advertising && !scanning && !sweeping {
            return StopOutcome::not_running("service not started");
        }

        if let Some(sweeper) = self.sweeper_task.lock().take() {
            sweeper.abort();
        }
        if let Some(consumer) = self.scan_consumer.lock().take() {
            consumer.abort();
        }

        let mut message = String::from("service stopped");
        if advertising {
            self.advertiser.stop().await;
            self.responder.stop().await;
            message.push_str(" Advertisement Stopped");
        }
        if scanning {
            self.scanner.stop().await;
            message.push_str(" Scanning Stopped");
        }

        self.registry.clear();
        info!("{message}");
        StopOutcome::stopped(message)
    }

    fn sweeper_active(&self) -> bool {
        self.sweeper_task
            .lock()
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    fn ensure_sweeper(&self) {
        let mut guard = self.sweeper_task.lock();
        let active = guard
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false);
        if !active {
            let sweeper = PresenceSweeper::new(
                Arc::clone(&self.registry),
                self.config.sweep_interval,
                self.config.out_of_range_after,
            );
            *guard = Some(sweeper.spawn(self.events_tx.clone()));
        }
    }
}
