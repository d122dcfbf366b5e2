//! In-memory radio for integration tests.
//!
//! Implements `RadioLink` with scriptable per-peer behavior. Two fakes can be
//! linked back-to-back so one node's characteristic read is answered by the
//! other node's GATT responder, exercising both sides of the identity
//! exchange without hardware.
#![allow(dead_code)]

use async_trait::async_trait;
use nearlink_core::adapter::{
    AdvertiseRequest, LinkError, RadioCode, RadioLink, ScanEvent, ScanFilter, ServerRequest,
    ServiceDefinition, Sighting,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// Scripted link behavior for one remote address.
pub enum PeerBehavior {
    /// Connect succeeds, services enumerate, the read returns `payload`.
    Identity { services: Vec<Uuid>, payload: Vec<u8> },
    /// Connect is refused outright.
    ConnectRefused,
    /// Connect never completes (drives the timeout path).
    ConnectHangs,
    /// Connect succeeds but the peer offers only `services`.
    MissingService { services: Vec<Uuid> },
    /// Services enumerate but the characteristic read fails.
    ReadFails { services: Vec<Uuid> },
    /// Route connect/discover/read to the linked peer radio's GATT server.
    Loopback,
}

struct ServerState {
    definition: ServiceDefinition,
    requests: mpsc::Sender<ServerRequest>,
}

pub struct FakeRadio {
    local_address: String,
    advertise_failure: Mutex<Option<i32>>,
    pub advertise_requests: Mutex<Vec<AdvertiseRequest>>,
    pub advertising: AtomicBool,
    scan_start_failure: Mutex<Option<i32>>,
    scan_tx: Mutex<Option<mpsc::Sender<ScanEvent>>>,
    pub scanning: AtomicBool,
    behaviors: Mutex<HashMap<String, PeerBehavior>>,
    pub connect_calls: Mutex<Vec<String>>,
    server: Mutex<Option<ServerState>>,
    pending: Mutex<HashMap<u32, oneshot::Sender<(i32, Vec<u8>)>>>,
    next_request_id: AtomicU32,
    peers: Mutex<HashMap<String, Arc<FakeRadio>>>,
}

impl FakeRadio {
    pub fn new(local_address: &str) -> Arc<Self> {
        Arc::new(Self {
            local_address: local_address.to_string(),
            advertise_failure: Mutex::new(None),
            advertise_requests: Mutex::new(Vec::new()),
            advertising: AtomicBool::new(false),
            scan_start_failure: Mutex::new(None),
            scan_tx: Mutex::new(None),
            scanning: AtomicBool::new(false),
            behaviors: Mutex::new(HashMap::new()),
            connect_calls: Mutex::new(Vec::new()),
            server: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
            next_request_id: AtomicU32::new(1),
            peers: Mutex::new(HashMap::new()),
        })
    }

    pub fn fail_advertise_with(&self, code: i32) {
        *self.advertise_failure.lock() = Some(code);
    }

    pub fn fail_scan_start_with(&self, code: i32) {
        *self.scan_start_failure.lock() = Some(code);
    }

    pub fn script_peer(&self, address: &str, behavior: PeerBehavior) {
        self.behaviors.lock().insert(address.to_string(), behavior);
    }

    /// Wire `address` to another fake so link operations hit its GATT server.
    pub fn link_peer(&self, address: &str, radio: Arc<FakeRadio>) {
        self.behaviors
            .lock()
            .insert(address.to_string(), PeerBehavior::Loopback);
        self.peers.lock().insert(address.to_string(), radio);
    }

    pub async fn emit_sighting(&self, sighting: Sighting) {
        let tx = self.scan_tx.lock().clone();
        if let Some(tx) = tx {
            let _ = tx.send(ScanEvent::Sighting(sighting)).await;
        }
    }

    pub async fn emit_scan_failure(&self, code: i32) {
        let tx = self.scan_tx.lock().clone();
        if let Some(tx) = tx {
            let _ = tx.send(ScanEvent::Failed(RadioCode(code))).await;
        }
    }

    pub fn connect_count(&self, address: &str) -> usize {
        self.connect_calls
            .lock()
            .iter()
            .filter(|a| a.as_str() == address)
            .count()
    }

    pub fn advertise_attempts(&self) -> usize {
        self.advertise_requests.lock().len()
    }

    pub fn server_open(&self) -> bool {
        self.server.lock().is_some()
    }

    pub fn served_identity(&self) -> Option<Vec<u8>> {
        self.server
            .lock()
            .as_ref()
            .and_then(|s| s.definition.characteristics.first().map(|c| c.value.clone()))
    }
}

enum ConnectPlan {
    Accept,
    Refuse,
    Hang,
    NoServer,
}

enum DiscoverPlan {
    Services(Vec<Uuid>),
    Loopback,
    Nothing,
}

enum ReadPlan {
    Value(Vec<u8>),
    Fail,
    Loopback,
    Nothing,
}

#[async_trait]
impl RadioLink for FakeRadio {
    async fn start_advertising(&self, request: AdvertiseRequest) -> Result<(), RadioCode> {
        self.advertise_requests.lock().push(request);
        if let Some(code) = *self.advertise_failure.lock() {
            return Err(RadioCode(code));
        }
        self.advertising.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_advertising(&self) {
        self.advertising.store(false, Ordering::SeqCst);
    }

    async fn start_scan(&self, _filter: ScanFilter) -> Result<mpsc::Receiver<ScanEvent>, RadioCode> {
        if let Some(code) = *self.scan_start_failure.lock() {
            return Err(RadioCode(code));
        }
        let (tx, rx) = mpsc::channel(32);
        *self.scan_tx.lock() = Some(tx);
        self.scanning.store(true, Ordering::SeqCst);
        Ok(rx)
    }

    async fn stop_scan(&self) {
        self.scanning.store(false, Ordering::SeqCst);
        *self.scan_tx.lock() = None;
    }

    async fn connect(&self, address: &str) -> Result<(), LinkError> {
        self.connect_calls.lock().push(address.to_string());
        let plan = {
            let behaviors = self.behaviors.lock();
            match behaviors.get(address) {
                Some(PeerBehavior::ConnectRefused) => ConnectPlan::Refuse,
                Some(PeerBehavior::ConnectHangs) => ConnectPlan::Hang,
                Some(PeerBehavior::Loopback) => {
                    let reachable = self
                        .peers
                        .lock()
                        .get(address)
                        .map(|peer| peer.server_open())
                        .unwrap_or(false);
                    if reachable {
                        ConnectPlan::Accept
                    } else {
                        ConnectPlan::NoServer
                    }
                }
                _ => ConnectPlan::Accept,
            }
        };
        match plan {
            ConnectPlan::Accept => Ok(()),
            ConnectPlan::Refuse => Err(LinkError::ConnectFailed("connection refused".to_string())),
            ConnectPlan::Hang => {
                futures::future::pending::<()>().await;
                unreachable!()
            }
            ConnectPlan::NoServer => {
                Err(LinkError::ConnectFailed("peer not reachable".to_string()))
            }
        }
    }

    async fn discover_services(&self, address: &str) -> Result<Vec<Uuid>, LinkError> {
        let plan = {
            let behaviors = self.behaviors.lock();
            match behaviors.get(address) {
                Some(
                    PeerBehavior::Identity { services, .. }
                    | PeerBehavior::MissingService { services }
                    | PeerBehavior::ReadFails { services },
                ) => DiscoverPlan::Services(services.clone()),
                Some(PeerBehavior::Loopback) => DiscoverPlan::Loopback,
                _ => DiscoverPlan::Nothing,
            }
        };
        match plan {
            DiscoverPlan::Services(services) => Ok(services),
            DiscoverPlan::Loopback => {
                let peer = self.peers.lock().get(address).cloned();
                let services = peer.and_then(|p| {
                    p.server
                        .lock()
                        .as_ref()
                        .map(|s| vec![s.definition.service_uuid])
                });
                services.ok_or_else(|| LinkError::DiscoveryFailed("no services".to_string()))
            }
            DiscoverPlan::Nothing => Ok(Vec::new()),
        }
    }

    async fn read_characteristic(
        &self,
        address: &str,
        _service: Uuid,
        characteristic: Uuid,
    ) -> Result<Vec<u8>, LinkError> {
        let plan = {
            let behaviors = self.behaviors.lock();
            match behaviors.get(address) {
                Some(PeerBehavior::Identity { payload, .. }) => ReadPlan::Value(payload.clone()),
                Some(PeerBehavior::ReadFails { .. }) => ReadPlan::Fail,
                Some(PeerBehavior::Loopback) => ReadPlan::Loopback,
                _ => ReadPlan::Nothing,
            }
        };
        match plan {
            ReadPlan::Value(value) => Ok(value),
            ReadPlan::Fail => Err(LinkError::ReadFailed("read error".to_string())),
            ReadPlan::Loopback => {
                let peer = self
                    .peers
                    .lock()
                    .get(address)
                    .cloned()
                    .ok_or_else(|| LinkError::ReadFailed("unknown peer".to_string()))?;
                let request_id = peer.next_request_id.fetch_add(1, Ordering::SeqCst);
                let (tx, rx) = oneshot::channel();
                peer.pending.lock().insert(request_id, tx);
                let requests = peer
                    .server
                    .lock()
                    .as_ref()
                    .map(|s| s.requests.clone())
                    .ok_or_else(|| LinkError::ReadFailed("no server".to_string()))?;
                requests
                    .send(ServerRequest::Read {
                        address: self.local_address.clone(),
                        request_id,
                        characteristic,
                        offset: 0,
                    })
                    .await
                    .map_err(|_| LinkError::ReadFailed("server gone".to_string()))?;
                let (_status, value) = rx
                    .await
                    .map_err(|_| LinkError::ReadFailed("no response".to_string()))?;
                Ok(value)
            }
            ReadPlan::Nothing => Err(LinkError::ReadFailed("nothing to read".to_string())),
        }
    }

    async fn disconnect(&self, _address: &str) {}

    async fn open_server(
        &self,
        definition: ServiceDefinition,
    ) -> Result<mpsc::Receiver<ServerRequest>, RadioCode> {
        let (tx, rx) = mpsc::channel(32);
        *self.server.lock() = Some(ServerState {
            definition,
            requests: tx,
        });
        Ok(rx)
    }

    async fn close_server(&self) {
        *self.server.lock() = None;
    }

    async fn send_response(&self, _address: &str, request_id: u32, status: i32, value: Vec<u8>) {
        if let Some(tx) = self.pending.lock().remove(&request_id) {
            let _ = tx.send((status, value));
        }
    }
}

/// Install a compact subscriber so `RUST_LOG=debug` surfaces core tracing in
/// test output. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A connectable sighting of `address` declaring the identity service.
pub fn sighting_of(address: &str, rssi: i16) -> Sighting {
    Sighting {
        address: address.to_string(),
        name: Some("peer".to_string()),
        rssi,
        connectable: true,
        service_uuids: vec![nearlink_core::SERVICE_UUID],
    }
}

/// Poll `condition` every 10 ms until it holds, panicking after two seconds.
pub async fn wait_until<F: Fn() -> bool>(what: &str, condition: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
