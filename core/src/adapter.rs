//! Radio adapter facade
//!
//! Defines the narrow asynchronous seam between the discovery core and the
//! platform radio stack. The core only ever talks to `RadioLink`; platform
//! crates (or the in-memory fake used in tests) implement it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// GATT service UUID advertised and scanned for by every node.
///
/// `99E91399-80ED-4943-9BCB-39C532A76023` — agreed out of band, never
/// negotiated.
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x99E91399_80ED_4943_9BCB_39C532A76023);

/// Read-only characteristic under [`SERVICE_UUID`] carrying the identity payload.
///
/// `99E91401-80ED-4943-9BCB-39C532A76023`
pub const IDENTITY_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x99E91401_80ED_4943_9BCB_39C532A76023);

/// Local adapter name included in advertisements.
pub const DEVICE_NAME: &str = "nearlink";

/// GATT response status for a successfully answered server request.
pub const GATT_SUCCESS: i32 = 0;

/// Raw platform failure code from an advertise-start or scan-start callback.
///
/// Kept opaque at this boundary; classification into known/unknown failures
/// happens in the advertiser and scanner code tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RadioCode(pub i32);

impl fmt::Display for RadioCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors from transient per-device link operations
#[derive(Error, Debug, Clone)]
pub enum LinkError {
    #[error("Connect failed: {0}")]
    ConnectFailed(String),
    #[error("Link closed")]
    Disconnected,
    #[error("Service discovery failed: {0}")]
    DiscoveryFailed(String),
    #[error("Characteristic read failed: {0}")]
    ReadFailed(String),
}

/// Advertise power/latency mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdvertiseMode {
    /// Lowest duty cycle, longest discovery latency
    LowPower,
    /// Middle ground between power draw and latency
    Balanced,
    /// Highest duty cycle, fastest discovery
    LowLatency,
    /// Mode string not understood; platform settings fall back to low latency
    Unrecognized,
}

impl AdvertiseMode {
    /// Parse the wire representation of a mode.
    ///
    /// Anything other than the three known strings maps to `Unrecognized`.
    pub fn parse(mode: &str) -> Self {
        match mode {
            "low_power" => AdvertiseMode::LowPower,
            "balanced" => AdvertiseMode::Balanced,
            "low_latency" => AdvertiseMode::LowLatency,
            _ => AdvertiseMode::Unrecognized,
        }
    }
}

impl fmt::Display for AdvertiseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdvertiseMode::LowPower => write!(f, "low_power"),
            AdvertiseMode::Balanced => write!(f, "balanced"),
            AdvertiseMode::LowLatency => write!(f, "low_latency"),
            AdvertiseMode::Unrecognized => write!(f, "unrecognized"),
        }
    }
}

/// Everything the platform needs to start advertising
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvertiseRequest {
    /// Power/latency mode for the platform advertise settings
    pub mode: AdvertiseMode,
    /// Service UUID declared in the advertisement
    pub service_uuid: Uuid,
    /// Device name included in the advertisement
    pub local_name: String,
    /// Whether peers may open connections to us
    pub connectable: bool,
    /// Whether to include the tx power level in the advertisement
    pub include_tx_power: bool,
}

impl AdvertiseRequest {
    /// Build the standard identity-service advertisement.
    ///
    /// Connectable with tx power included, as peers must be able to connect
    /// back and estimate range.
    pub fn identity_service(mode: AdvertiseMode) -> Self {
        Self {
            mode,
            service_uuid: SERVICE_UUID,
            local_name: DEVICE_NAME.to_string(),
            connectable: true,
            include_tx_power: true,
        }
    }
}

/// Service UUIDs a scan should match on
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanFilter {
    /// Advertisements must declare at least one of these
    pub service_uuids: Vec<Uuid>,
}

impl ScanFilter {
    /// Filter for a single service UUID
    pub fn for_service(service_uuid: Uuid) -> Self {
        Self {
            service_uuids: vec![service_uuid],
        }
    }

    /// Check whether an advertisement's declared services pass the filter.
    ///
    /// An empty filter matches nothing; a sighting with no declared services
    /// never matches.
    pub fn matches(&self, advertised: &[Uuid]) -> bool {
        self.service_uuids.iter().any(|u| advertised.contains(u))
    }
}

/// One observed advertisement from the scan stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sighting {
    /// Stable hardware address of the advertiser
    pub address: String,
    /// Advertised device name, if any
    pub name: Option<String>,
    /// Signal strength in dBm
    pub rssi: i16,
    /// Whether the advertisement is connectable
    pub connectable: bool,
    /// Service UUIDs declared in the advertisement
    pub service_uuids: Vec<Uuid>,
}

/// Events on the scan stream returned by [`RadioLink::start_scan`]
#[derive(Debug, Clone)]
pub enum ScanEvent {
    /// A device advertisement was observed
    Sighting(Sighting),
    /// The platform scan failed; the stream ends after this event
    Failed(RadioCode),
}

/// Characteristic exposed by the local GATT server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacteristicDefinition {
    /// Characteristic UUID
    pub uuid: Uuid,
    /// Readable by connected peers
    pub readable: bool,
    /// Writable by connected peers
    pub writable: bool,
    /// Initial stored value
    pub value: Vec<u8>,
}

/// GATT service published by the local server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDefinition {
    /// Service UUID
    pub service_uuid: Uuid,
    /// Characteristics under the service
    pub characteristics: Vec<CharacteristicDefinition>,
}

impl ServiceDefinition {
    /// The identity service: one read-only characteristic holding `identity`.
    pub fn identity_service(identity: Vec<u8>) -> Self {
        Self {
            service_uuid: SERVICE_UUID,
            characteristics: vec![CharacteristicDefinition {
                uuid: IDENTITY_CHARACTERISTIC_UUID,
                readable: true,
                writable: false,
                value: identity,
            }],
        }
    }
}

/// Inbound requests from peers connected to the local GATT server
#[derive(Debug, Clone)]
pub enum ServerRequest {
    /// A peer is reading a characteristic
    Read {
        address: String,
        request_id: u32,
        characteristic: Uuid,
        offset: usize,
    },
    /// A peer wrote a characteristic
    Write {
        address: String,
        request_id: u32,
        characteristic: Uuid,
        value: Vec<u8>,
        response_needed: bool,
    },
    /// A peer wrote a descriptor
    DescriptorWrite {
        address: String,
        request_id: u32,
        descriptor: Uuid,
        value: Vec<u8>,
        response_needed: bool,
    },
    /// A peer finished (or aborted) a prepared write
    ExecuteWrite {
        address: String,
        request_id: u32,
        execute: bool,
    },
    /// A peer connected to or disconnected from the server
    ConnectionChange { address: String, connected: bool },
    /// A previously queued notification went out
    NotificationSent { address: String, status: i32 },
}

/// Asynchronous facade over the platform radio.
///
/// All operations complete via futures; long-lived subscriptions (scanning,
/// the GATT server) are returned as bounded mpsc streams. Implementations
/// must not block and must make `stop_*`/`close_server`/`disconnect`
/// idempotent.
#[async_trait]
pub trait RadioLink: Send + Sync {
    /// Begin broadcasting. Resolves when the platform reports the
    /// advertise-start outcome; `Err` carries the raw failure code.
    async fn start_advertising(&self, request: AdvertiseRequest) -> Result<(), RadioCode>;

    /// Stop broadcasting. No-op when not advertising.
    async fn stop_advertising(&self);

    /// Begin scanning with the given filter. The returned stream yields
    /// sightings until [`RadioLink::stop_scan`] is called or a
    /// [`ScanEvent::Failed`] terminates it.
    async fn start_scan(&self, filter: ScanFilter) -> Result<mpsc::Receiver<ScanEvent>, RadioCode>;

    /// Cancel the platform scan subscription. No-op when not scanning.
    async fn stop_scan(&self);

    /// Open a transient connection to a peer.
    async fn connect(&self, address: &str) -> Result<(), LinkError>;

    /// Enumerate the services offered by a connected peer.
    async fn discover_services(&self, address: &str) -> Result<Vec<Uuid>, LinkError>;

    /// Read a characteristic value from a connected peer.
    async fn read_characteristic(
        &self,
        address: &str,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Vec<u8>, LinkError>;

    /// Tear down a transient connection. Best effort, idempotent.
    async fn disconnect(&self, address: &str);

    /// Publish a GATT service and return the stream of inbound requests.
    async fn open_server(
        &self,
        definition: ServiceDefinition,
    ) -> Result<mpsc::Receiver<ServerRequest>, RadioCode>;

    /// Clear published services and close the server. Idempotent.
    async fn close_server(&self);

    /// Answer a server request, echoing its transaction id.
    async fn send_response(&self, address: &str, request_id: u32, status: i32, value: Vec<u8>);
}
