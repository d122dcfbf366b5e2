//! nearlink-core — peer discovery over a short-range radio link
//!
//! Finds nearby devices advertising the shared identity service, connects to
//! each one once to read its identity payload, tracks presence until devices
//! go out of range, and serves this node's own identity to peers doing the
//! same. The platform radio is reached exclusively through the
//! [`adapter::RadioLink`] facade; everything above it is portable core logic.

pub mod adapter;
pub mod advertiser;
pub mod events;
pub mod orchestrator;
pub mod registry;
pub mod responder;
pub mod scanner;
pub mod service;
pub mod sweeper;

pub use adapter::{
    AdvertiseMode, AdvertiseRequest, LinkError, RadioCode, RadioLink, ScanEvent, ScanFilter,
    ServerRequest, ServiceDefinition, Sighting, DEVICE_NAME, IDENTITY_CHARACTERISTIC_UUID,
    SERVICE_UUID,
};
pub use advertiser::{AdvertiseFailure, Advertiser};
pub use events::{DiscoveryEvent, DiscoveryEvents, StartOutcome, StopOutcome};
pub use orchestrator::ConnectionOrchestrator;
pub use registry::{DeviceRegistry, DeviceState, DiscoveredDevice, RegistrySet, Upsert};
pub use responder::GattResponder;
pub use scanner::{ScanFailure, Scanner, ScannerEvent};
pub use service::{DiscoveryService, ServiceConfig, ServiceError};
pub use sweeper::PresenceSweeper;
