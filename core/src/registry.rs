//! Device registry
//!
//! One arena of devices keyed by hardware address, with set membership
//! (active / ignore / blacklist) stored alongside each entry. Membership is a
//! field, not three separate collections, so a device can never appear in two
//! sets and moving it is a field write under the registry lock rather than a
//! remove-and-reinsert across lists.

use crate::adapter::Sighting;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::debug;

/// Lifecycle position of a device in the connection protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceState {
    /// Sighted, not yet contacted
    Discovered,
    /// Connection attempt in flight
    Connecting,
    /// Connected, enumerating services
    ServiceDiscovery,
    /// Expected service present, reading the identity characteristic
    ReadingCharacteristic,
    /// Success-path completion marker before the found callback
    DescriptorWritten,
    /// Identity payload read and decoded
    Found,
    /// Connect failed or timed out; eligible for retry after eviction
    ConnectionFailed,
    /// Peer lacks the expected service; terminal
    ServiceDiscoveryFailed,
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceState::Discovered => write!(f, "Discovered"),
            DeviceState::Connecting => write!(f, "Connecting"),
            DeviceState::ServiceDiscovery => write!(f, "ServiceDiscovery"),
            DeviceState::ReadingCharacteristic => write!(f, "ReadingCharacteristic"),
            DeviceState::DescriptorWritten => write!(f, "DescriptorWritten"),
            DeviceState::Found => write!(f, "Found"),
            DeviceState::ConnectionFailed => write!(f, "ConnectionFailed"),
            DeviceState::ServiceDiscoveryFailed => write!(f, "ServiceDiscoveryFailed"),
        }
    }
}

/// Registry set a device currently belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegistrySet {
    /// Tracked; connection in progress or just completed
    Active,
    /// Processed; tracked only for presence, evicted on staleness
    Ignore,
    /// Incompatible; never retried, never evicted
    Blacklist,
}

impl fmt::Display for RegistrySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistrySet::Active => write!(f, "active"),
            RegistrySet::Ignore => write!(f, "ignore"),
            RegistrySet::Blacklist => write!(f, "blacklist"),
        }
    }
}

/// One physical peer candidate
#[derive(Debug, Clone)]
pub struct DiscoveredDevice {
    /// Stable hardware address, unique key across the registry
    pub address: String,
    /// Advertised name from the most recent sighting
    pub name: Option<String>,
    /// Signal strength from the most recent sighting, dBm
    pub rssi: i16,
    /// Connectability from the most recent sighting
    pub connectable: bool,
    /// Identity payload, populated once the characteristic read succeeds
    pub identity: Option<Vec<u8>>,
    /// Monotonic timestamp of the most recent sighting
    pub last_seen: Instant,
    /// Connection-protocol state
    pub state: DeviceState,
}

impl DiscoveredDevice {
    /// Create a device from its first sighting.
    pub fn from_sighting(sighting: &Sighting) -> Self {
        Self {
            address: sighting.address.clone(),
            name: sighting.name.clone(),
            rssi: sighting.rssi,
            connectable: sighting.connectable,
            identity: None,
            last_seen: Instant::now(),
            state: DeviceState::Discovered,
        }
    }

    fn refresh(&mut self, sighting: &Sighting) {
        self.name = sighting.name.clone();
        self.rssi = sighting.rssi;
        self.connectable = sighting.connectable;
        self.last_seen = Instant::now();
    }
}

/// Outcome of feeding a sighting into the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    /// First sighting of this address; a connection attempt should follow
    New,
    /// Known address; presence fields refreshed, no connection attempt
    Refreshed,
}

struct DeviceEntry {
    device: DiscoveredDevice,
    set: RegistrySet,
}

/// Shared device arena, written concurrently by the scanner, the connection
/// orchestrator, and the presence sweeper.
///
/// One coarse mutex guards the whole arena; device counts are tens, not
/// thousands, and no caller holds the lock across an await point.
pub struct DeviceRegistry {
    inner: Mutex<HashMap<String, DeviceEntry>>,
}

impl DeviceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Insert a newly sighted device or refresh a known one.
    ///
    /// A known address is refreshed in place whichever set holds it; a
    /// blacklisted device keeps its membership and terminal state.
    pub fn upsert_sighting(&self, sighting: &Sighting) -> Upsert {
        let mut inner = self.inner.lock();
        match inner.get_mut(&sighting.address) {
            Some(entry) => {
                entry.device.refresh(sighting);
                Upsert::Refreshed
            }
            None => {
                debug!(address = %sighting.address, rssi = sighting.rssi, "device enters registry");
                inner.insert(
                    sighting.address.clone(),
                    DeviceEntry {
                        device: DiscoveredDevice::from_sighting(sighting),
                        set: RegistrySet::Active,
                    },
                );
                Upsert::New
            }
        }
    }

    /// Snapshot a device by address.
    pub fn find(&self, address: &str) -> Option<DiscoveredDevice> {
        self.inner.lock().get(address).map(|e| e.device.clone())
    }

    /// Which set currently holds the address, if any.
    pub fn membership(&self, address: &str) -> Option<RegistrySet> {
        self.inner.lock().get(address).map(|e| e.set)
    }

    /// Transfer a device to another set. Returns false for unknown addresses.
    pub fn move_to(&self, address: &str, set: RegistrySet) -> bool {
        let mut inner = self.inner.lock();
        match inner.get_mut(address) {
            Some(entry) => {
                debug!(address = %address, from = %entry.set, to = %set, "registry transfer");
                entry.set = set;
                true
            }
            None => false,
        }
    }

    /// Record a protocol state transition. Returns false for unknown addresses.
    pub fn set_state(&self, address: &str, state: DeviceState) -> bool {
        let mut inner = self.inner.lock();
        match inner.get_mut(address) {
            Some(entry) => {
                debug!(address = %address, from = %entry.device.state, to = %state, "device state");
                entry.device.state = state;
                true
            }
            None => false,
        }
    }

    /// Store the identity payload read from a device.
    pub fn set_identity(&self, address: &str, identity: Vec<u8>) -> bool {
        let mut inner = self.inner.lock();
        match inner.get_mut(address) {
            Some(entry) => {
                entry.device.identity = Some(identity);
                true
            }
            None => false,
        }
    }

    /// Remove a device entirely. Returns the removed device, if present.
    pub fn evict(&self, address: &str) -> Option<DiscoveredDevice> {
        let removed = self.inner.lock().remove(address).map(|e| e.device);
        if removed.is_some() {
            debug!(address = %address, "device evicted");
        }
        removed
    }

    /// Remove and return every ignore-set device whose last sighting is older
    /// than `window`. Active and blacklist entries are never touched.
    pub fn sweep_stale(&self, window: Duration) -> Vec<DiscoveredDevice> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let stale: Vec<String> = inner
            .iter()
            .filter(|(_, entry)| {
                entry.set == RegistrySet::Ignore
                    && now.saturating_duration_since(entry.device.last_seen) > window
            })
            .map(|(address, _)| address.clone())
            .collect();

        stale
            .into_iter()
            .filter_map(|address| {
                debug!(address = %address, "stale device swept");
                inner.remove(&address).map(|e| e.device)
            })
            .collect()
    }

    /// Number of devices in a given set.
    pub fn count_in(&self, set: RegistrySet) -> usize {
        self.inner.lock().values().filter(|e| e.set == set).count()
    }

    /// Total number of tracked devices.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// True when no devices are tracked.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Drop every entry (service shutdown).
    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
