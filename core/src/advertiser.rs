//! Advertiser
//!
//! Publishes this node's identity service over the radio and classifies
//! platform advertise-start failures. The identity payload itself is served by
//! the GATT responder; the advertisement only declares the service UUID and
//! device name.

use crate::adapter::{AdvertiseMode, AdvertiseRequest, RadioCode, RadioLink};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Classified advertise-start failure.
///
/// `reason` is empty exactly when the platform code fell outside the known
/// enumeration, in which case `unknown_error` is set.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Advertisement failed: {reason}")]
pub struct AdvertiseFailure {
    /// Platform failure name, empty for unknown codes
    pub reason: String,
    /// True when the code fell outside the known enumeration
    pub unknown_error: bool,
}

impl AdvertiseFailure {
    /// Map a raw platform code to its failure name.
    pub fn from_code(code: RadioCode) -> Self {
        let reason = match code.0 {
            1 => "ADVERTISE_FAILED_DATA_TOO_LARGE",
            2 => "ADVERTISE_FAILED_TOO_MANY_ADVERTISERS",
            3 => "ADVERTISE_FAILED_ALREADY_STARTED",
            4 => "ADVERTISE_FAILED_INTERNAL_ERROR",
            5 => "ADVERTISE_FAILED_FEATURE_UNSUPPORTED",
            _ => "",
        };
        Self {
            reason: reason.to_string(),
            unknown_error: code.0 < 1 || code.0 > 5,
        }
    }

    /// Local already-started guard, same shape the platform would report.
    pub fn already_started() -> Self {
        Self::from_code(RadioCode(3))
    }
}

/// Drives the platform advertiser and tracks the process-wide advertising flag.
pub struct Advertiser {
    adapter: Arc<dyn RadioLink>,
    running: AtomicBool,
}

impl Advertiser {
    /// Create an advertiser over the given radio.
    pub fn new(adapter: Arc<dyn RadioLink>) -> Self {
        Self {
            adapter,
            running: AtomicBool::new(false),
        }
    }

    /// True while the advertisement is broadcasting.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start broadcasting the identity service.
    pub async fn start(&self, mode: AdvertiseMode) -> Result<(), AdvertiseFailure> {
        if self.is_running() {
            return Err(AdvertiseFailure::already_started());
        }

        let request = AdvertiseRequest::identity_service(mode);
        match self.adapter.start_advertising(request).await {
            Ok(()) => {
                self.running.store(true, Ordering::SeqCst);
                info!(%mode, "Advertisement successful");
                Ok(())
            }
            Err(code) => {
                self.running.store(false, Ordering::SeqCst);
                let failure = AdvertiseFailure::from_code(code);
                warn!(%code, unknown = failure.unknown_error, "{}", failure);
                Err(failure)
            }
        }
    }

    /// Stop broadcasting. Returns whether an advertisement was actually
    /// running; a stop while idle is a no-op.
    pub async fn stop(&self) -> bool {
        if self.running.swap(false, Ordering::SeqCst) {
            self.adapter.stop_advertising().await;
            info!("Advertisement Stopped");
            true
        } else {
            false
        }
    }
}
