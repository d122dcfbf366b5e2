//! Scanner
//!
//! Listens for advertisements matching the tracked service UUID and forwards
//! matching sightings downstream. The filter runs here, before anything
//! reaches the registry, so noisy environments cannot grow it with unrelated
//! devices.

use crate::adapter::{RadioCode, RadioLink, ScanEvent, ScanFilter, Sighting};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Classified scan-start failure.
///
/// Mirrors the advertiser's failure-reporting shape: `reason` is empty
/// exactly when the platform code fell outside the known enumeration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Scanning failed: {reason}")]
pub struct ScanFailure {
    /// Platform failure name, empty for unknown codes
    pub reason: String,
    /// True when the code fell outside the known enumeration
    pub unknown_error: bool,
}

impl ScanFailure {
    /// Map a raw platform code to its failure name.
    pub fn from_code(code: RadioCode) -> Self {
        let reason = match code.0 {
            1 => "SCAN_FAILED_ALREADY_STARTED",
            2 => "SCAN_FAILED_APPLICATION_REGISTRATION_FAILED",
            3 => "SCAN_FAILED_INTERNAL_ERROR",
            4 => "SCAN_FAILED_FEATURE_UNSUPPORTED",
            _ => "",
        };
        Self {
            reason: reason.to_string(),
            unknown_error: code.0 < 1 || code.0 > 4,
        }
    }

    /// Local already-started guard, same shape the platform would report.
    pub fn already_started() -> Self {
        Self::from_code(RadioCode(1))
    }
}

/// Output of a running scanner
#[derive(Debug, Clone)]
pub enum ScannerEvent {
    /// A filtered sighting of the tracked service
    Sighting(Sighting),
    /// The platform scan failed; scanning has stopped and no further events
    /// follow
    Failed(ScanFailure),
}

/// Continuous scan over the platform radio with service-UUID filtering.
pub struct Scanner {
    adapter: Arc<dyn RadioLink>,
    running: Arc<AtomicBool>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl Scanner {
    /// Create a scanner over the given radio.
    pub fn new(adapter: Arc<dyn RadioLink>) -> Self {
        Self {
            adapter,
            running: Arc::new(AtomicBool::new(false)),
            pump: Mutex::new(None),
        }
    }

    /// True while a scan subscription is active.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start scanning and forward filtered events into `sink`.
    ///
    /// An async platform failure stops the scan and is delivered as the final
    /// [`ScannerEvent::Failed`] on the sink.
    pub async fn start(
        &self,
        filter: ScanFilter,
        sink: mpsc::Sender<ScannerEvent>,
    ) -> Result<(), ScanFailure> {
        if self.is_running() {
            return Err(ScanFailure::already_started());
        }

        let mut stream = self
            .adapter
            .start_scan(filter.clone())
            .await
            .map_err(|code| {
                let failure = ScanFailure::from_code(code);
                warn!(%code, unknown = failure.unknown_error, "{}", failure);
                failure
            })?;

        self.running.store(true, Ordering::SeqCst);
        info!("Scanning Started");

        let adapter = Arc::clone(&self.adapter);
        let running = Arc::clone(&self.running);
        let pump = tokio::spawn(async move {
            while let Some(event) = stream.recv().await {
                match event {
                    ScanEvent::Sighting(sighting) => {
                        if !filter.matches(&sighting.service_uuids) {
                            debug!(address = %sighting.address, "sighting without tracked service dropped");
                            continue;
                        }
                        debug!(address = %sighting.address, rssi = sighting.rssi, "sighting");
                        if sink.send(ScannerEvent::Sighting(sighting)).await.is_err() {
                            break;
                        }
                    }
                    ScanEvent::Failed(code) => {
                        let failure = ScanFailure::from_code(code);
                        warn!(%code, unknown = failure.unknown_error, "{}", failure);
                        running.store(false, Ordering::SeqCst);
                        adapter.stop_scan().await;
                        let _ = sink.send(ScannerEvent::Failed(failure)).await;
                        break;
                    }
                }
            }
        });
        *self.pump.lock() = Some(pump);

        Ok(())
    }

    /// Cancel the scan subscription and the filter pump. Idempotent.
    pub async fn stop(&self) {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
        if was_running {
            self.adapter.stop_scan().await;
            info!("Scanning Stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_failure_codes() {
        let cases = [
            (1, "SCAN_FAILED_ALREADY_STARTED"),
            (2, "SCAN_FAILED_APPLICATION_REGISTRATION_FAILED"),
            (3, "SCAN_FAILED_INTERNAL_ERROR"),
            (4, "SCAN_FAILED_FEATURE_UNSUPPORTED"),
        ];
        for (code, reason) in cases {
            let failure = ScanFailure::from_code(RadioCode(code));
            assert_eq!(failure.reason, reason);
            assert!(!failure.unknown_error, "code {code} is a known failure");
        }
    }

    #[test]
    fn test_unknown_failure_codes() {
        for code in [0, 5, 99, -3] {
            let failure = ScanFailure::from_code(RadioCode(code));
            assert!(failure.unknown_error, "code {code} is outside the enumeration");
            assert!(failure.reason.is_empty());
        }
    }

    #[test]
    fn test_failure_display_carries_prefix() {
        let failure = ScanFailure::from_code(RadioCode(3));
        assert_eq!(failure.to_string(), "Scanning failed: SCAN_FAILED_INTERNAL_ERROR");
    }

    #[test]
    fn test_already_started_shape() {
        let failure = ScanFailure::already_started();
        assert_eq!(failure.reason, "SCAN_FAILED_ALREADY_STARTED");
        assert!(!failure.unknown_error);
    }
}
