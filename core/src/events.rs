//! Caller-facing results and discovery events
//!
//! The start/stop outcome shapes and the typed event stream that replace the
//! platform callback interfaces: results resolve as futures, discovery events
//! arrive on a bounded channel with at-most-once delivery per discovery or
//! eviction.

use crate::registry::DiscoveredDevice;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Result of an advertise-start or scan-start request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartOutcome {
    /// True when the operation is running
    pub status: bool,
    /// Human-readable reason, empty only for unknown failure codes
    pub error_text: String,
    /// True when the platform failure code fell outside the known enumeration
    pub unknown_error: bool,
}

impl StartOutcome {
    /// Successful start with a confirmation message.
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: true,
            error_text: message.into(),
            unknown_error: false,
        }
    }

    /// Failed start with a classified reason.
    pub fn failure(message: impl Into<String>, unknown_error: bool) -> Self {
        Self {
            status: false,
            error_text: message.into(),
            unknown_error,
        }
    }
}

/// Result of a stop request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopOutcome {
    /// True when something was actually torn down (or the stop was a clean no-op)
    pub status: bool,
    /// Human-readable summary of what stopped
    pub error_text: String,
}

impl StopOutcome {
    /// Completed stop with a summary message.
    pub fn stopped(message: impl Into<String>) -> Self {
        Self {
            status: true,
            error_text: message.into(),
        }
    }

    /// Stop refused because nothing was running.
    pub fn not_running(message: impl Into<String>) -> Self {
        Self {
            status: false,
            error_text: message.into(),
        }
    }
}

/// Events crossing the boundary to service consumers
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    /// A peer's identity payload was read successfully; fired exactly once
    /// per successful discovery
    DeviceFound(DiscoveredDevice),
    /// An ignore-set peer went unseen past the staleness window; fired
    /// exactly once per eviction
    DeviceOutOfRange(DiscoveredDevice),
    /// The platform scan failed after a successful start; scanning has
    /// stopped
    ScanFailed(StartOutcome),
}

/// Stream of [`DiscoveryEvent`]s handed to the service consumer.
pub struct DiscoveryEvents {
    rx: mpsc::Receiver<DiscoveryEvent>,
}

impl DiscoveryEvents {
    pub(crate) fn new(rx: mpsc::Receiver<DiscoveryEvent>) -> Self {
        Self { rx }
    }

    /// Receive the next event; `None` once the service is dropped.
    pub async fn recv(&mut self) -> Option<DiscoveryEvent> {
        self.rx.recv().await
    }
}

impl Stream for DiscoveryEvents {
    type Item = DiscoveryEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
