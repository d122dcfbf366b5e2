//! GATT responder
//!
//! Server side of the identity exchange: answers characteristic reads from
//! peers that discovered and connected to this node. Writes, descriptor
//! writes, and execute-writes are accepted at the protocol level but carry no
//! side effect here; higher layers own any mutating semantics.

use crate::adapter::{
    RadioCode, RadioLink, ServerRequest, ServiceDefinition, GATT_SUCCESS,
    IDENTITY_CHARACTERISTIC_UUID,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Serves the local identity characteristic to inbound readers.
pub struct GattResponder {
    adapter: Arc<dyn RadioLink>,
    identity: Arc<Mutex<Vec<u8>>>,
    running: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl GattResponder {
    /// Create a responder over the given radio.
    pub fn new(adapter: Arc<dyn RadioLink>) -> Self {
        Self {
            adapter,
            identity: Arc::new(Mutex::new(Vec::new())),
            running: AtomicBool::new(false),
            task: Mutex::new(None),
        }
    }

    /// True while the GATT server is open.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Publish the identity service and start answering requests.
    pub async fn start(&self, identity: Vec<u8>) -> Result<(), RadioCode> {
        *self.identity.lock() = identity.clone();
        let mut requests = self
            .adapter
            .open_server(ServiceDefinition::identity_service(identity))
            .await?;
        self.running.store(true, Ordering::SeqCst);
        info!("identity service published");

        let adapter = Arc::clone(&self.adapter);
        let served = Arc::clone(&self.identity);
        let task = tokio::spawn(async move {
            while let Some(request) = requests.recv().await {
                Self::answer(&adapter, &served, request).await;
            }
        });
        *self.task.lock() = Some(task);

        Ok(())
    }

    async fn answer(
        adapter: &Arc<dyn RadioLink>,
        served: &Arc<Mutex<Vec<u8>>>,
        request: ServerRequest,
    ) {
        match request {
            ServerRequest::Read {
                address,
                request_id,
                characteristic,
                offset,
            } => {
                let value = if characteristic == IDENTITY_CHARACTERISTIC_UUID {
                    served.lock().clone()
                } else {
                    Vec::new()
                };
                // An offset past the end answers an empty slice rather than
                // an error; long reads terminate on the short response.
                let slice = value.get(offset..).unwrap_or_default().to_vec();
                debug!(address = %address, request_id, len = slice.len(), "read request answered");
                adapter
                    .send_response(&address, request_id, GATT_SUCCESS, slice)
                    .await;
            }
            ServerRequest::Write {
                address,
                request_id,
                response_needed,
                ..
            }
            | ServerRequest::DescriptorWrite {
                address,
                request_id,
                response_needed,
                ..
            } => {
                debug!(address = %address, request_id, "write accepted, no effect");
                if response_needed {
                    adapter
                        .send_response(&address, request_id, GATT_SUCCESS, Vec::new())
                        .await;
                }
            }
            ServerRequest::ExecuteWrite {
                address,
                request_id,
                execute,
            } => {
                debug!(address = %address, request_id, execute, "execute-write accepted, no effect");
                adapter
                    .send_response(&address, request_id, GATT_SUCCESS, Vec::new())
                    .await;
            }
            ServerRequest::ConnectionChange { address, connected } => {
                debug!(address = %address, connected, "server connection change");
            }
            ServerRequest::NotificationSent { address, status } => {
                debug!(address = %address, status, "notification sent");
            }
        }
    }

    /// Close the server and clear published services. Idempotent.
    pub async fn stop(&self) {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        if was_running {
            self.adapter.close_server().await;
            info!("identity service closed");
        }
    }
}
