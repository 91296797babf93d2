//! Host-side client for a spawned runtime.
//!
//! Responses are matched to requests by ID through a map of pending
//! oneshot senders. Events (ID 0) go to a separate channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::error::{Result, RuntimeError};
use crate::protocol::{MessageCode, Request, Response, EVENT_ID};
use crate::runtime::{Runtime, RuntimeChannels, RuntimeConfig};

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Response>>>>;

/// Client handle to a runtime actor.
pub struct Host {
    requests: mpsc::Sender<Request>,
    pending: Pending,
    next_id: AtomicU64,
    runtime: JoinHandle<Result<()>>,
}

impl Host {
    /// Spawn a runtime and connect to it.
    ///
    /// Returns the host and the receiver for `MonitoringValues` events.
    pub fn spawn(config: RuntimeConfig) -> (Self, mpsc::Receiver<Response>) {
        Self::connect(Runtime::spawn(config), config.channel_capacity)
    }

    /// Connect to the channel ends of an already spawned runtime.
    pub fn connect(
        channels: RuntimeChannels,
        event_capacity: usize,
    ) -> (Self, mpsc::Receiver<Response>) {
        let (event_tx, event_rx) = mpsc::channel(event_capacity);
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));

        let router_pending = Arc::clone(&pending);
        let mut responses = channels.responses;
        tokio::spawn(async move {
            while let Some(response) = responses.recv().await {
                if response.id == EVENT_ID {
                    if event_tx.try_send(response).is_err() {
                        warn!("event receiver full or closed, dropping event");
                    }
                    continue;
                }
                let waiter = router_pending
                    .lock()
                    .ok()
                    .and_then(|mut pending| pending.remove(&response.id));
                match waiter {
                    Some(waiter) => {
                        let _ = waiter.send(response);
                    }
                    None => warn!(id = response.id, "response for unknown request"),
                }
            }
            // The runtime is gone; dropping the senders fails every waiter.
            if let Ok(mut pending) = router_pending.lock() {
                if !pending.is_empty() {
                    warn!(waiting = pending.len(), "runtime exited with requests in flight");
                }
                pending.clear();
            }
        });

        let host = Self {
            requests: channels.requests,
            pending,
            next_id: AtomicU64::new(EVENT_ID + 1),
            runtime: channels.task,
        };
        (host, event_rx)
    }

    /// Send a request and wait for its response.
    pub async fn request(&self, code: MessageCode, params: Value) -> Result<Response> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .map_err(|_| RuntimeError::ChannelClosed)?
            .insert(id, tx);

        if self
            .requests
            .send(Request::new(id, code, params))
            .await
            .is_err()
        {
            if let Ok(mut pending) = self.pending.lock() {
                pending.remove(&id);
            }
            return Err(RuntimeError::ChannelClosed);
        }
        rx.await.map_err(|_| RuntimeError::ChannelClosed)
    }

    /// Send a request and decode the data of a successful response.
    pub async fn call<P, T>(&self, code: MessageCode, params: P) -> Result<T>
    where
        P: Serialize,
        T: DeserializeOwned,
    {
        let response = self.request(code, serde_json::to_value(params)?).await?;
        if !response.success {
            return Err(RuntimeError::Rejected {
                code,
                message: response.error.unwrap_or_default(),
            });
        }
        Ok(serde_json::from_value(response.data.unwrap_or(Value::Null))?)
    }

    /// Close the request queue and wait for the actor to finish.
    pub async fn shutdown(self) -> Result<()> {
        drop(self.requests);
        self.runtime
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?
    }
}
