//! The actor that owns a controller.
//!
//! One tokio task owns the [`Facade`] exclusively. It waits on the request
//! queue and, while the controller is started, on a tick interval. Each
//! request or tick runs to completion before the next is looked at.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::error::{Result, RuntimeError};
use crate::facade::Facade;
use crate::protocol::{Request, Response};

/// Configuration for the SoftPLC runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    /// Tick period used when `StartController` gives none.
    pub tick_interval_ms: u64,
    /// Monitored changes buffered between events.
    pub monitor_capacity: usize,
    /// Capacity of the request and response queues.
    pub channel_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 20,
            monitor_capacity: 100,
            channel_capacity: 64,
        }
    }
}

/// The runtime actor.
pub struct Runtime {
    facade: Facade,
    requests: mpsc::Receiver<Request>,
    outgoing: mpsc::Sender<Response>,
}

/// Channel ends a host uses to talk to a spawned runtime.
pub struct RuntimeChannels {
    pub requests: mpsc::Sender<Request>,
    pub responses: mpsc::Receiver<Response>,
    pub task: JoinHandle<Result<()>>,
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn ticker(period_ms: u64) -> Interval {
    let period = Duration::from_millis(period_ms);
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

impl Runtime {
    pub fn new(
        config: RuntimeConfig,
        requests: mpsc::Receiver<Request>,
        outgoing: mpsc::Sender<Response>,
    ) -> Self {
        Self {
            facade: Facade::new(config),
            requests,
            outgoing,
        }
    }

    /// Spawn a runtime on the current tokio runtime.
    pub fn spawn(config: RuntimeConfig) -> RuntimeChannels {
        let (request_tx, request_rx) = mpsc::channel(config.channel_capacity);
        let (response_tx, response_rx) = mpsc::channel(config.channel_capacity);
        let runtime = Runtime::new(config, request_rx, response_tx);
        RuntimeChannels {
            requests: request_tx,
            responses: response_rx,
            task: tokio::spawn(runtime.run()),
        }
    }

    async fn send(&self, response: Response) -> Result<()> {
        self.outgoing
            .send(response)
            .await
            .map_err(|_| RuntimeError::ChannelClosed)
    }

    async fn flush_events(&mut self) -> Result<()> {
        if let Some(event) = self.facade.take_event() {
            self.send(event).await?;
        }
        Ok(())
    }

    /// Serve requests until the request queue closes.
    pub async fn run(mut self) -> Result<()> {
        info!("runtime started");
        let mut interval: Option<Interval> = None;
        let mut period: Option<u64> = None;

        loop {
            tokio::select! {
                request = self.requests.recv() => {
                    let Some(request) = request else {
                        break;
                    };
                    let response = self.facade.handle(request);
                    self.send(response).await?;
                    self.flush_events().await?;

                    let running = self.facade.running();
                    if running != period {
                        period = running;
                        interval = running.map(ticker);
                        debug!(?period, "tick schedule changed");
                    }
                }
                _ = next_tick(&mut interval) => {
                    self.facade.tick();
                    self.flush_events().await?;
                }
            }
        }

        info!("runtime stopped");
        Ok(())
    }
}
