//! # SoftPLC Runtime
//!
//! Hosts one [`softplc_core::Controller`] behind a JSON message protocol.
//!
//! - [`protocol`]: message codes, requests, responses and parameter records
//! - [`Facade`]: synchronous dispatch of requests onto the controller
//! - [`Runtime`]: the tokio actor that owns the facade, ticks it while
//!   started and emits `MonitoringValues` events
//! - [`Host`]: a client that correlates responses with requests
//!
//! ## Example
//!
//! ```rust,no_run
//! use serde_json::json;
//! use softplc_runtime::{Host, MessageCode, RuntimeConfig};
//!
//! # async fn demo() -> softplc_runtime::Result<()> {
//! let (host, mut events) = Host::spawn(RuntimeConfig::default());
//! let _: serde_json::Value = host
//!     .call(
//!         MessageCode::CreateController,
//!         json!({"memSize": 65536, "datablockTableLength": 256, "taskListLength": 16}),
//!     )
//!     .await?;
//! let _: serde_json::Value = host.call(MessageCode::StartController, json!(null)).await?;
//! while let Some(event) = events.recv().await {
//!     println!("{:?}", event.data);
//! }
//! # Ok(())
//! # }
//! ```

mod error;
mod facade;
mod host;
pub mod protocol;
mod runtime;

pub use error::{Result, RuntimeError};
pub use facade::Facade;
pub use host::Host;
pub use protocol::{MessageCode, MonitoringPayload, Request, Response, EVENT_ID};
pub use runtime::{Runtime, RuntimeChannels, RuntimeConfig};
