//! Broker runtime every hublink module embeds.
//!
//! A module is a participant named `vendor.module` that talks to a central
//! hub over one WebSocket. This crate provides the client side: the
//! request/response correlator with per-call deadlines, the subscription and
//! handler tables, duplicate clients sharing one transport, auto-reconnect
//! with resubscription, and the call façade.
//!
//! ```no_run
//! use hublink_client::{InitModuleOptions, init_module};
//!
//! # async fn demo() -> hublink_client::Result<()> {
//! let client = init_module(InitModuleOptions::new("acme.sum", "127.0.0.1", Some(9600))).await?;
//! let sum = client
//!     .api("acme", "calc")
//!     .call("add", vec![3.into(), 5.into()])
//!     .await?;
//! assert_eq!(sum, vec![serde_json::Value::from(8)]);
//! # Ok(())
//! # }
//! ```
pub mod api;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod handler;
pub mod signal;

mod client;
mod state;

pub use api::ApiTarget;
pub use bootstrap::{DEFAULT_WS_PATH, HubAddress, InitModuleOptions, init_module};
pub use client::{ClientOptions, ConnectOptions, HubClient};
pub use config::BrokerConfig;
pub use error::{ClientError, Result};
pub use handler::{
    ApiHandler, Args, DeferredReply, EventHandler, HandlerReply, RequestContext, api_handler,
    event_handler, value_handler,
};
pub use signal::{ClientSignal, SignalKind, wait_for_any};
