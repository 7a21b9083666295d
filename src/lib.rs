//! # devlink
//!
//! Client SDK for JSON-RPC 2.0 channels to gateway-fronted device services.
//!
//! A [`Client`] owns one persistent WebSocket connection to a device-hosted
//! service and multiplexes it:
//!
//! - **Correlated calls**: [`Client::call`] sends
//!   `{"jsonrpc":"2.0","id":...,"method":...,"params":...}` and matches the
//!   asynchronous reply back to the caller by id, regardless of arrival
//!   order.
//! - **Notifications**: server messages without an `id` fan out as
//!   [`Event`]s to any number of independently buffered [`Subscription`]s;
//!   a slow subscriber drops events instead of stalling the connection.
//! - **Bounded recovery**: a read failure earns exactly one reconnect
//!   attempt (pending calls survive a successful one); a second failure
//!   closes the client terminally.
//!
//! ## Architecture
//!
//! ```text
//! call ──► PendingCalls ──► Writer Task ──► WebSocket ──► gateway ──► device
//!                ▲                              │
//!                └── Read Loop ◄────────────────┘
//!                        │
//!                        └──► EventBus ──► Subscriptions
//! ```

pub mod auth;
pub mod envelope;
pub mod error;
pub mod events;

mod client;
mod pending;
mod transport;
mod writer;

pub use auth::{AuthProvider, StaticAuth};
pub use client::{
    CallOutcome, Client, ClientBuilder, ConnectionState, DEFAULT_CALL_TIMEOUT,
    DEFAULT_HANDSHAKE_TIMEOUT,
};
pub use envelope::{codes, RpcError};
pub use error::{DevlinkError, Result};
pub use events::{Event, EventKind, Subscription};
