//! Realtime Hub - connection registry and private-message router
//!
//! This crate tracks which users currently hold a live duplex connection and
//! routes private messages between them. It has no HTTP dependencies: the
//! hosting server adapts its transport into [`Frame`] streams and sinks and
//! hands them to [`HubHandle::connect`].
//!
//! # Example
//!
//! ```no_run
//! use realtime_hub::{Hub, HubConfig, UserId};
//!
//! #[tokio::main]
//! async fn main() {
//!     let hub = Hub::spawn(HubConfig::default());
//!
//!     // Called by the message-creation flow after the record is stored
//!     hub.send_private_message(UserId(1), UserId(2), "hi").await.unwrap();
//!
//!     for user in hub.connected_users().await.unwrap() {
//!         println!("{} ({}) is online", user.username, user.user_id);
//!     }
//! }
//! ```

mod connection;
mod envelope;
mod error;
mod frame;
mod hub;
mod metrics;

pub use connection::{Connected, Disconnect};
pub use envelope::{Envelope, EnvelopeKind, UserId};
pub use error::{EnvelopeError, HubError, TransportError};
pub use frame::Frame;
pub use hub::{ConnectedUser, ConnectionId, Hub, HubConfig, HubHandle, Identity};
pub use metrics::{ConnectionMetrics, HubMetrics, HubMetricsSnapshot, MessageMetrics};
