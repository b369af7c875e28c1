//! Real-time task-progress client.
//!
//! Subscribes to a long-running server-side job over WebSocket, reduces
//! the stream of status messages into a [`ProgressSnapshot`], and
//! reconnects with exponential backoff when the connection drops before
//! the job reaches a terminal state.
//!
//! [`ProgressSnapshot`]: reducer::ProgressSnapshot

pub mod callbacks;
pub mod client;
pub mod config;
pub mod events;
pub mod manager;
pub mod messages;
pub mod reconnect;
pub mod reducer;
pub mod types;

pub use callbacks::ProgressCallbacks;
pub use client::{Connector, ProgressClient, ProgressConnection};
pub use config::ProgressConfig;
pub use events::ProgressEvent;
pub use manager::{CloseReason, ConnectionState, ProgressSubscription};
pub use reducer::ProgressSnapshot;
pub use types::JobId;
