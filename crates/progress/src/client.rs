//! WebSocket client for the per-job progress endpoint.
//!
//! [`Connector`] is the seam the connection manager opens sockets
//! through. [`ProgressClient`] is the production implementation backed
//! by `tokio-tungstenite`; tests supply in-memory connectors built with
//! [`ProgressConnection::from_parts`].

use std::borrow::Cow;
use std::pin::Pin;

use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use crate::config::ProgressConfig;
use crate::types::JobId;

type FrameStream = Pin<Box<dyn Stream<Item = Result<Message, WsError>> + Send>>;
type FrameSink = Pin<Box<dyn Sink<Message, Error = WsError> + Send>>;

/// Opens progress connections for a job.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish a new connection scoped to `job_id`.
    async fn connect(&self, job_id: &JobId) -> Result<ProgressConnection, ProgressClientError>;
}

/// A live connection to the progress endpoint of one job.
///
/// Owned by exactly one session task; a reconnect produces a fresh
/// value rather than reusing this one.
pub struct ProgressConnection {
    /// The job this socket is bound to.
    pub job_id: JobId,
    /// The URL that was dialled (informational).
    pub url: String,
    sink: FrameSink,
    stream: FrameStream,
}

impl ProgressConnection {
    /// Wrap a duplex WebSocket stream.
    pub fn new<S>(job_id: JobId, url: String, socket: S) -> Self
    where
        S: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Send + 'static,
    {
        let (sink, stream) = socket.split();
        Self::from_parts(job_id, url, sink, stream)
    }

    /// Build a connection from separate write and read halves.
    pub fn from_parts<Si, St>(job_id: JobId, url: String, sink: Si, stream: St) -> Self
    where
        Si: Sink<Message, Error = WsError> + Send + 'static,
        St: Stream<Item = Result<Message, WsError>> + Send + 'static,
    {
        Self {
            job_id,
            url,
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }

    /// Read the next frame. `None` once the peer is gone.
    pub async fn next_frame(&mut self) -> Option<Result<Message, WsError>> {
        self.stream.next().await
    }

    /// Send a normal (1000) close frame with the given reason.
    pub async fn close(&mut self, reason: &str) -> Result<(), WsError> {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: Cow::Owned(reason.to_string()),
        };
        self.sink.send(Message::Close(Some(frame))).await
    }
}

/// Production connector that dials the configured progress host.
pub struct ProgressClient {
    config: ProgressConfig,
}

impl ProgressClient {
    pub fn new(config: ProgressConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ProgressConfig {
        &self.config
    }
}

#[async_trait]
impl Connector for ProgressClient {
    async fn connect(&self, job_id: &JobId) -> Result<ProgressConnection, ProgressClientError> {
        let url = self.config.ws_url(job_id);

        let (ws_stream, _response) = connect_async(&url).await.map_err(|e| {
            ProgressClientError::Connection(format!("Failed to connect to {url}: {e}"))
        })?;

        tracing::debug!(job_id = %job_id, url = %url, "Progress socket opened");

        Ok(ProgressConnection::new(job_id.clone(), url, ws_stream))
    }
}

/// Errors that can occur when working with the WebSocket client.
#[derive(Debug, thiserror::Error)]
pub enum ProgressClientError {
    /// Failed to establish the WebSocket connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A protocol-level error on an already-established connection.
    #[error("Protocol error: {0}")]
    Protocol(#[from] WsError),
}
