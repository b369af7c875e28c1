//! Shared test helpers: an in-memory connector whose connections are
//! driven from the test body.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc as tokio_mpsc};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use estate_progress::client::{Connector, ProgressClientError, ProgressConnection};
use estate_progress::{JobId, ProgressEvent};

/// What the connector does on its next `connect` call.
#[derive(Debug, Clone, Copy)]
pub enum Plan {
    Accept,
    Refuse,
}

/// The server end of an accepted in-memory connection.
pub struct ServerSide {
    pub job_id: JobId,
    frames: mpsc::UnboundedSender<Result<Message, WsError>>,
    outbound: mpsc::UnboundedReceiver<Message>,
}

impl ServerSide {
    /// Push a text frame to the client. Ignored if the client is gone.
    pub fn send_text(&self, text: &str) {
        let _ = self.frames.unbounded_send(Ok(Message::Text(text.to_string())));
    }

    pub fn send_json(&self, value: serde_json::Value) {
        self.send_text(&value.to_string());
    }

    /// Next frame the client wrote, if any arrives within `timeout`.
    pub async fn next_outbound(&mut self, timeout: Duration) -> Option<Message> {
        tokio::time::timeout(timeout, self.outbound.next())
            .await
            .ok()
            .flatten()
    }
}

/// Connector following a scripted plan. Calls beyond the plan are refused.
pub struct ScriptedConnector {
    plan: Mutex<VecDeque<Plan>>,
    attempts: Mutex<Vec<(JobId, Instant)>>,
    opened: tokio_mpsc::UnboundedSender<ServerSide>,
}

impl ScriptedConnector {
    pub fn new(plan: &[Plan]) -> (Arc<Self>, tokio_mpsc::UnboundedReceiver<ServerSide>) {
        let (opened, opened_rx) = tokio_mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            plan: Mutex::new(plan.iter().copied().collect()),
            attempts: Mutex::new(Vec::new()),
            opened,
        });
        (connector, opened_rx)
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }

    pub fn attempt_times(&self) -> Vec<Instant> {
        self.attempts.lock().unwrap().iter().map(|(_, at)| *at).collect()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, job_id: &JobId) -> Result<ProgressConnection, ProgressClientError> {
        self.attempts
            .lock()
            .unwrap()
            .push((job_id.clone(), Instant::now()));

        let plan = self.plan.lock().unwrap().pop_front().unwrap_or(Plan::Refuse);
        match plan {
            Plan::Refuse => Err(ProgressClientError::Connection("refused".into())),
            Plan::Accept => {
                let (frames_tx, frames_rx) = mpsc::unbounded();
                let (outbound_tx, outbound_rx) = mpsc::unbounded();
                let _ = self.opened.send(ServerSide {
                    job_id: job_id.clone(),
                    frames: frames_tx,
                    outbound: outbound_rx,
                });
                Ok(ProgressConnection::from_parts(
                    job_id.clone(),
                    format!("memory://{job_id}"),
                    outbound_tx.sink_map_err(|_| WsError::ConnectionClosed),
                    frames_rx,
                ))
            }
        }
    }
}

/// Wait for the first event matching `pred`, failing after `timeout`.
pub async fn wait_for_event<F>(
    events: &mut broadcast::Receiver<ProgressEvent>,
    timeout: Duration,
    pred: F,
) -> ProgressEvent
where
    F: Fn(&ProgressEvent) -> bool,
{
    tokio::time::timeout(timeout, async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}
