//! Progress subscription and connection manager.
//!
//! [`ProgressSubscription`] is the handle the UI layer holds. Calling
//! [`connect`](ProgressSubscription::connect) spawns one session task per
//! job (connect -> read -> reconnect loop). Every session carries an epoch
//! number: snapshot publication checks it under the same lock that
//! `connect`, `disconnect` and `reset` bump it with, so a superseded
//! connection can never touch the snapshot once teardown has begun.
//!
//! Snapshots are published on a [`tokio::sync::watch`] channel and
//! lifecycle events on a [`tokio::sync::broadcast`] channel.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::callbacks::ProgressCallbacks;
use crate::client::{Connector, ProgressClient, ProgressConnection};
use crate::config::ProgressConfig;
use crate::events::{now, ProgressEvent, EVENT_CHANNEL_CAPACITY};
use crate::messages::{parse_message, ProgressMessage};
use crate::reconnect::ReconnectConfig;
use crate::reducer::{reduce, Effect, ProgressSnapshot, Transition};
use crate::types::JobId;

/// Upper bound on sending a close frame during teardown.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Requested locally: `disconnect`, `reset`, a new job, or teardown
    /// after completion.
    Intentional,
    /// Anything else.
    Abnormal,
}

/// Lifecycle of the underlying connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closed(CloseReason),
}

/// Handle to the progress of one job at a time.
///
/// Dropping the handle cancels the active session.
pub struct ProgressSubscription {
    shared: Arc<Shared>,
    connector: Arc<dyn Connector>,
    reconnect: ReconnectConfig,
    teardown_grace: Duration,
    /// Parent of every session token.
    cancel: CancellationToken,
}

impl ProgressSubscription {
    /// Create a subscription that dials the host described by `config`.
    pub fn new(config: ProgressConfig, callbacks: Arc<ProgressCallbacks>) -> Self {
        let connector = Arc::new(ProgressClient::new(config.clone()));
        Self::with_connector(connector, &config, callbacks)
    }

    /// Create a subscription that opens connections through `connector`.
    pub fn with_connector(
        connector: Arc<dyn Connector>,
        config: &ProgressConfig,
        callbacks: Arc<ProgressCallbacks>,
    ) -> Self {
        let (snapshot_tx, _) = watch::channel(ProgressSnapshot::default());
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    epoch: 0,
                    state: ConnectionState::Idle,
                    job_id: None,
                    session: None,
                }),
                snapshot_tx,
                event_tx,
                callbacks,
            }),
            connector,
            reconnect: config.reconnect.clone(),
            teardown_grace: config.teardown_grace,
            cancel: CancellationToken::new(),
        }
    }

    /// Start tracking `job_id`.
    ///
    /// A blank id is ignored. If a session for the same job is still live,
    /// or that job already completed, this is a no-op. Otherwise any
    /// existing session is torn down first; a different job also resets
    /// the snapshot, while the same job only clears its error state.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect(&self, job_id: &str) {
        let Some(job_id) = JobId::parse(job_id) else {
            tracing::debug!("Ignoring connect without a job id");
            return;
        };

        let mut inner = self.shared.lock();
        let same_job = inner.job_id.as_ref() == Some(&job_id);

        if same_job {
            let live = inner
                .session
                .as_ref()
                .is_some_and(|session| !session.task.is_finished());
            if live || self.shared.snapshot_tx.borrow().is_complete {
                tracing::debug!(job_id = %job_id, "Already subscribed to job");
                return;
            }
        }

        inner.epoch += 1;
        if let Some(previous) = inner.session.take() {
            tracing::info!(job_id = %previous.job_id, "Closing previous progress session");
            previous.cancel.cancel();
        }

        // Restarting the same job keeps its labels and progress but starts
        // from a clean error state.
        let snapshot = if same_job {
            let current = self.shared.snapshot_tx.borrow().clone();
            ProgressSnapshot {
                is_connected: false,
                has_error: false,
                error_message: None,
                ..current
            }
        } else {
            ProgressSnapshot::default()
        };
        self.shared.snapshot_tx.send_replace(snapshot);

        inner.state = ConnectionState::Connecting;
        inner.job_id = Some(job_id.clone());

        let cancel = self.cancel.child_token();
        let session = Session {
            shared: Arc::clone(&self.shared),
            connector: Arc::clone(&self.connector),
            job_id: job_id.clone(),
            epoch: inner.epoch,
            cancel: cancel.clone(),
            reconnect: self.reconnect.clone(),
            teardown_grace: self.teardown_grace,
        };

        tracing::info!(job_id = %job_id, "Subscribing to job progress");
        let task = tokio::spawn(session.run());

        inner.session = Some(SessionHandle {
            job_id,
            cancel,
            task,
        });
    }

    /// Close the connection and stop reconnecting.
    ///
    /// Safe to call when nothing is connected.
    pub fn disconnect(&self) {
        let (was_live, job_id) = {
            let mut inner = self.shared.lock();
            inner.epoch += 1;

            if let Some(session) = inner.session.take() {
                tracing::info!(job_id = %session.job_id, "Disconnecting from job progress");
                session.cancel.cancel();
            }

            let was_live = matches!(
                inner.state,
                ConnectionState::Connecting | ConnectionState::Open
            );
            if inner.state != ConnectionState::Idle {
                inner.state = ConnectionState::Closed(CloseReason::Intentional);
            }

            let current = self.shared.snapshot_tx.borrow().clone();
            if current.is_connected {
                self.shared.snapshot_tx.send_replace(current.with_connected(false));
            }

            (was_live, inner.job_id.clone())
        };

        if let (true, Some(job_id)) = (was_live, job_id) {
            self.shared.emit(ProgressEvent::Disconnected {
                job_id,
                intentional: true,
                at: now(),
            });
        }
    }

    /// Disconnect, forget the job and restore the initial snapshot.
    pub fn reset(&self) {
        self.disconnect();

        let mut inner = self.shared.lock();
        inner.job_id = None;
        inner.state = ConnectionState::Idle;
        self.shared.snapshot_tx.send_replace(ProgressSnapshot::default());
    }

    /// The latest snapshot.
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.shared.snapshot_tx.borrow().clone()
    }

    /// A receiver that observes every published snapshot.
    pub fn watch(&self) -> watch::Receiver<ProgressSnapshot> {
        self.shared.snapshot_tx.subscribe()
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.shared.event_tx.subscribe()
    }

    /// The callback registry handed in at construction.
    pub fn callbacks(&self) -> &Arc<ProgressCallbacks> {
        &self.shared.callbacks
    }

    /// The job currently tracked, if any.
    pub fn job_id(&self) -> Option<JobId> {
        self.shared.lock().job_id.clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.shared.lock().state
    }
}

impl Drop for ProgressSubscription {
    fn drop(&mut self) {
        self.shared.lock().epoch += 1;
        self.cancel.cancel();
    }
}

// ---- shared state ----

struct Shared {
    inner: Mutex<Inner>,
    snapshot_tx: watch::Sender<ProgressSnapshot>,
    event_tx: broadcast::Sender<ProgressEvent>,
    callbacks: Arc<ProgressCallbacks>,
}

struct Inner {
    /// Bumped whenever the active session is superseded or cancelled.
    epoch: u64,
    state: ConnectionState,
    job_id: Option<JobId>,
    session: Option<SessionHandle>,
}

struct SessionHandle {
    job_id: JobId,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Nothing panics while holding this lock, but stay usable if it does.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace the snapshot and connection state if `epoch` is current.
    ///
    /// Returns `false` when the session has been superseded.
    fn update<F>(&self, epoch: u64, state: Option<ConnectionState>, next: F) -> bool
    where
        F: FnOnce(&ProgressSnapshot) -> Option<ProgressSnapshot>,
    {
        let mut inner = self.lock();
        if inner.epoch != epoch {
            return false;
        }
        if let Some(state) = state {
            inner.state = state;
        }
        let current = self.snapshot_tx.borrow().clone();
        if let Some(snapshot) = next(&current) {
            self.snapshot_tx.send_replace(snapshot);
        }
        true
    }

    /// Reduce `message` against the current snapshot and publish the
    /// result. `None` when the session has been superseded.
    fn apply(&self, epoch: u64, message: ProgressMessage) -> Option<Transition> {
        let inner = self.lock();
        if inner.epoch != epoch {
            return None;
        }
        let current = self.snapshot_tx.borrow().clone();
        let transition = reduce(&current, message);
        if let Some(snapshot) = &transition.snapshot {
            self.snapshot_tx.send_replace(snapshot.clone());
        }
        drop(inner);
        Some(transition)
    }

    fn is_complete(&self) -> bool {
        self.snapshot_tx.borrow().is_complete
    }

    fn emit(&self, event: ProgressEvent) {
        // Ignore the SendError: it only means there are zero receivers.
        let _ = self.event_tx.send(event);
    }
}

// ---- session task ----

/// How a single connection ended.
enum ConnectionEnd {
    /// The session token was cancelled.
    Cancelled,
    /// The job completed and the socket was closed after the grace delay.
    Completed,
    /// The peer went away before a terminal message.
    Dropped,
}

/// One connect -> read -> reconnect loop for a single job.
struct Session {
    shared: Arc<Shared>,
    connector: Arc<dyn Connector>,
    job_id: JobId,
    epoch: u64,
    cancel: CancellationToken,
    reconnect: ReconnectConfig,
    teardown_grace: Duration,
}

impl Session {
    async fn run(self) {
        let mut attempts = 0u32;

        loop {
            if !self
                .shared
                .update(self.epoch, Some(ConnectionState::Connecting), |_| None)
            {
                return;
            }

            let result = tokio::select! {
                _ = self.cancel.cancelled() => return,
                result = self.connector.connect(&self.job_id) => result,
            };

            match result {
                Ok(conn) => {
                    attempts = 0;
                    if !self.mark_open() {
                        return;
                    }
                    match self.pump(conn).await {
                        ConnectionEnd::Cancelled => return,
                        ConnectionEnd::Completed => {
                            self.mark_closed(CloseReason::Intentional);
                            tracing::info!(job_id = %self.job_id, "Progress session finished");
                            return;
                        }
                        ConnectionEnd::Dropped => self.mark_closed(CloseReason::Abnormal),
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        job_id = %self.job_id,
                        attempt = attempts,
                        error = %e,
                        "Progress connection failed",
                    );
                    self.shared.update(
                        self.epoch,
                        Some(ConnectionState::Closed(CloseReason::Abnormal)),
                        |_| None,
                    );
                }
            }

            if self.cancel.is_cancelled() || self.shared.is_complete() {
                return;
            }

            if !self.reconnect.can_retry(attempts) {
                self.give_up(attempts);
                return;
            }

            attempts += 1;
            let delay = self.reconnect.delay_for(attempts);
            tracing::info!(
                job_id = %self.job_id,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                "Reconnecting to progress endpoint",
            );
            self.shared.emit(ProgressEvent::ReconnectScheduled {
                job_id: self.job_id.clone(),
                attempt: attempts,
                delay_ms: delay.as_millis() as u64,
                at: now(),
            });

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::debug!(job_id = %self.job_id, "Pending reconnect cancelled");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Read frames until the connection ends, the session is cancelled,
    /// or the grace delay after completion elapses.
    async fn pump(&self, mut conn: ProgressConnection) -> ConnectionEnd {
        let grace = tokio::time::sleep(Duration::ZERO);
        tokio::pin!(grace);
        let mut closing = false;

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    close_quietly(&mut conn, "Client disconnect").await;
                    return ConnectionEnd::Cancelled;
                }
                _ = &mut grace, if closing => {
                    close_quietly(&mut conn, "Task complete").await;
                    return ConnectionEnd::Completed;
                }
                frame = conn.next_frame() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        if self.handle_text(&text) && !closing {
                            closing = true;
                            grace.as_mut().reset(Instant::now() + self.teardown_grace);
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        tracing::trace!(job_id = %self.job_id, "Ignoring binary frame");
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {
                        // Handled automatically by tungstenite.
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!(job_id = %self.job_id, ?frame, "Progress socket closed by server");
                        return self.peer_gone(closing);
                    }
                    Some(Err(e)) => {
                        tracing::warn!(job_id = %self.job_id, error = %e, "Progress socket receive error");
                        return self.peer_gone(closing);
                    }
                    None => {
                        tracing::info!(job_id = %self.job_id, "Progress socket stream exhausted");
                        return self.peer_gone(closing);
                    }
                },
            }
        }
    }

    fn peer_gone(&self, closing: bool) -> ConnectionEnd {
        if closing {
            ConnectionEnd::Completed
        } else {
            ConnectionEnd::Dropped
        }
    }

    /// Parse and apply one text frame. Returns `true` when the job just
    /// reached its terminal state.
    fn handle_text(&self, text: &str) -> bool {
        let message = match parse_message(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(
                    job_id = %self.job_id,
                    error = %e,
                    raw_message = %text,
                    "Failed to parse progress message",
                );
                return false;
            }
        };

        match &message {
            ProgressMessage::Connected(data) => {
                tracing::debug!(job_id = %self.job_id, message = ?data.message, "Connection confirmed");
                if let Some(task_id) = data.task_id.as_deref() {
                    if task_id != self.job_id.as_str() {
                        tracing::warn!(
                            job_id = %self.job_id,
                            task_id,
                            "Server acknowledged a different job",
                        );
                    }
                }
            }
            ProgressMessage::Unknown => {
                tracing::debug!(job_id = %self.job_id, raw_message = %text, "Ignoring unknown message type");
            }
            _ => {}
        }

        let Some(transition) = self.shared.apply(self.epoch, message) else {
            return false;
        };

        if let Some(effect) = &transition.effect {
            self.notify(effect);
        }
        transition.teardown
    }

    /// Fire the user callback and broadcast event for `effect`.
    fn notify(&self, effect: &Effect) {
        self.shared.callbacks.dispatch(effect);

        let event = match effect {
            Effect::Progress(update) => {
                tracing::debug!(
                    job_id = %self.job_id,
                    progress = update.progress,
                    stage = %update.stage,
                    "Progress update",
                );
                ProgressEvent::Progress {
                    job_id: self.job_id.clone(),
                    update: update.clone(),
                    at: now(),
                }
            }
            Effect::Complete(data) => {
                tracing::info!(job_id = %self.job_id, "Job complete");
                ProgressEvent::Completed {
                    job_id: self.job_id.clone(),
                    data: data.clone(),
                    at: now(),
                }
            }
            Effect::Error(message) => {
                tracing::warn!(job_id = %self.job_id, error = %message, "Job reported an error");
                ProgressEvent::Error {
                    job_id: self.job_id.clone(),
                    message: message.clone(),
                    at: now(),
                }
            }
        };
        self.shared.emit(event);
    }

    fn mark_open(&self) -> bool {
        let current = self.shared.update(self.epoch, Some(ConnectionState::Open), |s| {
            Some(s.with_connected(true))
        });
        if current {
            tracing::info!(job_id = %self.job_id, "Connected to progress endpoint");
            self.shared.emit(ProgressEvent::Connected {
                job_id: self.job_id.clone(),
                at: now(),
            });
        }
        current
    }

    fn mark_closed(&self, reason: CloseReason) {
        let current = self.shared.update(self.epoch, Some(ConnectionState::Closed(reason)), |s| {
            Some(s.with_connected(false))
        });
        if current {
            self.shared.emit(ProgressEvent::Disconnected {
                job_id: self.job_id.clone(),
                intentional: reason == CloseReason::Intentional,
                at: now(),
            });
        }
    }

    /// Surface exhausted retries as a persistent error.
    fn give_up(&self, attempts: u32) {
        let message = format!("Connection lost after {attempts} reconnection attempts");
        tracing::error!(job_id = %self.job_id, attempts, "Giving up on progress connection");

        let current = self
            .shared
            .update(self.epoch, None, |s| Some(s.with_error(message.clone())));
        if !current {
            return;
        }

        self.shared.callbacks.dispatch(&Effect::Error(message));
        self.shared.emit(ProgressEvent::RetriesExhausted {
            job_id: self.job_id.clone(),
            attempts,
            at: now(),
        });
    }
}

async fn close_quietly(conn: &mut ProgressConnection, reason: &str) {
    match tokio::time::timeout(CLOSE_TIMEOUT, conn.close(reason)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::debug!(job_id = %conn.job_id, error = %e, "Close frame not delivered"),
        Err(_) => tracing::debug!(job_id = %conn.job_id, "Timed out sending close frame"),
    }
}
