//! Follow one job until it reaches a terminal state.
//!
//! Drives a [`ProgressSubscription`] from its event stream and writes one
//! rendered line per progress update.

use std::future::Future;
use std::io::Write;

use tokio::sync::broadcast::error::RecvError;

use estate_progress::{ProgressEvent, ProgressSubscription};

use crate::render;

/// How a watch ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The job completed with this result payload.
    Completed(serde_json::Value),
    /// The connection could not be kept alive.
    Failed(String),
    /// The shutdown future resolved first.
    Interrupted,
}

/// Watch `job_id` until it completes, retries run out, or `shutdown`
/// resolves.
///
/// A completed job returns once the session has closed its socket, so
/// the close frame is sent before the caller exits.
pub async fn run<W, F>(
    sub: &ProgressSubscription,
    job_id: &str,
    shutdown: F,
    out: &mut W,
) -> anyhow::Result<Outcome>
where
    W: Write,
    F: Future,
{
    let mut events = sub.subscribe();
    sub.connect(job_id);

    let Some(job) = sub.job_id() else {
        anyhow::bail!("a job id is required");
    };

    tokio::pin!(shutdown);
    let mut completed: Option<serde_json::Value> = None;

    loop {
        let event = tokio::select! {
            _ = &mut shutdown => {
                tracing::info!(job_id = %job, "Shutdown requested");
                sub.disconnect();
                return Ok(match completed {
                    Some(data) => Outcome::Completed(data),
                    None => Outcome::Interrupted,
                });
            }
            event = events.recv() => event,
        };

        let event = match event {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(job_id = %job, skipped, "Watcher fell behind the event stream");
                continue;
            }
            Err(RecvError::Closed) => {
                return Ok(Outcome::Failed("event stream closed".into()));
            }
        };

        if event.job_id() != &job {
            continue;
        }

        match event {
            ProgressEvent::Connected { .. } => {
                tracing::info!(job_id = %job, "Watching job");
            }
            ProgressEvent::Progress { update, .. } => {
                writeln!(out, "{}", render::progress_line(&update))?;
                out.flush()?;
            }
            ProgressEvent::Error { message, .. } => {
                writeln!(out, "error: {message}")?;
                out.flush()?;
            }
            ProgressEvent::ReconnectScheduled {
                attempt, delay_ms, ..
            } => {
                tracing::info!(job_id = %job, attempt, delay_ms, "Connection dropped, retrying");
            }
            ProgressEvent::Completed { data, .. } => {
                completed = Some(data);
            }
            ProgressEvent::Disconnected { intentional, .. } => {
                if let Some(data) = completed.take() {
                    return Ok(Outcome::Completed(data));
                }
                tracing::debug!(job_id = %job, intentional, "Connection closed");
            }
            ProgressEvent::RetriesExhausted { .. } => {
                let message = sub
                    .snapshot()
                    .error_message
                    .unwrap_or_else(|| "connection lost".into());
                return Ok(Outcome::Failed(message));
            }
        }
    }
}
