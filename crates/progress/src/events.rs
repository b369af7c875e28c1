//! Lifecycle events broadcast by a progress subscription.
//!
//! These mirror the snapshot transitions and connection lifecycle so
//! that observers which prefer a stream (loggers, the terminal watcher)
//! don't have to diff snapshots themselves.

use chrono::Utc;
use serde::Serialize;

use crate::reducer::ProgressUpdate;
use crate::types::{JobId, Timestamp};

/// Broadcast channel capacity for subscription events.
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 256;

/// An event originating from one progress subscription.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// The socket for a job opened.
    Connected { job_id: JobId, at: Timestamp },

    /// The socket for a job closed.
    Disconnected {
        job_id: JobId,
        /// `true` when the closure was requested locally.
        intentional: bool,
        at: Timestamp,
    },

    /// A progress message was applied.
    Progress {
        job_id: JobId,
        update: ProgressUpdate,
        at: Timestamp,
    },

    /// The job completed. Emitted once per subscription.
    Completed {
        job_id: JobId,
        /// Opaque result payload from the server.
        data: serde_json::Value,
        at: Timestamp,
    },

    /// The server reported an error.
    Error {
        job_id: JobId,
        message: String,
        at: Timestamp,
    },

    /// An abnormal closure was seen and a reconnection is pending.
    ReconnectScheduled {
        job_id: JobId,
        attempt: u32,
        delay_ms: u64,
        at: Timestamp,
    },

    /// Reconnection gave up.
    RetriesExhausted {
        job_id: JobId,
        attempts: u32,
        at: Timestamp,
    },
}

impl ProgressEvent {
    /// The job this event belongs to.
    pub fn job_id(&self) -> &JobId {
        match self {
            Self::Connected { job_id, .. }
            | Self::Disconnected { job_id, .. }
            | Self::Progress { job_id, .. }
            | Self::Completed { job_id, .. }
            | Self::Error { job_id, .. }
            | Self::ReconnectScheduled { job_id, .. }
            | Self::RetriesExhausted { job_id, .. } => job_id,
        }
    }

    /// Whether no further events will follow for this job.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::RetriesExhausted { .. })
    }
}

pub(crate) fn now() -> Timestamp {
    Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_kind_tag() {
        let event = ProgressEvent::ReconnectScheduled {
            job_id: JobId::parse("abc123").unwrap(),
            attempt: 2,
            delay_ms: 4000,
            at: now(),
        };
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["kind"], "reconnect_scheduled");
        assert_eq!(json["job_id"], "abc123");
        assert_eq!(json["attempt"], 2);
        assert_eq!(json["delay_ms"], 4000);
        assert!(json["at"].is_string());
    }

    #[test]
    fn only_completion_and_exhaustion_are_terminal() {
        let job_id = JobId::parse("abc123").unwrap();
        let completed = ProgressEvent::Completed {
            job_id: job_id.clone(),
            data: serde_json::Value::Null,
            at: now(),
        };
        let error = ProgressEvent::Error {
            job_id: job_id.clone(),
            message: "boom".into(),
            at: now(),
        };

        assert!(completed.is_terminal());
        assert!(!error.is_terminal());
        assert_eq!(error.job_id(), &job_id);
    }
}
