//! Progress state reducer.
//!
//! [`reduce`] is a pure translation from the current
//! [`ProgressSnapshot`] and one parsed [`ProgressMessage`] to a
//! [`Transition`]: the next snapshot (if anything changed), the callback
//! [`Effect`] to fire, and whether the connection should be torn down.
//! The connection manager owns publication and callback dispatch.

use serde::Serialize;

use crate::messages::{CompleteData, ErrorData, ProgressData, ProgressMessage};

/// Externally visible progress state for one subscription.
///
/// Replaced wholesale on every update, never patched in place.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    /// Completion percentage (0-100).
    pub progress: u8,
    pub status: String,
    pub message: String,
    pub stage: String,
    pub substage: String,
    pub step: Option<u32>,
    pub total_steps: Option<u32>,
    pub url: Option<String>,
    /// True only while the underlying connection is open.
    pub is_connected: bool,
    /// Set once the server reports completion.
    pub is_complete: bool,
    pub has_error: bool,
    pub error_message: Option<String>,
}

impl ProgressSnapshot {
    /// Copy of `self` with the connectivity flag changed.
    pub fn with_connected(&self, is_connected: bool) -> Self {
        Self {
            is_connected,
            ..self.clone()
        }
    }

    /// Copy of `self` flagged with a transport-level error.
    pub fn with_error(&self, error_message: impl Into<String>) -> Self {
        Self {
            has_error: true,
            error_message: Some(error_message.into()),
            ..self.clone()
        }
    }
}

/// The values delivered to `on_progress` for one progress message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressUpdate {
    pub progress: u8,
    pub status: String,
    pub message: String,
    pub stage: String,
    pub substage: String,
    pub step: Option<u32>,
    pub total_steps: Option<u32>,
    pub url: Option<String>,
}

/// A user-visible callback to fire as a result of a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Progress(ProgressUpdate),
    /// Carries the opaque result payload.
    Complete(serde_json::Value),
    /// Carries the error detail.
    Error(String),
}

/// Outcome of reducing a single message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transition {
    /// The replacement snapshot, or `None` when nothing changed.
    pub snapshot: Option<ProgressSnapshot>,
    pub effect: Option<Effect>,
    /// The job reached its terminal state and the connection should be
    /// closed after the grace delay.
    pub teardown: bool,
}

/// Reduce one message against the current snapshot.
pub fn reduce(current: &ProgressSnapshot, message: ProgressMessage) -> Transition {
    match message {
        // Connectivity is owned by the connection manager.
        ProgressMessage::Connected(_) | ProgressMessage::Unknown => Transition::default(),
        ProgressMessage::Progress(data) => reduce_progress(current, data),
        ProgressMessage::Complete(data) => reduce_complete(current, data),
        ProgressMessage::Error(data) => reduce_error(current, data),
    }
}

/// Clamp a raw percentage into 0-100. Non-finite values count as 0.
pub fn clamp_percent(raw: f64) -> u8 {
    if raw.is_finite() {
        raw.round().clamp(0.0, 100.0) as u8
    } else {
        0
    }
}

fn reduce_progress(current: &ProgressSnapshot, data: ProgressData) -> Transition {
    // `is_complete` is the only terminal latch; late progress still
    // replaces every field, the percentage included.
    let update = ProgressUpdate {
        progress: data.progress.map(clamp_percent).unwrap_or(0),
        status: data.status.unwrap_or_default(),
        message: data.message.unwrap_or_default(),
        stage: data.stage.unwrap_or_default(),
        substage: data.substage.unwrap_or_default(),
        step: data.step,
        total_steps: data.total_steps,
        url: data.url,
    };

    let next = ProgressSnapshot {
        progress: update.progress,
        status: update.status.clone(),
        message: update.message.clone(),
        stage: update.stage.clone(),
        substage: update.substage.clone(),
        step: update.step,
        total_steps: update.total_steps,
        url: update.url.clone(),
        ..current.clone()
    };

    Transition {
        snapshot: Some(next),
        effect: Some(Effect::Progress(update)),
        teardown: false,
    }
}

fn reduce_complete(current: &ProgressSnapshot, data: CompleteData) -> Transition {
    if current.is_complete {
        return Transition::default();
    }

    let next = ProgressSnapshot {
        is_complete: true,
        progress: 100,
        message: data.message.unwrap_or_default(),
        ..current.clone()
    };

    Transition {
        snapshot: Some(next),
        effect: Some(Effect::Complete(data.data)),
        teardown: true,
    }
}

fn reduce_error(current: &ProgressSnapshot, data: ErrorData) -> Transition {
    let detail = data.detail();
    let next = ProgressSnapshot {
        has_error: true,
        error_message: Some(detail.clone()),
        message: data.message.unwrap_or_default(),
        ..current.clone()
    };

    Transition {
        snapshot: Some(next),
        effect: Some(Effect::Error(detail)),
        teardown: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::parse_message;

    fn apply(snapshot: &ProgressSnapshot, json: &str) -> Transition {
        reduce(snapshot, parse_message(json).unwrap())
    }

    #[test]
    fn progress_replaces_fields_and_defaults_missing_ones() {
        let start = ProgressSnapshot {
            status: "old".into(),
            stage: "old".into(),
            step: Some(3),
            is_connected: true,
            ..Default::default()
        };

        let t = apply(&start, r#"{"type":"progress","progress":40,"status":"Fetching","stage":"scraping"}"#);
        let next = t.snapshot.unwrap();

        assert_eq!(next.progress, 40);
        assert_eq!(next.status, "Fetching");
        assert_eq!(next.stage, "scraping");
        assert_eq!(next.message, "");
        assert_eq!(next.substage, "");
        assert_eq!(next.step, None);
        assert!(next.is_connected, "connectivity is carried over");
        assert!(!t.teardown);
        match t.effect {
            Some(Effect::Progress(update)) => assert_eq!(update.progress, 40),
            other => panic!("Expected progress effect, got {other:?}"),
        }
    }

    #[test]
    fn progress_without_value_defaults_to_zero() {
        let start = ProgressSnapshot {
            progress: 70,
            ..Default::default()
        };
        let next = apply(&start, r#"{"type":"progress","progress":null}"#)
            .snapshot
            .unwrap();
        assert_eq!(next.progress, 0);
    }

    #[test]
    fn progress_tracks_last_value_without_smoothing() {
        let mut snapshot = ProgressSnapshot::default();
        for value in [10, 55, 30, 90] {
            let json = format!(r#"{{"type":"progress","progress":{value}}}"#);
            snapshot = apply(&snapshot, &json).snapshot.unwrap();
            assert_eq!(snapshot.progress, value);
        }
    }

    #[test]
    fn clamp_percent_bounds_values() {
        assert_eq!(clamp_percent(-5.0), 0);
        assert_eq!(clamp_percent(42.4), 42);
        assert_eq!(clamp_percent(42.6), 43);
        assert_eq!(clamp_percent(250.0), 100);
        assert_eq!(clamp_percent(f64::NAN), 0);
    }

    #[test]
    fn complete_forces_full_progress_and_requests_teardown() {
        let start = ProgressSnapshot {
            progress: 40,
            ..Default::default()
        };
        let t = apply(&start, r#"{"type":"complete","message":"Done","data":{"id":1}}"#);
        let next = t.snapshot.unwrap();

        assert!(next.is_complete);
        assert_eq!(next.progress, 100);
        assert_eq!(next.message, "Done");
        assert!(t.teardown);
        assert_eq!(t.effect, Some(Effect::Complete(serde_json::json!({"id": 1}))));
    }

    #[test]
    fn second_complete_fires_nothing() {
        let done = ProgressSnapshot {
            is_complete: true,
            progress: 100,
            ..Default::default()
        };
        let t = apply(&done, r#"{"type":"complete","message":"Again","data":{}}"#);
        assert_eq!(t, Transition::default());
    }

    #[test]
    fn progress_after_complete_is_applied_verbatim() {
        let done = apply(
            &ProgressSnapshot::default(),
            r#"{"type":"complete","data":{"id":1}}"#,
        )
        .snapshot
        .unwrap();

        let t = apply(&done, r#"{"type":"progress","progress":10,"status":"late"}"#);
        let next = t.snapshot.unwrap();
        assert!(next.is_complete);
        assert_eq!(next.progress, 10);
        assert_eq!(next.status, "late");
        match t.effect {
            Some(Effect::Progress(update)) => assert_eq!(update.progress, 10),
            other => panic!("Expected progress effect, got {other:?}"),
        }

        // Completion still fires only once.
        let again = apply(&next, r#"{"type":"complete","data":{"id":2}}"#);
        assert_eq!(again, Transition::default());
    }

    #[test]
    fn error_sets_flag_without_teardown() {
        let start = ProgressSnapshot {
            progress: 20,
            ..Default::default()
        };
        let t = apply(&start, r#"{"type":"error","message":"Extraction failed","error":"timeout"}"#);
        let next = t.snapshot.unwrap();

        assert!(next.has_error);
        assert_eq!(next.error_message.as_deref(), Some("timeout"));
        assert_eq!(next.message, "Extraction failed");
        assert_eq!(next.progress, 20);
        assert!(!t.teardown);
        assert_eq!(t.effect, Some(Effect::Error("timeout".into())));
    }

    #[test]
    fn connected_and_unknown_change_nothing() {
        let start = ProgressSnapshot::default();
        assert_eq!(apply(&start, r#"{"type":"connected","message":"hi"}"#), Transition::default());
        assert_eq!(apply(&start, r#"{"type":"whatever"}"#), Transition::default());
    }

    #[test]
    fn snapshot_helpers_copy_rather_than_mutate() {
        let start = ProgressSnapshot {
            progress: 12,
            ..Default::default()
        };
        let connected = start.with_connected(true);
        let failed = connected.with_error("boom");

        assert!(!start.is_connected);
        assert!(connected.is_connected);
        assert!(failed.has_error);
        assert_eq!(failed.error_message.as_deref(), Some("boom"));
        assert_eq!(failed.progress, 12);
    }
}
