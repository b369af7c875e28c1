//! Progress WebSocket message types and parser.
//!
//! The server sends flat JSON records discriminated by a `"type"` field,
//! e.g. `{"type": "progress", "progress": 40, "stage": "scraping"}`. This
//! module deserializes them into a strongly-typed [`ProgressMessage`].
//!
//! The server emits `null` for unset fields, so every payload field is
//! an `Option` (or defaults) rather than a required value.

use serde::{Deserialize, Deserializer};

/// All known progress WebSocket message types.
///
/// Deserialized via the internally-tagged `"type"` field. Discriminators
/// this client does not know map to [`ProgressMessage::Unknown`].
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressMessage {
    /// Handshake acknowledgement sent right after the socket opens.
    Connected(ConnectedData),

    /// Periodic status update.
    Progress(ProgressData),

    /// The job finished successfully.
    Complete(CompleteData),

    /// The job reported a failure. Not necessarily fatal.
    Error(ErrorData),

    /// Any other discriminator.
    #[serde(other)]
    Unknown,
}

/// Payload for `connected` messages.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectedData {
    #[serde(default)]
    pub message: Option<String>,
    /// Echo of the job the server bound this socket to.
    #[serde(default)]
    pub task_id: Option<String>,
}

/// Payload for `progress` messages.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProgressData {
    /// Completion percentage. Expected in 0-100 but not trusted, and
    /// may arrive as a float.
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub substage: Option<String>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub step: Option<u32>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub total_steps: Option<u32>,
    /// Page currently being processed, if any.
    #[serde(default)]
    pub url: Option<String>,
}

/// Payload for `complete` messages.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompleteData {
    #[serde(default)]
    pub message: Option<String>,
    /// Opaque job result, passed through to callers unchanged.
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Payload for `error` messages.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorData {
    #[serde(default)]
    pub message: Option<String>,
    /// Detailed error text; may be empty.
    #[serde(default)]
    pub error: Option<String>,
}

impl ErrorData {
    /// The most specific description available: `error` when non-empty,
    /// otherwise `message`.
    pub fn detail(&self) -> String {
        self.error
            .as_deref()
            .filter(|e| !e.is_empty())
            .or(self.message.as_deref())
            .unwrap_or_default()
            .to_string()
    }
}

/// Accept any JSON value for an optional step counter. Only positive
/// whole numbers that fit in a `u32` are kept; anything else is `None`
/// rather than a failure of the whole frame.
fn lenient_count<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    let count = match value {
        Some(serde_json::Value::Number(n)) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= 1.0 && *f <= f64::from(u32::MAX))
                .map(|f| f as u64)
        }),
        _ => None,
    };
    Ok(count
        .filter(|n| *n > 0)
        .and_then(|n| u32::try_from(n).ok()))
}

/// Parse a progress WebSocket text frame into a typed enum.
///
/// Returns `Err` for malformed JSON or a record without a `type` field.
/// Callers should log and drop the frame.
pub fn parse_message(text: &str) -> Result<ProgressMessage, serde_json::Error> {
    serde_json::from_str(text)
}
