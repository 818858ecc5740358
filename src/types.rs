//! Core types for the reading feed.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Opaque identifier for a reading, stable across updates.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReadingId(pub String);

impl ReadingId {
    pub fn new(id: impl Into<String>) -> Self {
        ReadingId(id.into())
    }

    /// Fresh random identifier (what the backing store assigns on insert).
    pub fn generate() -> Self {
        ReadingId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ReadingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReadingId({})", self.0)
    }
}

impl fmt::Display for ReadingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ReadingId {
    fn from(s: &str) -> Self {
        ReadingId(s.to_string())
    }
}

impl From<String> for ReadingId {
    fn from(s: String) -> Self {
        ReadingId(s)
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp(duration.as_micros() as i64)
    }

    pub fn from_secs(secs: i64) -> Self {
        Timestamp(secs.saturating_mul(1_000_000))
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// A point-in-time sensor observation.
///
/// `session` carries the joined session (and its nested asset) exactly as the
/// query layer returned it. It is preserved across merges and never inspected.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub id: ReadingId,

    /// Owning session (join key only).
    pub session_id: String,

    /// Open category tag, e.g. "temperature" or "flow_rate".
    pub sensor_type: String,

    pub value: f64,

    #[serde(default)]
    pub unit: Option<String>,

    /// When the observation was taken.
    pub timestamp: Timestamp,

    /// Enrichment payload (session with nested asset).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<serde_json::Value>,
}

impl Reading {
    /// Create an un-enriched reading.
    pub fn new(
        id: impl Into<ReadingId>,
        session_id: impl Into<String>,
        sensor_type: impl Into<String>,
        value: f64,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            session_id: session_id.into(),
            sensor_type: sensor_type.into(),
            value,
            unit: None,
            timestamp,
            session: None,
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn with_session(mut self, session: serde_json::Value) -> Self {
        self.session = Some(session);
        self
    }

    /// True once the joined session payload is attached.
    pub fn is_enriched(&self) -> bool {
        self.session.is_some()
    }
}
