//! Consumer-facing view of a reconciled feed.

use crate::monitor::ConnectionState;
use serde::Serialize;

/// Everything a renderer needs besides the readings themselves.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FeedStatus {
    pub connection: ConnectionState,
    /// Subscription error if any, otherwise the load error.
    pub error: Option<String>,
    /// Initial query still outstanding.
    pub loading: bool,
    pub count: usize,
    /// Position 0 may be shown as "Latest".
    pub highlight_latest: bool,
}

impl FeedStatus {
    pub fn new(
        connection: ConnectionState,
        error: Option<String>,
        loading: bool,
        count: usize,
    ) -> Self {
        Self {
            connection,
            error,
            loading,
            count,
            highlight_latest: connection == ConnectionState::Connected && count > 0,
        }
    }

    /// "1 reading" / "N readings".
    pub fn count_label(&self) -> String {
        if self.count == 1 {
            "1 reading".to_string()
        } else {
            format!("{} readings", self.count)
        }
    }
}

/// Where a value sits relative to its sensor's normal band.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueBand {
    Low,
    Normal,
    High,
    /// Sensor type without known thresholds.
    Unclassified,
}

impl ValueBand {
    pub fn classify(sensor_type: &str, value: f64) -> Self {
        let (low, high) = match sensor_type {
            "temperature" => (20.0, 25.0),
            "pressure" => (95.0, 105.0),
            "humidity" => (30.0, 60.0),
            "vibration" => (10.0, 80.0),
            "flow_rate" => (15.0, 45.0),
            _ => return ValueBand::Unclassified,
        };
        if value > high {
            ValueBand::High
        } else if value < low {
            ValueBand::Low
        } else {
            ValueBand::Normal
        }
    }
}
