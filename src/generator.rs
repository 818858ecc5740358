//! Mock reading producer.
//!
//! Writes plausible sensor readings for active sessions at a fixed
//! interval. Each (session, sensor type) pair drifts from its previous
//! value instead of jumping around the whole range.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::feed::MemoryFeed;
use crate::types::{Reading, ReadingId, Timestamp};

/// Per-step variation as a share of the sensor's range.
const VARIATION: f64 = 0.05;

/// Maximum per-step trend drift as a share of the range.
const TREND_DRIFT: f64 = 0.02;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
}

/// Value envelope of one sensor type.
#[derive(Clone, Debug, PartialEq)]
pub struct SensorProfile {
    pub sensor_type: String,
    pub unit: String,
    pub min: f64,
    pub max: f64,
    pub trend: Trend,
}

impl SensorProfile {
    pub fn new(sensor_type: &str, unit: &str, min: f64, max: f64) -> Self {
        Self {
            sensor_type: sensor_type.to_string(),
            unit: unit.to_string(),
            min,
            max,
            trend: Trend::Stable,
        }
    }

    pub fn with_trend(mut self, trend: Trend) -> Self {
        self.trend = trend;
        self
    }

    pub fn range(&self) -> f64 {
        self.max - self.min
    }

    /// The five stock sensors.
    pub fn defaults() -> Vec<SensorProfile> {
        vec![
            SensorProfile::new("temperature", "°C", 18.0, 30.0),
            SensorProfile::new("pressure", "kPa", 95.0, 110.0),
            SensorProfile::new("humidity", "%", 30.0, 70.0),
            SensorProfile::new("vibration", "Hz", 0.0, 100.0),
            SensorProfile::new("flow_rate", "L/min", 10.0, 50.0),
        ]
    }
}

/// Next value for `profile`, continuing from `previous` when known.
///
/// Rounded to one decimal and always within `[min, max]`.
pub fn next_value<R: Rng + ?Sized>(profile: &SensorProfile, previous: Option<f64>, rng: &mut R) -> f64 {
    let range = profile.range();
    let raw = match previous {
        None => profile.min + rng.gen::<f64>() * range,
        Some(previous) => {
            let mut value = previous + (rng.gen::<f64>() - 0.5) * range * VARIATION;
            match profile.trend {
                Trend::Increasing => value += rng.gen::<f64>() * range * TREND_DRIFT,
                Trend::Decreasing => value -= rng.gen::<f64>() * range * TREND_DRIFT,
                Trend::Stable => {}
            }
            value
        }
    };
    let rounded = (raw.clamp(profile.min, profile.max) * 10.0).round() / 10.0;
    rounded.clamp(profile.min, profile.max)
}

/// Produces readings for a set of active sessions.
pub struct MockGenerator {
    profiles: Vec<SensorProfile>,
    /// (session_id, sensor_type) -> last generated value.
    last_values: HashMap<(String, String), f64>,
}

impl MockGenerator {
    pub fn new(profiles: Vec<SensorProfile>) -> Self {
        Self {
            profiles,
            last_values: HashMap::new(),
        }
    }

    /// One reading for a random active session and sensor, or `None`
    /// when there is nothing to generate for.
    pub fn generate<R: Rng + ?Sized>(
        &mut self,
        active_sessions: &[String],
        rng: &mut R,
    ) -> Option<Reading> {
        if active_sessions.is_empty() || self.profiles.is_empty() {
            return None;
        }
        let session_id = &active_sessions[rng.gen_range(0..active_sessions.len())];
        let profile = &self.profiles[rng.gen_range(0..self.profiles.len())];

        let key = (session_id.clone(), profile.sensor_type.clone());
        let value = next_value(profile, self.last_values.get(&key).copied(), rng);
        self.last_values.insert(key, value);

        Some(
            Reading::new(
                ReadingId::generate(),
                session_id.clone(),
                profile.sensor_type.clone(),
                value,
                Timestamp::now(),
            )
            .with_unit(profile.unit.clone()),
        )
    }

    /// Insert one reading per `interval` into `feed` until cancelled.
    /// The first reading is written immediately. Returns how many were
    /// written.
    pub async fn run(
        mut self,
        feed: Arc<MemoryFeed>,
        active_sessions: Vec<String>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> usize {
        info!(interval_ms = interval.as_millis() as u64, "starting mock reading generator");
        let mut rng = StdRng::from_entropy();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut written = 0;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(written, "stopping mock reading generator");
                    break;
                }
                _ = ticker.tick() => {
                    match self.generate(&active_sessions, &mut rng) {
                        Some(reading) => {
                            info!(
                                sensor_type = %reading.sensor_type,
                                value = reading.value,
                                "generated reading"
                            );
                            feed.insert(reading);
                            written += 1;
                        }
                        None => debug!("no active sessions found"),
                    }
                }
            }
        }
        written
    }
}

impl Default for MockGenerator {
    fn default() -> Self {
        Self::new(SensorProfile::defaults())
    }
}
