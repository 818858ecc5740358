//! Subscription health state machine.

use crate::error::SubscriptionError;
use crate::feed::LifecycleSignal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Health of the live subscription as shown to the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Connecting,
    Connected,
    Disconnected,
}

impl ConnectionState {
    pub fn label(self) -> &'static str {
        match self {
            ConnectionState::Connecting => "Connecting...",
            ConnectionState::Connected => "Connected",
            ConnectionState::Disconnected => "Disconnected",
        }
    }

    /// Data shown while in this state may be out of date.
    pub fn is_stale(self) -> bool {
        !matches!(self, ConnectionState::Connected)
    }
}

/// Tracks connection state plus the reason for the last failure.
///
/// There is no terminal state: a disconnected monitor goes back to
/// `Connecting` on the next subscribe attempt.
#[derive(Debug, Default)]
pub struct ConnectionMonitor {
    state: ConnectionState,
    error: Option<SubscriptionError>,
}

impl ConnectionMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn error(&self) -> Option<&SubscriptionError> {
        self.error.as_ref()
    }

    /// Apply a lifecycle signal delivered by the feed.
    pub fn apply(&mut self, signal: &LifecycleSignal) {
        match signal {
            LifecycleSignal::Connecting => self.begin_attempt(),
            LifecycleSignal::Subscribed => self.subscribed(),
            LifecycleSignal::Rejected { reason } => self.rejected(reason.as_deref()),
            LifecycleSignal::TimedOut => self.timed_out(),
            LifecycleSignal::Closed => self.closed(),
        }
    }

    /// A subscribe attempt started.
    pub fn begin_attempt(&mut self) {
        self.state = ConnectionState::Connecting;
        self.error = None;
    }

    /// The feed acknowledged the subscription.
    pub fn subscribed(&mut self) {
        if self.state != ConnectionState::Connected {
            info!("realtime subscription connected");
        }
        self.state = ConnectionState::Connected;
        self.error = None;
    }

    pub fn rejected(&mut self, reason: Option<&str>) {
        let error = SubscriptionError::rejected(reason);
        warn!(%error, "realtime subscription rejected");
        self.state = ConnectionState::Disconnected;
        self.error = Some(error);
    }

    pub fn timed_out(&mut self) {
        warn!("realtime subscription timed out");
        self.state = ConnectionState::Disconnected;
        self.error = Some(SubscriptionError::TimedOut);
    }

    /// Channel closed, including deliberate teardown. Keeps any earlier
    /// error so the reason for a failure stays visible.
    pub fn closed(&mut self) {
        info!("realtime subscription closed");
        self.state = ConnectionState::Disconnected;
    }
}
