//! Fleet-wide event bus (§6, expanded per the ambient-stack notes):
//! `StateChange`, `ScalingDecision`, `HealthIssue`, and `SessionEvent`
//! all flow through bounded broadcast channels. A lagging subscriber
//! misses the oldest entries and is told so via a logged warning rather
//! than being disconnected.

use chrono::{DateTime, Utc};
use fleet_core::CircuitState;
use fleet_health::HealthIssue;
use fleet_pool::SessionEvent;
use fleet_scaler::ScalingDecision;
use tokio::sync::broadcast;

const BUS_CAPACITY: usize = 256;

/// Mirrors the `StateChange{component, from, to, ts, reason}` event in
/// §6; `fleet-breaker`'s listener callback only carries `(from, to)`, so
/// this wraps that with the component name and timestamp at publish time.
#[derive(Debug, Clone, PartialEq)]
pub struct StateChangeEvent {
    pub component: String,
    pub from: CircuitState,
    pub to: CircuitState,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
}

pub struct EventBus {
    pub state_change: broadcast::Sender<StateChangeEvent>,
    pub scaling_decision: broadcast::Sender<ScalingDecision>,
    pub health_issue: broadcast::Sender<HealthIssue>,
    pub session_event: broadcast::Sender<SessionEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        let (state_change, _) = broadcast::channel(BUS_CAPACITY);
        let (scaling_decision, _) = broadcast::channel(BUS_CAPACITY);
        let (health_issue, _) = broadcast::channel(BUS_CAPACITY);
        let (session_event, _) = broadcast::channel(BUS_CAPACITY);
        Self { state_change, scaling_decision, health_issue, session_event }
    }

    pub fn publish_state_change(&self, event: StateChangeEvent) {
        let _ = self.state_change.send(event);
    }

    /// Forward every decision from `scaler`'s own bus onto this one,
    /// until `cancel` fires. Dropped (lagged) entries are logged.
    pub async fn forward_scaling_decisions(
        &self,
        mut upstream: broadcast::Receiver<ScalingDecision>,
        cancel: tokio_util::sync::CancellationToken,
    ) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                received = upstream.recv() => match received {
                    Ok(decision) => { let _ = self.scaling_decision.send(decision); }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "scaling decision events dropped, receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        }
    }

    pub async fn forward_health_issues(
        &self,
        mut upstream: broadcast::Receiver<HealthIssue>,
        cancel: tokio_util::sync::CancellationToken,
    ) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                received = upstream.recv() => match received {
                    Ok(issue) => { let _ = self.health_issue.send(issue); }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "health issue events dropped, receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        }
    }

    pub async fn forward_session_events(
        &self,
        mut upstream: broadcast::Receiver<SessionEvent>,
        cancel: tokio_util::sync::CancellationToken,
    ) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                received = upstream.recv() => match received {
                    Ok(event) => { let _ = self.session_event.send(event); }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "session events dropped, receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn state_change_publish_reaches_subscriber() {
        let bus = EventBus::new();
        let mut rx = bus.state_change.subscribe();
        bus.publish_state_change(StateChangeEvent {
            component: "breaker".to_string(),
            from: CircuitState::Closed,
            to: CircuitState::Open,
            timestamp: Utc::now(),
            reason: Some("failure rate exceeded".to_string()),
        });
        let event = rx.recv().await.unwrap();
        assert_eq!(event.component, "breaker");
        assert_eq!(event.to, CircuitState::Open);
    }

    #[tokio::test]
    async fn forwarder_stops_on_cancel() {
        let bus = EventBus::new();
        let (tx, rx) = broadcast::channel(8);
        let cancel = tokio_util::sync::CancellationToken::new();
        let cancel_clone = cancel.clone();
        let handle = tokio::spawn(async move { bus.forward_health_issues(rx, cancel_clone).await });
        drop(tx);
        cancel.cancel();
        handle.await.unwrap();
    }
}
