//! Latest-value store and fan-out to connected viewers.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;
use gse_types::{HubMessage, TelemetryEvent, TelemetrySnapshot};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub type ViewerId = Uuid;

/// Holds the process-wide [`TelemetrySnapshot`] and routes every applied
/// update to all subscribed viewers.
///
/// Viewers get serialized envelopes on an unbounded channel; the socket task
/// on the other end does the actual writing.
#[derive(Default)]
pub struct TelemetryBroker {
    snapshot: Mutex<TelemetrySnapshot>,
    viewers: DashMap<ViewerId, mpsc::UnboundedSender<String>>,
}

impl TelemetryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `event` in the snapshot (last write wins) and forwards it to
    /// every viewer.
    pub fn apply(&self, event: &TelemetryEvent) {
        let message = match HubMessage::Telemetry(event.clone()).to_json() {
            Ok(message) => message,
            Err(e) => {
                warn!("Failed to serialize telemetry event: {}", e);
                return;
            }
        };
        // Held across the broadcast so a concurrent subscribe sees either the
        // old snapshot plus this update, or the new snapshot alone.
        let mut snapshot = self.lock_snapshot();
        snapshot.apply(event);
        self.broadcast(message);
    }

    /// Registers a viewer. The first message on the returned channel is the
    /// `init` envelope carrying the current snapshot.
    pub fn subscribe(&self) -> (ViewerId, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        let snapshot = self.lock_snapshot();
        match HubMessage::Init(snapshot.clone()).to_json() {
            Ok(init) => {
                let _ = tx.send(init);
            }
            Err(e) => warn!(viewer = %id, "Failed to serialize initial snapshot: {}", e),
        }
        self.viewers.insert(id, tx);
        (id, rx)
    }

    pub fn unsubscribe(&self, id: &ViewerId) -> bool {
        self.viewers.remove(id).is_some()
    }

    /// Answers a viewer heartbeat by telling every viewer the hub is alive.
    pub fn broadcast_heartbeat_response(&self, timestamp: i64) {
        match (HubMessage::HeartbeatResponse { timestamp }).to_json() {
            Ok(message) => self.broadcast(message),
            Err(e) => warn!("Failed to serialize heartbeat response: {}", e),
        }
    }

    pub fn client_count(&self) -> usize {
        self.viewers.len()
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.lock_snapshot().clone()
    }

    fn broadcast(&self, message: String) {
        self.viewers.retain(|id, tx| {
            let alive = tx.send(message.clone()).is_ok();
            if !alive {
                debug!(viewer = %id, "Viewer went away, unsubscribing");
            }
            alive
        });
    }

    fn lock_snapshot(&self) -> MutexGuard<'_, TelemetrySnapshot> {
        self.snapshot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Feeds every event from the relay into the broker until the relay side
/// hangs up.
pub fn forward_telemetry(
    events: flume::Receiver<TelemetryEvent>,
    broker: Arc<TelemetryBroker>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Ok(event) = events.recv_async().await {
            broker.apply(&event);
        }
        info!("Telemetry forwarding task finished.");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gse_types::TelemetryChannel;
    use serde_json::Value;

    fn pressure(value: f64) -> TelemetryEvent {
        TelemetryEvent::scalar(TelemetryChannel::Pressure, value).unwrap()
    }

    fn decode(message: &str) -> Value {
        serde_json::from_str(message).unwrap()
    }

    #[test]
    fn test_new_viewer_receives_snapshot_first() {
        let broker = TelemetryBroker::new();
        broker.apply(&pressure(73.5));
        broker.apply(&TelemetryEvent::valve("main", true));

        let (_, mut rx) = broker.subscribe();
        let init = decode(&rx.try_recv().unwrap());
        assert_eq!(init["type"], "init");
        assert_eq!(init["data"]["pressure"], 73.5);
        assert_eq!(init["data"]["valveStates"]["main"], true);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_updates_reach_every_viewer() {
        let broker = TelemetryBroker::new();
        let (_, mut a) = broker.subscribe();
        let (_, mut b) = broker.subscribe();
        a.try_recv().unwrap();
        b.try_recv().unwrap();

        broker.apply(&pressure(73.5));
        for rx in [&mut a, &mut b] {
            let update = decode(&rx.try_recv().unwrap());
            assert_eq!(update["type"], "pressure");
            assert_eq!(update["value"], 73.5);
            assert!(update["timestamp"].is_string());
        }
    }

    #[test]
    fn test_snapshot_keeps_last_value_per_channel() {
        let broker = TelemetryBroker::new();
        broker.apply(&pressure(50.0));
        broker.apply(&TelemetryEvent::scalar(TelemetryChannel::Voltage, 12.1).unwrap());
        broker.apply(&pressure(60.0));
        broker.apply(&TelemetryEvent::servo("gimbal", 10.0));
        broker.apply(&TelemetryEvent::servo("gimbal", 20.0));

        let snapshot = broker.snapshot();
        assert_eq!(snapshot.pressure, 60.0);
        assert_eq!(snapshot.voltage, 12.1);
        assert_eq!(snapshot.servo_positions["gimbal"], 20.0);
    }

    #[test]
    fn test_late_viewer_gets_no_history() {
        let broker = TelemetryBroker::new();
        for v in [1.0, 2.0, 3.0] {
            broker.apply(&pressure(v));
        }
        let (_, mut rx) = broker.subscribe();
        broker.apply(&pressure(4.0));

        let init = decode(&rx.try_recv().unwrap());
        assert_eq!(init["data"]["pressure"], 3.0);
        let update = decode(&rx.try_recv().unwrap());
        assert_eq!(update["value"], 4.0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_closed_viewer_is_dropped_on_send() {
        let broker = TelemetryBroker::new();
        let (_, rx) = broker.subscribe();
        let (_, _kept) = broker.subscribe();
        assert_eq!(broker.client_count(), 2);

        drop(rx);
        broker.apply(&pressure(1.0));
        assert_eq!(broker.client_count(), 1);
    }

    #[test]
    fn test_unsubscribe() {
        let broker = TelemetryBroker::new();
        let (id, _rx) = broker.subscribe();
        assert!(broker.unsubscribe(&id));
        assert!(!broker.unsubscribe(&id));
        assert_eq!(broker.client_count(), 0);
    }

    #[test]
    fn test_heartbeat_response_is_broadcast() {
        let broker = TelemetryBroker::new();
        let (_, mut rx) = broker.subscribe();
        rx.try_recv().unwrap();

        broker.broadcast_heartbeat_response(1_700_000_000_000);
        let message = decode(&rx.try_recv().unwrap());
        assert_eq!(message["type"], "heartbeat_response");
        assert_eq!(message["timestamp"], 1_700_000_000_000i64);
    }

    #[tokio::test]
    async fn test_forward_telemetry_applies_events() {
        let broker = Arc::new(TelemetryBroker::new());
        let (tx, rx) = flume::unbounded();
        let task = forward_telemetry(rx, broker.clone());

        tx.send(pressure(88.0)).unwrap();
        drop(tx);
        task.await.unwrap();
        assert_eq!(broker.snapshot().pressure, 88.0);
    }
}
