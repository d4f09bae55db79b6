//! Extension points invoked by the change watcher.
//!
//! The watcher never decides what a threshold crossing or power transition
//! means; it reports them to a [`SensorObserver`]. Observers run inline with
//! event handling, after the registry lock has been released, and receive a
//! snapshot of the sensor as it is after the change.

use crate::sensors::{Sensor, SensorCategory, SensorState};
use log::{info, warn};
use tokio::sync::mpsc;

/// Receives sensor and power transitions. Every method defaults to a no-op.
pub trait SensorObserver: Send + Sync {
    /// The sensor's value changed; `prev` is the value before the change.
    fn sensor_change_value(&self, sensor: &Sensor, prev: i64) {
        let _ = (sensor, prev);
    }

    /// The sensor's derived state changed; `prev` is the state before.
    fn sensor_change_state(&self, sensor: &Sensor, category: SensorCategory, prev: SensorState) {
        let _ = (sensor, category, prev);
    }

    /// The host power state changed; `prev` is the value before.
    fn power_state_changed(&self, prev: i64) {
        let _ = prev;
    }
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SensorObserver for NoopObserver {}

/// Observer that logs state and power transitions.
///
/// Value changes are logged at trace level only; fans and power readings
/// change constantly.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl SensorObserver for LoggingObserver {
    fn sensor_change_value(&self, sensor: &Sensor, prev: i64) {
        log::trace!(
            "[Watcher] {} value {} -> {}",
            sensor.name,
            prev,
            sensor.current_value
        );
    }

    fn sensor_change_state(&self, sensor: &Sensor, category: SensorCategory, prev: SensorState) {
        match sensor.state {
            SensorState::Normal | SensorState::Unavailable => info!(
                "[Watcher] {} sensor {} state {} -> {} (value {})",
                category, sensor.name, prev, sensor.state, sensor.current_value
            ),
            _ => warn!(
                "[Watcher] {} sensor {} state {} -> {} (value {})",
                category, sensor.name, prev, sensor.state, sensor.current_value
            ),
        }
    }

    fn power_state_changed(&self, prev: i64) {
        info!("[Watcher] Power state changed from {}", prev);
    }
}

/// A transition, as delivered by [`ChannelObserver`].
#[derive(Debug, Clone, PartialEq)]
pub enum WatcherEvent {
    ValueChanged {
        sensor: Sensor,
        prev: i64,
    },
    StateChanged {
        category: SensorCategory,
        sensor: Sensor,
        prev: SensorState,
    },
    PowerStateChanged {
        prev: i64,
    },
}

/// Observer that forwards every transition into a channel, for consumers that
/// want to handle them on their own task (trap emission, for instance).
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<WatcherEvent>,
}

impl ChannelObserver {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<WatcherEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: WatcherEvent) {
        // No receiver means nobody is interested any more.
        let _ = self.tx.send(event);
    }
}

impl SensorObserver for ChannelObserver {
    fn sensor_change_value(&self, sensor: &Sensor, prev: i64) {
        self.send(WatcherEvent::ValueChanged {
            sensor: sensor.clone(),
            prev,
        });
    }

    fn sensor_change_state(&self, sensor: &Sensor, category: SensorCategory, prev: SensorState) {
        self.send(WatcherEvent::StateChanged {
            category,
            sensor: sensor.clone(),
            prev,
        });
    }

    fn power_state_changed(&self, prev: i64) {
        self.send(WatcherEvent::PowerStateChanged { prev });
    }
}
