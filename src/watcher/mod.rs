//! Change watcher keeping the sensor registry in sync with the bus.
//!
//! The watcher owns every bus subscription the bridge holds:
//!
//! - one `PropertiesChanged` subscription per sensor in the registry,
//! - `InterfacesAdded` / `InterfacesRemoved` under the sensors namespace,
//! - `PropertiesChanged` on the host power object.
//!
//! All subscriptions feed a single channel which [`ChangeWatcher::run`]
//! drains one signal at a time, in arrival order. A sensor is in the registry
//! if and only if the watcher holds its property subscription; removal drops
//! the subscription before the registry entry.

pub mod decode;
pub mod observer;
pub mod path;

pub use observer::{
    ChannelObserver, LoggingObserver, NoopObserver, SensorObserver, WatcherEvent,
};
pub use path::{sensor_object_path, split_object_path};

use crate::bus::{
    BusSignal, InterfaceMap, PropValue, PropertyMap, SENSOR_VALUE_INTERFACE, SensorBus,
    SignalFilter, Subscription, in_namespace,
};
use crate::config::{Config, PowerConfig};
use crate::error::{BridgeError, DecodeError, Result};
use crate::sensors::{SensorCategory, SharedRegistry};
use decode::{apply_update, decode_updates, sensor_from_interfaces};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

type SensorKey = (SensorCategory, String);

/// Mirrors bus sensor objects into a [`SharedRegistry`].
pub struct ChangeWatcher {
    bus: Arc<dyn SensorBus>,
    registry: SharedRegistry,
    observer: Arc<dyn SensorObserver>,
    sensors_root: String,
    power: PowerConfig,
    power_state: Option<i64>,
    signal_tx: mpsc::UnboundedSender<BusSignal>,
    signal_rx: mpsc::UnboundedReceiver<BusSignal>,
    sensor_subscriptions: HashMap<SensorKey, Subscription>,
    added_subscription: Option<Subscription>,
    removed_subscription: Option<Subscription>,
    power_subscription: Option<Subscription>,
}

impl ChangeWatcher {
    pub fn new(
        bus: Arc<dyn SensorBus>,
        registry: SharedRegistry,
        observer: Arc<dyn SensorObserver>,
        config: &Config,
    ) -> Self {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        Self {
            bus,
            registry,
            observer,
            sensors_root: config.bus.sensors_root.clone(),
            power: config.power.clone(),
            power_state: None,
            signal_tx,
            signal_rx,
            sensor_subscriptions: HashMap::new(),
            added_subscription: None,
            removed_subscription: None,
            power_subscription: None,
        }
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    /// Last known host power state, once [`update_power_state`] succeeded.
    ///
    /// [`update_power_state`]: ChangeWatcher::update_power_state
    pub fn power_state(&self) -> Option<i64> {
        self.power_state
    }

    /// Number of live per-sensor subscriptions.
    pub fn sensor_subscription_count(&self) -> usize {
        self.sensor_subscriptions.len()
    }

    pub fn is_subscribed(&self, category: SensorCategory, name: &str) -> bool {
        self.sensor_subscriptions
            .contains_key(&(category, name.to_string()))
    }

    /// Read the power state and start following its changes.
    ///
    /// Any failure here is fatal to the caller: without the initial value
    /// there is nothing meaningful to report.
    pub async fn update_power_state(&mut self) -> Result<()> {
        let raw = self
            .bus
            .get_property(&self.power.path, &self.power.interface, &self.power.property)
            .await
            .map_err(|e| BridgeError::PowerStateUnavailable(e.to_string()))?;
        let value = decode_power(&self.power.property, &raw)
            .map_err(|e| BridgeError::PowerStateUnavailable(e.to_string()))?;
        self.power_state = Some(value);

        if self.power_subscription.is_none() {
            let filter = SignalFilter::PropertiesChanged {
                path: self.power.path.clone(),
                interface: Some(self.power.interface.clone()),
            };
            self.power_subscription = Some(self.subscribe(filter).await?);
        }

        info!(
            "[Watcher] Power state {} = {} ({})",
            self.power.property, value, self.power.path
        );
        Ok(())
    }

    /// Load every sensor under the sensors namespace and start following
    /// object lifecycle and property changes.
    ///
    /// Lifecycle subscriptions are established before enumeration so that an
    /// object appearing in between is not missed; a duplicate announcement is
    /// merged into the existing entry.
    pub async fn update_sensors(&mut self) -> Result<()> {
        if self.added_subscription.is_none() {
            let filter = SignalFilter::InterfacesAdded {
                namespace: self.sensors_root.clone(),
            };
            self.added_subscription = Some(self.subscribe(filter).await?);
        }
        if self.removed_subscription.is_none() {
            let filter = SignalFilter::InterfacesRemoved {
                namespace: self.sensors_root.clone(),
            };
            self.removed_subscription = Some(self.subscribe(filter).await?);
        }

        let objects = self.bus.sensor_objects(&self.sensors_root).await?;
        for object in objects {
            let Some((name, category)) = self.classify(&object.path) else {
                debug!("[Watcher] Skipping {}: not a sensor path", object.path);
                continue;
            };
            if self.is_subscribed(category, &name) {
                self.merge_interfaces(category, &name, &object.interfaces);
                continue;
            }
            self.add_sensor(category, &name, &object.path, &object.interfaces)
                .await?;
        }

        info!(
            "[Watcher] Tracking {} sensors under {}",
            self.sensor_subscriptions.len(),
            self.sensors_root
        );
        Ok(())
    }

    /// Process bus signals one at a time until every signal source is gone.
    ///
    /// The watcher keeps a sender of its own channel, so in practice this
    /// only ends when the task running it is cancelled.
    pub async fn run(&mut self) {
        info!("[Watcher] Event loop started");
        while let Some(signal) = self.signal_rx.recv().await {
            self.dispatch(signal).await;
        }
        info!("[Watcher] Event loop finished");
    }

    /// Process every signal already queued, without waiting for more.
    ///
    /// Returns how many signals were handled.
    pub async fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(signal) = self.signal_rx.try_recv() {
            self.dispatch(signal).await;
            handled += 1;
        }
        handled
    }

    async fn dispatch(&mut self, signal: BusSignal) {
        match signal {
            BusSignal::InterfacesAdded { path, interfaces } => {
                self.on_sensors_added(&path, &interfaces).await;
            }
            BusSignal::InterfacesRemoved { path, interfaces } => {
                self.on_sensors_removed(&path, &interfaces);
            }
            BusSignal::PropertiesChanged {
                path,
                interface,
                changed,
            } => {
                if path == self.power.path && interface == self.power.interface {
                    self.on_power_state_changed(&changed);
                } else {
                    self.on_properties_changed(&path, &interface, &changed);
                }
            }
        }
    }

    async fn on_sensors_added(&mut self, path: &str, interfaces: &InterfaceMap) {
        let Some((name, category)) = self.classify(path) else {
            debug!("[Watcher] Ignoring new object {}", path);
            return;
        };

        if self.is_subscribed(category, &name) {
            self.merge_interfaces(category, &name, interfaces);
            return;
        }
        if !interfaces.contains_key(SENSOR_VALUE_INTERFACE) {
            debug!("[Watcher] Ignoring {}: no sensor value yet", path);
            return;
        }

        // Subscribe before reading the object so no change falls in between.
        let subscription = match self.subscribe(sensor_filter(path)).await {
            Ok(s) => s,
            Err(e) => {
                warn!("[Watcher] Failed to add sensor {}: {}", path, e);
                return;
            }
        };
        let current = self.current_interfaces(path, interfaces).await;
        self.track_sensor(category, &name, path, &current, subscription);
    }

    /// Interfaces of `path` as the bus reports them now, on top of those
    /// announced in the signal.
    ///
    /// A sensor announced in several `InterfacesAdded` signals only passes
    /// the value check on the one carrying `Sensor.Value`; the others are
    /// recovered here.
    async fn current_interfaces(&self, path: &str, announced: &InterfaceMap) -> InterfaceMap {
        let mut interfaces = announced.clone();
        match self.bus.object(path).await {
            Ok(Some(object)) => {
                for (interface, props) in object.interfaces {
                    interfaces.entry(interface).or_default().extend(props);
                }
            }
            Ok(None) => debug!("[Watcher] {} is gone, using announced interfaces", path),
            Err(e) => warn!(
                "[Watcher] Failed to read {}, using announced interfaces: {}",
                path, e
            ),
        }
        interfaces
    }

    fn on_sensors_removed(&mut self, path: &str, interfaces: &[String]) {
        let Some((name, category)) = self.classify(path) else {
            return;
        };
        // Losing only a threshold interface does not remove the sensor.
        if !interfaces.is_empty() && !interfaces.iter().any(|i| i == SENSOR_VALUE_INTERFACE) {
            debug!("[Watcher] {} lost {:?}", path, interfaces);
            return;
        }

        let key = (category, name);
        let Some(subscription) = self.sensor_subscriptions.remove(&key) else {
            return;
        };
        drop(subscription);

        let (category, name) = key;
        self.registry.write().remove(category, &name);
        info!("[Watcher] Removed {} sensor {}", category, name);
    }

    fn on_properties_changed(&mut self, path: &str, interface: &str, changed: &PropertyMap) {
        let Some((name, category)) = self.classify(path) else {
            return;
        };
        if !self.is_subscribed(category, &name) {
            // Queued before the sensor was removed.
            return;
        }
        if let Err(e) = self.apply_changes(category, &name, &[(interface, changed)]) {
            warn!(
                "[Watcher] Dropping change of {} on {}: {}",
                interface, path, e
            );
        }
    }

    fn on_power_state_changed(&mut self, changed: &PropertyMap) {
        let Some(raw) = changed.get(&self.power.property) else {
            return;
        };
        let value = match decode_power(&self.power.property, raw) {
            Ok(v) => v,
            Err(e) => {
                warn!("[Watcher] Dropping power state change: {}", e);
                return;
            }
        };

        let prev = self.power_state.replace(value);
        if let Some(prev) = prev
            && prev != value
        {
            self.observer.power_state_changed(prev);
        }
    }

    async fn add_sensor(
        &mut self,
        category: SensorCategory,
        name: &str,
        path: &str,
        interfaces: &InterfaceMap,
    ) -> Result<()> {
        let subscription = self.subscribe(sensor_filter(path)).await?;
        self.track_sensor(category, name, path, interfaces, subscription);
        Ok(())
    }

    /// Insert the sensor built from `interfaces` and keep its subscription.
    /// An undecodable sensor is skipped and the subscription released.
    fn track_sensor(
        &mut self,
        category: SensorCategory,
        name: &str,
        path: &str,
        interfaces: &InterfaceMap,
        subscription: Subscription,
    ) {
        let sensor = match sensor_from_interfaces(name, interfaces) {
            Ok(s) => s,
            Err(e) => {
                warn!("[Watcher] Skipping sensor {}: {}", path, e);
                return;
            }
        };

        self.registry.write().insert(category, sensor);
        self.sensor_subscriptions
            .insert((category, name.to_string()), subscription);
        debug!("[Watcher] Added {} sensor {}", category, name);
    }

    fn merge_interfaces(&mut self, category: SensorCategory, name: &str, interfaces: &InterfaceMap) {
        let changes: Vec<(&str, &PropertyMap)> = interfaces
            .iter()
            .map(|(interface, props)| (interface.as_str(), props))
            .collect();
        if let Err(e) = self.apply_changes(category, name, &changes) {
            warn!("[Watcher] Dropping update of {} {}: {}", category, name, e);
        }
    }

    /// Decode and apply property changes to one sensor under a single write
    /// guard, then report transitions to the observer with the guard dropped.
    ///
    /// Nothing is applied if any recognised property fails to decode.
    fn apply_changes(
        &self,
        category: SensorCategory,
        name: &str,
        changes: &[(&str, &PropertyMap)],
    ) -> std::result::Result<(), DecodeError> {
        let (snapshot, prev_value, prev_state) = {
            let mut registry = self.registry.write();
            let Some(sensor) = registry.get_mut(category, name) else {
                return Ok(());
            };

            let mut updates = Vec::new();
            for (interface, props) in changes {
                updates.extend(decode_updates(interface, props, sensor.scale)?);
            }
            if updates.is_empty() {
                return Ok(());
            }

            let mut prev_value = None;
            for update in updates {
                if let Some(prev) = apply_update(sensor, update) {
                    prev_value.get_or_insert(prev);
                }
            }
            let prev_state = sensor.refresh_state();
            (sensor.clone(), prev_value, prev_state)
        };

        if let Some(prev) = prev_value {
            self.observer.sensor_change_value(&snapshot, prev);
        }
        if let Some(prev) = prev_state {
            self.observer.sensor_change_state(&snapshot, category, prev);
        }
        Ok(())
    }

    async fn subscribe(&self, filter: SignalFilter) -> Result<Subscription> {
        self.bus.subscribe(filter, self.signal_tx.clone()).await
    }

    fn classify(&self, path: &str) -> Option<(String, SensorCategory)> {
        if !in_namespace(&self.sensors_root, path) {
            return None;
        }
        split_object_path(path)
    }
}

fn sensor_filter(path: &str) -> SignalFilter {
    SignalFilter::PropertiesChanged {
        path: path.to_string(),
        interface: None,
    }
}

fn decode_power(property: &str, raw: &PropValue) -> std::result::Result<i64, DecodeError> {
    match raw {
        PropValue::Int(v) => Ok(*v),
        PropValue::Bool(v) => Ok(i64::from(*v)),
        other => Err(DecodeError::UnsupportedType {
            property: property.to_string(),
            found: other.type_name().to_string(),
        }),
    }
}
