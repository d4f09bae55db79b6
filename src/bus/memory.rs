//! In-process object tree implementing [`SensorBus`].
//!
//! Used by the `--simulate` daemon mode and by tests. Objects are added,
//! removed and updated through the methods below, which emit the same
//! signals a D-Bus service would.

use super::router::SignalRouter;
use super::{
    BusSignal, InterfaceMap, ObjectSnapshot, PropValue, PropertyMap, SENSOR_VALUE_INTERFACE,
    SensorBus, SignalFilter, Subscription, in_namespace,
};
use crate::error::{BridgeError, Result};
use async_trait::async_trait;
use log::debug;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Default)]
struct BusState {
    objects: BTreeMap<String, InterfaceMap>,
    router: SignalRouter,
    fail_subscriptions: bool,
}

/// In-memory bus. Cheap to clone; clones share the same object tree.
#[derive(Clone, Default)]
pub struct MemoryBus {
    state: Arc<Mutex<BusState>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or extend an object and announce it with `InterfacesAdded`.
    pub fn add_object(&self, path: &str, interfaces: InterfaceMap) {
        let mut state = self.state.lock();
        let entry = state.objects.entry(path.to_string()).or_default();
        for (interface, props) in &interfaces {
            entry
                .entry(interface.clone())
                .or_default()
                .extend(props.clone());
        }
        state.router.deliver(&BusSignal::InterfacesAdded {
            path: path.to_string(),
            interfaces,
        });
    }

    /// Drop an object and announce it with `InterfacesRemoved`.
    ///
    /// Returns `false` if the object did not exist.
    pub fn remove_object(&self, path: &str) -> bool {
        let mut state = self.state.lock();
        let Some(interfaces) = state.objects.remove(path) else {
            return false;
        };
        let mut names: Vec<String> = interfaces.into_keys().collect();
        names.sort();
        state.router.deliver(&BusSignal::InterfacesRemoved {
            path: path.to_string(),
            interfaces: names,
        });
        true
    }

    /// Update one property and announce it with `PropertiesChanged`.
    pub fn set_property(&self, path: &str, interface: &str, property: &str, value: PropValue) {
        let mut state = self.state.lock();
        state
            .objects
            .entry(path.to_string())
            .or_default()
            .entry(interface.to_string())
            .or_default()
            .insert(property.to_string(), value.clone());

        let mut changed = PropertyMap::new();
        changed.insert(property.to_string(), value);
        state.router.deliver(&BusSignal::PropertiesChanged {
            path: path.to_string(),
            interface: interface.to_string(),
            changed,
        });
    }

    /// Deliver a signal as-is, without touching the object tree.
    pub fn emit(&self, signal: BusSignal) {
        self.state.lock().router.deliver(&signal);
    }

    /// Make every following `subscribe` call fail.
    pub fn fail_subscriptions(&self, fail: bool) {
        self.state.lock().fail_subscriptions = fail;
    }

    /// Number of subscriptions that have not been released.
    pub fn live_subscriptions(&self) -> usize {
        self.state.lock().router.len()
    }

    /// Number of live subscriptions for `PropertiesChanged` on `path`.
    pub fn property_subscriptions(&self, path: &str) -> usize {
        self.state
            .lock()
            .router
            .filters()
            .filter(|filter| {
                matches!(filter, SignalFilter::PropertiesChanged { path: p, .. } if p == path)
            })
            .count()
    }
}

#[async_trait]
impl SensorBus for MemoryBus {
    async fn sensor_objects(&self, namespace: &str) -> Result<Vec<ObjectSnapshot>> {
        let state = self.state.lock();
        Ok(state
            .objects
            .iter()
            .filter(|(path, interfaces)| {
                in_namespace(namespace, path) && interfaces.contains_key(SENSOR_VALUE_INTERFACE)
            })
            .map(|(path, interfaces)| ObjectSnapshot {
                path: path.clone(),
                interfaces: interfaces.clone(),
            })
            .collect())
    }

    async fn object(&self, path: &str) -> Result<Option<ObjectSnapshot>> {
        Ok(self
            .state
            .lock()
            .objects
            .get(path)
            .map(|interfaces| ObjectSnapshot {
                path: path.to_string(),
                interfaces: interfaces.clone(),
            }))
    }

    async fn get_property(
        &self,
        path: &str,
        interface: &str,
        property: &str,
    ) -> Result<PropValue> {
        let state = self.state.lock();
        state
            .objects
            .get(path)
            .and_then(|interfaces| interfaces.get(interface))
            .and_then(|props| props.get(property))
            .cloned()
            .ok_or_else(|| BridgeError::ServiceNotFound {
                path: path.to_string(),
                interface: interface.to_string(),
            })
    }

    async fn subscribe(
        &self,
        filter: SignalFilter,
        sink: mpsc::UnboundedSender<BusSignal>,
    ) -> Result<Subscription> {
        let mut state = self.state.lock();
        if state.fail_subscriptions {
            return Err(BridgeError::SubscriptionFailed {
                filter: filter.to_string(),
                reason: "subscriptions disabled".to_string(),
            });
        }

        let id = state.router.insert(filter.clone(), sink);
        debug!("[Bus] memory subscription {} for {}", id, filter);

        let weak = Arc::downgrade(&self.state);
        Ok(Subscription::new(&filter, move || {
            if let Some(state) = weak.upgrade() {
                state.lock().router.remove(id);
            }
        }))
    }
}
