//! Bus primitives consumed by the change watcher.
//!
//! The watcher only needs a few things from the message bus: enumerate the
//! sensor objects under a namespace, read one object or property, and
//! subscribe to filtered signals delivered in bus order. [`SensorBus`] captures
//! exactly that, so the watcher can run against D-Bus ([`DbusBus`]) or against
//! an in-process object tree ([`MemoryBus`]).

pub mod dbus;
pub mod memory;
mod router;

pub use dbus::DbusBus;
pub use memory::MemoryBus;

use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use tokio::sync::mpsc;

pub const OBJECT_MANAGER_INTERFACE: &str = "org.freedesktop.DBus.ObjectManager";
pub const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";

pub const SENSOR_VALUE_INTERFACE: &str = "xyz.openbmc_project.Sensor.Value";
pub const WARNING_INTERFACE: &str = "xyz.openbmc_project.Sensor.Threshold.Warning";
pub const CRITICAL_INTERFACE: &str = "xyz.openbmc_project.Sensor.Threshold.Critical";
pub const AVAILABILITY_INTERFACE: &str = "xyz.openbmc_project.State.Decorator.Availability";

/// A decoded property value.
///
/// Only the shapes the sensor services actually publish are kept; anything
/// else is carried as `Unsupported` with its type signature so the watcher
/// can report it.
#[derive(Debug, Clone, PartialEq)]
pub enum PropValue {
    Int(i64),
    Double(f64),
    Bool(bool),
    Str(String),
    Unsupported(String),
}

impl PropValue {
    /// Human readable type name, for diagnostics.
    pub fn type_name(&self) -> &str {
        match self {
            PropValue::Int(_) => "int",
            PropValue::Double(_) => "double",
            PropValue::Bool(_) => "bool",
            PropValue::Str(_) => "string",
            PropValue::Unsupported(signature) => signature,
        }
    }
}

/// Property name to value.
pub type PropertyMap = HashMap<String, PropValue>;

/// Interface name to its properties.
pub type InterfaceMap = HashMap<String, PropertyMap>;

/// An object found while enumerating a namespace, with its current
/// properties.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectSnapshot {
    pub path: String,
    pub interfaces: InterfaceMap,
}

/// A signal delivered to a subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum BusSignal {
    InterfacesAdded {
        path: String,
        interfaces: InterfaceMap,
    },
    InterfacesRemoved {
        path: String,
        interfaces: Vec<String>,
    },
    PropertiesChanged {
        path: String,
        interface: String,
        changed: PropertyMap,
    },
}

/// Which signals a subscription delivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalFilter {
    /// `InterfacesAdded` for any object at or below `namespace`.
    InterfacesAdded { namespace: String },
    /// `InterfacesRemoved` for any object at or below `namespace`.
    InterfacesRemoved { namespace: String },
    /// `PropertiesChanged` on exactly `path`, optionally for one interface.
    PropertiesChanged {
        path: String,
        interface: Option<String>,
    },
}

impl SignalFilter {
    pub fn matches(&self, signal: &BusSignal) -> bool {
        match (self, signal) {
            (
                SignalFilter::InterfacesAdded { namespace },
                BusSignal::InterfacesAdded { path, .. },
            )
            | (
                SignalFilter::InterfacesRemoved { namespace },
                BusSignal::InterfacesRemoved { path, .. },
            ) => in_namespace(namespace, path),
            (
                SignalFilter::PropertiesChanged {
                    path: wanted,
                    interface: wanted_interface,
                },
                BusSignal::PropertiesChanged {
                    path, interface, ..
                },
            ) => {
                wanted == path
                    && wanted_interface
                        .as_ref()
                        .is_none_or(|wanted| wanted == interface)
            }
            _ => false,
        }
    }
}

impl fmt::Display for SignalFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalFilter::InterfacesAdded { namespace } => {
                write!(f, "InterfacesAdded under {}", namespace)
            }
            SignalFilter::InterfacesRemoved { namespace } => {
                write!(f, "InterfacesRemoved under {}", namespace)
            }
            SignalFilter::PropertiesChanged {
                path,
                interface: Some(interface),
            } => write!(f, "PropertiesChanged on {} ({})", path, interface),
            SignalFilter::PropertiesChanged {
                path,
                interface: None,
            } => write!(f, "PropertiesChanged on {}", path),
        }
    }
}

/// True if `path` is `namespace` itself or lies below it.
pub fn in_namespace(namespace: &str, path: &str) -> bool {
    let namespace = namespace.trim_end_matches('/');
    match path.strip_prefix(namespace) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// A live signal subscription.
///
/// Dropping the handle releases the underlying match; there is no other way
/// to release it, so a subscription can never outlive its owner.
pub struct Subscription {
    description: String,
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(filter: &SignalFilter, release: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            description: filter.to_string(),
            release: Some(Box::new(release)),
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("filter", &self.description)
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// The message bus as seen by the change watcher.
#[async_trait]
pub trait SensorBus: Send + Sync {
    /// Every object at or below `namespace` that implements the sensor value
    /// interface, with the properties of all its interfaces.
    async fn sensor_objects(&self, namespace: &str) -> Result<Vec<ObjectSnapshot>>;

    /// Current interfaces and properties of the object at `path`, or `None`
    /// if no service exports it.
    async fn object(&self, path: &str) -> Result<Option<ObjectSnapshot>>;

    /// Read a single property.
    async fn get_property(&self, path: &str, interface: &str, property: &str)
    -> Result<PropValue>;

    /// Start delivering signals matching `filter` into `sink` until the
    /// returned handle is dropped.
    ///
    /// All subscriptions of one bus share a single delivery path: signals
    /// reach their sinks in the order the bus received them, whichever
    /// subscription they matched.
    async fn subscribe(
        &self,
        filter: SignalFilter,
        sink: mpsc::UnboundedSender<BusSignal>,
    ) -> Result<Subscription>;
}
