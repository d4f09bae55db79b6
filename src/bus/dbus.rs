//! D-Bus implementation of [`SensorBus`] on top of zbus.
//!
//! Objects are located through the object mapper and properties are read
//! with `org.freedesktop.DBus.Properties`. Subscriptions add a match rule on
//! the bus daemon and a route in a [`SignalRouter`]. A single task reads the
//! connection's message stream and hands every signal to the router, so
//! signals from different match rules stay in receive order. Dropping the
//! [`Subscription`] removes the route and the match rule.

use super::router::SignalRouter;
use super::{
    BusSignal, InterfaceMap, OBJECT_MANAGER_INTERFACE, ObjectSnapshot, PROPERTIES_INTERFACE,
    PropValue, PropertyMap, SENSOR_VALUE_INTERFACE, SensorBus, SignalFilter, Subscription,
};
use crate::config::BusKind;
use crate::error::{BridgeError, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use zbus::fdo::DBusProxy;
use zbus::message::Type as MessageType;
use zbus::zvariant::{OwnedObjectPath, OwnedValue, Value};
use zbus::{Connection, MatchRule, Message, MessageStream};

const MAPPER_SERVICE: &str = "xyz.openbmc_project.ObjectMapper";
const MAPPER_PATH: &str = "/xyz/openbmc_project/object_mapper";
const MAPPER_INTERFACE: &str = "xyz.openbmc_project.ObjectMapper";

/// Object mapper `GetSubTree` reply: path -> service -> interfaces.
type SubTree = HashMap<String, HashMap<String, Vec<String>>>;

/// Object mapper `GetObject` reply: service -> interfaces.
type ServiceMap = HashMap<String, Vec<String>>;

/// Aborts the routing task once the last bus clone is gone.
struct RouterTask(JoinHandle<()>);

impl Drop for RouterTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Sensor bus backed by a D-Bus connection.
#[derive(Clone)]
pub struct DbusBus {
    connection: Connection,
    router: Arc<Mutex<SignalRouter>>,
    _task: Arc<RouterTask>,
}

impl DbusBus {
    /// Connect to the system or session bus.
    pub async fn connect(kind: BusKind) -> Result<Self> {
        let connection = match kind {
            BusKind::System => Connection::system().await?,
            BusKind::Session => Connection::session().await?,
        };
        info!(
            "[Bus] Connected to {} bus as {}",
            kind,
            connection
                .unique_name()
                .map(|n| n.to_string())
                .unwrap_or_default()
        );
        Ok(Self::from_connection(connection))
    }

    /// Wrap an existing connection. Must be called from within a tokio
    /// runtime; the signal routing task is spawned here.
    pub fn from_connection(connection: Connection) -> Self {
        // Opened before any match rule exists so no signal can slip past.
        let stream = MessageStream::from(&connection);
        let router = Arc::new(Mutex::new(SignalRouter::default()));
        let task = tokio::spawn(route_signals(stream, Arc::downgrade(&router)));
        Self {
            connection,
            router,
            _task: Arc::new(RouterTask(task)),
        }
    }

    async fn mapper_call<B>(&self, method: &str, body: &B) -> Result<Message>
    where
        B: serde::Serialize + zbus::zvariant::DynamicType,
    {
        Ok(self
            .connection
            .call_method(
                Some(MAPPER_SERVICE),
                MAPPER_PATH,
                Some(MAPPER_INTERFACE),
                method,
                body,
            )
            .await?)
    }

    /// First service that owns `interface` on `path`.
    async fn service_for(&self, path: &str, interface: &str) -> Result<String> {
        let reply = self
            .mapper_call("GetObject", &(path, vec![interface]))
            .await?;
        let services: ServiceMap = reply.body().deserialize()?;
        let mut names: Vec<String> = services.into_keys().collect();
        names.sort();
        names
            .into_iter()
            .next()
            .ok_or_else(|| BridgeError::ServiceNotFound {
                path: path.to_string(),
                interface: interface.to_string(),
            })
    }

    async fn get_all(&self, service: &str, path: &str, interface: &str) -> Result<PropertyMap> {
        let reply = self
            .connection
            .call_method(
                Some(service),
                path,
                Some(PROPERTIES_INTERFACE),
                "GetAll",
                &(interface,),
            )
            .await?;
        let props: HashMap<String, OwnedValue> = reply.body().deserialize()?;
        Ok(convert_properties(props))
    }

    /// Properties of every non-standard interface the services export on
    /// `path`.
    async fn snapshot(&self, path: String, services: ServiceMap) -> Result<ObjectSnapshot> {
        let mut interfaces = InterfaceMap::new();
        for (service, service_interfaces) in services {
            for interface in service_interfaces {
                // Standard interfaces carry no sensor data.
                if interface.starts_with("org.freedesktop.DBus.") {
                    continue;
                }
                let props = self.get_all(&service, &path, &interface).await?;
                interfaces.entry(interface).or_default().extend(props);
            }
        }
        Ok(ObjectSnapshot { path, interfaces })
    }
}

#[async_trait]
impl SensorBus for DbusBus {
    async fn sensor_objects(&self, namespace: &str) -> Result<Vec<ObjectSnapshot>> {
        let reply = self
            .mapper_call("GetSubTree", &(namespace, 0i32, vec![SENSOR_VALUE_INTERFACE]))
            .await?;
        let subtree: SubTree = reply.body().deserialize()?;

        let mut paths: Vec<_> = subtree.into_iter().collect();
        paths.sort_by(|a, b| a.0.cmp(&b.0));

        let mut objects = Vec::with_capacity(paths.len());
        for (path, services) in paths {
            objects.push(self.snapshot(path, services).await?);
        }

        debug!("[Bus] {} sensor objects under {}", objects.len(), namespace);
        Ok(objects)
    }

    async fn object(&self, path: &str) -> Result<Option<ObjectSnapshot>> {
        let no_interfaces: Vec<&str> = Vec::new();
        let reply = match self.mapper_call("GetObject", &(path, no_interfaces)).await {
            Ok(reply) => reply,
            // The mapper answers unknown paths with an error reply.
            Err(BridgeError::Dbus(zbus::Error::MethodError(name, _, _))) => {
                debug!("[Bus] {} not found: {}", path, name);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let services: ServiceMap = reply.body().deserialize()?;
        if services.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.snapshot(path.to_string(), services).await?))
    }

    async fn get_property(
        &self,
        path: &str,
        interface: &str,
        property: &str,
    ) -> Result<PropValue> {
        let service = self.service_for(path, interface).await?;
        let reply = self
            .connection
            .call_method(
                Some(service.as_str()),
                path,
                Some(PROPERTIES_INTERFACE),
                "Get",
                &(interface, property),
            )
            .await?;
        let value: OwnedValue = reply.body().deserialize()?;
        Ok(convert_value(&value))
    }

    async fn subscribe(
        &self,
        filter: SignalFilter,
        sink: mpsc::UnboundedSender<BusSignal>,
    ) -> Result<Subscription> {
        let failed = |reason: String| BridgeError::SubscriptionFailed {
            filter: filter.to_string(),
            reason,
        };
        let rule = match_rule(&filter).map_err(|e| failed(e.to_string()))?;

        // Route first, so a signal matched right after the rule is added is
        // not lost.
        let id = self.router.lock().insert(filter.clone(), sink);
        let added = match DBusProxy::new(&self.connection).await {
            Ok(proxy) => proxy.add_match_rule(rule.clone()).await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        if let Err(reason) = added {
            self.router.lock().remove(id);
            return Err(failed(reason));
        }

        debug!("[Bus] Subscribed to {}", filter);
        let router = Arc::downgrade(&self.router);
        let connection = self.connection.clone();
        Ok(Subscription::new(&filter, move || {
            if let Some(router) = router.upgrade() {
                router.lock().remove(id);
            }
            release_match_rule(connection, rule);
        }))
    }
}

/// Remove a match rule from the bus daemon in the background.
fn release_match_rule(connection: Connection, rule: MatchRule<'static>) {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        return;
    };
    runtime.spawn(async move {
        let removed = match DBusProxy::new(&connection).await {
            Ok(proxy) => proxy.remove_match_rule(rule).await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        if let Err(e) = removed {
            debug!("[Bus] Failed to remove match rule: {}", e);
        }
    });
}

/// Read every message on the connection in order and route the signals.
async fn route_signals(mut stream: MessageStream, router: Weak<Mutex<SignalRouter>>) {
    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(m) => m,
            Err(e) => {
                warn!("[Bus] Error on message stream: {}", e);
                continue;
            }
        };
        if message.message_type() != MessageType::Signal {
            continue;
        }
        let Some(signal) = decode_signal(&message) else {
            continue;
        };
        let Some(router) = router.upgrade() else {
            break;
        };
        router.lock().deliver(&signal);
    }
    debug!("[Bus] Signal routing stopped");
}

fn match_rule(filter: &SignalFilter) -> zbus::Result<MatchRule<'static>> {
    let builder = MatchRule::builder().msg_type(MessageType::Signal);
    let rule = match filter {
        SignalFilter::InterfacesAdded { namespace } => builder
            .interface(OBJECT_MANAGER_INTERFACE)?
            .member("InterfacesAdded")?
            .path_namespace(namespace.clone())?
            .build(),
        SignalFilter::InterfacesRemoved { namespace } => builder
            .interface(OBJECT_MANAGER_INTERFACE)?
            .member("InterfacesRemoved")?
            .path_namespace(namespace.clone())?
            .build(),
        SignalFilter::PropertiesChanged { path, interface } => {
            let builder = builder
                .interface(PROPERTIES_INTERFACE)?
                .member("PropertiesChanged")?
                .path(path.clone())?;
            match interface {
                Some(interface) => builder.arg(0, interface.clone())?.build(),
                None => builder.build(),
            }
        }
    };
    Ok(rule)
}

/// Turn a signal message into a [`BusSignal`]. `None` for signals the
/// watcher does not consume and for bodies without the expected shape.
fn decode_signal(message: &Message) -> Option<BusSignal> {
    let header = message.header();
    let interface = header.interface()?.as_str().to_string();
    let member = header.member()?.as_str().to_string();
    let body = message.body();

    let signal = match (interface.as_str(), member.as_str()) {
        (OBJECT_MANAGER_INTERFACE, "InterfacesAdded") => {
            let decoded: zbus::Result<(
                OwnedObjectPath,
                HashMap<String, HashMap<String, OwnedValue>>,
            )> = body.deserialize();
            decoded.map(|(path, interfaces)| BusSignal::InterfacesAdded {
                path: path.as_str().to_string(),
                interfaces: interfaces
                    .into_iter()
                    .map(|(name, props)| (name, convert_properties(props)))
                    .collect(),
            })
        }
        (OBJECT_MANAGER_INTERFACE, "InterfacesRemoved") => {
            let decoded: zbus::Result<(OwnedObjectPath, Vec<String>)> = body.deserialize();
            decoded.map(|(path, interfaces)| BusSignal::InterfacesRemoved {
                path: path.as_str().to_string(),
                interfaces,
            })
        }
        (PROPERTIES_INTERFACE, "PropertiesChanged") => {
            let path = header.path()?.as_str().to_string();
            let decoded: zbus::Result<(String, HashMap<String, OwnedValue>, Vec<String>)> =
                body.deserialize();
            decoded.map(|(interface, changed, _invalidated)| BusSignal::PropertiesChanged {
                path,
                interface,
                changed: convert_properties(changed),
            })
        }
        _ => return None,
    };

    match signal {
        Ok(signal) => Some(signal),
        Err(e) => {
            warn!("[Bus] Dropping malformed {}.{}: {}", interface, member, e);
            None
        }
    }
}

fn convert_properties(props: HashMap<String, OwnedValue>) -> PropertyMap {
    props
        .into_iter()
        .map(|(name, value)| {
            let value = convert_value(&value);
            (name, value)
        })
        .collect()
}

fn convert_value(value: &Value<'_>) -> PropValue {
    match value {
        Value::F64(v) => PropValue::Double(*v),
        Value::I64(v) => PropValue::Int(*v),
        Value::I32(v) => PropValue::Int(i64::from(*v)),
        Value::I16(v) => PropValue::Int(i64::from(*v)),
        Value::U32(v) => PropValue::Int(i64::from(*v)),
        Value::U16(v) => PropValue::Int(i64::from(*v)),
        Value::U8(v) => PropValue::Int(i64::from(*v)),
        Value::U64(v) => match i64::try_from(*v) {
            Ok(v) => PropValue::Int(v),
            Err(_) => PropValue::Unsupported("t".to_string()),
        },
        Value::Bool(v) => PropValue::Bool(*v),
        Value::Str(v) => PropValue::Str(v.as_str().to_string()),
        Value::Value(inner) => convert_value(inner),
        other => PropValue::Unsupported(other.value_signature().to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_numeric_values() {
        assert_eq!(convert_value(&Value::I64(-5)), PropValue::Int(-5));
        assert_eq!(convert_value(&Value::U8(200)), PropValue::Int(200));
        assert_eq!(convert_value(&Value::F64(12.5)), PropValue::Double(12.5));
        assert_eq!(
            convert_value(&Value::U64(u64::MAX)),
            PropValue::Unsupported("t".to_string())
        );
    }

    #[test]
    fn test_convert_other_values() {
        assert_eq!(convert_value(&Value::Bool(true)), PropValue::Bool(true));
        assert_eq!(
            convert_value(&Value::from("DegreesC")),
            PropValue::Str("DegreesC".to_string())
        );
        let boxed = Value::Value(Box::new(Value::I32(3)));
        assert_eq!(convert_value(&boxed), PropValue::Int(3));
    }

    #[test]
    fn test_match_rules_build() {
        let filters = [
            SignalFilter::InterfacesAdded {
                namespace: "/xyz/openbmc_project/sensors".to_string(),
            },
            SignalFilter::InterfacesRemoved {
                namespace: "/xyz/openbmc_project/sensors".to_string(),
            },
            SignalFilter::PropertiesChanged {
                path: "/org/openbmc/control/power0".to_string(),
                interface: Some("org.openbmc.control.Power".to_string()),
            },
        ];
        for filter in &filters {
            assert!(match_rule(filter).is_ok(), "rule for {}", filter);
        }
    }

    #[test]
    fn test_decode_interfaces_removed() {
        let path = OwnedObjectPath::try_from("/xyz/openbmc_project/sensors/temperature/cpu0")
            .unwrap();
        let message = Message::signal(
            "/xyz/openbmc_project/sensors",
            OBJECT_MANAGER_INTERFACE,
            "InterfacesRemoved",
        )
        .unwrap()
        .build(&(path, vec![SENSOR_VALUE_INTERFACE]))
        .unwrap();

        assert_eq!(
            decode_signal(&message),
            Some(BusSignal::InterfacesRemoved {
                path: "/xyz/openbmc_project/sensors/temperature/cpu0".to_string(),
                interfaces: vec![SENSOR_VALUE_INTERFACE.to_string()],
            })
        );
    }

    #[test]
    fn test_decode_ignores_other_signals() {
        let message = Message::signal(
            "/org/freedesktop/DBus",
            "org.freedesktop.DBus",
            "NameAcquired",
        )
        .unwrap()
        .build(&("org.example.Name",))
        .unwrap();
        assert_eq!(decode_signal(&message), None);
    }
}
