use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum BridgeError {
    #[error("D-Bus error: {0}")]
    Dbus(#[from] zbus::Error),

    #[error("D-Bus call failed: {0}")]
    DbusCall(#[from] zbus::fdo::Error),

    #[error("No service provides {interface} on {path}")]
    ServiceNotFound { path: String, interface: String },

    #[error("Failed to read power state: {0}")]
    PowerStateUnavailable(String),

    #[error("Failed to subscribe to {filter}: {reason}")]
    SubscriptionFailed { filter: String, reason: String },

    #[error("Bus connection closed")]
    BusClosed,

    #[error("Table already registered at {0}")]
    TableAlreadyRegistered(String),

    #[error("No table registered at {0}")]
    TableNotRegistered(String),

    #[error("Failed to unregister tables: {0}")]
    UnregisterFailed(String),

    #[error("Invalid OID: {0}")]
    InvalidOid(String),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),
}

/// Failure to turn a bus property into a table integer.
#[derive(ThisError, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("property {property} has unsupported type {found}")]
    UnsupportedType { property: String, found: String },

    #[error("property {property} value {value} is not finite")]
    NotFinite { property: String, value: f64 },

    #[error("property {property} overflows after scaling by 10^{scale}")]
    Overflow { property: String, scale: i32 },
}

pub type Result<T> = std::result::Result<T, BridgeError>;
