//! Property decoding for sensor objects.
//!
//! Sensor services publish `Value` and the threshold properties either as
//! integers accompanied by a decimal `Scale` exponent, or as doubles already
//! in the natural unit. Both are turned into an `i64` as `raw * 10^scale`.
//! Negative exponents truncate integers toward zero; doubles are rounded to
//! the nearest integer, halves away from zero.

use crate::bus::{
    AVAILABILITY_INTERFACE, CRITICAL_INTERFACE, InterfaceMap, PropValue, PropertyMap,
    SENSOR_VALUE_INTERFACE, WARNING_INTERFACE,
};
use crate::error::DecodeError;
use crate::sensors::Sensor;

/// One field of a [`Sensor`] that a bus property maps onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorField {
    Value,
    WarningLow,
    WarningHigh,
    CriticalLow,
    CriticalHigh,
}

/// A decoded change to apply to a sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorUpdate {
    Field(SensorField, i64),
    Enabled(bool),
}

/// Map an `(interface, property)` pair to the field it feeds.
pub fn field_for(interface: &str, property: &str) -> Option<SensorField> {
    match (interface, property) {
        (SENSOR_VALUE_INTERFACE, "Value") => Some(SensorField::Value),
        (WARNING_INTERFACE, "WarningLow") => Some(SensorField::WarningLow),
        (WARNING_INTERFACE, "WarningHigh") => Some(SensorField::WarningHigh),
        (CRITICAL_INTERFACE, "CriticalLow") => Some(SensorField::CriticalLow),
        (CRITICAL_INTERFACE, "CriticalHigh") => Some(SensorField::CriticalHigh),
        _ => None,
    }
}

/// Decode `raw * 10^scale` into an integer.
pub fn decode_scaled(property: &str, raw: &PropValue, scale: i32) -> Result<i64, DecodeError> {
    let overflow = || DecodeError::Overflow {
        property: property.to_string(),
        scale,
    };

    match raw {
        PropValue::Int(v) => {
            let factor = 10i64.checked_pow(scale.unsigned_abs());
            if scale >= 0 {
                factor.and_then(|f| v.checked_mul(f)).ok_or_else(overflow)
            } else {
                // A divisor beyond i64 range truncates everything to zero.
                Ok(factor.map_or(0, |f| v / f))
            }
        }
        PropValue::Double(v) => {
            if !v.is_finite() {
                return Err(DecodeError::NotFinite {
                    property: property.to_string(),
                    value: *v,
                });
            }
            let scaled = (v * 10f64.powi(scale)).round();
            if scaled >= i64::MIN as f64 && scaled < i64::MAX as f64 {
                Ok(scaled as i64)
            } else {
                Err(overflow())
            }
        }
        other => Err(DecodeError::UnsupportedType {
            property: property.to_string(),
            found: other.type_name().to_string(),
        }),
    }
}

/// Read the `Scale` exponent, defaulting to 0 when absent.
pub fn decode_scale(props: &PropertyMap) -> Result<i32, DecodeError> {
    match props.get("Scale") {
        None => Ok(0),
        Some(PropValue::Int(v)) => i32::try_from(*v).map_err(|_| DecodeError::Overflow {
            property: "Scale".to_string(),
            scale: 0,
        }),
        Some(other) => Err(DecodeError::UnsupportedType {
            property: "Scale".to_string(),
            found: other.type_name().to_string(),
        }),
    }
}

/// Decode every recognised property of one interface.
///
/// Fails as a whole if any recognised property is malformed, so a caller can
/// drop the signal without applying part of it. Unrecognised properties are
/// skipped.
pub fn decode_updates(
    interface: &str,
    props: &PropertyMap,
    scale: i32,
) -> Result<Vec<SensorUpdate>, DecodeError> {
    let mut updates = Vec::new();

    if interface == AVAILABILITY_INTERFACE {
        match props.get("Available") {
            Some(PropValue::Bool(available)) => updates.push(SensorUpdate::Enabled(*available)),
            Some(other) => {
                return Err(DecodeError::UnsupportedType {
                    property: "Available".to_string(),
                    found: other.type_name().to_string(),
                });
            }
            None => {}
        }
        return Ok(updates);
    }

    for (property, raw) in props {
        if let Some(field) = field_for(interface, property) {
            updates.push(SensorUpdate::Field(
                field,
                decode_scaled(property, raw, scale)?,
            ));
        }
    }
    Ok(updates)
}

/// Build a sensor from the interfaces of a newly seen object.
pub fn sensor_from_interfaces(
    name: &str,
    interfaces: &InterfaceMap,
) -> Result<Sensor, DecodeError> {
    let mut sensor = Sensor::new(name);
    if let Some(props) = interfaces.get(SENSOR_VALUE_INTERFACE) {
        sensor.scale = decode_scale(props)?;
    }
    apply_interfaces(&mut sensor, interfaces)?;
    sensor.refresh_state();
    Ok(sensor)
}

/// Decode and apply the properties of several interfaces to `sensor`.
///
/// Nothing is applied if any recognised property fails to decode.
pub fn apply_interfaces(sensor: &mut Sensor, interfaces: &InterfaceMap) -> Result<(), DecodeError> {
    let mut updates = Vec::new();
    for (interface, props) in interfaces {
        updates.extend(decode_updates(interface, props, sensor.scale)?);
    }
    for update in updates {
        apply_update(sensor, update);
    }
    Ok(())
}

/// Apply one update. Returns the previous value when `Value` changed.
pub fn apply_update(sensor: &mut Sensor, update: SensorUpdate) -> Option<i64> {
    match update {
        SensorUpdate::Field(SensorField::Value, value) => {
            if sensor.current_value == value {
                return None;
            }
            Some(std::mem::replace(&mut sensor.current_value, value))
        }
        SensorUpdate::Field(SensorField::WarningLow, v) => {
            sensor.warning_low = Some(v);
            None
        }
        SensorUpdate::Field(SensorField::WarningHigh, v) => {
            sensor.warning_high = Some(v);
            None
        }
        SensorUpdate::Field(SensorField::CriticalLow, v) => {
            sensor.critical_low = Some(v);
            None
        }
        SensorUpdate::Field(SensorField::CriticalHigh, v) => {
            sensor.critical_high = Some(v);
            None
        }
        SensorUpdate::Enabled(enabled) => {
            sensor.enabled = enabled;
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::SensorState;

    fn props(pairs: &[(&str, PropValue)]) -> PropertyMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_decode_integer_scales() {
        assert_eq!(decode_scaled("Value", &PropValue::Int(60), 0), Ok(60));
        assert_eq!(decode_scaled("Value", &PropValue::Int(12), 3), Ok(12_000));
        assert_eq!(decode_scaled("Value", &PropValue::Int(12_345), -3), Ok(12));
        assert_eq!(decode_scaled("Value", &PropValue::Int(-12_345), -3), Ok(-12));
        assert_eq!(decode_scaled("Value", &PropValue::Int(5), -40), Ok(0));
    }

    #[test]
    fn test_decode_integer_overflow() {
        assert!(matches!(
            decode_scaled("Value", &PropValue::Int(i64::MAX / 2), 1),
            Err(DecodeError::Overflow { .. })
        ));
        assert!(matches!(
            decode_scaled("Value", &PropValue::Int(1), 40),
            Err(DecodeError::Overflow { .. })
        ));
    }

    #[test]
    fn test_decode_doubles() {
        assert_eq!(decode_scaled("Value", &PropValue::Double(45.4), 0), Ok(45));
        assert_eq!(decode_scaled("Value", &PropValue::Double(12.5), 0), Ok(13));
        assert_eq!(decode_scaled("Value", &PropValue::Double(-12.5), 0), Ok(-13));
        assert_eq!(decode_scaled("Value", &PropValue::Double(0.0456), 3), Ok(46));
        assert!(matches!(
            decode_scaled("Value", &PropValue::Double(f64::NAN), 0),
            Err(DecodeError::NotFinite { .. })
        ));
        assert!(matches!(
            decode_scaled("Value", &PropValue::Double(1e300), 0),
            Err(DecodeError::Overflow { .. })
        ));
    }

    #[test]
    fn test_decode_wrong_type() {
        let err = decode_scaled("Value", &PropValue::Str("hot".to_string()), 0).unwrap_err();
        assert_eq!(
            err,
            DecodeError::UnsupportedType {
                property: "Value".to_string(),
                found: "string".to_string()
            }
        );
    }

    #[test]
    fn test_decode_updates_is_all_or_nothing() {
        let good = props(&[
            ("WarningLow", PropValue::Int(10)),
            ("WarningHigh", PropValue::Int(90)),
            ("WarningAlarmHigh", PropValue::Bool(false)),
        ]);
        let mut updates = decode_updates(WARNING_INTERFACE, &good, 0).unwrap();
        updates.sort_by_key(|u| format!("{:?}", u));
        assert_eq!(updates.len(), 2);

        let bad = props(&[
            ("CriticalLow", PropValue::Int(1)),
            ("CriticalHigh", PropValue::Str("x".to_string())),
        ]);
        assert!(decode_updates(CRITICAL_INTERFACE, &bad, 0).is_err());
    }

    #[test]
    fn test_unrelated_interface_yields_nothing() {
        let other = props(&[("Value", PropValue::Int(3))]);
        assert!(
            decode_updates("xyz.openbmc_project.Other", &other, 0)
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn test_sensor_from_interfaces() {
        let mut interfaces = InterfaceMap::new();
        interfaces.insert(
            SENSOR_VALUE_INTERFACE.to_string(),
            props(&[
                ("Value", PropValue::Int(4520)),
                ("Scale", PropValue::Int(-2)),
                ("Unit", PropValue::Str("DegreesC".to_string())),
            ]),
        );
        interfaces.insert(
            CRITICAL_INTERFACE.to_string(),
            props(&[("CriticalHigh", PropValue::Int(9000))]),
        );

        let sensor = sensor_from_interfaces("cpu0", &interfaces).unwrap();
        assert_eq!(sensor.scale, -2);
        assert_eq!(sensor.current_value, 45);
        assert_eq!(sensor.critical_high, Some(90));
        assert_eq!(sensor.warning_low, None);
        assert!(sensor.enabled);
        assert_eq!(sensor.state, SensorState::Normal);
    }

    #[test]
    fn test_apply_update_reports_previous_value() {
        let mut sensor = Sensor::new("cpu0");
        sensor.current_value = 45;
        assert_eq!(
            apply_update(&mut sensor, SensorUpdate::Field(SensorField::Value, 60)),
            Some(45)
        );
        assert_eq!(
            apply_update(&mut sensor, SensorUpdate::Field(SensorField::Value, 60)),
            None
        );
        assert_eq!(sensor.current_value, 60);
    }
}
