//! Canonical point record: the unit of data this gateway moves from field
//! protocols to the 104 application layer.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::asdu::TypeId;
use crate::error::PointError;

/// Tagged value payload. Variant compatibility with `asdu_type` is checked
/// at encode time by the ASDU builder, not here.
#[derive(Debug, Clone, PartialEq)]
pub enum PointValue {
    Bool(bool),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Bytes(Vec<u8>),
    String(String),
}

impl PointValue {
    fn type_name(&self) -> &'static str {
        match self {
            PointValue::Bool(_) => "bool",
            PointValue::I16(_) => "i16",
            PointValue::I32(_) => "i32",
            PointValue::I64(_) => "i64",
            PointValue::F32(_) => "f32",
            PointValue::F64(_) => "f64",
            PointValue::Bytes(_) => "bytes",
            PointValue::String(_) => "string",
        }
    }

    /// Widening numeric conversion. Fails for non-numeric variants.
    pub fn as_float(&self) -> Result<f64, PointError> {
        match *self {
            PointValue::I16(v) => Ok(v as f64),
            PointValue::I32(v) => Ok(v as f64),
            PointValue::I64(v) => Ok(v as f64),
            PointValue::F32(v) => Ok(v as f64),
            PointValue::F64(v) => Ok(v),
            _ => Err(PointError::TypeMismatch {
                requested: "float",
                actual: self.type_name(),
            }),
        }
    }

    pub fn as_bool(&self) -> Result<bool, PointError> {
        match self {
            PointValue::Bool(v) => Ok(*v),
            _ => Err(PointError::TypeMismatch {
                requested: "bool",
                actual: self.type_name(),
            }),
        }
    }

    /// Widening numeric conversion to `i64`. Fails for non-integer numeric
    /// and non-numeric variants (floats are not silently truncated here;
    /// use `as_float` then round explicitly if that's what's wanted).
    pub fn as_int(&self) -> Result<i64, PointError> {
        match *self {
            PointValue::I16(v) => Ok(v as i64),
            PointValue::I32(v) => Ok(v as i64),
            PointValue::I64(v) => Ok(v),
            _ => Err(PointError::TypeMismatch {
                requested: "int",
                actual: self.type_name(),
            }),
        }
    }

    pub fn as_long(&self) -> Result<i64, PointError> {
        self.as_int()
    }
}

/// Gateway-local wall-clock, milliseconds since Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Canonical value record. Equality and hashing are defined solely over
/// `(common_address, ioa)` -- this is deliberate identity semantics so a
/// Point in the store and a Point delivered to a listener compare equal
/// regardless of any other field having changed between observations.
#[derive(Debug, Clone)]
pub struct Point {
    pub id: String,
    pub source_protocol: String,
    pub source_address: String,
    pub ioa: u32,
    pub common_address: u16,
    pub asdu_type: TypeId,
    pub value: PointValue,
    pub valid: bool,
    pub timestamp: u64,
    pub last_updated: u64,
    pub metadata: HashMap<String, String>,
    pub description: String,
}

impl Point {
    /// Full constructor: fixes addressing, value, timestamp, and validity.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: impl Into<String>,
        source_protocol: impl Into<String>,
        source_address: impl Into<String>,
        ioa: u32,
        common_address: u16,
        asdu_type: TypeId,
        value: PointValue,
        valid: bool,
        timestamp: u64,
    ) -> Self {
        Self {
            id: id.into(),
            source_protocol: source_protocol.into(),
            source_address: source_address.into(),
            ioa,
            common_address,
            asdu_type,
            value,
            valid,
            timestamp,
            last_updated: now_millis(),
            metadata: HashMap::new(),
            description: String::new(),
        }
    }

    /// Default-constructed point: `last_updated` set to now, `valid = true`.
    pub fn with_value(ioa: u32, common_address: u16, asdu_type: TypeId, value: PointValue) -> Self {
        Self::new(
            String::new(),
            String::new(),
            String::new(),
            ioa,
            common_address,
            asdu_type,
            value,
            true,
            0,
        )
    }

    /// The only mutator of `value`; atomically refreshes `last_updated`.
    pub fn set_value(&mut self, value: PointValue) {
        self.value = value;
        self.last_updated = now_millis();
    }

    pub fn as_float(&self) -> Result<f64, PointError> {
        self.value.as_float()
    }

    pub fn as_bool(&self) -> Result<bool, PointError> {
        self.value.as_bool()
    }

    pub fn as_int(&self) -> Result<i64, PointError> {
        self.value.as_int()
    }

    pub fn as_long(&self) -> Result<i64, PointError> {
        self.value.as_long()
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

impl PartialEq for Point {
    fn eq(&self, other: &Self) -> bool {
        self.common_address == other.common_address && self.ioa == other.ioa
    }
}

impl Eq for Point {}

impl std::hash::Hash for Point {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.common_address.hash(state);
        self.ioa.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn identity_is_common_address_and_ioa_only() {
        let a = Point::new(
            "a", "IEC61850", "addr-a", 1001, 1, TypeId::MMeNc1,
            PointValue::F32(1.0), true, 0,
        );
        let b = Point::new(
            "b", "MODBUS_TCP", "addr-b", 1001, 1, TypeId::MMeNc1,
            PointValue::F32(999.0), false, 123,
        );
        assert_eq!(a, b);
    }

    #[test]
    fn different_ioa_is_not_equal() {
        let a = Point::with_value(1001, 1, TypeId::MMeNc1, PointValue::F32(1.0));
        let b = Point::with_value(1002, 1, TypeId::MMeNc1, PointValue::F32(1.0));
        assert_ne!(a, b);
    }

    #[test]
    fn set_value_refreshes_last_updated() {
        let mut p = Point::with_value(1, 1, TypeId::MMeNc1, PointValue::F32(1.0));
        let first = p.last_updated;
        std::thread::sleep(std::time::Duration::from_millis(2));
        p.set_value(PointValue::F32(2.0));
        assert!(p.last_updated >= first);
        assert_eq!(p.value, PointValue::F32(2.0));
    }

    #[test]
    fn as_bool_on_float_is_type_mismatch() {
        let p = Point::with_value(1, 1, TypeId::MMeNc1, PointValue::F32(1.0));
        let err = p.as_bool().unwrap_err();
        assert_eq!(
            err,
            PointError::TypeMismatch {
                requested: "bool",
                actual: "f32"
            }
        );
    }

    #[test]
    fn as_float_widens_integers() {
        let p = Point::with_value(1, 1, TypeId::MMeNb1, PointValue::I16(42));
        assert_eq!(p.as_float().unwrap(), 42.0);
    }
}
