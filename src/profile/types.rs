//! Profile types: base types, the date and boolean specials, and mappings.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::DateTime;
use log::warn;

use crate::base::{BaseType, Endianness};
use crate::profile::ProfileError;
use crate::value::{EPOCH_OFFSET, Value};

/// Timestamps below this are relative offsets, not absolute instants.
const EARLIEST_ABSOLUTE: u64 = 0x1000_0000;

/// How a type interprets the values its base type unpacks.
#[derive(Debug, Clone)]
pub enum Kind {
    /// Values pass through as the base type decodes them.
    Base(BaseType),
    /// Seconds past the FIT epoch, in UTC.
    DateTime,
    /// Seconds past the FIT epoch, in an unrecorded local zone.
    LocalDateTime,
    /// A single byte, nonzero meaning true.
    Bool,
    /// An enumeration mapping internal integers to profile names.
    Mapping(Mapping),
}

/// An enum-like type backed by a base type, with inverse lookup tables.
///
/// Internal values without a mapped name pass through unchanged.
#[derive(Debug, Clone)]
pub struct Mapping {
    base: BaseType,
    by_name: HashMap<String, i64>,
    by_value: HashMap<i64, String>,
}

impl Mapping {
    pub fn new(base: BaseType, entries: &[(&str, i64)]) -> Self {
        let by_name = entries.iter().map(|(n, v)| (n.to_string(), *v)).collect();
        let by_value = entries.iter().map(|(n, v)| (*v, n.to_string())).collect();

        Self {
            base,
            by_name,
            by_value,
        }
    }

    /// The internal integer for a profile name.
    pub fn value(&self, name: &str) -> Option<i64> {
        self.by_name.get(name).copied()
    }

    /// The profile name for an internal integer.
    pub fn name(&self, value: i64) -> Option<&str> {
        self.by_value.get(&value).map(String::as_str)
    }

    fn map(&self, value: Value) -> Value {
        let internal = match value {
            Value::Uint(x) => i64::try_from(x).ok(),
            Value::Int(x) => Some(x),
            _ => None,
        };

        match internal.and_then(|x| self.by_value.get(&x)) {
            Some(name) => Value::Name(name.clone()),
            None => value,
        }
    }
}

/// A named profile type.
#[derive(Debug, Clone)]
pub struct Type {
    name: String,
    kind: Kind,
}

impl Type {
    pub fn new(name: impl Into<String>, kind: Kind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &Kind {
        &self.kind
    }

    /// The base type this type is stored as.
    pub fn base(&self) -> BaseType {
        match &self.kind {
            Kind::Base(base) => *base,
            Kind::DateTime | Kind::LocalDateTime => BaseType::UInt32,
            Kind::Bool => BaseType::UInt8,
            Kind::Mapping(mapping) => mapping.base,
        }
    }

    /// Unpack a run of bytes and interpret it under this type.
    ///
    /// Returns `None` when the run holds the base type's 'invalid' marker.
    pub fn decode(&self, bytes: &[u8], endian: Endianness) -> Option<Vec<Value>> {
        let values = self.base().decode(bytes, endian)?;

        Some(match &self.kind {
            Kind::Base(_) => values,
            Kind::Bool => values
                .into_iter()
                .map(|v| match v {
                    Value::Uint(x) => Value::Bool(x != 0),
                    v => v,
                })
                .collect(),
            Kind::DateTime => values
                .into_iter()
                .map(|v| match v {
                    Value::Uint(x) if x >= EARLIEST_ABSOLUTE => Value::from_timestamp(x as u32),
                    v => v,
                })
                .collect(),
            Kind::LocalDateTime => values
                .into_iter()
                .map(|v| match v {
                    Value::Uint(x) if x >= EARLIEST_ABSOLUTE => {
                        match DateTime::from_timestamp(EPOCH_OFFSET + x as i64, 0) {
                            Some(instant) => Value::LocalTime(instant.naive_utc()),
                            None => v,
                        }
                    }
                    v => v,
                })
                .collect(),
            Kind::Mapping(mapping) => values.into_iter().map(|v| mapping.map(v)).collect(),
        })
    }
}

/// The profile's type dictionary.
///
/// Seeded with every base type under its profile name, plus the `bool`,
/// `date_time`, and `local_date_time` specials. Mappings are added by the
/// profile importer.
#[derive(Debug)]
pub struct Types {
    by_name: HashMap<String, Arc<Type>>,
}

const BASE_TYPES: [BaseType; 17] = [
    BaseType::Enum,
    BaseType::SInt8,
    BaseType::UInt8,
    BaseType::SInt16,
    BaseType::UInt16,
    BaseType::SInt32,
    BaseType::UInt32,
    BaseType::Text,
    BaseType::Float32,
    BaseType::Float64,
    BaseType::UInt8Z,
    BaseType::UInt16Z,
    BaseType::UInt32Z,
    BaseType::Byte,
    BaseType::SInt64,
    BaseType::UInt64,
    BaseType::UInt64Z,
];

impl Default for Types {
    fn default() -> Self {
        Self::new()
    }
}

impl Types {
    pub fn new() -> Self {
        let mut by_name = HashMap::new();

        for base in BASE_TYPES {
            let entry = Arc::new(Type::new(base.name(), Kind::Base(base)));
            by_name.insert(base.name().to_string(), entry);
        }

        for (name, kind) in [
            ("bool", Kind::Bool),
            ("date_time", Kind::DateTime),
            ("local_date_time", Kind::LocalDateTime),
        ] {
            by_name.insert(name.to_string(), Arc::new(Type::new(name, kind)));
        }

        Self { by_name }
    }

    /// Register a mapping type.
    ///
    /// Redeclaring a name with a different width is an error; redeclaring at
    /// the same width replaces the earlier entry.
    pub fn insert_mapping(
        &mut self,
        name: &str,
        base: BaseType,
        entries: &[(&str, i64)],
    ) -> Result<(), ProfileError> {
        if let Some(existing) = self.by_name.get(name)
            && existing.base().size() != base.size()
        {
            return Err(ProfileError::ConflictingType(name.to_string()));
        }

        let mapping = Mapping::new(base, entries);
        let entry = Arc::new(Type::new(name, Kind::Mapping(mapping)));
        self.by_name.insert(name.to_string(), entry);

        Ok(())
    }

    /// Look up a type by its profile name.
    pub fn get(&self, name: &str) -> Option<Arc<Type>> {
        self.by_name.get(name).cloned()
    }

    /// Look up a type by name, deriving integer and float shapes when absent.
    ///
    /// Names of the shape `[su]int<bits>[z]` or `float<bits>` resolve to the
    /// matching base type and are registered with a warning. Anything else
    /// unknown is an error.
    pub fn get_or_derive(&mut self, name: &str) -> Result<Arc<Type>, ProfileError> {
        if let Some(entry) = self.by_name.get(name) {
            return Ok(entry.clone());
        }

        let Some(base) = derive_base(name)? else {
            return Err(ProfileError::UnknownType(name.to_string()));
        };

        warn!("type {name} missing from the profile, derived from {}", base.name());

        let entry = Arc::new(Type::new(name, Kind::Base(base)));
        self.by_name.insert(name.to_string(), entry.clone());

        Ok(entry)
    }

    /// The base type for an on-wire identifier.
    pub fn base(&self, index: u8) -> Result<BaseType, ProfileError> {
        BaseType::from_index(index)
    }
}

/// Match a derivable type name against the integer and float shapes.
///
/// `Ok(None)` when the name has neither shape; an error when it does but
/// asks for a width no base type stores.
fn derive_base(name: &str) -> Result<Option<BaseType>, ProfileError> {
    let (stem, zero) = match name.strip_suffix('z') {
        Some(stem) => (stem, true),
        None => (name, false),
    };

    let (signed, bits) = if let Some(bits) = stem.strip_prefix("uint") {
        (false, bits)
    } else if let Some(bits) = stem.strip_prefix("sint") {
        (true, bits)
    } else if let Some(bits) = stem.strip_prefix("float") {
        return match (zero, bits) {
            (false, "32") => Ok(Some(BaseType::Float32)),
            (false, "64") => Ok(Some(BaseType::Float64)),
            _ => Err(ProfileError::UnsupportedWidth(name.to_string())),
        };
    } else {
        return Ok(None);
    };

    if bits.is_empty() || bits.chars().any(|c| !c.is_ascii_digit()) {
        return Ok(None);
    }

    let base = match (signed, zero, bits) {
        (false, false, "8") => BaseType::UInt8,
        (false, false, "16") => BaseType::UInt16,
        (false, false, "32") => BaseType::UInt32,
        (false, false, "64") => BaseType::UInt64,
        (false, true, "8") => BaseType::UInt8Z,
        (false, true, "16") => BaseType::UInt16Z,
        (false, true, "32") => BaseType::UInt32Z,
        (false, true, "64") => BaseType::UInt64Z,
        (true, false, "8") => BaseType::SInt8,
        (true, false, "16") => BaseType::SInt16,
        (true, false, "32") => BaseType::SInt32,
        (true, false, "64") => BaseType::SInt64,
        _ => Err(ProfileError::UnsupportedWidth(name.to_string()))?,
    };

    Ok(Some(base))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mappings_name_known_values_and_pass_unknown_through() {
        let mapping = Mapping::new(BaseType::Enum, &[("running", 1), ("cycling", 2)]);
        let sport = Type::new("sport", Kind::Mapping(mapping));

        let values = sport.decode(&[0x02, 0x09], Endianness::Little).unwrap();
        assert_eq!(values, vec![Value::Name("cycling".into()), Value::Uint(9)]);
    }

    #[test]
    fn small_timestamps_stay_relative() {
        let types = Types::new();
        let date_time = types.get("date_time").unwrap();

        let values = date_time
            .decode(&[0x10, 0x00, 0x00, 0x00], Endianness::Little)
            .unwrap();
        assert_eq!(values, vec![Value::Uint(0x10)]);

        let values = date_time
            .decode(&[0x00, 0x00, 0x00, 0x10], Endianness::Little)
            .unwrap();
        assert!(matches!(values[0], Value::Time(_)));
    }

    #[test]
    fn booleans_decode_per_byte() {
        let types = Types::new();
        let type_ = types.get("bool").unwrap();

        let values = type_.decode(&[0x00, 0x02], Endianness::Little).unwrap();
        assert_eq!(values, vec![Value::Bool(false), Value::Bool(true)]);
    }

    #[test]
    fn integer_shapes_derive_when_missing() {
        let mut types = Types::new();
        types.by_name.remove("uint16z");

        let derived = types.get_or_derive("uint16z").unwrap();
        assert_eq!(derived.base(), BaseType::UInt16Z);
        assert!(types.get("uint16z").is_some());
    }

    #[test]
    fn underivable_names_are_errors() {
        let mut types = Types::new();

        assert!(matches!(
            types.get_or_derive("mesg_num"),
            Err(ProfileError::UnknownType(_))
        ));
        assert!(matches!(
            types.get_or_derive("uint24"),
            Err(ProfileError::UnsupportedWidth(_))
        ));
    }

    #[test]
    fn conflicting_redeclarations_are_errors() {
        let mut types = Types::new();
        types
            .insert_mapping("sport", BaseType::Enum, &[("running", 1)])
            .unwrap();

        assert!(
            types
                .insert_mapping("sport", BaseType::UInt16, &[])
                .is_err()
        );
    }
}
