//! Profile fields: scaling, accumulation, components, and alternates.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use log::debug;

use crate::base::{BaseType, Endianness};
use crate::profile::message::Message;
use crate::profile::types::Type;
use crate::record::FieldValue;
use crate::stream::state::{AccumulateMismatch, Accumulators};
use crate::value::Value;

/// One bit-run of a composite field, routed back through a named sub-field.
#[derive(Debug, Clone)]
pub struct Component {
    pub bits: u8,
    pub field: String,
}

impl Component {
    pub fn new(bits: u8, field: impl Into<String>) -> Self {
        Self {
            bits,
            field: field.into(),
        }
    }
}

/// A replacement field, selected when a reference field holds a given value.
#[derive(Debug, Clone)]
pub struct Alternate {
    pub reference: String,
    pub value: Value,
    pub field: Arc<Field>,
}

/// A field of a profile message.
///
/// Constructed by the profile importer through the `with_` builders; the
/// invariant that components and alternates exclude scale, offset, and
/// accumulation on the same field is enforced when the message is built.
#[derive(Debug, Clone)]
pub struct Field {
    pub number: u8,
    pub name: String,
    pub units: String,
    type_: Arc<Type>,
    pub scale: f64,
    pub offset: f64,
    pub accumulate: bool,
    pub components: Vec<Component>,
    pub dynamic: Vec<Alternate>,
}

impl Field {
    pub fn new(number: u8, name: impl Into<String>, type_: Arc<Type>) -> Self {
        Self {
            number,
            name: name.into(),
            units: String::new(),
            type_,
            scale: 1.0,
            offset: 0.0,
            accumulate: false,
            components: Vec::new(),
            dynamic: Vec::new(),
        }
    }

    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = units.into();
        self
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_offset(mut self, offset: f64) -> Self {
        self.offset = offset;
        self
    }

    pub fn accumulated(mut self) -> Self {
        self.accumulate = true;
        self
    }

    pub fn with_component(mut self, bits: u8, field: impl Into<String>) -> Self {
        self.components.push(Component::new(bits, field));
        self
    }

    /// Add an alternate, taking over when `reference` holds `value`.
    pub fn with_alternate(mut self, reference: impl Into<String>, value: Value, field: Field) -> Self {
        self.dynamic.push(Alternate {
            reference: reference.into(),
            value,
            field: Arc::new(field),
        });
        self
    }

    /// The type this field decodes under.
    pub fn type_(&self) -> &Arc<Type> {
        &self.type_
    }

    /// Whether this field defers to an alternate at parse time.
    pub fn is_dynamic(&self) -> bool {
        !self.dynamic.is_empty()
    }

    /// Names of the fields this field's alternates consult.
    pub fn references(&self) -> BTreeSet<&str> {
        self.dynamic
            .iter()
            .map(|alt| alt.reference.as_str())
            .collect()
    }

    /// Whether the field adjusts values after decoding.
    pub(crate) fn adjusts_values(&self) -> bool {
        self.scale != 1.0 || self.offset != 0.0 || self.accumulate
    }

    /// Parse this field's byte slice into emitted values.
    ///
    /// Checks run in order: component decomposition, alternate dispatch
    /// against fields already parsed in this record, then the plain decode
    /// with scale, offset, and accumulation applied.
    pub(crate) fn parse(
        &self,
        bytes: &[u8],
        endian: Endianness,
        message: &Message,
        prior: &HashMap<String, Value>,
        accumulators: &mut Accumulators,
        ordinal: u32,
    ) -> Result<Vec<FieldValue>, AccumulateMismatch> {
        if !self.components.is_empty() {
            return self.decompose(bytes, endian, message, prior, accumulators, ordinal);
        }

        for alternate in &self.dynamic {
            if prior.get(&alternate.reference) == Some(&alternate.value) {
                return alternate
                    .field
                    .parse(bytes, endian, message, prior, accumulators, ordinal);
            }
        }

        let Some(values) = self.type_.decode(bytes, endian) else {
            return Ok(vec![FieldValue {
                name: self.name.clone(),
                values: None,
                units: self.units.clone(),
            }]);
        };

        let values = if self.scale != 1.0 || self.offset != 0.0 {
            values
                .into_iter()
                .map(|v| v.scale_offset(self.scale, self.offset))
                .collect()
        } else {
            values
        };

        let values = if self.accumulate {
            accumulators.fold(ordinal, self.number, values)?
        } else {
            values
        };

        Ok(vec![FieldValue {
            name: self.name.clone(),
            values: Some(values),
            units: self.units.clone(),
        }])
    }

    /// Peel bit-runs off the slice and re-dispatch each through its sub-field.
    ///
    /// The slice is read as one integer in the record's byte order; runs come
    /// off the least-significant end, each padded up to its sub-field's base
    /// width and parsed as a single little-endian item.
    fn decompose(
        &self,
        bytes: &[u8],
        endian: Endianness,
        message: &Message,
        prior: &HashMap<String, Value>,
        accumulators: &mut Accumulators,
        ordinal: u32,
    ) -> Result<Vec<FieldValue>, AccumulateMismatch> {
        // Bit bags wider than a u64 do not occur in the profile.
        let bytes = match endian {
            Endianness::Little => &bytes[..bytes.len().min(8)],
            Endianness::Big => &bytes[bytes.len().saturating_sub(8)..],
        };

        let mut bag = match endian {
            Endianness::Little => bytes.iter().rev().fold(0u64, |acc, b| acc << 8 | *b as u64),
            Endianness::Big => bytes.iter().fold(0u64, |acc, b| acc << 8 | *b as u64),
        };

        let mut emitted = Vec::new();

        for component in &self.components {
            let run = if component.bits >= 64 {
                bag
            } else {
                bag & ((1 << component.bits) - 1)
            };
            bag = bag.checked_shr(component.bits as u32).unwrap_or(0);

            let Some(sub) = message.field_by_name(&component.field) else {
                debug!(
                    "component of {} references missing field {}",
                    self.name, component.field
                );
                continue;
            };

            let width = sub.type_.base().size();
            let padded = run.to_le_bytes();

            let sub_emitted = sub.parse(
                &padded[..width],
                Endianness::Little,
                message,
                prior,
                accumulators,
                ordinal,
            )?;
            emitted.extend(sub_emitted);
        }

        Ok(emitted)
    }

    /// Decode the slice with no profile interpretation, for anonymous slots.
    pub(crate) fn raw(name: String, bytes: &[u8], base: BaseType, endian: Endianness) -> FieldValue {
        let values = base.decode(bytes, endian);
        FieldValue {
            name,
            values,
            units: String::new(),
        }
    }
}
