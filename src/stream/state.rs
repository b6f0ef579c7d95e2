//! Mutable per-stream decoder state.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use thiserror::Error;

use crate::base::BaseType;
use crate::stream::definition::{Definition, Identity};
use crate::value::Value;

/// A developer field registered mid-stream by a field description message.
#[derive(Debug, Clone)]
pub struct DeveloperField {
    pub name: String,
    pub units: String,
    pub base: BaseType,
}

/// The arity or kind of an accumulated field changed between records.
#[derive(Debug, Error)]
#[error("Running total for field ({field}) disagrees in arity or kind with incoming values.")]
pub struct AccumulateMismatch {
    pub field: u8,
}

/// Running totals for accumulated fields.
///
/// Keyed by definition identity rather than message name, so a message
/// redefined mid-stream accumulates independently under each definition.
#[derive(Debug, Default)]
pub struct Accumulators(HashMap<(u32, u8), Vec<Value>>);

impl Accumulators {
    /// Fold new values into the running total, returning the summed tuple.
    ///
    /// The stored tuple keeps the arity of the first parse; later parses
    /// must match it element for element.
    pub(crate) fn fold(
        &mut self,
        ordinal: u32,
        field: u8,
        values: Vec<Value>,
    ) -> Result<Vec<Value>, AccumulateMismatch> {
        match self.0.entry((ordinal, field)) {
            Entry::Vacant(entry) => {
                entry.insert(values.clone());
                Ok(values)
            }
            Entry::Occupied(mut entry) => {
                if entry.get().len() != values.len() {
                    return Err(AccumulateMismatch { field });
                }

                let summed = entry
                    .get()
                    .iter()
                    .zip(&values)
                    .map(|(total, new)| total.add(new).ok_or(AccumulateMismatch { field }))
                    .collect::<Result<Vec<_>, _>>()?;

                entry.insert(summed.clone());
                Ok(summed)
            }
        }
    }
}

/// Per-stream mutable context.
///
/// One state per decoded stream; never share across concurrent decoders.
#[derive(Debug, Default)]
pub struct State {
    definitions: [Option<Arc<Definition>>; 16],
    timestamp: Option<u32>,
    developers: HashMap<(u8, u8), DeveloperField>,
    pub(crate) accumulators: Accumulators,
    ordinal: u32,
    per_name: HashMap<String, u32>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a definition on its local message slot, replacing any prior
    /// occupant.
    pub(crate) fn define(&mut self, local: u8, definition: Definition) -> Arc<Definition> {
        let definition = Arc::new(definition);
        self.definitions[local as usize & 0xF] = Some(definition.clone());
        definition
    }

    /// The definition currently installed on a local message slot.
    pub fn definition(&self, local: u8) -> Option<Arc<Definition>> {
        self.definitions[local as usize & 0xF].clone()
    }

    /// Mint the identity for the next definition of a message name.
    pub(crate) fn next_identity(&mut self, name: &str) -> Identity {
        let ordinal = self.ordinal;
        self.ordinal += 1;

        let nth = self.per_name.entry(name.to_string()).or_insert(0);
        let identity = Identity { ordinal, nth: *nth };
        *nth += 1;

        identity
    }

    /// How many definitions the stream has installed for a message name.
    pub fn definitions_of(&self, name: &str) -> u32 {
        self.per_name.get(name).copied().unwrap_or(0)
    }

    /// The rolling timestamp, seconds past the FIT epoch.
    pub fn timestamp(&self) -> Option<u32> {
        self.timestamp
    }

    pub(crate) fn set_timestamp(&mut self, timestamp: u32) {
        self.timestamp = Some(timestamp);
    }

    /// Apply a compressed header's 5-bit offset to the rolling timestamp.
    ///
    /// The offset replaces the low five bits; an offset below the prior low
    /// bits means those bits wrapped, adding another 0x20 seconds. Returns
    /// `None` when no timestamp has been seen yet.
    pub(crate) fn advance_timestamp(&mut self, offset: u8) -> Option<u32> {
        let prior = self.timestamp?;
        let offset = (offset & 0x1F) as u32;

        let mut next = (prior & !0x1F) + offset;
        if offset < prior & 0x1F {
            next += 0x20;
        }

        self.timestamp = Some(next);
        Some(next)
    }

    /// Register a developer field under its data index and field number.
    pub(crate) fn register_developer(&mut self, index: u8, field: u8, entry: DeveloperField) {
        self.developers.insert((index, field), entry);
    }

    /// Look up a developer field by data index and field number.
    pub fn developer(&self, index: u8, field: u8) -> Option<&DeveloperField> {
        self.developers.get(&(index, field))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_advance_the_low_bits() {
        let mut state = State::new();
        assert_eq!(state.advance_timestamp(5), None);

        state.set_timestamp(0x4030_2010);
        assert_eq!(state.advance_timestamp(0x15), Some(0x4030_2015));
        // An offset below the prior low bits wraps forward, never backward.
        assert_eq!(state.advance_timestamp(0x02), Some(0x4030_2022));
    }

    #[test]
    fn totals_are_independent_per_identity() {
        let mut accumulators = Accumulators::default();

        accumulators.fold(0, 5, vec![Value::Uint(10)]).unwrap();
        let summed = accumulators.fold(0, 5, vec![Value::Uint(4)]).unwrap();
        assert_eq!(summed, vec![Value::Uint(14)]);

        let fresh = accumulators.fold(1, 5, vec![Value::Uint(1)]).unwrap();
        assert_eq!(fresh, vec![Value::Uint(1)]);
    }

    #[test]
    fn changed_arity_is_a_mismatch() {
        let mut accumulators = Accumulators::default();

        accumulators
            .fold(0, 6, vec![Value::Uint(1), Value::Uint(2)])
            .unwrap();
        assert!(accumulators.fold(0, 6, vec![Value::Uint(1)]).is_err());
    }

    #[test]
    fn identities_count_per_name() {
        let mut state = State::new();

        let first = state.next_identity("record");
        let second = state.next_identity("record");
        let other = state.next_identity("lap");

        assert_eq!((first.ordinal, first.nth), (0, 0));
        assert_eq!((second.ordinal, second.nth), (1, 1));
        assert_eq!((other.ordinal, other.nth), (2, 0));
        assert_eq!(state.definitions_of("record"), 2);
    }
}
