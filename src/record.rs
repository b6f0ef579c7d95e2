//! Lazy records over data tokens.

use std::collections::HashMap;
use std::iter;
use std::sync::Arc;
use std::vec;

use chrono::{DateTime, Utc};
use either::Either::{self, Left, Right};

use crate::profile::field::Field;
use crate::stream::definition::{Definition, Identity};
use crate::stream::state::{AccumulateMismatch, State};
use crate::value::{EPOCH_OFFSET, Value};

/// One emitted field: a name, decoded values, and units.
///
/// `values` of `None` marks a slice holding the base type's 'invalid'
/// pattern. These are expected and common (padding, unused sensor
/// channels), so they are data, not errors.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldValue {
    pub name: String,
    pub values: Option<Vec<Value>>,
    pub units: String,
}

/// A decoded data record.
///
/// Fields parse only when [`fields`](Self::fields) is iterated. The record
/// borrows the decoder exclusively, so it must be dropped before the next
/// record is requested; the timestamp is a snapshot taken at token time and
/// stays stable regardless.
pub struct Record<'a> {
    pub(crate) definition: Arc<Definition>,
    pub(crate) bytes: &'a [u8],
    pub(crate) state: &'a mut State,
    pub(crate) timestamp: Option<u32>,
}

impl Record<'_> {
    /// The profile name of this record's message.
    pub fn name(&self) -> &str {
        self.definition.message.name()
    }

    /// The global message number.
    pub fn global(&self) -> u16 {
        self.definition.global
    }

    /// The identity of the definition this record decoded under.
    pub fn identity(&self) -> Identity {
        self.definition.identity
    }

    /// The timestamp snapshot, seconds past the FIT epoch.
    pub fn timestamp(&self) -> Option<u32> {
        self.timestamp
    }

    /// The timestamp snapshot as an absolute instant.
    pub fn time(&self) -> Option<DateTime<Utc>> {
        let seconds = self.timestamp?;
        DateTime::from_timestamp(EPOCH_OFFSET + seconds as i64, 0)
    }

    /// Iterate the record's fields in parse order.
    ///
    /// Slots without a profile field emit their byte span as the name and
    /// the raw decode as the values.
    pub fn fields(&mut self) -> Fields<'_> {
        Fields {
            definition: self.definition.clone(),
            bytes: self.bytes,
            state: &mut *self.state,
            slot: 0,
            prior: HashMap::new(),
            pending: None,
        }
    }
}

/// Iterator over a record's fields.
///
/// Carries the values parsed so far, consulted by dynamic fields, and
/// flattens component expansions inline.
pub struct Fields<'r> {
    definition: Arc<Definition>,
    bytes: &'r [u8],
    state: &'r mut State,
    slot: usize,
    prior: HashMap<String, Value>,
    pending: Option<Either<iter::Once<FieldValue>, vec::IntoIter<FieldValue>>>,
}

impl Iterator for Fields<'_> {
    type Item = Result<FieldValue, AccumulateMismatch>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(pending) = &mut self.pending {
                if let Some(emitted) = pending.next() {
                    if let Some(first) = emitted.values.as_ref().and_then(|v| v.first()) {
                        self.prior
                            .entry(emitted.name.clone())
                            .or_insert_with(|| first.clone());
                    }
                    return Some(Ok(emitted));
                }
                self.pending = None;
            }

            let slot = self.definition.slots.get(self.slot)?;
            self.slot += 1;

            let Some(bytes) = self.bytes.get(slot.start..slot.start + slot.size) else {
                debug_assert!(false, "data token shorter than its definition");
                return None;
            };

            self.pending = Some(match &slot.field {
                None => {
                    let name = format!("@{}:{}", slot.start, slot.start + slot.size);
                    Left(iter::once(Field::raw(
                        name,
                        bytes,
                        slot.base,
                        self.definition.endian,
                    )))
                }
                Some(field) => {
                    let emitted = field.parse(
                        bytes,
                        self.definition.endian,
                        &self.definition.message,
                        &self.prior,
                        &mut self.state.accumulators,
                        self.definition.identity.ordinal,
                    );

                    match emitted {
                        Ok(emitted) => Right(emitted.into_iter()),
                        Err(mismatch) => return Some(Err(mismatch)),
                    }
                }
            });
        }
    }
}
