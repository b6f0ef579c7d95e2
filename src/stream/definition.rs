//! Definition records: the per-stream schema for data records.

use std::collections::BTreeSet;
use std::sync::Arc;

use log::{debug, warn};
use thiserror::Error;
use zerocopy::FromBytes;

use crate::base::{BaseType, Endianness};
use crate::profile::field::Field;
use crate::profile::message::Message;
use crate::profile::{Profile, ProfileError};
use crate::stream::state::State;

/// The field number every message reserves for its timestamp.
pub const TIMESTAMP_FIELD: u8 = 253;

/// An error advancing over a definition record.
#[derive(Debug, Error)]
pub enum DefinitionError {
    /// Definition record truncated.
    #[error("Definition record truncated.")]
    Truncated,
    /// The definition referenced a base type the profile cannot supply.
    #[error(transparent)]
    Profile(#[from] ProfileError),
}

/// Stream-unique tag for a definition instance.
///
/// `nth` counts definitions sharing a message name, letting renderers
/// tell apart records decoded under distinct definitions of one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Identity {
    /// Position among all definitions in the stream.
    pub ordinal: u32,
    /// Position among definitions sharing this message name.
    pub nth: u32,
}

/// One field slot: where the bytes sit in a data record and how to read them.
#[derive(Debug, Clone)]
pub struct FieldSlot {
    /// The wire field number.
    pub number: u8,
    /// The profile field, when the message describes this number.
    pub field: Option<Arc<Field>>,
    /// The wire base type, used directly when no profile field applies.
    pub base: BaseType,
    /// Slice width in bytes.
    pub size: usize,
    /// Byte offset within the record, counting its header byte.
    pub start: usize,
    /// Items in the slice, `size` over the base type's width.
    pub count: usize,
}

/// The on-wire schema installed on a local message slot.
///
/// Slots are ordered for parsing with non-dynamic fields first, so a dynamic
/// field's references are parsed by the time it consults them; byte offsets
/// keep the wire order.
#[derive(Debug)]
pub struct Definition {
    pub endian: Endianness,
    pub global: u16,
    pub message: Arc<Message>,
    pub slots: Vec<FieldSlot>,
    /// Total data record size, including the one-byte header.
    pub size: usize,
    /// Field names consulted by any dynamic field in this definition.
    pub references: BTreeSet<String>,
    /// Index into `slots` of the timestamp field, when defined.
    pub timestamp: Option<usize>,
    pub identity: Identity,
}

#[repr(C, packed)]
#[derive(FromBytes)]
struct Preamble {
    _reserved: u8,
    architecture: u8,
    global_message: [u8; 2],
    n_fields: u8,
}

#[repr(C, packed)]
#[derive(FromBytes)]
struct SlotHeader {
    field: u8,
    size: u8,
    base_type: u8,
}

#[repr(C, packed)]
#[derive(FromBytes)]
struct DeveloperSlotHeader {
    field: u8,
    size: u8,
    index: u8,
}

impl Definition {
    /// Parse a definition body (the bytes after the record header).
    ///
    /// Returns the definition and the number of bytes consumed. `developer`
    /// selects the extended layout with the trailing developer-field table,
    /// resolved through the state's registry.
    pub(crate) fn parse(
        bytes: &[u8],
        developer: bool,
        profile: &Profile,
        state: &mut State,
    ) -> Result<(Self, usize), DefinitionError> {
        let i = &mut 0;

        let Preamble {
            architecture,
            global_message,
            n_fields,
            ..
        } = zerocopy::transmute!(take::<5>(bytes, i)?);

        let endian = if architecture == 1 {
            Endianness::Big
        } else {
            Endianness::Little
        };

        let global = match endian {
            Endianness::Little => u16::from_le_bytes(global_message),
            Endianness::Big => u16::from_be_bytes(global_message),
        };

        let message = profile.messages.by_number(global);

        let mut slots = Vec::with_capacity(n_fields as usize);
        let mut start = 1; // The record's header byte.

        for _ in 0..n_fields {
            let SlotHeader {
                field: number,
                size,
                base_type,
            } = zerocopy::transmute!(take::<3>(bytes, i)?);

            let base = BaseType::from_index(base_type)?;
            let size = size as usize;

            slots.push(new_slot(&message, number, base, size, start));
            start += size;
        }

        // Parse order: references of dynamic fields must come first.
        slots.sort_by_key(|slot| slot.field.as_ref().is_some_and(|f| f.is_dynamic()));

        if developer {
            let [n_dev] = take::<1>(bytes, i)?;

            for _ in 0..n_dev {
                let DeveloperSlotHeader {
                    field: number,
                    size,
                    index,
                } = zerocopy::transmute!(take::<3>(bytes, i)?);

                slots.push(developer_slot(profile, state, number, index, size as usize, start));
                start += size as usize;
            }
        }

        let timestamp = slots
            .iter()
            .position(|slot| slot.number == TIMESTAMP_FIELD);

        let references = slots
            .iter()
            .filter_map(|slot| slot.field.as_ref())
            .flat_map(|field| field.references())
            .map(str::to_string)
            .collect();

        let identity = state.next_identity(message.name());

        let definition = Self {
            endian,
            global,
            message,
            slots,
            size: start,
            references,
            timestamp,
            identity,
        };

        Ok((definition, *i))
    }
}

/// Build a slot for a wire field, falling back to an opaque byte run when
/// the declared size does not divide by the base type's width.
fn new_slot(message: &Message, number: u8, base: BaseType, size: usize, start: usize) -> FieldSlot {
    let (base, count) = if size % base.size() == 0 {
        (base, size / base.size())
    } else {
        warn!(
            "field {number} of {}: size {size} does not fit {}, reading bytes",
            message.name(),
            base.name(),
        );
        (BaseType::Byte, size)
    };

    // A profile field can only interpret the slice when its own storage
    // width agrees with the wire.
    let field = message
        .field(number)
        .filter(|field| field.type_().base().size() == base.size())
        .cloned();

    FieldSlot {
        number,
        field,
        base,
        size,
        start,
        count,
    }
}

/// Build a slot for a developer field through the state's registry.
fn developer_slot(
    profile: &Profile,
    state: &State,
    number: u8,
    index: u8,
    size: usize,
    start: usize,
) -> FieldSlot {
    let Some(entry) = state.developer(index, number) else {
        debug!("developer field ({index}, {number}) has no description, reading bytes");
        return FieldSlot {
            number,
            field: None,
            base: BaseType::Byte,
            size,
            start,
            count: size,
        };
    };

    let base = entry.base;
    let (base, count) = if size % base.size() == 0 {
        (base, size / base.size())
    } else {
        (BaseType::Byte, size)
    };

    let field = profile.types.get(base.name()).map(|type_| {
        Arc::new(Field::new(number, entry.name.clone(), type_).with_units(entry.units.clone()))
    });

    FieldSlot {
        number,
        field,
        base,
        size,
        start,
        count,
    }
}

/// Take an exact number of bytes from an offset in a slice, advancing the
/// offset.
fn take<const N: usize>(bytes: &[u8], i: &mut usize) -> Result<[u8; N], DefinitionError> {
    let start = *i;
    *i += N;

    Ok(bytes
        .get(start..*i)
        .ok_or(DefinitionError::Truncated)?
        .try_into()
        .unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::message::{MessageBuilder, Messages};
    use crate::profile::types::Types;
    use crate::value::Value;

    fn profile() -> Profile {
        let types = Types::new();
        let mut messages = Messages::new();

        messages
            .insert(
                MessageBuilder::new("record", Some(20))
                    .field(Field::new(
                        253,
                        "timestamp",
                        types.get("date_time").unwrap(),
                    ))
                    .field(Field::new(3, "heart_rate", types.get("uint8").unwrap()))
                    .field(Field::new(1, "kind", types.get("enum").unwrap()))
                    .field(
                        Field::new(4, "extra", types.get("uint16").unwrap()).with_alternate(
                            "kind",
                            Value::Uint(1),
                            Field::new(4, "other", types.get("uint16").unwrap()),
                        ),
                    )
                    .build()
                    .unwrap(),
            )
            .unwrap();

        Profile::new(types, messages)
    }

    #[test]
    fn slots_keep_wire_offsets_but_sort_dynamics_last() {
        let profile = profile();
        let mut state = State::new();

        // Dynamic field 4 declared first, its reference field 1 after it.
        let body = [
            0x00, 0x00, 20, 0x00, 3, // preamble
            4, 2, 0x84, // extra (dynamic)
            1, 1, 0x00, // kind
            253, 4, 0x86, // timestamp
        ];

        let (definition, consumed) = Definition::parse(&body, false, &profile, &mut state).unwrap();

        assert_eq!(consumed, body.len());
        assert_eq!(definition.global, 20);
        assert_eq!(definition.size, 1 + 2 + 1 + 4);

        let order: Vec<u8> = definition.slots.iter().map(|s| s.number).collect();
        assert_eq!(order, vec![1, 253, 4]);

        // Offsets follow the wire, not the parse order.
        assert_eq!(definition.slots[0].start, 3);
        assert_eq!(definition.slots[1].start, 4);
        assert_eq!(definition.slots[2].start, 1);

        assert_eq!(definition.timestamp, Some(1));
        assert!(definition.references.contains("kind"));
    }

    #[test]
    fn big_endian_definitions_read_the_global_number_accordingly() {
        let profile = profile();
        let mut state = State::new();

        let body = [0x00, 0x01, 0x00, 20, 1, 3, 1, 0x02];
        let (definition, _) = Definition::parse(&body, false, &profile, &mut state).unwrap();

        assert_eq!(definition.endian, Endianness::Big);
        assert_eq!(definition.global, 20);
    }

    #[test]
    fn unknown_fields_become_anonymous_slots() {
        let profile = profile();
        let mut state = State::new();

        let body = [0x00, 0x00, 20, 0x00, 1, 99, 2, 0x84];
        let (definition, _) = Definition::parse(&body, false, &profile, &mut state).unwrap();

        assert!(definition.slots[0].field.is_none());
        assert_eq!(definition.slots[0].base, BaseType::UInt16);
        assert_eq!(definition.slots[0].count, 1);
    }

    #[test]
    fn a_misfit_size_falls_back_to_bytes() {
        let profile = profile();
        let mut state = State::new();

        let body = [0x00, 0x00, 20, 0x00, 1, 3, 3, 0x84];
        let (definition, _) = Definition::parse(&body, false, &profile, &mut state).unwrap();

        assert_eq!(definition.slots[0].base, BaseType::Byte);
        assert_eq!(definition.slots[0].count, 3);
    }

    #[test]
    fn truncated_definitions_are_errors() {
        let profile = profile();
        let mut state = State::new();

        let body = [0x00, 0x00, 20, 0x00, 2, 3, 1, 0x02];
        assert!(matches!(
            Definition::parse(&body, false, &profile, &mut state),
            Err(DefinitionError::Truncated)
        ));
    }
}
