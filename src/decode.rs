//! The decoder: drives tokens over a document and yields lazy records.

use std::sync::Arc;

use log::{debug, warn};
use thiserror::Error;

use crate::base::{BaseType, Endianness};
use crate::profile::Profile;
use crate::record::Record;
use crate::stream::check::checksum;
use crate::stream::definition::{Definition, DefinitionError};
use crate::stream::header::{FileHeader, HeaderError, RecordHeader};
use crate::stream::state::{AccumulateMismatch, DeveloperField, State};
use crate::value::Value;

/// The global message carrying developer field descriptions.
const FIELD_DESCRIPTION: u16 = 206;

/// Errors decoding a document.
#[derive(Debug, Error)]
pub enum Error {
    /// Unexpectedly reached the end of the data.
    #[error("Unexpected end of data at offset {0}.")]
    Truncated(usize),
    /// Incorrect file header.
    #[error("Incorrect file header: {0}")]
    Header(#[from] HeaderError),
    /// Calculated and found CRC values do not match.
    #[error("Calculated ({calculated}) and found ({found}) CRC values do not match.")]
    Check { found: u16, calculated: u16 },
    /// A data record referenced an empty definition slot.
    #[error("Data record at offset {offset} references an undefined local message ({local}).")]
    UnknownLocalMessage { local: u8, offset: usize },
    /// Malformed definition record.
    #[error("Definition record at offset {offset}: {source}")]
    Definition {
        offset: usize,
        source: DefinitionError,
    },
    /// An accumulated field disagreed with its running total.
    #[error(transparent)]
    Accumulate(#[from] AccumulateMismatch),
}

/// One token of the stream, in ascending byte order.
pub enum Token<'d> {
    /// The document header, emitted once at the start.
    FileHeader(&'d FileHeader),
    /// A definition was installed on a local message slot.
    Definition { local: u8, developer: bool },
    /// A data record, parsed lazily.
    Data(Record<'d>),
    /// The trailing check value, emitted once at the end.
    Checksum { found: u16, calculated: u16 },
}

/// An owned step outcome, so callers can borrow the decoder afterward.
enum Step {
    Header,
    Definition { local: u8, developer: bool },
    Data { definition: Arc<Definition>, start: usize },
    Checksum,
    Eof,
}

enum Stage {
    Header,
    Records,
    Done,
}

/// Decodes one document against a loaded profile.
///
/// Construction validates framing eagerly: the header, the length
/// equation, and both CRCs. Iteration is then purely CPU-bound over the
/// in-memory buffer, and a record only advances the stream once fully
/// requested.
pub struct Decoder<'a> {
    profile: &'a Profile,
    data: &'a [u8],
    header: FileHeader,
    check_found: u16,
    check_calculated: u16,
    pos: usize,
    end: usize,
    state: State,
    strict: bool,
    stage: Stage,
}

impl<'a> Decoder<'a> {
    /// Validate a document's framing and prepare to decode it.
    pub fn new(profile: &'a Profile, data: &'a [u8]) -> Result<Self, Error> {
        let header = FileHeader::parse(data)?;

        let end = header.header_size as usize + header.data_size as usize;

        let check_found = u16::from_le_bytes(data[end..end + 2].try_into().unwrap());
        let check_calculated = checksum(0, &data[..end]);
        if check_found != check_calculated {
            Err(Error::Check {
                found: check_found,
                calculated: check_calculated,
            })?;
        }

        Ok(Self {
            profile,
            data,
            pos: header.header_size as usize,
            header,
            check_found,
            check_calculated,
            end,
            state: State::new(),
            strict: false,
            stage: Stage::Header,
        })
    }

    /// As [`new`](Self::new), but fail on data records whose local message
    /// slot holds no definition, instead of warning and stopping early.
    pub fn strict(profile: &'a Profile, data: &'a [u8]) -> Result<Self, Error> {
        let mut decoder = Self::new(profile, data)?;
        decoder.strict = true;
        Ok(decoder)
    }

    /// Cheaply sniff whether a buffer looks like FIT data.
    pub fn is_fit(data: &[u8]) -> bool {
        data.len() >= 12 && matches!(data[0], 12 | 14) && &data[8..12] == b".FIT"
    }

    /// The validated document header.
    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// The per-stream state, exposed for renderers needing definition
    /// counts.
    pub fn state(&self) -> &State {
        &self.state
    }

    /// Advance to the next token.
    ///
    /// Tokens come in strictly ascending byte order; `None` after the
    /// checksum token.
    pub fn next_token(&mut self) -> Result<Option<Token<'_>>, Error> {
        Ok(Some(match self.step()? {
            Step::Header => Token::FileHeader(&self.header),
            Step::Definition { local, developer } => Token::Definition { local, developer },
            Step::Data { definition, start } => {
                let bytes = &self.data[start..start + definition.size];
                let timestamp = self.state.timestamp();
                Token::Data(Record {
                    definition,
                    bytes,
                    state: &mut self.state,
                    timestamp,
                })
            }
            Step::Checksum => Token::Checksum {
                found: self.check_found,
                calculated: self.check_calculated,
            },
            Step::Eof => return Ok(None),
        }))
    }

    /// Advance to the next data record, driving definitions internally.
    pub fn next_record(&mut self) -> Result<Option<Record<'_>>, Error> {
        loop {
            match self.step()? {
                Step::Data { definition, start } => {
                    let bytes = &self.data[start..start + definition.size];
                    let timestamp = self.state.timestamp();
                    return Ok(Some(Record {
                        definition,
                        bytes,
                        state: &mut self.state,
                        timestamp,
                    }));
                }
                Step::Eof => return Ok(None),
                _ => continue,
            }
        }
    }

    /// Advance over one token, mutating state, without borrowing the result.
    fn step(&mut self) -> Result<Step, Error> {
        match self.stage {
            Stage::Header => {
                self.stage = Stage::Records;
                return Ok(Step::Header);
            }
            Stage::Done => return Ok(Step::Eof),
            Stage::Records => {}
        }

        loop {
            if self.pos >= self.end {
                self.stage = Stage::Done;
                return Ok(Step::Checksum);
            }

            let offset = self.pos;
            let byte = self.data[self.pos];
            self.pos += 1;

            match RecordHeader::parse(byte) {
                RecordHeader::Definition { local, developer } => {
                    let body = &self.data[self.pos..self.end];
                    let (definition, consumed) =
                        Definition::parse(body, developer, self.profile, &mut self.state)
                            .map_err(|source| match source {
                                DefinitionError::Truncated => Error::Truncated(offset),
                                source => Error::Definition { offset, source },
                            })?;

                    self.pos += consumed;
                    self.state.define(local, definition);

                    return Ok(Step::Definition { local, developer });
                }
                RecordHeader::Data { local } => {
                    let Some(definition) = self.state.definition(local) else {
                        self.undefined_local(local, offset)?;
                        continue;
                    };

                    if let Some(step) = self.data_record(definition, offset, false)? {
                        return Ok(step);
                    }
                }
                RecordHeader::CompressedData { local, offset: time } => {
                    let Some(definition) = self.state.definition(local) else {
                        self.undefined_local(local, offset)?;
                        continue;
                    };

                    if self.state.advance_timestamp(time).is_none() {
                        warn!("compressed record at {offset} before any timestamp");
                    }

                    if let Some(step) = self.data_record(definition, offset, true)? {
                        return Ok(step);
                    }
                }
            }
        }
    }

    /// Advance over a data record's bytes. Returns `None` for records the
    /// stream consumes itself (developer field descriptions).
    fn data_record(
        &mut self,
        definition: Arc<Definition>,
        offset: usize,
        compressed: bool,
    ) -> Result<Option<Step>, Error> {
        // The definition's size counts the header byte already consumed.
        let remaining = definition.size - 1;
        if self.pos + remaining > self.end {
            return Err(Error::Truncated(offset));
        }
        self.pos += remaining;

        let bytes = &self.data[offset..offset + definition.size];

        // Snapshot the in-record timestamp before the record is yielded;
        // compressed headers have already advanced the rolling value.
        if !compressed
            && let Some(slot) = definition.timestamp.map(|i| &definition.slots[i])
            && slot.size == 4
        {
            let raw: [u8; 4] = bytes[slot.start..slot.start + 4].try_into().unwrap();
            let raw = match definition.endian {
                Endianness::Little => u32::from_le_bytes(raw),
                Endianness::Big => u32::from_be_bytes(raw),
            };

            if raw != u32::MAX {
                self.state.set_timestamp(raw);
            }
        }

        if definition.global == FIELD_DESCRIPTION {
            self.register_developer(definition, bytes)?;
            return Ok(None);
        }

        Ok(Some(Step::Data {
            definition,
            start: offset,
        }))
    }

    fn undefined_local(&mut self, local: u8, offset: usize) -> Result<(), Error> {
        if self.strict {
            return Err(Error::UnknownLocalMessage { local, offset });
        }

        // Without a definition the record's length is unknowable, so the
        // rest of the record section cannot be re-framed.
        warn!(
            "data record at {offset} references undefined local message {local}, \
             skipping the rest of the stream"
        );
        self.pos = self.end;

        Ok(())
    }

    /// Materialise a field description record into the developer registry.
    fn register_developer(
        &mut self,
        definition: Arc<Definition>,
        bytes: &[u8],
    ) -> Result<(), Error> {
        let mut record = Record {
            definition,
            bytes,
            state: &mut self.state,
            timestamp: None,
        };

        let mut index = None;
        let mut number = None;
        let mut base_value = None;
        let mut name = None;
        let mut units = String::new();

        for emitted in record.fields() {
            let emitted = emitted?;
            let Some(first) = emitted.values.as_ref().and_then(|v| v.first()) else {
                continue;
            };

            match emitted.name.as_str() {
                "developer_data_index" => index = as_u8(first),
                "field_definition_number" => number = as_u8(first),
                "fit_base_type_id" => base_value = Some(first.clone()),
                "field_name" => {
                    if let Value::Text(text) = first {
                        name = Some(text.clone());
                    }
                }
                "units" => {
                    if let Value::Text(text) = first {
                        units = text.clone();
                    }
                }
                _ => {}
            }
        }

        let base = base_value.as_ref().and_then(|value| self.base_of(value));
        let (Some(index), Some(number), Some(base)) = (index, number, base) else {
            debug!("incomplete field description, leaving its fields opaque");
            return Ok(());
        };

        let name = name.unwrap_or_else(|| format!("DEVELOPER {index}:{number}"));
        self.state
            .register_developer(index, number, DeveloperField { name, units, base });

        Ok(())
    }

    /// Resolve a field description's base type value, mapped or numeric.
    fn base_of(&self, value: &Value) -> Option<BaseType> {
        match value {
            Value::Name(name) => Some(self.profile.types.get(name)?.base()),
            Value::Uint(index) => {
                let index = u8::try_from(*index).ok()?;
                BaseType::from_index(index).ok()
            }
            _ => None,
        }
    }
}

fn as_u8(value: &Value) -> Option<u8> {
    match value {
        Value::Uint(x) => u8::try_from(*x).ok(),
        Value::Int(x) => u8::try_from(*x).ok(),
        _ => None,
    }
}
