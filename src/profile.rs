//! The global profile: the type and message dictionaries that give numeric
//! identifiers their meaning.
//!
//! A profile is assembled once, by an importer of Garmin's profile
//! spreadsheet or by hand, and is immutable afterward. Decoders only read
//! from it, so one profile may be shared between streams and threads.

pub mod field;
pub mod message;
pub mod types;

pub use field::{Alternate, Component, Field};
pub use message::{Message, MessageBuilder, Messages};
pub use types::{Kind, Mapping, Type, Types};

use thiserror::Error;

/// An error in the profile itself, or in data the profile cannot describe.
#[derive(Debug, Error)]
pub enum ProfileError {
    /// Unknown base type identifier.
    #[error("Unknown base type identifier ({0:#04X}).")]
    UnknownBaseType(u8),
    /// A type was referenced by a name the profile does not hold.
    #[error("Unknown type ({0}).")]
    UnknownType(String),
    /// A derivable type name asked for an unsupported width.
    #[error("Unsupported width for derived type ({0}).")]
    UnsupportedWidth(String),
    /// A type was redeclared with a different width.
    #[error("Type ({0}) redeclared with a conflicting width.")]
    ConflictingType(String),
    /// A field combines expansion with value adjustment.
    #[error("Field ({0}) mixes components or alternates with scale, offset, or accumulation.")]
    ConflictingField(String),
    /// A field referenced another that its message does not define.
    #[error("Unresolved reference ({reference}) in message ({message}).")]
    UnresolvedReference { message: String, reference: String },
    /// A message was declared twice.
    #[error("Duplicate message ({0}).")]
    DuplicateMessage(String),
}

/// A loaded global profile.
#[derive(Debug)]
pub struct Profile {
    pub types: Types,
    pub messages: Messages,
}

impl Profile {
    pub fn new(types: Types, messages: Messages) -> Self {
        Self { types, messages }
    }
}
