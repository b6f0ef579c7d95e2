//! A profile-driven decoder for Garmin's Flexible and Interoperable Data
//! Transfer protocol.
//!
//! FIT documents are self-describing: each stream installs its own record
//! schemas mid-flight, and a separately loaded global profile gives the
//! numeric identifiers their names, types, and scaling rules. Cassette
//! splits the work accordingly:
//!
//! - [`profile`] holds the immutable dictionaries a decoder reads from:
//!   types (including enum-like mappings) and messages with their fields.
//! - [`base`] and [`value`] cover the primitive layer: byte-order-aware
//!   codecs with their 'invalid' markers, and the decoded value model.
//! - [`stream`] walks the bytes: framing checks, record headers,
//!   definitions, and the per-stream state machine.
//! - [`decode`] drives it all, yielding tokens and lazy [`record`]s.
//! - [`filter`] offers composable transforms over a record's fields.
//!
//! Most users should begin with [`Decoder`]: construct it over a loaded
//! [`Profile`] and an in-memory document, then pull records.
//!
//! ```ignore
//! let mut decoder = Decoder::new(&profile, &data)?;
//! while let Some(mut record) = decoder.next_record()? {
//!     println!("{}", record.name());
//!     for field in record.fields() {
//!         println!("  {:?}", field?);
//!     }
//! }
//! ```
//!
//! Profiles are immutable once built and may be shared between decoders
//! and threads; each decoder owns the mutable state of one stream.

pub mod base;
pub mod decode;
pub mod filter;
pub mod profile;
pub mod record;
pub mod stream;
pub mod value;

pub use base::{BaseType, Endianness};
pub use decode::{Decoder, Error, Token};
pub use filter::Filters;
pub use profile::Profile;
pub use record::{FieldValue, Record};
pub use value::Value;
