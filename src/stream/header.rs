//! Document and record header parsing.

use tartan_bitfield::bitfield;
use thiserror::Error;
use zerocopy::FromBytes;

use crate::stream::check::checksum;

/// An error validating a document header.
#[derive(Debug, Error)]
pub enum HeaderError {
    /// Header shorter than its fixed fields.
    #[error("Document header truncated.")]
    Truncated,
    /// Incorrect file type marker.
    #[error("Incorrect file type marker.")]
    NotFitData,
    /// Unknown header length.
    #[error("Unknown header length ({0}).")]
    UnknownHeaderLength(u8),
    /// Document length disagrees with the header's accounting.
    #[error("Document length ({found}) does not match the header ({expected}).")]
    LengthMismatch { expected: usize, found: usize },
    /// Calculated and found header CRC values do not match.
    #[error("Calculated ({calculated}) and found ({found}) header CRC values do not match.")]
    HeaderCheck { found: u16, calculated: u16 },
}

/// The document header: protocol and profile versions, and the length of
/// the record section.
#[derive(Debug, Clone)]
pub struct FileHeader {
    pub header_size: u8,
    pub protocol_version: u8,
    pub profile_version: u16,
    pub data_size: u32,
    /// The header's own CRC, present in extended (14-byte) headers.
    pub checksum: Option<u16>,
}

impl FileHeader {
    /// Parse and validate the document header against the whole buffer.
    ///
    /// Checks the marker, the header length, the document length equation,
    /// and, when present and nonzero, the header CRC over the first twelve
    /// bytes.
    pub fn parse(buffer: &[u8]) -> Result<Self, HeaderError> {
        #[repr(C, packed)]
        #[derive(FromBytes)]
        struct RawHeader {
            header_size: u8,
            protocol_version: u8,
            profile_version: [u8; 2],
            data_size: [u8; 4],
            data_type: [u8; 4],
        }

        let fixed: [u8; 12] = buffer
            .get(..12)
            .ok_or(HeaderError::Truncated)?
            .try_into()
            .unwrap();
        let RawHeader {
            header_size,
            protocol_version,
            profile_version,
            data_size,
            data_type,
        } = zerocopy::transmute!(fixed);

        if &data_type != b".FIT" {
            Err(HeaderError::NotFitData)?;
        }

        let check = match header_size {
            12 => None,
            14 => {
                let found: [u8; 2] = buffer
                    .get(12..14)
                    .ok_or(HeaderError::Truncated)?
                    .try_into()
                    .unwrap();
                Some(u16::from_le_bytes(found))
            }
            _ => Err(HeaderError::UnknownHeaderLength(header_size))?,
        };

        if let Some(found) = check
            && found != 0
        {
            let calculated = checksum(0, &buffer[..12]);
            if found != calculated {
                Err(HeaderError::HeaderCheck { found, calculated })?;
            }
        }

        let data_size = u32::from_le_bytes(data_size);

        let expected = header_size as usize + data_size as usize + 2;
        if buffer.len() != expected {
            Err(HeaderError::LengthMismatch {
                expected,
                found: buffer.len(),
            })?;
        }

        Ok(Self {
            header_size,
            protocol_version,
            profile_version: u16::from_le_bytes(profile_version),
            data_size,
            checksum: check,
        })
    }
}

/// Classification of a one-byte record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordHeader {
    /// A definition record follows, with the extended developer layout when
    /// flagged.
    Definition { local: u8, developer: bool },
    /// A data record follows.
    Data { local: u8 },
    /// A data record follows, and the header itself advances the rolling
    /// timestamp by a 5-bit offset.
    CompressedData { local: u8, offset: u8 },
}

impl RecordHeader {
    pub fn parse(byte: u8) -> Self {
        bitfield! {
            struct Header(u8) {
                [7] is_compressed,
            }
        }

        if Header(byte).is_compressed() {
            bitfield! {
                struct CompressedHeader(u8) {
                    [0..5] time_offset: u8,
                    [5..7] local_message: u8,
                }
            }

            let header = CompressedHeader(byte);
            Self::CompressedData {
                local: header.local_message(),
                offset: header.time_offset(),
            }
        } else {
            bitfield! {
                struct NormalHeader(u8) {
                    [0..4] local_message: u8,
                    [5] is_developer,
                    [6] is_definition,
                }
            }

            let header = NormalHeader(byte);
            if header.is_definition() {
                Self::Definition {
                    local: header.local_message(),
                    developer: header.is_developer(),
                }
            } else {
                Self::Data {
                    local: header.local_message(),
                }
            }
        }
    }
}
