//! On-flash record encoding
//!
//! Page layout:
//! ```text
//! word 0       page header: validity marker (low half) | generation (high half)
//! word 1..     records, back to back
//! cursor..end  erased (0xFFFF_FFFF)
//! ```
//!
//! Record layout:
//! ```text
//! ┌──────────────────────┬─────────────────┬──────────────┐
//! │ HEADER               │ PAYLOAD         │ MARKER       │
//! │ id | length << 16    │ length words    │ CRC-32       │
//! └──────────────────────┴─────────────────┴──────────────┘
//! ```
//!
//! The marker is programmed last, so a record cut short by a power loss
//! never verifies.

use crc::{Crc, CRC_32_MPEG_2};
use larus_hal::ERASED_WORD;

/// Words used by a record besides its payload (header + marker)
pub const RECORD_OVERHEAD_WORDS: usize = 2;

/// Largest payload a single record may carry
pub const MAX_PAYLOAD_WORDS: usize = 64;

/// Words reserved for the page header
pub const PAGE_HEADER_WORDS: usize = 1;

/// Record id that can never be written (reads as erased)
pub const RESERVED_ID: u16 = 0xFFFF;

/// Page header validity marker for a page in use
const VALID_MARKER: u16 = 0x0000;

/// Page header validity marker of erased flash
const ERASED_MARKER: u16 = 0xFFFF;

static RECORD_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_MPEG_2);

/// Decoded record header word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RecordHeader {
    /// Parameter id
    pub id: u16,
    /// Payload length in words (never 0)
    pub length_words: u16,
}

impl RecordHeader {
    /// Create a header, checking id and length limits
    pub fn new(id: u16, length_words: usize) -> Option<Self> {
        if id == RESERVED_ID || length_words == 0 || length_words > MAX_PAYLOAD_WORDS {
            return None;
        }
        Some(Self {
            id,
            length_words: length_words as u16,
        })
    }

    /// Encode into a header word
    pub const fn encode(&self) -> u32 {
        self.id as u32 | (self.length_words as u32) << 16
    }

    /// Decode a header word
    ///
    /// Returns `None` for erased flash and for words that cannot be a
    /// record header (reserved id, zero or oversized length).
    pub fn decode(word: u32) -> Option<Self> {
        if word == ERASED_WORD {
            return None;
        }
        Self::new(word as u16, (word >> 16) as usize)
    }

    /// Payload length in words
    pub const fn payload_words(&self) -> usize {
        self.length_words as usize
    }

    /// Size of the whole record in words
    pub const fn total_words(&self) -> usize {
        self.length_words as usize + RECORD_OVERHEAD_WORDS
    }
}

/// Compute the validity marker of a record
pub fn record_marker(header: u32, payload: impl IntoIterator<Item = u32>) -> u32 {
    let mut digest = RECORD_CRC.digest();
    digest.update(&header.to_le_bytes());
    for word in payload {
        digest.update(&word.to_le_bytes());
    }
    digest.finalize()
}

/// State of a page as read from its header word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PageMarker {
    /// Page in use, with its compaction generation
    Valid { generation: u16 },
    /// Header word erased
    Erased,
    /// Anything else (half-erased, uncommitted, or foreign data)
    Invalid,
}

impl PageMarker {
    /// Classify a page header word
    pub fn classify(word: u32) -> Self {
        match word as u16 {
            VALID_MARKER => PageMarker::Valid {
                generation: (word >> 16) as u16,
            },
            ERASED_MARKER if word == ERASED_WORD => PageMarker::Erased,
            _ => PageMarker::Invalid,
        }
    }
}

/// Encode the header word that marks a page valid
pub const fn page_header(generation: u16) -> u32 {
    (generation as u32) << 16 | VALID_MARKER as u32
}

/// Check whether generation `a` is newer than `b`, allowing for wrap-around
pub fn generation_is_newer(a: u16, b: u16) -> bool {
    (a.wrapping_sub(b) as i16) > 0
}
