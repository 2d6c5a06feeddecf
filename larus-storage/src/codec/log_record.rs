//! Telemetry log record framing
//!
//! Every log record is a sequence of little-endian 32-bit words:
//!
//! ```text
//! ┌───────────────────────────┬──────────────┬──────────────────────┐
//! │ type (u16) | crc16 << 16  │ word_count   │ payload              │
//! │ word 0                    │ word 1       │ word_count words     │
//! └───────────────────────────┴──────────────┴──────────────────────┘
//! ```
//!
//! The CRC-16 covers the word count and the payload. Readers that only care
//! about framing can walk the stream using type and word count alone.

use crc::{Crc, CRC_16_IBM_3740};
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Envelope size in words
pub const LOG_HEADER_WORDS: usize = 2;

/// Version carried by the `FormatVersion` record at the start of every file
pub const LOG_FORMAT_VERSION: u32 = 1;

static LOG_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// Kind of a telemetry log record
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum LogRecordType {
    FormatVersion = 1,
    ParameterSnapshot = 2,
    GnssFix = 3,
    GnssHeadingFix = 4,
    SensorSample = 5,
    SensorStatus = 6,
    Magnetometer = 7,
}

/// Errors while decoding a log byte stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CodecError {
    /// Stream ends inside a record
    Truncated,
    /// Type field is not a known record type
    UnknownType(u16),
    /// CRC-16 does not match the word count and payload
    ChecksumMismatch,
}

fn checksum(word_count: u32, payload: impl IntoIterator<Item = u32>) -> u16 {
    let mut digest = LOG_CRC.digest();
    digest.update(&word_count.to_le_bytes());
    for word in payload {
        digest.update(&word.to_le_bytes());
    }
    digest.finalize()
}

/// Build the two envelope words for a record
pub fn encode_log_header(record_type: LogRecordType, payload: &[u32]) -> [u32; LOG_HEADER_WORDS] {
    let word_count = payload.len() as u32;
    let crc = checksum(word_count, payload.iter().copied());
    [u16::from(record_type) as u32 | (crc as u32) << 16, word_count]
}

/// One decoded record, borrowing its payload from the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogRecord<'a> {
    pub record_type: LogRecordType,
    payload: &'a [u8],
}

impl<'a> LogRecord<'a> {
    /// Number of payload words
    pub fn word_count(&self) -> usize {
        self.payload.len() / 4
    }

    /// Payload words in stream order
    pub fn words(&self) -> impl Iterator<Item = u32> + 'a {
        self.payload
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
    }
}

/// Iterator over the records of a concatenated log byte stream
///
/// Stops after the first error, since framing cannot be trusted past it.
pub struct LogRecordReader<'a> {
    bytes: &'a [u8],
}

impl<'a> LogRecordReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    fn word_at(&self, index: usize) -> u32 {
        let at = index * 4;
        u32::from_le_bytes([
            self.bytes[at],
            self.bytes[at + 1],
            self.bytes[at + 2],
            self.bytes[at + 3],
        ])
    }

    fn next_record(&mut self) -> Result<LogRecord<'a>, CodecError> {
        let header_bytes = LOG_HEADER_WORDS * 4;
        if self.bytes.len() < header_bytes {
            return Err(CodecError::Truncated);
        }
        let header = self.word_at(0);
        let word_count = self.word_at(1);

        let payload_bytes = (word_count as usize)
            .checked_mul(4)
            .ok_or(CodecError::Truncated)?;
        let end = header_bytes
            .checked_add(payload_bytes)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(CodecError::Truncated)?;

        let bytes = self.bytes;
        let payload = &bytes[header_bytes..end];
        let record = LogRecord {
            record_type: LogRecordType::try_from(header as u16)
                .map_err(|_| CodecError::UnknownType(header as u16))?,
            payload,
        };
        if checksum(word_count, record.words()) != (header >> 16) as u16 {
            return Err(CodecError::ChecksumMismatch);
        }

        self.bytes = &bytes[end..];
        Ok(record)
    }
}

impl<'a> Iterator for LogRecordReader<'a> {
    type Item = Result<LogRecord<'a>, CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.bytes.is_empty() {
            return None;
        }
        let result = self.next_record();
        if result.is_err() {
            self.bytes = &[];
        }
        Some(result)
    }
}
