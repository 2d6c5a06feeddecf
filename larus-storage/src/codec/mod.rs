//! Record encodings
//!
//! - [`record`]: records and page headers of the parameter flash pages
//! - [`log_record`]: envelopes of the telemetry log stream
//!
//! Both are pure functions over words; nothing here touches hardware.

pub mod log_record;
pub mod record;

pub use log_record::{
    encode_log_header, CodecError, LogRecord, LogRecordReader, LogRecordType, LOG_FORMAT_VERSION,
    LOG_HEADER_WORDS,
};
pub use record::{
    generation_is_newer, page_header, record_marker, PageMarker, RecordHeader, MAX_PAYLOAD_WORDS,
    PAGE_HEADER_WORDS, RECORD_OVERHEAD_WORDS, RESERVED_ID,
};
