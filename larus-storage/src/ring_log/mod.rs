//! Double-buffered telemetry log
//!
//! The acquisition loop appends records into a byte ring split in two
//! halves. When a half fills up it is handed to the flush task, which
//! streams it to removable media while the producer keeps filling the other
//! half.
//!
//! ```text
//!   append_record (100 Hz, never waits)          flush task
//!          │                                          ▲
//!          ▼                                          │ notify
//!  ┌─────────────────────┬─────────────────────┐      │
//!  │ low half            │ high half           │ ─────┘
//!  │ pending flush       │ filling ▶           │ ──► LogMedia
//!  └─────────────────────┴─────────────────────┘
//! ```
//!
//! Records may straddle the midpoint or wrap around the physical end. The
//! producer never enters a half still pending flush: such an append is an
//! overrun and writes nothing.

mod flusher;
mod naming;

pub use flusher::LogFlusher;
pub use naming::{log_file_name, LogFileName, LogTimestamp};

use core::cell::Cell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::mutex::{Mutex, MutexGuard};
use embassy_sync::signal::Signal;

use crate::codec::{encode_log_header, LogRecordType, LOG_HEADER_WORDS};
use crate::logging::log_error;

/// Bytes per buffer half in the firmware (4 KiB in total)
pub const LOG_HALF_BYTES: usize = 2048;

/// Ring log errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LogError {
    /// The producer caught up with a half still pending flush
    Overrun,
    /// Record does not fit in one buffer half
    RecordTooLarge,
    /// No log file open
    NotOpen,
    /// Media accepted fewer bytes than offered
    ShortWrite,
    /// Media reported an error
    Media,
    /// Generated file name exceeds its buffer
    NameTooLong,
}

impl LogError {
    /// Errors the firmware cannot continue from
    pub fn is_fatal(&self) -> bool {
        matches!(self, LogError::Overrun)
    }
}

/// Wakes the flush task when a half is ready
pub trait FlushNotify {
    fn notify(&self);
}

impl FlushNotify for Signal<CriticalSectionRawMutex, ()> {
    fn notify(&self) {
        self.signal(());
    }
}

/// Snapshot of the buffer bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LogStatus {
    pub open: bool,
    /// Half the producer is filling (0 = low, 1 = high)
    pub filling: usize,
    /// Halves waiting for the flush task
    pub pending: [bool; 2],
    /// Next write position, in bytes from the buffer start
    pub position: usize,
}

impl LogStatus {
    const CLOSED: Self = Self {
        open: false,
        filling: 0,
        pending: [false, false],
        position: 0,
    };
}

/// Shared ring buffer between the producer and the flush task
pub struct RingLog<N: FlushNotify, const HALF_BYTES: usize> {
    halves: [Mutex<CriticalSectionRawMutex, [u8; HALF_BYTES]>; 2],
    status: BlockingMutex<CriticalSectionRawMutex, Cell<LogStatus>>,
    notify: N,
}

type HalfGuard<'a, const HALF_BYTES: usize> =
    MutexGuard<'a, CriticalSectionRawMutex, [u8; HALF_BYTES]>;

impl<N: FlushNotify, const HALF_BYTES: usize> RingLog<N, HALF_BYTES> {
    const BUFFER_BYTES: usize = 2 * HALF_BYTES;

    /// Create a closed log
    pub const fn new(notify: N) -> Self {
        assert!(HALF_BYTES > 0 && HALF_BYTES % 4 == 0);
        Self {
            halves: [Mutex::new([0; HALF_BYTES]), Mutex::new([0; HALF_BYTES])],
            status: BlockingMutex::new(Cell::new(LogStatus::CLOSED)),
            notify,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status().open
    }

    pub fn status(&self) -> LogStatus {
        self.status.lock(Cell::get)
    }

    /// Append one record; never waits
    ///
    /// A silent no-op while no file is open. When the record fills the
    /// current half, that half is queued for flushing and the flush task is
    /// notified after the write.
    pub fn append_record(&self, record_type: LogRecordType, payload: &[u32]) -> Result<(), LogError> {
        let status = self.status();
        if !status.open {
            return Ok(());
        }
        let bytes = (LOG_HEADER_WORDS + payload.len()) * 4;
        if bytes > HALF_BYTES {
            return Err(LogError::RecordTooLarge);
        }

        let start = status.position;
        let boundary = (status.filling + 1) * HALF_BYTES;
        let end = start + bytes;
        let reaches_boundary = end >= boundary;
        let next = 1 - status.filling;

        if status.pending[status.filling] || (reaches_boundary && status.pending[next]) {
            log_error!("log overrun at byte {}", start);
            return Err(LogError::Overrun);
        }

        {
            let mut guards: [Option<HalfGuard<'_, HALF_BYTES>>; 2] = [None, None];
            guards[status.filling] = Some(self.try_lock_half(status.filling)?);
            if end > boundary {
                guards[next] = Some(self.try_lock_half(next)?);
            }

            let header = encode_log_header(record_type, payload);
            let mut at = start;
            for word in header.iter().chain(payload) {
                let half = at / HALF_BYTES;
                let offset = at % HALF_BYTES;
                if let Some(guard) = guards[half].as_mut() {
                    guard[offset..offset + 4].copy_from_slice(&word.to_le_bytes());
                }
                at = (at + 4) % Self::BUFFER_BYTES;
            }
        }

        self.status.lock(|cell| {
            let mut status = cell.get();
            status.position = end % Self::BUFFER_BYTES;
            if reaches_boundary {
                status.pending[status.filling] = true;
                status.filling = next;
            }
            cell.set(status);
        });

        if reaches_boundary {
            self.notify.notify();
        }
        Ok(())
    }

    fn try_lock_half(&self, half: usize) -> Result<HalfGuard<'_, HALF_BYTES>, LogError> {
        self.halves[half].try_lock().map_err(|_| {
            log_error!("log half {} busy", half);
            LogError::Overrun
        })
    }

    fn update(&self, f: impl FnOnce(&mut LogStatus)) {
        self.status.lock(|cell| {
            let mut status = cell.get();
            f(&mut status);
            cell.set(status);
        });
    }

    /// Start a new file at the beginning of the buffer
    fn reset_open(&self) {
        self.update(|status| {
            *status = LogStatus {
                open: true,
                ..LogStatus::CLOSED
            }
        });
    }

    fn set_closed(&self) {
        self.update(|status| status.open = false);
    }

    /// Pending half to flush first
    ///
    /// The half after the one being filled is the older one.
    fn oldest_pending(&self) -> Option<usize> {
        let status = self.status();
        let older = 1 - status.filling;
        [older, status.filling]
            .into_iter()
            .find(|half| status.pending[*half])
    }

    fn clear_pending(&self, half: usize) {
        self.update(|status| status.pending[half] = false);
    }

    /// Bytes written into the half being filled
    fn partial_len(&self) -> (usize, usize) {
        let status = self.status();
        (status.filling, status.position - status.filling * HALF_BYTES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::LogRecordReader;

    const HALF: usize = 64;

    #[derive(Default)]
    struct CountingNotify(core::cell::Cell<u32>);

    impl FlushNotify for CountingNotify {
        fn notify(&self) {
            self.0.set(self.0.get() + 1);
        }
    }

    fn open_log() -> RingLog<CountingNotify, HALF> {
        let log = RingLog::new(CountingNotify::default());
        log.reset_open();
        log
    }

    fn half_bytes(log: &RingLog<CountingNotify, HALF>, half: usize) -> Vec<u8> {
        log.halves[half].try_lock().unwrap().to_vec()
    }

    #[test]
    fn test_append_while_closed_is_noop() {
        let log = RingLog::<CountingNotify, HALF>::new(CountingNotify::default());
        assert_eq!(log.append_record(LogRecordType::SensorSample, &[1, 2]), Ok(()));
        assert_eq!(log.status(), LogStatus::CLOSED);
    }

    #[test]
    fn test_exact_fill_flips_once() {
        let log = open_log();
        // 4 records of 4 words fill one 64 byte half exactly
        for index in 0..4 {
            log.append_record(LogRecordType::SensorSample, &[index, index]).unwrap();
            let expected = if index == 3 { 1 } else { 0 };
            assert_eq!(log.notify.0.get(), expected);
        }

        let status = log.status();
        assert_eq!(status.filling, 1);
        assert_eq!(status.pending, [true, false]);
        assert_eq!(status.position, HALF);

        let bytes = half_bytes(&log, 0);
        let records: Vec<_> = LogRecordReader::new(&bytes).collect::<Result<_, _>>().unwrap();
        assert_eq!(records.len(), 4);
        assert_eq!(records[3].words().collect::<Vec<_>>(), vec![3, 3]);
    }

    #[test]
    fn test_record_straddles_midpoint() {
        let log = open_log();
        // 3 records of 5 words = 60 bytes, the fourth crosses into the high half
        for _ in 0..4 {
            log.append_record(LogRecordType::GnssFix, &[7, 8, 9]).unwrap();
        }
        let status = log.status();
        assert_eq!(status.filling, 1);
        assert_eq!(status.position, 80);
        assert_eq!(log.notify.0.get(), 1);

        let mut stream = half_bytes(&log, 0);
        stream.extend(&half_bytes(&log, 1)[..16]);
        assert_eq!(LogRecordReader::new(&stream).count(), 4);
        assert!(LogRecordReader::new(&stream).all(|record| record.is_ok()));
    }

    #[test]
    fn test_overrun_never_overwrites() {
        let log = open_log();
        for _ in 0..4 {
            log.append_record(LogRecordType::SensorSample, &[1, 1]).unwrap();
        }
        let flushed_half = half_bytes(&log, 0);

        // Fill the high half up to its last record; the flush task is stalled
        for _ in 0..3 {
            log.append_record(LogRecordType::SensorSample, &[2, 2]).unwrap();
        }
        let before = log.status();
        assert_eq!(
            log.append_record(LogRecordType::SensorSample, &[3, 3]),
            Err(LogError::Overrun)
        );
        assert!(LogError::Overrun.is_fatal());
        assert_eq!(log.status(), before);
        assert_eq!(half_bytes(&log, 0), flushed_half);
        assert_eq!(log.notify.0.get(), 1);
    }

    #[test]
    fn test_record_larger_than_half_rejected() {
        let log = open_log();
        let payload = [0u32; HALF / 4 - 1];
        assert_eq!(
            log.append_record(LogRecordType::ParameterSnapshot, &payload),
            Err(LogError::RecordTooLarge)
        );
        // Exactly one half is fine
        let payload = [0u32; HALF / 4 - LOG_HEADER_WORDS];
        assert_eq!(log.append_record(LogRecordType::ParameterSnapshot, &payload), Ok(()));
        assert_eq!(log.status().pending, [true, false]);
    }

    #[test]
    fn test_signal_notify() {
        let signal = Signal::<CriticalSectionRawMutex, ()>::new();
        signal.notify();
        assert!(signal.signaled());
    }
}
