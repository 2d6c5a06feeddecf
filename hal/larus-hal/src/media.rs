//! Removable log media abstraction
//!
//! The ring log flush task streams completed buffer halves to a file on
//! removable storage (the uSD card on the sensor board).

use embedded_io_async::Write;

/// Output file on removable media
///
/// Writes go through [`embedded_io_async::Write`]; a short write count means
/// the media is full or was removed.
pub trait LogMedia: Write {
    /// Create (or truncate) the named file and make it the write target
    fn create(&mut self, name: &str) -> impl core::future::Future<Output = Result<(), Self::Error>>;

    /// Flush and close the current file
    fn close(&mut self) -> impl core::future::Future<Output = Result<(), Self::Error>>;
}
