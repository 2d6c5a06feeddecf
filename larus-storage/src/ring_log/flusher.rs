//! Flush side of the ring log

use embassy_futures::select::select;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Timer};

use larus_hal::LogMedia;

use super::{FlushNotify, LogError, RingLog};
use crate::logging::{log_debug, log_info, log_warn};

/// Delay before a failed flush is retried while a half stays pending
pub const FLUSH_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Owns the log media and drains completed halves into it
pub struct LogFlusher<'a, N: FlushNotify, W: LogMedia, const HALF_BYTES: usize> {
    log: &'a RingLog<N, HALF_BYTES>,
    media: W,
    /// A close failed part way and may be retried
    closing: bool,
    /// The partly filled half of the current close is on the media
    partial_written: bool,
}

impl<'a, N: FlushNotify, W: LogMedia, const HALF_BYTES: usize> LogFlusher<'a, N, W, HALF_BYTES> {
    pub fn new(log: &'a RingLog<N, HALF_BYTES>, media: W) -> Self {
        Self {
            log,
            media,
            closing: false,
            partial_written: false,
        }
    }

    pub fn media(&self) -> &W {
        &self.media
    }

    pub fn media_mut(&mut self) -> &mut W {
        &mut self.media
    }

    /// Create the output file and start logging into the low half
    pub async fn open(&mut self, name: &str) -> Result<(), LogError> {
        self.media.create(name).await.map_err(|_| LogError::Media)?;
        self.closing = false;
        self.partial_written = false;
        self.log.reset_open();
        log_info!("log file {} open", name);
        Ok(())
    }

    /// Write every pending half to the media, oldest first
    ///
    /// Returns the number of bytes written. On failure the half stays
    /// pending so a later call retries it.
    pub async fn flush_buffer(&mut self) -> Result<usize, LogError> {
        let mut flushed = 0;
        while let Some(half) = self.log.oldest_pending() {
            self.write_half(half, HALF_BYTES).await?;
            self.log.clear_pending(half);
            flushed += HALF_BYTES;
        }
        if flushed > 0 {
            log_debug!("flushed {} log bytes", flushed);
        }
        Ok(flushed)
    }

    /// Flush everything, including the partly filled half, and close the file
    ///
    /// Appends are dropped from the moment the close starts. A close that
    /// fails on the media can be called again and resumes where it stopped.
    pub async fn close(&mut self) -> Result<(), LogError> {
        if !self.log.is_open() && !self.closing {
            return Err(LogError::NotOpen);
        }
        self.log.set_closed();
        self.closing = true;

        self.flush_buffer().await?;
        if !self.partial_written {
            let (half, len) = self.log.partial_len();
            if len > 0 {
                self.write_half(half, len).await?;
            }
            self.partial_written = true;
        }
        self.media.close().await.map_err(|_| LogError::Media)?;

        self.closing = false;
        self.partial_written = false;
        log_info!("log file closed");
        Ok(())
    }

    /// Flush task body: flush whenever the producer signals a full half
    ///
    /// A failed flush is logged and retried every [`FLUSH_RETRY_INTERVAL`]
    /// for as long as a half is pending, as well as on the next wake.
    pub async fn run(&mut self, wake: &Signal<CriticalSectionRawMutex, ()>) {
        loop {
            if self.log.oldest_pending().is_some() {
                select(wake.wait(), Timer::after(FLUSH_RETRY_INTERVAL)).await;
            } else {
                wake.wait().await;
            }
            if let Err(error) = self.flush_buffer().await {
                log_warn!("log flush failed: {:?}", error);
            }
        }
    }

    async fn write_half(&mut self, half: usize, len: usize) -> Result<(), LogError> {
        let guard = self.log.halves[half].lock().await;
        let written = self
            .media
            .write(&guard[..len])
            .await
            .map_err(|_| LogError::Media)?;
        drop(guard);

        if written != len {
            return Err(LogError::ShortWrite);
        }
        Ok(())
    }
}
