//! Board-agnostic non-volatile storage core for the Larus flight sensor
//!
//! Everything here runs on the host as well as on the target; hardware is
//! reached only through the `larus-hal` traits.
//!
//! ```text
//!  config_access ──► param_store ──► flash_writer ──► FlashController
//!                        │  ▲              (single writer task)
//!                        │  └── params (table, defaults, legacy encodings)
//!                        └───── codec::record
//!
//!  acquisition ──► ring_log ──► LogFlusher ──► LogMedia
//!                     └──────── codec::log_record
//! ```
//!
//! - [`codec`]: flash record and log record encodings
//! - [`flash_writer`]: serialized program/erase queue and its writer task
//! - [`param_store`]: two-page log-structured parameter store with recovery
//! - [`params`]: the persistent parameter table
//! - [`config_access`]: parameter get/set boundary for bus requests
//! - [`ring_log`]: double-buffered telemetry log

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]

mod logging;

pub mod codec;
pub mod config_access;
pub mod flash_writer;
pub mod param_store;
pub mod params;
pub mod ring_log;

#[cfg(test)]
mod sim;

pub use flash_writer::{FlashTimeouts, FlashWriteQueue, FlashWriter, WriteOrder};
pub use param_store::{BootOutcome, ParameterStore, StoreError};
pub use params::ParameterId;
pub use ring_log::{LogError, LogFlusher, RingLog};
