//! Larus Hardware Abstraction Layer
//!
//! This crate defines the hardware abstraction traits used by the storage
//! core. Chip-specific HALs implement them so the same parameter store and
//! log writer run on the sensor board and in host tests.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  larus-storage (store, log, writer)     │
//! └─────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────┐
//! │  larus-hal (this crate - traits)        │
//! └─────────────────────────────────────────┘
//!                     │
//!         ┌───────────┴───────────┐
//!         ▼                       ▼
//! ┌───────────────┐       ┌───────────────┐
//! │  larus-hal-   │       │   simulated   │
//! │    stm32f4    │       │  flash (host) │
//! └───────────────┘       └───────────────┘
//! ```
//!
//! # Traits
//!
//! - [`flash::FlashMemory`] - Memory-mapped reads of the parameter pages
//! - [`flash::FlashController`] - Program/erase, completion by interrupt
//! - [`media::LogMedia`] - Removable media for telemetry logs

#![no_std]
#![deny(unsafe_code)]

pub mod flash;
pub mod media;

// Re-export key traits at crate root for convenience
pub use flash::{
    FlashCompletion, FlashController, FlashError, FlashGeometry, FlashMemory, Page, ERASED_WORD,
};
pub use media::LogMedia;
