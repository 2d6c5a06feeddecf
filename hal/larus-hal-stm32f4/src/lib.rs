//! STM32F4-specific HAL for the Larus storage core
//!
//! Implements the `larus-hal` flash traits on the two 128 KiB top sectors of
//! the STM32F405/407 flash. Both chips share the same sector map.
//!
//! # Features
//!
//! - `stm32f405rg` - Enable support for STM32F405RG (sensor board MCU)
//! - `stm32f407vg` - Enable support for STM32F407VG (development boards)
//! - `defmt` - Enable debug formatting support
//!
//! # Usage
//!
//! The firmware owns the FLASH interrupt vector and forwards it to
//! [`flash::on_flash_interrupt`]; the flash writer task gets a
//! [`flash::Stm32FlashController`] and every reader a [`flash::ParameterFlash`].

#![no_std]
#![deny(unsafe_code)]

pub mod flash;

// Re-export shared types from larus-hal
pub use larus_hal::{FlashCompletion, FlashError, FlashGeometry, Page};
