//! Parameter flash driver for STM32F4
//!
//! The two parameter pages are flash sectors 10 and 11 (128 KiB each) at the
//! top of the 1 MiB array. Boards shipped with the legacy EEPROM emulation
//! layout keep its page at 0x080F_8000, inside page B.
//!
//! Program and erase are interrupt driven: `start_*` sets up the controller
//! with EOPIE/ERRIE and returns, and [`on_flash_interrupt`] reports the
//! outcome through [`FLASH_COMPLETION`].

use embassy_stm32::interrupt::{self, InterruptExt, Priority};
use embassy_stm32::pac;
use embassy_stm32::pac::flash::vals::Psize;
use embassy_stm32::peripherals::FLASH;
use embassy_stm32::Peri;

pub use larus_hal::flash::{FlashError, FlashGeometry, Page};
use larus_hal::{FlashCompletion, FlashController, FlashMemory, ERASED_WORD};

/// Size of one parameter page (one flash sector)
pub const PAGE_SIZE_BYTES: usize = 0x2_0000;
pub const PAGE_WORDS: usize = PAGE_SIZE_BYTES / 4;

/// First byte of page A (sector 10)
pub const PAGE_0_HEAD: usize = 0x080C_0000;
/// First byte of page B (sector 11)
pub const PAGE_1_HEAD: usize = 0x080E_0000;

/// Word offset of the legacy EEPROM emulation page inside page B (0x080F_8000)
pub const LEGACY_OFFSET_WORDS: usize = 0x6000;

/// Flash sector number of each page
pub const PAGE_SECTORS: [u8; 2] = [10, 11];

pub const GEOMETRY: FlashGeometry = FlashGeometry::with_legacy_area(PAGE_WORDS, LEGACY_OFFSET_WORDS);

const _: () = assert!(PAGE_1_HEAD == PAGE_0_HEAD + PAGE_SIZE_BYTES);

const KEY1: u32 = 0x4567_0123;
const KEY2: u32 = 0xCDEF_89AB;

/// Completion of the flash operation in progress, set by the FLASH interrupt
pub static FLASH_COMPLETION: FlashCompletion = FlashCompletion::new();

/// Memory-mapped reads of the parameter pages
#[derive(Debug, Clone, Copy, Default)]
pub struct ParameterFlash;

impl FlashMemory for ParameterFlash {
    fn geometry(&self) -> FlashGeometry {
        GEOMETRY
    }

    #[allow(unsafe_code)]
    fn read_word(&self, offset: usize) -> u32 {
        if GEOMETRY.check(offset).is_err() {
            return ERASED_WORD;
        }
        let address = PAGE_0_HEAD + offset * 4;
        // SAFETY: address is word aligned and inside the always-mapped
        // sectors 10 and 11
        unsafe { core::ptr::read_volatile(address as *const u32) }
    }
}

/// Register-level program/erase controller, owned by the flash writer task
pub struct Stm32FlashController {
    _flash: Peri<'static, FLASH>,
}

impl Stm32FlashController {
    /// Take the FLASH peripheral and enable its interrupt
    ///
    /// The embassy flash driver must not be used alongside this controller.
    #[allow(unsafe_code)]
    pub fn new(flash: Peri<'static, FLASH>) -> Self {
        clear_status();
        interrupt::FLASH.set_priority(Priority::P5);
        // SAFETY: the firmware binds FLASH to `on_flash_interrupt`, which only
        // touches the controller registers and the completion signal
        unsafe { interrupt::FLASH.enable() };
        Self { _flash: flash }
    }
}

impl FlashController for Stm32FlashController {
    fn unlock(&mut self) -> Result<(), FlashError> {
        if pac::FLASH.cr().read().lock() {
            pac::FLASH.keyr().write_value(KEY1);
            pac::FLASH.keyr().write_value(KEY2);
        }
        if pac::FLASH.cr().read().lock() {
            return Err(FlashError::Locked);
        }
        Ok(())
    }

    fn lock(&mut self) -> Result<(), FlashError> {
        pac::FLASH.cr().modify(|w| w.set_lock(true));
        if pac::FLASH.cr().read().lock() {
            Ok(())
        } else {
            Err(FlashError::Locked)
        }
    }

    #[allow(unsafe_code)]
    fn start_program(&mut self, offset: usize, value: u32) -> Result<(), FlashError> {
        GEOMETRY.check(offset)?;
        if pac::FLASH.sr().read().bsy() {
            return Err(FlashError::ProgramFailed);
        }
        clear_status();
        pac::FLASH.cr().write(|w| {
            w.set_pg(true);
            w.set_psize(Psize::PSIZE32);
            w.set_eopie(true);
            w.set_errie(true);
        });
        let address = PAGE_0_HEAD + offset * 4;
        // SAFETY: bounds checked above; PG is set so the write programs the
        // word instead of faulting
        unsafe { core::ptr::write_volatile(address as *mut u32, value) };
        cortex_m::asm::dsb();
        Ok(())
    }

    fn start_erase(&mut self, page: Page) -> Result<(), FlashError> {
        if pac::FLASH.sr().read().bsy() {
            return Err(FlashError::EraseFailed);
        }
        clear_status();
        pac::FLASH.cr().write(|w| {
            w.set_ser(true);
            w.set_snb(PAGE_SECTORS[page.index()]);
            w.set_psize(Psize::PSIZE32);
            w.set_eopie(true);
            w.set_errie(true);
        });
        pac::FLASH.cr().modify(|w| w.set_strt(true));
        Ok(())
    }
}

/// FLASH interrupt body
///
/// Call from the firmware's FLASH vector. Signals [`FLASH_COMPLETION`] once
/// per finished operation.
pub fn on_flash_interrupt() {
    let sr = pac::FLASH.sr().read();
    let cr = pac::FLASH.cr().read();
    let failed = sr.wrperr() || sr.pgaerr() || sr.pgperr() || sr.pgserr();
    if !failed && !sr.eop() {
        return;
    }

    clear_status();
    pac::FLASH.cr().modify(|w| {
        w.set_pg(false);
        w.set_ser(false);
        w.set_eopie(false);
        w.set_errie(false);
    });
    if cr.ser() {
        // Stale lines of the erased sector would otherwise still read back
        flush_data_cache();
    }

    let result = match (failed, cr.pg()) {
        (false, _) => Ok(()),
        (true, true) => Err(FlashError::ProgramFailed),
        (true, false) => Err(FlashError::EraseFailed),
    };
    FLASH_COMPLETION.signal(result);
}

fn clear_status() {
    pac::FLASH.sr().write(|w| {
        w.set_eop(true);
        w.set_wrperr(true);
        w.set_pgaerr(true);
        w.set_pgperr(true);
        w.set_pgserr(true);
    });
}

fn flush_data_cache() {
    let enabled = pac::FLASH.acr().read().dcen();
    pac::FLASH.acr().modify(|w| w.set_dcen(false));
    pac::FLASH.acr().modify(|w| w.set_dcrst(true));
    pac::FLASH.acr().modify(|w| w.set_dcrst(false));
    if enabled {
        pac::FLASH.acr().modify(|w| w.set_dcen(true));
    }
}
