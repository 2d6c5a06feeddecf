//! Flash storage abstractions
//!
//! The parameter store lives in two raw, independently erasable flash pages.
//! Reads go straight to memory-mapped flash ([`FlashMemory`]); programming and
//! erasing is only ever done by the flash writer task through a
//! [`FlashController`], which reports completion from the flash interrupt via
//! a [`FlashCompletion`] signal.
//!
//! All addresses in this module are word offsets relative to the start of
//! page 0, so page boundaries are described by a [`FlashGeometry`] instead of
//! absolute addresses.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;

/// Content of an erased flash word
pub const ERASED_WORD: u32 = 0xFFFF_FFFF;

/// One of the two parameter pages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Page {
    /// Page 0 (lower flash sector)
    A = 0,
    /// Page 1 (upper flash sector)
    B = 1,
}

impl Page {
    /// Both pages, in index order
    pub const ALL: [Page; 2] = [Page::A, Page::B];

    /// Get the page index (0 or 1)
    pub fn index(self) -> usize {
        self as usize
    }

    /// The page that is not `self`
    pub fn other(self) -> Self {
        match self {
            Page::A => Page::B,
            Page::B => Page::A,
        }
    }
}

/// Size and layout of the two-page parameter region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FlashGeometry {
    /// Size of one page in 32-bit words
    pub page_words: usize,
    /// Word offset inside page B where a legacy EEPROM emulation page starts
    ///
    /// `None` when the board never shipped the legacy layout.
    pub legacy_offset: Option<usize>,
}

impl FlashGeometry {
    /// Create a geometry without a legacy area
    pub const fn new(page_words: usize) -> Self {
        Self {
            page_words,
            legacy_offset: None,
        }
    }

    /// Create a geometry with a legacy EEPROM emulation area inside page B
    pub const fn with_legacy_area(page_words: usize, legacy_offset: usize) -> Self {
        Self {
            page_words,
            legacy_offset: Some(legacy_offset),
        }
    }

    /// Total size of both pages in words
    pub const fn total_words(&self) -> usize {
        self.page_words * 2
    }

    /// Word offset of the first word of `page`
    pub fn page_base(&self, page: Page) -> usize {
        page.index() * self.page_words
    }

    /// Check that a word offset lies inside the region
    pub fn check(&self, offset: usize) -> Result<usize, FlashError> {
        if offset < self.total_words() {
            Ok(offset)
        } else {
            Err(FlashError::OutOfBounds)
        }
    }
}

/// Errors from flash hardware and the flash writer
///
/// Every variant is fatal for the storage subsystem: the flash state is
/// unknown afterwards and the firmware is expected to halt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlashError {
    /// Word offset outside the parameter region
    OutOfBounds,
    /// Unlocking or relocking the flash controller failed
    Locked,
    /// The controller reported a programming error
    ProgramFailed,
    /// The controller reported an erase error
    EraseFailed,
    /// Flash content does not match the completed operation
    VerifyFailed,
    /// Completion or queue wait timed out
    Timeout,
    /// The flash writer task stopped after a fatal error
    WriterFault,
}

/// Interrupt-to-task completion signal for one flash operation
///
/// Set exactly once per started program/erase, from the flash interrupt
/// handler, carrying the status the hardware reported.
pub type FlashCompletion = Signal<CriticalSectionRawMutex, Result<(), FlashError>>;

/// Read access to the memory-mapped parameter region
///
/// Word reads are assumed to be atomic.
pub trait FlashMemory {
    /// Layout of the region
    fn geometry(&self) -> FlashGeometry;

    /// Read one word at a word offset
    ///
    /// Offsets outside the region read as erased; callers bounds-check with
    /// [`FlashGeometry::check`] where it matters.
    fn read_word(&self, offset: usize) -> u32;

    /// Check whether every word of `page` is erased
    fn is_erased(&self, page: Page) -> bool {
        let geometry = self.geometry();
        let base = geometry.page_base(page);
        (base..base + geometry.page_words).all(|offset| self.read_word(offset) == ERASED_WORD)
    }
}

/// Privileged program/erase access to the flash controller
///
/// Only the flash writer task owns an implementation. `start_*` kicks off a
/// single operation and returns immediately; the implementation signals its
/// [`FlashCompletion`] when the hardware is done.
pub trait FlashController {
    /// Unlock the controller for one operation
    fn unlock(&mut self) -> Result<(), FlashError>;

    /// Lock the controller again
    fn lock(&mut self) -> Result<(), FlashError>;

    /// Start programming one word at a word offset
    fn start_program(&mut self, offset: usize, value: u32) -> Result<(), FlashError>;

    /// Start erasing a page
    fn start_erase(&mut self, page: Page) -> Result<(), FlashError>;
}
