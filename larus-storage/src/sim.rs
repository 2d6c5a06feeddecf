//! Simulated hardware for host tests
//!
//! [`SimFlash`] behaves like NOR flash: programming can only clear bits,
//! erasing sets a whole page to ones. [`SimController`] completes every
//! operation synchronously by signalling the completion, the way the FLASH
//! interrupt does on hardware. [`MemoryMedia`] collects log files in memory.

use core::cell::{Cell, RefCell};
use core::future::Future;

use embassy_futures::block_on;
use embassy_futures::select::{select, Either};

use embedded_io_async::{ErrorKind, ErrorType, Write};
use larus_hal::{
    FlashCompletion, FlashController, FlashError, FlashGeometry, FlashMemory, LogMedia, Page,
    ERASED_WORD,
};

use crate::flash_writer::{FlashWriteQueue, FlashWriter};

pub struct SimFlash {
    geometry: FlashGeometry,
    words: RefCell<Vec<u32>>,
    erase_counts: [Cell<u32>; 2],
    /// Operations left before the simulated power cut, if armed
    power_budget: Cell<Option<usize>>,
}

impl SimFlash {
    pub fn new(page_words: usize) -> Self {
        Self::with_geometry(FlashGeometry::new(page_words))
    }

    pub fn with_geometry(geometry: FlashGeometry) -> Self {
        Self {
            geometry,
            words: RefCell::new(vec![ERASED_WORD; geometry.total_words()]),
            erase_counts: [Cell::new(0), Cell::new(0)],
            power_budget: Cell::new(None),
        }
    }

    pub fn word(&self, offset: usize) -> u32 {
        self.words.borrow()[offset]
    }

    /// Overwrite a word directly, bypassing NOR semantics
    pub fn poke(&self, offset: usize, value: u32) {
        self.words.borrow_mut()[offset] = value;
    }

    pub fn erase_count(&self, page: Page) -> u32 {
        self.erase_counts[page.index()].get()
    }

    /// Let `operations` more program/erase operations through, then fail all
    pub fn cut_power_after(&self, operations: usize) {
        self.power_budget.set(Some(operations));
    }

    pub fn restore_power(&self) {
        self.power_budget.set(None);
    }

    fn consume_power(&self) -> bool {
        match self.power_budget.get() {
            None => true,
            Some(0) => false,
            Some(left) => {
                self.power_budget.set(Some(left - 1));
                true
            }
        }
    }

    fn program(&self, offset: usize, value: u32) -> Result<(), FlashError> {
        if !self.consume_power() {
            return Err(FlashError::ProgramFailed);
        }
        let mut words = self.words.borrow_mut();
        let word = words.get_mut(offset).ok_or(FlashError::OutOfBounds)?;
        *word &= value;
        Ok(())
    }

    fn erase(&self, page: Page) -> Result<(), FlashError> {
        if !self.consume_power() {
            return Err(FlashError::EraseFailed);
        }
        let base = self.geometry.page_base(page);
        self.words.borrow_mut()[base..base + self.geometry.page_words].fill(ERASED_WORD);
        let count = &self.erase_counts[page.index()];
        count.set(count.get() + 1);
        Ok(())
    }
}

impl FlashMemory for SimFlash {
    fn geometry(&self) -> FlashGeometry {
        self.geometry
    }

    fn read_word(&self, offset: usize) -> u32 {
        self.words
            .borrow()
            .get(offset)
            .copied()
            .unwrap_or(ERASED_WORD)
    }
}

pub struct SimController<'a> {
    flash: &'a SimFlash,
    completion: &'a FlashCompletion,
    unlocked: bool,
}

impl<'a> SimController<'a> {
    pub fn new(flash: &'a SimFlash, completion: &'a FlashCompletion) -> Self {
        Self {
            flash,
            completion,
            unlocked: false,
        }
    }

    fn check_unlocked(&self) -> Result<(), FlashError> {
        if self.unlocked {
            Ok(())
        } else {
            Err(FlashError::Locked)
        }
    }
}

impl FlashController for SimController<'_> {
    fn unlock(&mut self) -> Result<(), FlashError> {
        self.unlocked = true;
        Ok(())
    }

    fn lock(&mut self) -> Result<(), FlashError> {
        self.unlocked = false;
        Ok(())
    }

    fn start_program(&mut self, offset: usize, value: u32) -> Result<(), FlashError> {
        self.check_unlocked()?;
        self.completion.signal(self.flash.program(offset, value));
        Ok(())
    }

    fn start_erase(&mut self, page: Page) -> Result<(), FlashError> {
        self.check_unlocked()?;
        self.completion.signal(self.flash.erase(page));
        Ok(())
    }
}

/// Drive `future` to completion next to a flash writer on `flash`
///
/// Returns the writer's error instead if it faults first.
pub fn run_with_writer<T>(
    flash: &SimFlash,
    queue: &FlashWriteQueue,
    future: impl Future<Output = T>,
) -> Result<T, FlashError> {
    let completion = FlashCompletion::new();
    let mut writer = FlashWriter::new(SimController::new(flash, &completion), flash, queue, &completion);
    match block_on(select(future, writer.run())) {
        Either::First(output) => Ok(output),
        Either::Second(error) => Err(error),
    }
}

/// Removable media keeping every file in memory
#[derive(Default)]
pub struct MemoryMedia {
    pub files: Vec<(String, Vec<u8>)>,
    pub closed: bool,
    /// Fail every operation
    pub fail: bool,
    /// Accept this many bytes less than offered
    pub short_by: usize,
    /// Fail this many more writes, then recover
    pub fail_writes: usize,
    /// Fail closing the file only
    pub fail_close: bool,
}

impl MemoryMedia {
    /// Content of the most recently created file
    pub fn current(&self) -> &[u8] {
        self.files
            .last()
            .map(|(_, bytes)| bytes.as_slice())
            .unwrap_or(&[])
    }
}

impl ErrorType for MemoryMedia {
    type Error = ErrorKind;
}

impl Write for MemoryMedia {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        if self.fail {
            return Err(ErrorKind::Other);
        }
        if self.fail_writes > 0 {
            self.fail_writes -= 1;
            return Err(ErrorKind::Other);
        }
        let len = buf.len().saturating_sub(self.short_by);
        let (_, bytes) = self.files.last_mut().ok_or(ErrorKind::NotFound)?;
        bytes.extend_from_slice(&buf[..len]);
        Ok(len)
    }
}

impl LogMedia for MemoryMedia {
    async fn create(&mut self, name: &str) -> Result<(), Self::Error> {
        if self.fail {
            return Err(ErrorKind::Other);
        }
        self.files.push((name.into(), Vec::new()));
        self.closed = false;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), Self::Error> {
        if self.fail || self.fail_close {
            return Err(ErrorKind::Other);
        }
        self.closed = true;
        Ok(())
    }
}
