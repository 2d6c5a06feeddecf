//! Log-structured parameter store
//!
//! Parameters live as records appended to one of two flash pages. Updating a
//! value appends a new record; the latest record for an id wins. When the
//! active page runs full, its live records are compacted into the other page
//! (a page swap) and the old page is erased.
//!
//! ```text
//!            page A (active)                      page B (idle)
//!  ┌────────┬──────┬──────┬──────┬──────┐    ┌──────────────────────┐
//!  │ header │ rec  │ rec  │ rec  │ ░░░░ │    │ ░░░░░░░░ erased ░░░░ │
//!  └────────┴──────┴──────┴──────┴──────┘    └──────────────────────┘
//!                                  ▲ cursor
//! ```
//!
//! Every mutation takes `&mut self`; the firmware shares the store behind an
//! async mutex. Physical writes go through the flash writer task.

mod legacy;
mod page;
mod recovery;

pub use page::DataPage;
pub use recovery::BootOutcome;

use larus_hal::{FlashError, FlashMemory, Page};

use crate::flash_writer::{erase_page, FlashWriteQueue};
use crate::logging::{log_error, log_info};
use crate::params::{self, ParameterId, ParameterSpec, PARAMETERS};

/// Parameter store errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StoreError {
    /// Flash hardware or write serializer failure
    Flash(FlashError),
    /// Not enough room left on the active page
    Full,
    /// The page failed its scan or a record lost its marker
    Inconsistent,
    /// Payload empty or longer than a record can carry
    InvalidLength,
    /// Record id reserved for erased flash
    InvalidId,
    /// No valid record for the id
    NotFound,
    /// No page mounted yet
    Unmounted,
    /// Still full after a compaction
    Exhausted,
    /// No valid page after recovery
    Corrupted,
}

impl StoreError {
    /// Errors the firmware cannot continue from
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StoreError::Flash(_) | StoreError::Exhausted | StoreError::Corrupted
        )
    }
}

impl From<FlashError> for StoreError {
    fn from(e: FlashError) -> Self {
        StoreError::Flash(e)
    }
}

/// The two-page parameter store
pub struct ParameterStore<'a, M: FlashMemory> {
    memory: &'a M,
    queue: &'a FlashWriteQueue,
    parameters: &'static [ParameterSpec],
    active: Option<DataPage<'a, M>>,
}

impl<'a, M: FlashMemory> ParameterStore<'a, M> {
    /// Create an unmounted store over the firmware parameter table
    ///
    /// Call [`Self::recover_and_initialize_flash`] before writing.
    pub fn new(memory: &'a M, queue: &'a FlashWriteQueue) -> Self {
        Self::with_parameters(memory, queue, PARAMETERS)
    }

    pub fn with_parameters(
        memory: &'a M,
        queue: &'a FlashWriteQueue,
        parameters: &'static [ParameterSpec],
    ) -> Self {
        Self {
            memory,
            queue,
            parameters,
            active: None,
        }
    }

    pub fn is_mounted(&self) -> bool {
        self.active.is_some()
    }

    /// The mounted page
    pub fn active_page(&self) -> Option<&DataPage<'a, M>> {
        self.active.as_ref()
    }

    pub fn parameters(&self) -> &'static [ParameterSpec] {
        self.parameters
    }

    pub fn is_consistent(&self) -> bool {
        self.active.as_ref().is_some_and(DataPage::is_consistent)
    }

    /// Append a record to the active page; no compaction
    pub async fn store_data(&mut self, id: u16, data: &[u32]) -> Result<(), StoreError> {
        let page = self.active.as_mut().ok_or(StoreError::Unmounted)?;
        page.store_data(id, data).await
    }

    /// Latest record for `id` with exactly `out.len()` words
    pub fn retrieve_data(&mut self, id: u16, out: &mut [u32]) -> bool {
        self.active
            .as_mut()
            .is_some_and(|page| page.retrieve_data(id, out))
    }

    /// Compact the live records of the active page into the other page
    pub async fn file_system_page_swap(&mut self) -> Result<(), StoreError> {
        let source = self.active.as_ref().ok_or(StoreError::Unmounted)?;
        let target = source.page().other();
        let free_before = source.free_words();

        erase_page(self.memory, self.queue, target).await?;
        let mut compacted = DataPage::fresh(self.memory, self.queue, target);
        compacted.import_all_data(source).await?;
        // Until here the source page is the only valid one
        compacted
            .commit(source.generation().wrapping_add(1))
            .await?;
        erase_page(self.memory, self.queue, source.page()).await?;

        self.mount(target)?;
        log_info!(
            "page swap to {:?}: {} words free before, {} after",
            target,
            free_before,
            self.active.as_ref().map_or(0, DataPage::free_words)
        );
        Ok(())
    }

    /// Store a parameter value, compacting once if the page is full
    pub async fn write_value(&mut self, id: u16, value: f32) -> Result<(), StoreError> {
        self.write_words(id, &[value.to_bits()]).await
    }

    /// Read a parameter value
    ///
    /// Falls back to the legacy area while no page is mounted.
    pub fn read_value(&mut self, id: u16) -> Result<f32, StoreError> {
        if self.active.is_none() {
            let spec = params::find(self.parameters, id).ok_or(StoreError::NotFound)?;
            return legacy::read_value(self.memory, spec).ok_or(StoreError::NotFound);
        }
        let mut out = [0u32; 1];
        if self.retrieve_data(id, &mut out) {
            Ok(f32::from_bits(out[0]))
        } else {
            Err(StoreError::NotFound)
        }
    }

    /// Current value of a parameter: store, then legacy area, then default
    pub fn configuration(&mut self, id: ParameterId) -> f32 {
        if let Ok(value) = self.read_value(id.id()) {
            return value;
        }
        let Some(spec) = params::find(self.parameters, id.id()) else {
            return 0.0;
        };
        legacy::read_value(self.memory, spec).unwrap_or(spec.default)
    }

    /// Store a multi-word record, compacting once if the page is full
    pub async fn write_blob(&mut self, id: u16, words: &[u32]) -> Result<(), StoreError> {
        self.write_words(id, words).await
    }

    /// Read a multi-word record of exactly `out.len()` words
    pub fn read_blob(&mut self, id: u16, out: &mut [u32]) -> Result<(), StoreError> {
        if !self.is_mounted() {
            return Err(StoreError::Unmounted);
        }
        if !self.is_consistent() {
            return Err(StoreError::Inconsistent);
        }
        if self.retrieve_data(id, out) {
            Ok(())
        } else {
            Err(StoreError::NotFound)
        }
    }

    /// Fill `out` with `(id, value bits)` pairs of every table parameter
    ///
    /// Returns the number of words written; stops when `out` is full.
    pub fn parameter_snapshot(&mut self, out: &mut [u32]) -> usize {
        let parameters = self.parameters;
        let mut written = 0;
        for (spec, pair) in parameters.iter().zip(out.chunks_exact_mut(2)) {
            pair[0] = spec.id.id() as u32;
            pair[1] = self.configuration(spec.id).to_bits();
            written += 2;
        }
        written
    }

    /// Erase both pages and start over with an empty page A
    pub async fn factory_reset(&mut self) -> Result<(), StoreError> {
        log_info!("factory reset of parameter store");
        self.active = None;
        self.initialize_virgin().await
    }

    async fn write_words(&mut self, id: u16, words: &[u32]) -> Result<(), StoreError> {
        match self.store_data(id, words).await {
            Err(StoreError::Full) => {
                self.file_system_page_swap().await?;
                match self.store_data(id, words).await {
                    Err(StoreError::Full) => {
                        log_error!("parameter store exhausted writing id {}", id);
                        Err(StoreError::Exhausted)
                    }
                    other => other,
                }
            }
            other => other,
        }
    }

    fn mount(&mut self, page: Page) -> Result<(), StoreError> {
        let mut data = DataPage::new(self.memory, self.queue, page);
        if !data.set_memory_to_existing_data(page) {
            log_error!("page {:?} does not mount", page);
            self.active = None;
            return Err(StoreError::Corrupted);
        }
        self.active = Some(data);
        Ok(())
    }
}
