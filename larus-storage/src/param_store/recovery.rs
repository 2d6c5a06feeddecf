//! Boot-time recovery of the parameter pages
//!
//! Power may fail at any flash write. Every state the store can be left in
//! is resolved at boot into exactly one valid, mounted page:
//!
//! | page A        | page B        | action                                  |
//! |---------------|---------------|-----------------------------------------|
//! | erased        | erased        | format A, generation 0                  |
//! | valid         | erased        | adopt A                                 |
//! | valid (g)     | valid (h)     | adopt the newer generation, erase other |
//! | valid         | damaged       | erase B, adopt A                        |
//! | damaged       | erased        | rescue A's readable records into B      |
//! | damaged       | damaged       | rescue the page with more records       |
//!
//! An adopted page that fails its scan is rescued like a damaged one.
//! Flash still in the legacy EEPROM emulation layout is migrated first.

use larus_hal::{FlashMemory, Page};

use super::legacy;
use super::page::DataPage;
use super::{ParameterStore, StoreError};
use crate::codec::{generation_is_newer, PageMarker};
use crate::flash_writer::erase_page;
use crate::logging::{log_debug, log_info, log_warn};

/// How the store came up at boot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BootOutcome {
    /// A single clean page was found
    Adopted,
    /// Parameters were imported from the legacy layout
    MigratedLegacy,
    /// Readable records were rescued from a damaged page
    Recovered,
    /// Leftovers of an interrupted page swap were cleaned up
    InterruptedSwapResolved,
    /// Both pages were blank and page A was formatted
    Virgin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PageState {
    Erased,
    Valid(u16),
    Damaged,
}

impl<'a, M: FlashMemory> ParameterStore<'a, M> {
    /// Bring the store up from whatever state flash is in
    pub async fn recover_and_initialize_flash(&mut self) -> Result<BootOutcome, StoreError> {
        self.active = None;

        let mut migrated = false;
        if legacy::is_legacy_layout(self.memory)
            && !matches!(self.page_state(Page::A), PageState::Valid(_))
        {
            self.migrate_legacy().await?;
            migrated = true;
        }

        let outcome = match (self.page_state(Page::A), self.page_state(Page::B)) {
            (PageState::Erased, PageState::Erased) => {
                self.initialize_virgin().await?;
                BootOutcome::Virgin
            }
            (PageState::Valid(a), PageState::Valid(b)) => {
                let keep = if generation_is_newer(b, a) {
                    Page::B
                } else {
                    Page::A
                };
                self.adopt(keep, BootOutcome::InterruptedSwapResolved)
                    .await?
            }
            (PageState::Valid(_), other) => {
                self.adopt(Page::A, Self::cleanup_outcome(other)).await?
            }
            (other, PageState::Valid(_)) => {
                self.adopt(Page::B, Self::cleanup_outcome(other)).await?
            }
            (PageState::Damaged, PageState::Erased) => self.rescue(Page::A).await?,
            (PageState::Erased, PageState::Damaged) => self.rescue(Page::B).await?,
            (PageState::Damaged, PageState::Damaged) => {
                let source = if self.readable_words(Page::B) > self.readable_words(Page::A) {
                    Page::B
                } else {
                    Page::A
                };
                self.rescue(source).await?
            }
        };

        let outcome = if migrated {
            BootOutcome::MigratedLegacy
        } else {
            outcome
        };
        log_info!("parameter store up: {:?}", outcome);
        Ok(outcome)
    }

    pub(super) async fn initialize_virgin(&mut self) -> Result<(), StoreError> {
        for page in Page::ALL {
            erase_page(self.memory, self.queue, page).await?;
        }
        DataPage::fresh(self.memory, self.queue, Page::A)
            .commit(0)
            .await?;
        self.mount(Page::A)
    }

    fn cleanup_outcome(other: PageState) -> BootOutcome {
        if other == PageState::Erased {
            BootOutcome::Adopted
        } else {
            BootOutcome::InterruptedSwapResolved
        }
    }

    fn page_state(&self, page: Page) -> PageState {
        let base = self.memory.geometry().page_base(page);
        match PageMarker::classify(self.memory.read_word(base)) {
            PageMarker::Valid { generation } => PageState::Valid(generation),
            _ if self.memory.is_erased(page) => PageState::Erased,
            _ => PageState::Damaged,
        }
    }

    fn readable_words(&self, page: Page) -> usize {
        let mut data = DataPage::new(self.memory, self.queue, page);
        data.set_memory_to_existing_data(page);
        data.used_words()
    }

    /// Keep `page`, erase the other one, and mount `page`
    async fn adopt(&mut self, page: Page, outcome: BootOutcome) -> Result<BootOutcome, StoreError> {
        erase_page(self.memory, self.queue, page.other()).await?;
        let mut data = DataPage::new(self.memory, self.queue, page);
        if data.set_memory_to_existing_data(page) {
            self.active = Some(data);
            return Ok(outcome);
        }
        log_warn!("page {:?} fails its scan, rescuing", page);
        self.rescue(page).await
    }

    /// Copy the readable records of `source` into the other page
    async fn rescue(&mut self, source: Page) -> Result<BootOutcome, StoreError> {
        let mut damaged = DataPage::new(self.memory, self.queue, source);
        damaged.set_memory_to_existing_data(source);
        let target = source.other();

        erase_page(self.memory, self.queue, target).await?;
        let mut rebuilt = DataPage::fresh(self.memory, self.queue, target);
        rebuilt.import_all_data(&damaged).await?;
        rebuilt
            .commit(damaged.generation().wrapping_add(1))
            .await?;
        erase_page(self.memory, self.queue, source).await?;

        log_warn!(
            "rescued {} words from page {:?} into {:?}",
            damaged.used_words(),
            source,
            target
        );
        self.mount(target)?;
        Ok(BootOutcome::Recovered)
    }

    /// Rebuild page A from the legacy area in page B, then erase page B
    ///
    /// Safe to repeat: until page A is committed the legacy layout is still
    /// detected, afterwards page B is only leftover.
    async fn migrate_legacy(&mut self) -> Result<(), StoreError> {
        log_info!("legacy parameter layout found, migrating");
        erase_page(self.memory, self.queue, Page::A).await?;
        let mut data = DataPage::fresh(self.memory, self.queue, Page::A);
        for spec in self.parameters {
            let value = legacy::read_value(self.memory, spec).unwrap_or(spec.default);
            log_debug!("migrated {} = {}", spec.mnemonic, spec.display_value(value));
            data.store_data(spec.id.id(), &[value.to_bits()]).await?;
        }
        data.commit(0).await?;
        erase_page(self.memory, self.queue, Page::B).await?;
        Ok(())
    }
}
