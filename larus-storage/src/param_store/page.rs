//! One log-structured data page
//!
//! A [`DataPage`] tracks the write cursor of one flash page and appends
//! records to it through the flash write queue. Reads go straight to
//! memory-mapped flash.

use larus_hal::{FlashMemory, Page, ERASED_WORD};

use super::StoreError;
use crate::codec::{
    page_header, record_marker, PageMarker, RecordHeader, MAX_PAYLOAD_WORDS, PAGE_HEADER_WORDS,
    RESERVED_ID,
};
use crate::flash_writer::{FlashWriteQueue, WriteOrder};
use crate::logging::log_warn;

pub struct DataPage<'a, M: FlashMemory> {
    memory: &'a M,
    queue: &'a FlashWriteQueue,
    page: Page,
    /// Page-relative word index of the first free word
    cursor: usize,
    generation: u16,
    /// Header word marks the page valid
    committed: bool,
    consistent: bool,
}

impl<'a, M: FlashMemory> DataPage<'a, M> {
    /// Create an unscanned page; call [`Self::set_memory_to_existing_data`]
    pub fn new(memory: &'a M, queue: &'a FlashWriteQueue, page: Page) -> Self {
        Self {
            memory,
            queue,
            page,
            cursor: PAGE_HEADER_WORDS,
            generation: 0,
            committed: false,
            consistent: false,
        }
    }

    /// Create a page over erased flash, ready to be filled and committed
    pub fn fresh(memory: &'a M, queue: &'a FlashWriteQueue, page: Page) -> Self {
        Self {
            consistent: true,
            ..Self::new(memory, queue, page)
        }
    }

    /// Scan `page` and position the cursor after its last good record
    ///
    /// Returns false if the header is not valid, a record is malformed or
    /// fails its marker, or anything but erased flash follows the cursor.
    /// The complete records in front of the first defect stay readable.
    pub fn set_memory_to_existing_data(&mut self, page: Page) -> bool {
        self.page = page;
        self.cursor = PAGE_HEADER_WORDS;
        self.consistent = false;

        let header_ok = match PageMarker::classify(self.read(0)) {
            PageMarker::Valid { generation } => {
                self.generation = generation;
                self.committed = true;
                true
            }
            _ => {
                self.generation = 0;
                self.committed = false;
                false
            }
        };

        let page_words = self.page_words();
        loop {
            let at = self.cursor;
            if at >= page_words {
                break;
            }
            let word = self.read(at);
            if word == ERASED_WORD {
                break;
            }
            let Some(header) = RecordHeader::decode(word) else {
                return false;
            };
            if at + header.total_words() > page_words || !self.verify(at, header) {
                return false;
            }
            self.cursor = at + header.total_words();
        }

        if (self.cursor..page_words).any(|at| self.read(at) != ERASED_WORD) {
            return false;
        }

        self.consistent = header_ok;
        header_ok
    }

    /// Append a record and wait until it is in flash
    ///
    /// The marker is programmed after header and payload, so an interrupted
    /// append leaves a record that never verifies.
    pub async fn store_data(&mut self, id: u16, data: &[u32]) -> Result<(), StoreError> {
        if !self.consistent {
            return Err(StoreError::Inconsistent);
        }
        if id == RESERVED_ID {
            return Err(StoreError::InvalidId);
        }
        let header = RecordHeader::new(id, data.len()).ok_or(StoreError::InvalidLength)?;
        if header.total_words() > self.free_words() {
            return Err(StoreError::Full);
        }

        let base = self.base() + self.cursor;
        let header_word = header.encode();
        self.program(base, header_word).await?;
        for (index, word) in data.iter().enumerate() {
            self.program(base + 1 + index, *word).await?;
        }
        self.program(base + 1 + data.len(), record_marker(header_word, data.iter().copied()))
            .await?;

        self.cursor += header.total_words();
        self.queue.drain().await?;
        Ok(())
    }

    /// Copy the latest record for `id` into `out`
    ///
    /// Found only if the record length equals `out.len()` and its marker
    /// verifies. A failing marker marks the page inconsistent.
    pub fn retrieve_data(&mut self, id: u16, out: &mut [u32]) -> bool {
        let Some((at, header)) = self.find_latest(id) else {
            return false;
        };
        if header.payload_words() != out.len() {
            return false;
        }
        if !self.verify(at, header) {
            log_warn!("record {} at word {} lost its marker", id, at);
            self.consistent = false;
            return false;
        }
        self.read_payload(at, out);
        true
    }

    /// Append the latest record of every live id of `source`, ascending
    pub async fn import_all_data(&mut self, source: &DataPage<'_, M>) -> Result<(), StoreError> {
        let mut buffer = [0u32; MAX_PAYLOAD_WORDS];
        for id in source.live_ids() {
            let Some((at, header)) = source.find_latest(id) else {
                continue;
            };
            let payload = &mut buffer[..header.payload_words()];
            source.read_payload(at, payload);
            self.store_data(id, payload).await?;
        }
        Ok(())
    }

    /// Program the header word, making the page valid with `generation`
    pub async fn commit(&mut self, generation: u16) -> Result<(), StoreError> {
        self.program(self.base(), page_header(generation)).await?;
        self.queue.drain().await?;
        self.generation = generation;
        self.committed = true;
        Ok(())
    }

    /// Distinct ids with a record before the cursor, ascending
    ///
    /// Each step rescans the page for the next larger id, so any number of
    /// ids is handled without a buffer.
    pub fn live_ids(&self) -> impl Iterator<Item = u16> + '_ {
        let mut last = None;
        core::iter::from_fn(move || {
            let next = self
                .records()
                .map(|(_, header)| header.id)
                .filter(|id| last.map_or(true, |previous| *id > previous))
                .min()?;
            last = Some(next);
            Some(next)
        })
    }

    pub fn is_consistent(&self) -> bool {
        self.consistent
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    pub fn page(&self) -> Page {
        self.page
    }

    pub fn generation(&self) -> u16 {
        self.generation
    }

    /// Words left behind the cursor
    pub fn free_words(&self) -> usize {
        self.page_words() - self.cursor
    }

    /// Words taken by records
    pub fn used_words(&self) -> usize {
        self.cursor - PAGE_HEADER_WORDS
    }

    fn page_words(&self) -> usize {
        self.memory.geometry().page_words
    }

    fn base(&self) -> usize {
        self.memory.geometry().page_base(self.page)
    }

    fn read(&self, at: usize) -> u32 {
        self.memory.read_word(self.base() + at)
    }

    async fn program(&self, offset: usize, value: u32) -> Result<(), StoreError> {
        self.queue
            .submit(WriteOrder::Program { offset, value })
            .await?;
        Ok(())
    }

    /// Records between the page header and the cursor
    fn records(&self) -> impl Iterator<Item = (usize, RecordHeader)> + '_ {
        let mut at = PAGE_HEADER_WORDS;
        core::iter::from_fn(move || {
            if at >= self.cursor {
                return None;
            }
            let header = RecordHeader::decode(self.read(at))?;
            let record = (at, header);
            at += header.total_words();
            Some(record)
        })
    }

    fn find_latest(&self, id: u16) -> Option<(usize, RecordHeader)> {
        self.records().filter(|(_, header)| header.id == id).last()
    }

    fn verify(&self, at: usize, header: RecordHeader) -> bool {
        let payload = (0..header.payload_words()).map(|index| self.read(at + 1 + index));
        let marker = self.read(at + 1 + header.payload_words());
        record_marker(header.encode(), payload) == marker
    }

    fn read_payload(&self, at: usize, out: &mut [u32]) {
        for (index, word) in out.iter_mut().enumerate() {
            *word = self.read(at + 1 + index);
        }
    }
}
