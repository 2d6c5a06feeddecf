//! Read-only access to the legacy EEPROM emulation layout
//!
//! Older firmware kept 16-bit parameters in an EEPROM emulation page inside
//! page B. Its header half-word is `0x0000` when valid and `0xEEEE` while
//! dirty; each following word holds `id << 16 | datum`, appended in write
//! order, up to the first erased word.

use larus_hal::{FlashMemory, Page, ERASED_WORD};

use crate::params::ParameterSpec;

const LEGACY_VALID: u16 = 0x0000;

/// Word offset of the legacy area, if the board has one
fn area_start<M: FlashMemory>(memory: &M) -> Option<usize> {
    let geometry = memory.geometry();
    let offset = geometry.legacy_offset?;
    (offset < geometry.page_words).then(|| geometry.page_base(Page::B) + offset)
}

/// Check for flash still laid out by the legacy firmware
///
/// The legacy page header reads valid and the first two words of page B,
/// where a store page header would be, are erased.
pub fn is_legacy_layout<M: FlashMemory>(memory: &M) -> bool {
    let Some(start) = area_start(memory) else {
        return false;
    };
    let base = memory.geometry().page_base(Page::B);
    memory.read_word(start) as u16 == LEGACY_VALID
        && memory.read_word(base) == ERASED_WORD
        && memory.read_word(base + 1) == ERASED_WORD
}

/// Latest legacy datum stored for `id`
///
/// `None` unless flash is still in the legacy layout: once page B holds a
/// store page, the words at the legacy offset are store records.
pub fn read_datum<M: FlashMemory>(memory: &M, id: u16) -> Option<u16> {
    if !is_legacy_layout(memory) {
        return None;
    }
    let start = area_start(memory)?;
    let geometry = memory.geometry();
    let end = geometry.page_base(Page::B) + geometry.page_words;

    (start + 1..end)
        .map(|offset| memory.read_word(offset))
        .take_while(|word| *word != ERASED_WORD)
        .filter(|word| (word >> 16) as u16 == id)
        .last()
        .map(|word| word as u16)
}

/// Legacy value of a parameter, converted to its float value
pub fn read_value<M: FlashMemory>(memory: &M, spec: &ParameterSpec) -> Option<f32> {
    read_datum(memory, spec.id.id()).map(|datum| spec.legacy.decode(datum))
}
