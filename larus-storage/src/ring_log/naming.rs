//! Log file naming from GNSS time

use core::fmt::Write;

use heapless::String;

use super::LogError;

/// Bounded log file name
pub type LogFileName = String<32>;

/// UTC date and time of the first GNSS fix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LogTimestamp {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

/// Build `YYMMDD_HHMMSS` followed by `suffix`
pub fn log_file_name(timestamp: &LogTimestamp, suffix: &str) -> Result<LogFileName, LogError> {
    let mut name = LogFileName::new();
    write!(
        name,
        "{:02}{:02}{:02}_{:02}{:02}{:02}",
        timestamp.year % 100,
        timestamp.month,
        timestamp.day,
        timestamp.hour,
        timestamp.minute,
        timestamp.second
    )
    .map_err(|_| LogError::NameTooLong)?;
    name.push_str(suffix).map_err(|_| LogError::NameTooLong)?;
    Ok(name)
}
