//! Parameter get/set over the bus
//!
//! Command `0x2000 + n` addresses the n-th entry of [`EXPORTED_PARAMETERS`].
//! The order is part of the bus protocol and differs from the record ids.
//!
//! ```text
//!   byte  0..2        2        3       4..8
//!       command     action    -      value (f32, set only)
//! ```

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use larus_hal::FlashMemory;

use crate::logging::{log_debug, log_warn};
use crate::param_store::ParameterStore;
use crate::params::ParameterId;

/// Command number of the first exported parameter
pub const PARAMETER_COMMAND_BASE: u16 = 0x2000;

/// Parameters reachable from the bus, in command order
pub static EXPORTED_PARAMETERS: [ParameterId; 16] = [
    ParameterId::SensTiltRoll,
    ParameterId::SensTiltPitch,
    ParameterId::SensTiltYaw,
    ParameterId::PitotOffset,
    ParameterId::PitotSpan,
    ParameterId::QnhOffset,
    ParameterId::MagAutoCalib,
    ParameterId::VarioTc,
    ParameterId::VarioIntTc,
    ParameterId::WindTc,
    ParameterId::MeanWindTc,
    ParameterId::GnssConfiguration,
    ParameterId::AntBaselength,
    ParameterId::AntSlaveDown,
    ParameterId::AntSlaveRight,
    ParameterId::VarioPTc,
];

/// Raised after every bus write so the acquisition loop reloads its settings
pub type ValueChanged = Signal<CriticalSectionRawMutex, ()>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ConfigAction {
    Get = 0,
    Set = 1,
}

/// One parameter request as carried in an 8-byte bus frame
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConfigRequest {
    pub command: u16,
    pub action: u8,
    pub value: f32,
}

impl ConfigRequest {
    pub fn from_frame(data: &[u8; 8]) -> Self {
        Self {
            command: u16::from_le_bytes([data[0], data[1]]),
            action: data[2],
            value: f32::from_le_bytes([data[4], data[5], data[6], data[7]]),
        }
    }
}

/// Parameter addressed by a command number
pub fn exported_parameter(command: u16) -> Option<ParameterId> {
    let index = command.checked_sub(PARAMETER_COMMAND_BASE)?;
    EXPORTED_PARAMETERS.get(index as usize).copied()
}

/// Serve one request
///
/// A get returns the stored value, or `None` when it cannot be read. A set
/// writes the value, raises `changed` and returns `None`; a failed write has
/// no way back to the requester and is only logged. Anything else is ignored.
pub async fn handle_request<M: FlashMemory>(
    store: &mut ParameterStore<'_, M>,
    request: &ConfigRequest,
    changed: &ValueChanged,
) -> Option<f32> {
    let parameter = exported_parameter(request.command)?;
    let Ok(action) = ConfigAction::try_from(request.action) else {
        log_debug!("ignoring config action {}", request.action);
        return None;
    };

    match action {
        ConfigAction::Get => store.read_value(parameter.id()).ok(),
        ConfigAction::Set => {
            if let Err(error) = store.write_value(parameter.id(), request.value).await {
                log_warn!("config write of {:?} failed: {:?}", parameter, error);
            }
            changed.signal(());
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flash_writer::FlashWriteQueue;
    use crate::sim::{run_with_writer, SimFlash};

    fn request(command: u16, action: u8, value: f32) -> ConfigRequest {
        ConfigRequest {
            command,
            action,
            value,
        }
    }

    #[test]
    fn test_command_mapping() {
        assert_eq!(exported_parameter(0x2000), Some(ParameterId::SensTiltRoll));
        assert_eq!(exported_parameter(0x200B), Some(ParameterId::GnssConfiguration));
        assert_eq!(exported_parameter(0x200F), Some(ParameterId::VarioPTc));
        assert_eq!(exported_parameter(0x2010), None);
        assert_eq!(exported_parameter(0x1FFF), None);
        assert_eq!(exported_parameter(0), None);
    }

    #[test]
    fn test_frame_decoding() {
        let mut frame = [0u8; 8];
        frame[..2].copy_from_slice(&0x2004u16.to_le_bytes());
        frame[2] = 1;
        frame[4..].copy_from_slice(&2.5f32.to_le_bytes());
        assert_eq!(ConfigRequest::from_frame(&frame), request(0x2004, 1, 2.5));
    }

    #[test]
    fn test_set_then_get() {
        let flash = SimFlash::new(64);
        let queue = FlashWriteQueue::new();
        let changed = ValueChanged::new();
        let mut store = ParameterStore::new(&flash, &queue);

        let result = run_with_writer(&flash, &queue, async {
            store.recover_and_initialize_flash().await.unwrap();
            let set = handle_request(&mut store, &request(0x2004, 1, 1.25), &changed).await;
            let get = handle_request(&mut store, &request(0x2004, 0, 0.0), &changed).await;
            (set, get)
        });
        assert_eq!(result, Ok((None, Some(1.25))));
        assert!(changed.signaled());
        assert_eq!(store.read_value(ParameterId::PitotSpan.id()), Ok(1.25));
    }

    #[test]
    fn test_get_of_unset_value_is_none() {
        let flash = SimFlash::new(64);
        let queue = FlashWriteQueue::new();
        let changed = ValueChanged::new();
        let mut store = ParameterStore::new(&flash, &queue);

        let result = run_with_writer(&flash, &queue, async {
            store.recover_and_initialize_flash().await.unwrap();
            handle_request(&mut store, &request(0x2000, 0, 0.0), &changed).await
        });
        assert_eq!(result, Ok(None));
        assert!(!changed.signaled());
    }

    #[test]
    fn test_unknown_requests_ignored() {
        let flash = SimFlash::new(64);
        let queue = FlashWriteQueue::new();
        let changed = ValueChanged::new();
        let mut store = ParameterStore::new(&flash, &queue);

        let result = run_with_writer(&flash, &queue, async {
            store.recover_and_initialize_flash().await.unwrap();
            let bad_command = handle_request(&mut store, &request(0x3000, 1, 1.0), &changed).await;
            let bad_action = handle_request(&mut store, &request(0x2000, 7, 1.0), &changed).await;
            (bad_command, bad_action)
        });
        assert_eq!(result, Ok((None, None)));
        assert!(!changed.signaled());
        assert_eq!(
            store.read_value(ParameterId::SensTiltRoll.id()),
            Err(crate::param_store::StoreError::NotFound)
        );
    }

    #[test]
    fn test_failed_set_still_signals() {
        let flash = SimFlash::new(64);
        let queue = FlashWriteQueue::new();
        let changed = ValueChanged::new();
        // Never mounted: the write is refused
        let mut store = ParameterStore::new(&flash, &queue);

        let result = run_with_writer(&flash, &queue, async {
            handle_request(&mut store, &request(0x2001, 1, 3.0), &changed).await
        });
        assert_eq!(result, Ok(None));
        assert!(changed.signaled());
    }
}
