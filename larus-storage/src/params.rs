//! Persistent parameter table
//!
//! Every scalar parameter the sensor keeps in flash, with its default and
//! the encoding it had in the legacy EEPROM emulation layout. The table is
//! the single source for legacy migration, configuration fallback and the
//! parameter snapshot written to each log file.

use core::f32::consts::PI;

/// Flash record ids of the persistent data
///
/// Values are part of the persisted layout and must never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum ParameterId {
    SensTiltRoll = 0x0010,
    SensTiltPitch = 0x0011,
    SensTiltYaw = 0x0012,
    PitotOffset = 0x0020,
    PitotSpan = 0x0021,
    QnhOffset = 0x0022,
    MagAutoCalib = 0x0030,
    VarioTc = 0x0040,
    VarioIntTc = 0x0041,
    WindTc = 0x0042,
    MeanWindTc = 0x0043,
    VarioPTc = 0x0044,
    GnssConfiguration = 0x0050,
    AntBaselength = 0x0051,
    AntSlaveDown = 0x0052,
    AntSlaveRight = 0x0053,
}

impl ParameterId {
    /// Record id in flash
    pub const fn id(self) -> u16 {
        self as u16
    }
}

/// Record id of the internal magnetometer transfer matrix
pub const MAG_SENSOR_XFER_MATRIX: u16 = 0x0100;

/// Record id of the external magnetometer transfer matrix
pub const EXT_MAG_SENSOR_XFER_MATRIX: u16 = 0x0101;

/// Words in a magnetometer transfer matrix (4 x 3 floats)
pub const MAG_XFER_MATRIX_WORDS: usize = 12;

/// How a parameter was stored as a 16-bit datum in the legacy layout
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LegacyEncoding {
    /// Two's complement datum times `scale`
    Signed { scale: f32 },
    /// Unsigned datum times `scale`
    Unsigned { scale: f32 },
}

impl LegacyEncoding {
    /// Convert a legacy datum to its value
    pub fn decode(self, datum: u16) -> f32 {
        match self {
            LegacyEncoding::Signed { scale } => datum as i16 as f32 * scale,
            LegacyEncoding::Unsigned { scale } => datum as f32 * scale,
        }
    }
}

/// One persistent scalar parameter
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ParameterSpec {
    pub id: ParameterId,
    /// Name used in human-readable dumps
    pub mnemonic: &'static str,
    /// Value used when neither the store nor the legacy area has one
    pub default: f32,
    /// Stored in radians, shown in degrees
    pub is_angle: bool,
    pub legacy: LegacyEncoding,
}

impl ParameterSpec {
    /// Value in display units: degrees for angles, unchanged otherwise
    pub fn display_value(&self, value: f32) -> f32 {
        if self.is_angle {
            value.to_degrees()
        } else {
            value
        }
    }
}

const ANGLE: LegacyEncoding = LegacyEncoding::Signed { scale: PI / 32768.0 };
const CENTI: LegacyEncoding = LegacyEncoding::Unsigned { scale: 0.01 };
const MILLI_SIGNED: LegacyEncoding = LegacyEncoding::Signed { scale: 0.001 };

const fn spec(
    id: ParameterId,
    mnemonic: &'static str,
    default: f32,
    legacy: LegacyEncoding,
) -> ParameterSpec {
    ParameterSpec {
        id,
        mnemonic,
        default,
        is_angle: false,
        legacy,
    }
}

const fn angle(id: ParameterId, mnemonic: &'static str) -> ParameterSpec {
    ParameterSpec {
        id,
        mnemonic,
        default: 0.0,
        is_angle: true,
        legacy: ANGLE,
    }
}

/// Every persistent scalar parameter, in migration order
pub static PARAMETERS: &[ParameterSpec] = &[
    angle(ParameterId::SensTiltRoll, "SensTilt_Roll"),
    angle(ParameterId::SensTiltPitch, "SensTilt_Pitch"),
    angle(ParameterId::SensTiltYaw, "SensTilt_Yaw"),
    spec(ParameterId::PitotOffset, "Pitot_Offset", 0.0, LegacyEncoding::Signed { scale: 0.1 }),
    spec(ParameterId::PitotSpan, "Pitot_Span", 1.0, LegacyEncoding::Unsigned { scale: 1.0 / 32768.0 }),
    spec(ParameterId::QnhOffset, "QNH-delta", 0.0, LegacyEncoding::Signed { scale: 0.1 }),
    spec(ParameterId::MagAutoCalib, "MagAutoCalib", 1.0, LegacyEncoding::Unsigned { scale: 1.0 }),
    spec(ParameterId::VarioTc, "Vario_TC", 2.0, CENTI),
    spec(ParameterId::VarioIntTc, "Vario_Int_TC", 30.0, CENTI),
    spec(ParameterId::WindTc, "Wind_TC", 5.0, CENTI),
    spec(ParameterId::MeanWindTc, "Mean_Wind_TC", 30.0, CENTI),
    spec(ParameterId::VarioPTc, "Vario_P_TC", 0.2, CENTI),
    spec(ParameterId::GnssConfiguration, "GNSS_CONFIG", 0.0, LegacyEncoding::Unsigned { scale: 1.0 }),
    spec(ParameterId::AntBaselength, "ANT_BASELEN", 1.0, LegacyEncoding::Unsigned { scale: 0.001 }),
    spec(ParameterId::AntSlaveDown, "ANT_SLAVE_DOWN", 0.0, MILLI_SIGNED),
    spec(ParameterId::AntSlaveRight, "ANT_SLAVE_RIGHT", 0.0, MILLI_SIGNED),
];

/// Look up a parameter in a table
pub fn find(table: &[ParameterSpec], id: u16) -> Option<&ParameterSpec> {
    table.iter().find(|spec| spec.id.id() == id)
}
