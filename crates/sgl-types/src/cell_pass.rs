//! The cell pass: one machine observation at one ground cell.
//!
//! Every measured attribute is independently nullable through a fixed
//! sentinel value of its own type. A pass is immutable once ingested; a later
//! pass landing on the same second replaces it wholesale.

use serde::{Deserialize, Serialize};
use sgl_error::{Result, SubgridError};

use crate::grid_data_type::GridDataType;
use crate::time::Timestamp;

/// Null elevation.
pub const NULL_HEIGHT: f32 = -3.4e38;
/// Null compaction meter value.
pub const NULL_CCV: i16 = i16::MAX;
/// Null resonance meter value.
pub const NULL_RMV: i16 = i16::MAX;
/// Null machine drive power.
pub const NULL_MDP: i16 = i16::MAX;
/// Null vibration frequency.
pub const NULL_FREQUENCY: i16 = i16::MAX;
/// Null vibration amplitude.
pub const NULL_AMPLITUDE: i16 = i16::MAX;
/// Null material temperature.
pub const NULL_MATERIAL_TEMPERATURE: u16 = 4096;
/// Null machine speed.
pub const NULL_MACHINE_SPEED: u16 = u16::MAX;
/// Null radio latency.
pub const NULL_RADIO_LATENCY: u8 = u8::MAX;
/// Null compaction count accumulator.
pub const NULL_CCA: u8 = u8::MAX;

const GPS_MODE_MASK: u8 = 0x0F;
const PASS_TYPE_SHIFT: u8 = 4;
const PASS_TYPE_MASK: u8 = 0x03;
const HALF_PASS_BIT: u8 = 0x40;

/// GPS positioning quality reported with a pass. [`GpsMode::NoGps`] is null.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum GpsMode {
    Old = 0,
    Autonomous = 1,
    Float = 2,
    Fixed = 3,
    Dgps = 4,
    Sbas = 5,
    LocationRtk = 6,
    Unknown = 7,
    #[default]
    NoGps = 15,
}

impl GpsMode {
    /// Decode from the low nibble of a packed GPS byte.
    pub fn from_nibble(value: u8) -> Result<Self> {
        Ok(match value & GPS_MODE_MASK {
            0 => Self::Old,
            1 => Self::Autonomous,
            2 => Self::Float,
            3 => Self::Fixed,
            4 => Self::Dgps,
            5 => Self::Sbas,
            6 => Self::LocationRtk,
            7 => Self::Unknown,
            15 => Self::NoGps,
            other => {
                return Err(SubgridError::format(format!("unknown GPS mode {other}")));
            }
        })
    }

    #[must_use]
    pub const fn is_null(self) -> bool {
        matches!(self, Self::NoGps)
    }
}

/// Which part of the machine produced the pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PassType {
    #[default]
    Front = 0,
    Rear = 1,
    Track = 2,
    Wheel = 3,
}

impl PassType {
    #[must_use]
    pub const fn from_bits(value: u8) -> Self {
        match value & PASS_TYPE_MASK {
            0 => Self::Front,
            1 => Self::Rear,
            2 => Self::Track,
            _ => Self::Wheel,
        }
    }
}

/// Site-model-local machine index. Opaque to this engine.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct MachineId(pub u16);

/// One observation at one cell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CellPass {
    pub time: Timestamp,
    pub height: f32,
    pub ccv: i16,
    pub rmv: i16,
    pub mdp: i16,
    pub frequency: i16,
    pub amplitude: i16,
    pub material_temperature: u16,
    pub machine_speed: u16,
    pub radio_latency: u8,
    pub cca: u8,
    pub gps_mode: GpsMode,
    pub half_pass: bool,
    pub pass_type: PassType,
    pub machine_id: MachineId,
}

impl Default for CellPass {
    fn default() -> Self {
        Self::NULL
    }
}

impl CellPass {
    /// A pass with every nullable attribute set to its sentinel.
    pub const NULL: Self = Self {
        time: Timestamp::MIN,
        height: NULL_HEIGHT,
        ccv: NULL_CCV,
        rmv: NULL_RMV,
        mdp: NULL_MDP,
        frequency: NULL_FREQUENCY,
        amplitude: NULL_AMPLITUDE,
        material_temperature: NULL_MATERIAL_TEMPERATURE,
        machine_speed: NULL_MACHINE_SPEED,
        radio_latency: NULL_RADIO_LATENCY,
        cca: NULL_CCA,
        gps_mode: GpsMode::NoGps,
        half_pass: false,
        pass_type: PassType::Front,
        machine_id: MachineId(0),
    };

    /// A null pass stamped with `time`.
    #[must_use]
    pub const fn at(time: Timestamp) -> Self {
        Self { time, ..Self::NULL }
    }

    /// Non-finite heights count as null.
    #[must_use]
    pub fn has_height(&self) -> bool {
        self.height.is_finite() && self.height != NULL_HEIGHT
    }

    /// Replace a non-finite height with [`NULL_HEIGHT`].
    pub fn normalize_height(&mut self) {
        if !self.has_height() {
            self.height = NULL_HEIGHT;
        }
    }

    #[must_use]
    pub const fn has_radio_latency(&self) -> bool {
        self.radio_latency != NULL_RADIO_LATENCY
    }

    /// Whether the attribute selected by `kind` holds its null sentinel.
    #[must_use]
    pub const fn is_null(&self, kind: GridDataType) -> bool {
        match kind {
            GridDataType::Ccv => self.ccv == NULL_CCV,
            GridDataType::Rmv => self.rmv == NULL_RMV,
            GridDataType::Frequency => self.frequency == NULL_FREQUENCY,
            GridDataType::Amplitude => self.amplitude == NULL_AMPLITUDE,
            GridDataType::GpsMode => self.gps_mode.is_null(),
            GridDataType::Temperature => self.material_temperature == NULL_MATERIAL_TEMPERATURE,
            GridDataType::Mdp => self.mdp == NULL_MDP,
            GridDataType::Cca => self.cca == NULL_CCA,
        }
    }

    /// Copy the attribute selected by `kind` from `source`.
    ///
    /// Copying [`GridDataType::GpsMode`] also carries `half_pass` and
    /// `pass_type`.
    pub fn copy_attribute(&mut self, kind: GridDataType, source: &Self) {
        match kind {
            GridDataType::Ccv => self.ccv = source.ccv,
            GridDataType::Rmv => self.rmv = source.rmv,
            GridDataType::Frequency => self.frequency = source.frequency,
            GridDataType::Amplitude => self.amplitude = source.amplitude,
            GridDataType::GpsMode => {
                self.gps_mode = source.gps_mode;
                self.half_pass = source.half_pass;
                self.pass_type = source.pass_type;
            }
            GridDataType::Temperature => self.material_temperature = source.material_temperature,
            GridDataType::Mdp => self.mdp = source.mdp,
            GridDataType::Cca => self.cca = source.cca,
        }
    }

    /// Pack GPS mode, pass type and half-pass flag into one byte.
    ///
    /// Layout: bits 0..4 GPS mode, bits 4..6 pass type, bit 6 half pass.
    #[must_use]
    pub const fn gps_store(&self) -> u8 {
        let mut packed = (self.gps_mode as u8) & GPS_MODE_MASK;
        packed |= ((self.pass_type as u8) & PASS_TYPE_MASK) << PASS_TYPE_SHIFT;
        if self.half_pass {
            packed |= HALF_PASS_BIT;
        }
        packed
    }

    /// Inverse of [`CellPass::gps_store`].
    pub fn set_gps_store(&mut self, packed: u8) -> Result<()> {
        self.gps_mode = GpsMode::from_nibble(packed)?;
        self.pass_type = PassType::from_bits(packed >> PASS_TYPE_SHIFT);
        self.half_pass = packed & HALF_PASS_BIT != 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_pass_is_null_everywhere() {
        let pass = CellPass::NULL;
        for kind in GridDataType::ALL {
            assert!(pass.is_null(kind), "{kind:?} should be null");
        }
        assert!(!pass.has_height());
        assert!(!pass.has_radio_latency());
    }

    #[test]
    fn test_non_finite_height_is_null() {
        for height in [f32::NAN, f32::INFINITY, f32::NEG_INFINITY] {
            let mut pass = CellPass::at(Timestamp::from_seconds(1));
            pass.height = height;
            assert!(!pass.has_height());
            pass.normalize_height();
            assert_eq!(pass.height, NULL_HEIGHT);
        }
        let mut pass = CellPass::at(Timestamp::from_seconds(1));
        pass.height = -2.5;
        pass.normalize_height();
        assert_eq!(pass.height, -2.5);
    }

    #[test]
    fn test_gps_store_round_trip() {
        let mut pass = CellPass::at(Timestamp::from_seconds(1));
        pass.gps_mode = GpsMode::Fixed;
        pass.pass_type = PassType::Track;
        pass.half_pass = true;
        let packed = pass.gps_store();
        assert_eq!(packed, 0x03 | (2 << 4) | 0x40);

        let mut decoded = CellPass::NULL;
        decoded.set_gps_store(packed).expect("valid packed byte");
        assert_eq!(decoded.gps_mode, GpsMode::Fixed);
        assert_eq!(decoded.pass_type, PassType::Track);
        assert!(decoded.half_pass);
    }

    #[test]
    fn test_unknown_gps_nibble_rejected() {
        let err = GpsMode::from_nibble(9).expect_err("nibble 9 is unassigned");
        assert!(matches!(err, SubgridError::Format { .. }));
    }

    #[test]
    fn test_copy_gps_attribute_carries_pass_flags() {
        let mut source = CellPass::at(Timestamp::from_seconds(10));
        source.gps_mode = GpsMode::Float;
        source.half_pass = true;
        source.pass_type = PassType::Rear;

        let mut target = CellPass::NULL;
        target.copy_attribute(GridDataType::GpsMode, &source);
        assert_eq!(target.gps_mode, GpsMode::Float);
        assert!(target.half_pass);
        assert_eq!(target.pass_type, PassType::Rear);
        assert_eq!(target.ccv, NULL_CCV);
    }

    #[test]
    fn test_serde_json_round_trip() {
        let mut pass = CellPass::at(Timestamp::from_seconds(42));
        pass.ccv = 123;
        pass.height = 1.25;
        let json = serde_json::to_string(&pass).expect("serialize");
        let back: CellPass = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, pass);
    }
}
