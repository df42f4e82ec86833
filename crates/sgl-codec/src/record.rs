//! Fixed 32-byte cell-pass record used by uncompressed streams.
//!
//! Layout: `time i64 | height f32 | ccv i16 | rmv i16 | mdp i16 | frequency
//! i16 | amplitude i16 | temperature u16 | speed u16 | radio_latency u8 |
//! cca u8 | gps byte u8 | machine_id u16 | pad u8`.

use sgl_error::Result;
use sgl_types::{CellPass, MachineId, Timestamp};

use crate::wire::{
    append_f32_le, append_i16_le, append_i64_le, append_u8, append_u16_le, read_f32_le,
    read_i16_le, read_i64_le, read_u8, read_u16_le,
};

/// Encoded size of one record.
pub const CELL_PASS_RECORD_BYTES: usize = 32;

pub fn write_cell_pass(buf: &mut Vec<u8>, pass: &CellPass) {
    append_i64_le(buf, pass.time.ticks());
    append_f32_le(buf, pass.height);
    append_i16_le(buf, pass.ccv);
    append_i16_le(buf, pass.rmv);
    append_i16_le(buf, pass.mdp);
    append_i16_le(buf, pass.frequency);
    append_i16_le(buf, pass.amplitude);
    append_u16_le(buf, pass.material_temperature);
    append_u16_le(buf, pass.machine_speed);
    append_u8(buf, pass.radio_latency);
    append_u8(buf, pass.cca);
    append_u8(buf, pass.gps_store());
    append_u16_le(buf, pass.machine_id.0);
    append_u8(buf, 0);
}

pub fn read_cell_pass(bytes: &[u8], cursor: &mut usize) -> Result<CellPass> {
    let mut pass = CellPass::at(Timestamp::from_ticks(read_i64_le(bytes, cursor, "time")?));
    pass.height = read_f32_le(bytes, cursor, "height")?;
    pass.ccv = read_i16_le(bytes, cursor, "ccv")?;
    pass.rmv = read_i16_le(bytes, cursor, "rmv")?;
    pass.mdp = read_i16_le(bytes, cursor, "mdp")?;
    pass.frequency = read_i16_le(bytes, cursor, "frequency")?;
    pass.amplitude = read_i16_le(bytes, cursor, "amplitude")?;
    pass.material_temperature = read_u16_le(bytes, cursor, "material_temperature")?;
    pass.machine_speed = read_u16_le(bytes, cursor, "machine_speed")?;
    pass.radio_latency = read_u8(bytes, cursor, "radio_latency")?;
    pass.cca = read_u8(bytes, cursor, "cca")?;
    pass.set_gps_store(read_u8(bytes, cursor, "gps_store")?)?;
    pass.machine_id = MachineId(read_u16_le(bytes, cursor, "machine_id")?);
    let _pad = read_u8(bytes, cursor, "pad")?;
    Ok(pass)
}

#[cfg(test)]
mod tests {
    use sgl_types::{GpsMode, PassType};

    use super::*;

    #[test]
    fn test_record_is_fixed_width() {
        let mut buf = Vec::new();
        write_cell_pass(&mut buf, &CellPass::NULL);
        assert_eq!(buf.len(), CELL_PASS_RECORD_BYTES);
    }

    #[test]
    fn test_record_round_trip() {
        let mut pass = CellPass::at(Timestamp::from_seconds(1_700_000_000));
        pass.height = 123.456;
        pass.ccv = 250;
        pass.frequency = -3;
        pass.machine_speed = 1200;
        pass.gps_mode = GpsMode::Dgps;
        pass.pass_type = PassType::Wheel;
        pass.machine_id = MachineId(77);

        let mut buf = Vec::new();
        write_cell_pass(&mut buf, &pass);
        write_cell_pass(&mut buf, &CellPass::NULL);
        let mut cursor = 0;
        assert_eq!(read_cell_pass(&buf, &mut cursor).unwrap(), pass);
        assert_eq!(read_cell_pass(&buf, &mut cursor).unwrap(), CellPass::NULL);
        assert_eq!(cursor, buf.len());
    }
}
