//! Write-once bit-packed encoding of one segment's cell passes.
//!
//! Passes are flattened column-major (cell `(x, y)` is column `x`, row `y`)
//! into one global pass array. Two bit-field blocks describe the result:
//!
//! * `PassCountIndex`: for every column the number of passes before it, then
//!   for every cell the number of passes before it within its column. A
//!   cell's first pass index is the sum of the two; its pass count is the
//!   next cell's first index minus its own.
//! * `PassData`: one fixed-width record per pass. Every attribute is stored
//!   relative to its minimum over the segment, in as few bits as its range
//!   needs, with one extra token reserved for null when any pass is null.
//!
//! Any pass and any cell's pass range can be reached in O(1) without
//! decoding the rest of the segment. The structure has no mutators: a
//! segment that needs new passes stays in its mutable form.
//!
//! Stream layout:
//! `[first_real_pass_time i64] [segment_pass_count i32] [PassCountIndex]
//! [col_bits u8] [first_per_cell_offset i32] [field descriptors]
//! [bits_per_pass i32] [per-cell offset descriptor] [PassData]`.

use sgl_error::{Result, SubgridError};
use sgl_types::{
    CellPass, MachineId, NULL_AMPLITUDE, NULL_CCA, NULL_CCV, NULL_FREQUENCY, NULL_HEIGHT,
    NULL_MACHINE_SPEED, NULL_MATERIAL_TEMPERATURE, NULL_MDP, NULL_RADIO_LATENCY, NULL_RMV,
    SUBGRID_CELL_COUNT, SUBGRID_DIMENSION, Timestamp, check_cell,
};
use tracing::debug;

use crate::bitfield::{BitFieldArray, bits_required};
use crate::schema::{BitFieldSchema, BitFieldSchemaBuilder, FieldDescriptor};
use crate::wire::{
    append_count_i32, append_i64_le, append_u8, read_count_i32, read_i64_le, read_u8,
};

/// Packed attributes of a pass record, in written order.
pub const PASS_FIELD_NAMES: [&str; PASS_FIELD_COUNT] = [
    "time",
    "height",
    "ccv",
    "rmv",
    "mdp",
    "material_temperature",
    "machine_speed",
    "radio_latency",
    "gps_store",
    "frequency",
    "amplitude",
    "cca",
    "machine_id",
];
const PASS_FIELD_COUNT: usize = 13;

const TIME: usize = 0;
const HEIGHT: usize = 1;
const CCV: usize = 2;
const RMV: usize = 3;
const MDP: usize = 4;
const TEMPERATURE: usize = 5;
const SPEED: usize = 6;
const RADIO_LATENCY: usize = 7;
const GPS_STORE: usize = 8;
const FREQUENCY: usize = 9;
const AMPLITUDE: usize = 10;
const CCA: usize = 11;
const MACHINE_ID: usize = 12;

const MILLIMETRES_PER_METRE: f64 = 1000.0;

type PassFields = [Option<i64>; PASS_FIELD_COUNT];

fn height_to_mm(height: f32) -> i64 {
    (f64::from(height) * MILLIMETRES_PER_METRE).round() as i64
}

fn mm_to_height(mm: i64) -> f32 {
    (mm as f64 / MILLIMETRES_PER_METRE) as f32
}

fn non_null<T: PartialEq + Into<i64>>(value: T, null: T) -> Option<i64> {
    (value != null).then(|| value.into())
}

fn pass_fields(pass: &CellPass, base_seconds: i64) -> PassFields {
    let mut fields = [None; PASS_FIELD_COUNT];
    fields[TIME] = Some(pass.time.whole_seconds() - base_seconds);
    fields[HEIGHT] = pass.has_height().then(|| height_to_mm(pass.height));
    fields[CCV] = non_null(pass.ccv, NULL_CCV);
    fields[RMV] = non_null(pass.rmv, NULL_RMV);
    fields[MDP] = non_null(pass.mdp, NULL_MDP);
    fields[TEMPERATURE] = non_null(pass.material_temperature, NULL_MATERIAL_TEMPERATURE);
    fields[SPEED] = non_null(pass.machine_speed, NULL_MACHINE_SPEED);
    fields[RADIO_LATENCY] = non_null(pass.radio_latency, NULL_RADIO_LATENCY);
    fields[GPS_STORE] = Some(i64::from(pass.gps_store()));
    fields[FREQUENCY] = non_null(pass.frequency, NULL_FREQUENCY);
    fields[AMPLITUDE] = non_null(pass.amplitude, NULL_AMPLITUDE);
    fields[CCA] = non_null(pass.cca, NULL_CCA);
    fields[MACHINE_ID] = Some(i64::from(pass.machine_id.0));
    fields
}

fn narrow<T: TryFrom<i64>>(value: Option<i64>, null: T, field: usize) -> Result<T> {
    match value {
        None => Ok(null),
        Some(v) => T::try_from(v).map_err(|_| {
            SubgridError::format(format!(
                "decoded {} value {v} does not fit its type",
                PASS_FIELD_NAMES[field]
            ))
        }),
    }
}

fn required(value: Option<i64>, field: usize) -> Result<i64> {
    value.ok_or_else(|| {
        SubgridError::format(format!(
            "non-nullable field {} decoded as null",
            PASS_FIELD_NAMES[field]
        ))
    })
}

fn pass_from_fields(fields: &PassFields, base_seconds: i64) -> Result<CellPass> {
    let seconds = base_seconds
        .checked_add(required(fields[TIME], TIME)?)
        .ok_or_else(|| SubgridError::format("decoded pass time overflows"))?;
    let mut pass = CellPass::at(Timestamp::from_seconds(seconds));
    pass.height = fields[HEIGHT].map_or(NULL_HEIGHT, mm_to_height);
    pass.ccv = narrow(fields[CCV], NULL_CCV, CCV)?;
    pass.rmv = narrow(fields[RMV], NULL_RMV, RMV)?;
    pass.mdp = narrow(fields[MDP], NULL_MDP, MDP)?;
    pass.material_temperature =
        narrow(fields[TEMPERATURE], NULL_MATERIAL_TEMPERATURE, TEMPERATURE)?;
    pass.machine_speed = narrow(fields[SPEED], NULL_MACHINE_SPEED, SPEED)?;
    pass.radio_latency = narrow(fields[RADIO_LATENCY], NULL_RADIO_LATENCY, RADIO_LATENCY)?;
    pass.set_gps_store(narrow(
        Some(required(fields[GPS_STORE], GPS_STORE)?),
        0_u8,
        GPS_STORE,
    )?)?;
    pass.frequency = narrow(fields[FREQUENCY], NULL_FREQUENCY, FREQUENCY)?;
    pass.amplitude = narrow(fields[AMPLITUDE], NULL_AMPLITUDE, AMPLITUDE)?;
    pass.cca = narrow(fields[CCA], NULL_CCA, CCA)?;
    pass.machine_id = MachineId(narrow(
        Some(required(fields[MACHINE_ID], MACHINE_ID)?),
        0_u16,
        MACHINE_ID,
    )?);
    Ok(pass)
}

fn to_u32(value: usize, what: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| SubgridError::out_of_range(what, value))
}

/// Immutable compressed pass store for one segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedPassStore {
    first_real_pass_time: Timestamp,
    pass_count: u32,
    pass_count_index: BitFieldArray,
    col_bits: u8,
    first_per_cell_offset: u32,
    schema: BitFieldSchema,
    cell_offset_field: FieldDescriptor,
    pass_data: BitFieldArray,
}

impl CompressedPassStore {
    /// Encode the 32×32 pass stacks returned by `cell_passes(x, y)`.
    ///
    /// Each stack must already be time ordered. Pass times are stored at
    /// whole-second resolution.
    pub fn encode<'a, F>(cell_passes: F) -> Result<Self>
    where
        F: Fn(usize, usize) -> &'a [CellPass],
    {
        let mut col_first = [0_u32; SUBGRID_DIMENSION];
        let mut cell_rel = Vec::with_capacity(SUBGRID_CELL_COUNT);
        let mut flat: Vec<&CellPass> = Vec::new();
        for (x, first) in col_first.iter_mut().enumerate() {
            *first = to_u32(flat.len(), "segment pass count")?;
            let mut within_column = 0_usize;
            for y in 0..SUBGRID_DIMENSION {
                cell_rel.push(Some(i64::from(to_u32(within_column, "column pass count")?)));
                let passes = cell_passes(x, y);
                within_column += passes.len();
                flat.extend(passes.iter());
            }
        }
        let pass_count = to_u32(flat.len(), "segment pass count")?;

        let first_real_pass_time = flat
            .iter()
            .map(|pass| pass.time)
            .min()
            .map_or(Timestamp::default(), Timestamp::truncate_to_second);
        let base_seconds = first_real_pass_time.whole_seconds();
        let rows: Vec<PassFields> = flat
            .iter()
            .map(|pass| pass_fields(pass, base_seconds))
            .collect();

        let mut builder = BitFieldSchemaBuilder::new();
        for (field, name) in PASS_FIELD_NAMES.iter().enumerate() {
            builder = builder.field(name, rows.iter().map(|row| row[field]))?;
        }
        let schema = builder.build()?;

        let col_bits = bits_required(u64::from(col_first[SUBGRID_DIMENSION - 1]));
        let cell_offset_field = FieldDescriptor::from_values(cell_rel.iter().copied())?;
        let first_per_cell_offset = SUBGRID_DIMENSION as u32 * u32::from(col_bits);
        let index_bits = u64::from(first_per_cell_offset)
            + SUBGRID_CELL_COUNT as u64 * u64::from(cell_offset_field.bits);

        let mut pass_count_index = BitFieldArray::with_bit_len(index_bits)?;
        for (x, &first) in col_first.iter().enumerate() {
            pass_count_index.write(x as u64 * u64::from(col_bits), col_bits, u64::from(first))?;
        }
        for (cell, &rel) in cell_rel.iter().enumerate() {
            let bit_pos = u64::from(first_per_cell_offset)
                + cell as u64 * u64::from(cell_offset_field.bits);
            pass_count_index.write(
                bit_pos,
                cell_offset_field.bits,
                cell_offset_field.encode(rel)?,
            )?;
        }

        let mut pass_data = BitFieldArray::with_bit_len(schema.bits_for(u64::from(pass_count)))?;
        for (index, row) in rows.iter().enumerate() {
            schema.write_record(&mut pass_data, index as u64, row)?;
        }

        let store = Self {
            first_real_pass_time,
            pass_count,
            pass_count_index,
            col_bits,
            first_per_cell_offset,
            schema,
            cell_offset_field,
            pass_data,
        };
        debug!(
            pass_count,
            bits_per_pass = store.bits_per_pass(),
            packed_bytes = store.size_in_bytes(),
            "encoded compressed pass store"
        );
        Ok(store)
    }

    #[must_use]
    pub const fn pass_count(&self) -> u32 {
        self.pass_count
    }

    /// Earliest pass time in the segment, truncated to the second.
    #[must_use]
    pub const fn first_real_pass_time(&self) -> Timestamp {
        self.first_real_pass_time
    }

    #[must_use]
    pub const fn bits_per_pass(&self) -> u32 {
        self.schema.bits_per_record()
    }

    /// Per-field layout of a pass record, in [`PASS_FIELD_NAMES`] order.
    #[must_use]
    pub fn field_descriptors(&self) -> &[FieldDescriptor] {
        self.schema.fields()
    }

    /// Bytes held by both packed blocks.
    #[must_use]
    pub fn size_in_bytes(&self) -> usize {
        self.pass_count_index.size_in_bytes() + self.pass_data.size_in_bytes()
    }

    fn column_first_index(&self, x: usize) -> Result<u32> {
        let raw = self
            .pass_count_index
            .read(x as u64 * u64::from(self.col_bits), self.col_bits)?;
        u32::try_from(raw).map_err(|_| SubgridError::format("column offset exceeds u32"))
    }

    fn cell_relative_offset(&self, x: usize, y: usize) -> Result<u32> {
        let cell = (x * SUBGRID_DIMENSION + y) as u64;
        let bits = self.cell_offset_field.bits;
        let raw = self.pass_count_index.read(
            u64::from(self.first_per_cell_offset) + cell * u64::from(bits),
            bits,
        )?;
        let value = self
            .cell_offset_field
            .decode(raw)
            .ok_or_else(|| SubgridError::format("per-cell offset decoded as null"))?;
        u32::try_from(value).map_err(|_| SubgridError::format("per-cell offset exceeds u32"))
    }

    fn first_index(&self, x: usize, y: usize) -> Result<u32> {
        let first = u64::from(self.column_first_index(x)?)
            + u64::from(self.cell_relative_offset(x, y)?);
        u32::try_from(first).map_err(|_| SubgridError::format("cell first index exceeds u32"))
    }

    /// `(pass_count, first_index)` of cell `(x, y)`.
    pub fn pass_count_and_first_index(&self, x: usize, y: usize) -> Result<(u32, u32)> {
        check_cell(x, y)?;
        let first = self.first_index(x, y)?;
        let next = if y + 1 < SUBGRID_DIMENSION {
            self.first_index(x, y + 1)?
        } else if x + 1 < SUBGRID_DIMENSION {
            self.column_first_index(x + 1)?
        } else {
            self.pass_count
        };
        let count = next.checked_sub(first).ok_or_else(|| {
            SubgridError::format(format!(
                "pass index not monotonic at cell ({x}, {y}): {first} > {next}"
            ))
        })?;
        Ok((count, first))
    }

    /// Decode the pass at `global_index` in flattening order.
    pub fn extract_pass(&self, global_index: u32) -> Result<CellPass> {
        if global_index >= self.pass_count {
            return Err(SubgridError::out_of_range(
                "pass index",
                format!("{global_index} >= {}", self.pass_count),
            ));
        }
        let record = u64::from(global_index);
        let mut fields = [None; PASS_FIELD_COUNT];
        for (field, slot) in fields.iter_mut().enumerate() {
            *slot = self.schema.read_field(&self.pass_data, record, field)?;
        }
        pass_from_fields(&fields, self.first_real_pass_time.whole_seconds())
    }

    /// Decode every pass of cell `(x, y)`, in time order.
    pub fn decode_all(&self, x: usize, y: usize) -> Result<Vec<CellPass>> {
        let (count, first) = self.pass_count_and_first_index(x, y)?;
        (first..first + count)
            .map(|index| self.extract_pass(index))
            .collect()
    }

    pub fn write_to(&self, buf: &mut Vec<u8>) -> Result<()> {
        append_i64_le(buf, self.first_real_pass_time.ticks());
        append_count_i32(buf, self.pass_count as usize, "segment_pass_count")?;
        self.pass_count_index.write_to(buf)?;
        append_u8(buf, self.col_bits);
        append_count_i32(
            buf,
            self.first_per_cell_offset as usize,
            "first_per_cell_offset",
        )?;
        self.schema.write_descriptors(buf)?;
        append_count_i32(buf, self.bits_per_pass() as usize, "bits_per_pass")?;
        self.cell_offset_field.write_to(buf);
        self.pass_data.write_to(buf)
    }

    pub fn read_from(bytes: &[u8], cursor: &mut usize) -> Result<Self> {
        let first_real_pass_time =
            Timestamp::from_ticks(read_i64_le(bytes, cursor, "first_real_pass_time")?);
        let pass_count = to_u32(
            read_count_i32(bytes, cursor, "segment_pass_count")?,
            "segment_pass_count",
        )?;
        let pass_count_index = BitFieldArray::read_from(bytes, cursor, "pass_count_index")?;
        let col_bits = read_u8(bytes, cursor, "col_bits")?;
        let first_per_cell_offset = to_u32(
            read_count_i32(bytes, cursor, "first_per_cell_offset")?,
            "first_per_cell_offset",
        )?;
        let schema = BitFieldSchema::read_descriptors(bytes, cursor, &PASS_FIELD_NAMES)?;
        let bits_per_pass = read_count_i32(bytes, cursor, "bits_per_pass")?;
        let cell_offset_field = FieldDescriptor::read_from(bytes, cursor, "cell_offset")?;
        let pass_data = BitFieldArray::read_from(bytes, cursor, "pass_data")?;

        if col_bits > 32 || first_per_cell_offset != SUBGRID_DIMENSION as u32 * u32::from(col_bits)
        {
            return Err(SubgridError::format(format!(
                "per-cell offsets start at bit {first_per_cell_offset}, expected 32 × {col_bits}"
            )));
        }
        if bits_per_pass != schema.bits_per_record() as usize {
            return Err(SubgridError::format(format!(
                "bits_per_pass {bits_per_pass} disagrees with descriptors ({})",
                schema.bits_per_record()
            )));
        }
        let index_bits = u64::from(first_per_cell_offset)
            + SUBGRID_CELL_COUNT as u64 * u64::from(cell_offset_field.bits);
        if pass_count_index.bit_len() != index_bits {
            return Err(SubgridError::format(format!(
                "pass count index holds {} bits, layout needs {index_bits}",
                pass_count_index.bit_len()
            )));
        }
        if pass_data.bit_len() != schema.bits_for(u64::from(pass_count)) {
            return Err(SubgridError::format(format!(
                "pass data holds {} bits, {pass_count} passes need {}",
                pass_data.bit_len(),
                schema.bits_for(u64::from(pass_count))
            )));
        }

        Ok(Self {
            first_real_pass_time,
            pass_count,
            pass_count_index,
            col_bits,
            first_per_cell_offset,
            schema,
            cell_offset_field,
            pass_data,
        })
    }
}

#[cfg(test)]
mod tests {
    use sgl_types::{GpsMode, PassType};

    use super::*;

    fn empty_grid() -> Vec<Vec<Vec<CellPass>>> {
        vec![vec![Vec::new(); SUBGRID_DIMENSION]; SUBGRID_DIMENSION]
    }

    fn encode_grid(grid: &[Vec<Vec<CellPass>>]) -> CompressedPassStore {
        CompressedPassStore::encode(|x, y| grid[x][y].as_slice()).expect("encode")
    }

    #[test]
    fn test_empty_segment() {
        let grid = empty_grid();
        let store = encode_grid(&grid);
        assert_eq!(store.pass_count(), 0);
        assert_eq!(store.pass_count_and_first_index(31, 31).unwrap(), (0, 0));
        assert!(store.decode_all(5, 5).unwrap().is_empty());
        assert!(store.extract_pass(0).is_err());
    }

    #[test]
    fn test_single_cell_keeps_values_and_nulls() {
        let mut grid = empty_grid();
        let mut first = CellPass::at(Timestamp::from_seconds(1_000));
        first.height = 12.345;
        first.ccv = 80;
        first.gps_mode = GpsMode::Fixed;
        first.pass_type = PassType::Rear;
        first.machine_id = MachineId(3);
        let mut second = CellPass::at(Timestamp::from_seconds(1_060));
        second.cca = 4;
        second.half_pass = true;
        grid[3][7] = vec![first, second];

        let store = encode_grid(&grid);
        assert_eq!(store.pass_count(), 2);
        assert_eq!(store.first_real_pass_time(), Timestamp::from_seconds(1_000));
        assert_eq!(store.pass_count_and_first_index(3, 7).unwrap(), (2, 0));
        assert_eq!(store.pass_count_and_first_index(3, 8).unwrap(), (0, 2));
        assert_eq!(store.decode_all(3, 7).unwrap(), vec![first, second]);
    }

    #[test]
    fn test_non_finite_height_packs_as_null() {
        let mut grid = empty_grid();
        for (y, height) in [f32::NAN, f32::INFINITY, f32::NEG_INFINITY, 1.5].into_iter().enumerate() {
            let mut pass = CellPass::at(Timestamp::from_seconds(10));
            pass.height = height;
            pass.ccv = 7;
            grid[0][y] = vec![pass];
        }
        let store = encode_grid(&grid);
        for y in 0..3 {
            let decoded = store.decode_all(0, y).unwrap();
            assert_eq!(decoded[0].height, NULL_HEIGHT);
            assert_eq!(decoded[0].ccv, 7);
        }
        assert_eq!(store.decode_all(0, 3).unwrap()[0].height, 1.5);
    }

    #[test]
    fn test_non_null_field_costs_no_null_bit() {
        let mut grid = empty_grid();
        for (y, ccv) in [0_i16, 1, 2, 3].into_iter().enumerate() {
            let mut pass = CellPass::at(Timestamp::from_seconds(10));
            pass.ccv = ccv;
            grid[0][y] = vec![pass];
        }
        let store = encode_grid(&grid);
        let ccv = store.field_descriptors()[CCV];
        assert!(!ccv.nullable);
        assert_eq!(ccv.bits, 2);
        let rmv = store.field_descriptors()[RMV];
        assert!(rmv.nullable);
        assert_eq!(rmv.bits, 0, "all-null field collapses");
    }

    #[test]
    fn test_last_cell_count_uses_segment_total() {
        let mut grid = empty_grid();
        grid[31][31] = vec![
            CellPass::at(Timestamp::from_seconds(1)),
            CellPass::at(Timestamp::from_seconds(2)),
            CellPass::at(Timestamp::from_seconds(3)),
        ];
        grid[0][0] = vec![CellPass::at(Timestamp::from_seconds(5))];
        let store = encode_grid(&grid);
        assert_eq!(store.pass_count_and_first_index(0, 0).unwrap(), (1, 0));
        assert_eq!(store.pass_count_and_first_index(31, 31).unwrap(), (3, 1));
        assert_eq!(store.first_real_pass_time(), Timestamp::from_seconds(1));
    }

    #[test]
    fn test_stream_round_trip_and_trailing_garbage_untouched() {
        let mut grid = empty_grid();
        let mut pass = CellPass::at(Timestamp::from_seconds(77));
        pass.material_temperature = 1450;
        grid[10][20] = vec![pass];
        let store = encode_grid(&grid);

        let mut buf = Vec::new();
        store.write_to(&mut buf).unwrap();
        let body_len = buf.len();
        buf.extend_from_slice(&[0xAA, 0xBB]);
        let mut cursor = 0;
        let restored = CompressedPassStore::read_from(&buf, &mut cursor).unwrap();
        assert_eq!(cursor, body_len);
        assert_eq!(restored, store);
        assert_eq!(restored.decode_all(10, 20).unwrap(), vec![pass]);
    }

    #[test]
    fn test_truncated_stream_is_format_error() {
        let mut grid = empty_grid();
        grid[1][1] = vec![CellPass::at(Timestamp::from_seconds(9))];
        let store = encode_grid(&grid);
        let mut buf = Vec::new();
        store.write_to(&mut buf).unwrap();
        buf.truncate(buf.len() - 4);
        let mut cursor = 0;
        let err = CompressedPassStore::read_from(&buf, &mut cursor).unwrap_err();
        assert!(matches!(err, SubgridError::Format { .. }));
    }

    #[test]
    fn test_store_is_shareable_between_readers() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CompressedPassStore>();
    }
}
