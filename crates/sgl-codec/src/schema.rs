//! Bit-field schemas: per-field ranges, widths and chained offsets.
//!
//! A schema is computed once from the values it will hold. Each field stores
//! `value - min` in just enough bits for its range. When any value is null the
//! field reserves `range + 1` as its null token; a field with no nulls spends
//! no bit on nullability. A field whose values are all null (or absent)
//! collapses to zero width.

use sgl_error::{Result, SubgridError};

use crate::bitfield::{BitFieldArray, bits_required};
use crate::wire::{append_i64_le, append_u8, append_u16_le, read_i64_le, read_u8, read_u16_le};

/// Range, width and position of one packed field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub min: i64,
    pub max: i64,
    /// Raw encoded value meaning null; meaningful only when `nullable`.
    pub null_token: u64,
    /// Bit offset of the field inside a record.
    pub offset: u16,
    pub bits: u8,
    pub nullable: bool,
}

impl FieldDescriptor {
    /// Size a descriptor for `values`, where `None` is a null.
    pub fn from_values<I>(values: I) -> Result<Self>
    where
        I: IntoIterator<Item = Option<i64>>,
    {
        let mut min = i64::MAX;
        let mut max = i64::MIN;
        let mut saw_value = false;
        let mut saw_null = false;
        for value in values {
            match value {
                Some(v) => {
                    saw_value = true;
                    min = min.min(v);
                    max = max.max(v);
                }
                None => saw_null = true,
            }
        }

        if !saw_value {
            return Ok(Self {
                nullable: saw_null,
                ..Self::default()
            });
        }

        let range = u64::try_from(i128::from(max) - i128::from(min))
            .map_err(|_| SubgridError::out_of_range("field range", format!("[{min}, {max}]")))?;
        if saw_null {
            let null_token = range
                .checked_add(1)
                .ok_or_else(|| SubgridError::out_of_range("nullable field range", range))?;
            Ok(Self {
                min,
                max,
                null_token,
                offset: 0,
                bits: bits_required(null_token),
                nullable: true,
            })
        } else {
            Ok(Self {
                min,
                max,
                null_token: 0,
                offset: 0,
                bits: bits_required(range),
                nullable: false,
            })
        }
    }

    /// Map a value (or null) to its raw encoded form.
    pub fn encode(&self, value: Option<i64>) -> Result<u64> {
        match value {
            None if self.nullable => Ok(self.null_token),
            None => Err(SubgridError::invariant(
                "null written to a non-nullable bit field",
            )),
            Some(v) if v < self.min || v > self.max => Err(SubgridError::out_of_range(
                "bit-field value",
                format!("{v} not in [{}, {}]", self.min, self.max),
            )),
            Some(v) => Ok((i128::from(v) - i128::from(self.min)) as u64),
        }
    }

    /// Inverse of [`FieldDescriptor::encode`].
    #[must_use]
    pub fn decode(&self, raw: u64) -> Option<i64> {
        if self.nullable && raw == self.null_token {
            return None;
        }
        Some((i128::from(self.min) + i128::from(raw)) as i64)
    }

    pub fn write_to(&self, buf: &mut Vec<u8>) {
        append_i64_le(buf, self.min);
        append_i64_le(buf, self.max);
        append_i64_le(buf, self.null_token as i64);
        append_u16_le(buf, self.offset);
        append_u8(buf, self.bits);
        append_u8(buf, u8::from(self.nullable));
    }

    pub fn read_from(bytes: &[u8], cursor: &mut usize, field: &str) -> Result<Self> {
        let min = read_i64_le(bytes, cursor, field)?;
        let max = read_i64_le(bytes, cursor, field)?;
        let null_token = read_i64_le(bytes, cursor, field)? as u64;
        let offset = read_u16_le(bytes, cursor, field)?;
        let bits = read_u8(bytes, cursor, field)?;
        let nullable = match read_u8(bytes, cursor, field)? {
            0 => false,
            1 => true,
            other => {
                return Err(SubgridError::format(format!(
                    "{field}: nullable flag {other} is not 0 or 1"
                )));
            }
        };
        if bits > 64 || min > max {
            return Err(SubgridError::format(format!(
                "{field}: descriptor bits={bits} range=[{min}, {max}] is invalid"
            )));
        }
        Ok(Self {
            min,
            max,
            null_token,
            offset,
            bits,
            nullable,
        })
    }
}

/// Collects fields and chains their offsets into one record layout.
#[derive(Debug, Default)]
pub struct BitFieldSchemaBuilder {
    names: Vec<&'static str>,
    fields: Vec<FieldDescriptor>,
    next_offset: u32,
}

impl BitFieldSchemaBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a field sized for `values`.
    pub fn field<I>(mut self, name: &'static str, values: I) -> Result<Self>
    where
        I: IntoIterator<Item = Option<i64>>,
    {
        let mut descriptor = FieldDescriptor::from_values(values)?;
        descriptor.offset = u16::try_from(self.next_offset)
            .map_err(|_| SubgridError::out_of_range("record width", self.next_offset))?;
        self.next_offset += u32::from(descriptor.bits);
        self.names.push(name);
        self.fields.push(descriptor);
        Ok(self)
    }

    pub fn build(self) -> Result<BitFieldSchema> {
        let bits_per_record = u16::try_from(self.next_offset)
            .map_err(|_| SubgridError::out_of_range("record width", self.next_offset))?;
        Ok(BitFieldSchema {
            names: self.names,
            fields: self.fields,
            bits_per_record: u32::from(bits_per_record),
        })
    }
}

/// Fixed-width record layout made of [`FieldDescriptor`]s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitFieldSchema {
    names: Vec<&'static str>,
    fields: Vec<FieldDescriptor>,
    bits_per_record: u32,
}

impl BitFieldSchema {
    #[must_use]
    pub const fn bits_per_record(&self) -> u32 {
        self.bits_per_record
    }

    #[must_use]
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    #[must_use]
    pub fn field_name(&self, index: usize) -> &'static str {
        self.names.get(index).copied().unwrap_or("<unnamed>")
    }

    /// Bits needed to hold `record_count` records.
    #[must_use]
    pub fn bits_for(&self, record_count: u64) -> u64 {
        record_count * u64::from(self.bits_per_record)
    }

    /// Encode one record at position `record_index`.
    pub fn write_record(
        &self,
        array: &mut BitFieldArray,
        record_index: u64,
        values: &[Option<i64>],
    ) -> Result<()> {
        if values.len() != self.fields.len() {
            return Err(SubgridError::internal(format!(
                "record has {} values for {} fields",
                values.len(),
                self.fields.len()
            )));
        }
        let base = self.bits_for(record_index);
        for (index, (field, value)) in self.fields.iter().zip(values).enumerate() {
            let raw = field.encode(*value).map_err(|err| {
                SubgridError::internal(format!("field {}: {err}", self.field_name(index)))
            })?;
            array.write(base + u64::from(field.offset), field.bits, raw)?;
        }
        Ok(())
    }

    /// Decode field `field_index` of record `record_index`.
    pub fn read_field(
        &self,
        array: &BitFieldArray,
        record_index: u64,
        field_index: usize,
    ) -> Result<Option<i64>> {
        let field = self.fields.get(field_index).ok_or_else(|| {
            SubgridError::internal(format!("field index {field_index} out of schema"))
        })?;
        let raw = array.read(
            self.bits_for(record_index) + u64::from(field.offset),
            field.bits,
        )?;
        Ok(field.decode(raw))
    }

    /// Serialize the descriptors: `[count u8] [descriptors]`.
    pub fn write_descriptors(&self, buf: &mut Vec<u8>) -> Result<()> {
        let count = u8::try_from(self.fields.len())
            .map_err(|_| SubgridError::out_of_range("field count", self.fields.len()))?;
        append_u8(buf, count);
        for field in &self.fields {
            field.write_to(buf);
        }
        Ok(())
    }

    /// Restore descriptors written by [`BitFieldSchema::write_descriptors`].
    ///
    /// `names` must list the expected fields in order; a count mismatch or a
    /// layout whose offsets do not chain is a format error.
    pub fn read_descriptors(
        bytes: &[u8],
        cursor: &mut usize,
        names: &[&'static str],
    ) -> Result<Self> {
        let count = usize::from(read_u8(bytes, cursor, "field_count")?);
        if count != names.len() {
            return Err(SubgridError::format(format!(
                "expected {} field descriptors, found {count}",
                names.len()
            )));
        }
        let mut fields = Vec::with_capacity(count);
        let mut expected_offset = 0_u32;
        for name in names {
            let field = FieldDescriptor::read_from(bytes, cursor, name)?;
            if u32::from(field.offset) != expected_offset {
                return Err(SubgridError::format(format!(
                    "field {name} at bit {} but previous fields end at {expected_offset}",
                    field.offset
                )));
            }
            expected_offset += u32::from(field.bits);
            fields.push(field);
        }
        Ok(Self {
            names: names.to_vec(),
            fields,
            bits_per_record: expected_offset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_nullable_range() {
        let field = FieldDescriptor::from_values([Some(10), Some(13), Some(11)]).unwrap();
        assert!(!field.nullable);
        assert_eq!((field.min, field.max), (10, 13));
        assert_eq!(field.bits, 2);
        assert_eq!(field.encode(Some(13)).unwrap(), 3);
        assert_eq!(field.decode(3), Some(13));
        assert!(field.encode(None).is_err());
        assert!(field.encode(Some(14)).is_err());
    }

    #[test]
    fn test_null_reserves_extra_value() {
        let field = FieldDescriptor::from_values([Some(0), None, Some(3)]).unwrap();
        assert!(field.nullable);
        assert_eq!(field.null_token, 4);
        assert_eq!(field.bits, 3, "values 0..=3 plus null token 4");
        assert_eq!(field.decode(field.encode(None).unwrap()), None);
        assert_eq!(field.decode(field.encode(Some(3)).unwrap()), Some(3));
    }

    #[test]
    fn test_constant_field_is_zero_width() {
        let field = FieldDescriptor::from_values([Some(-7), Some(-7)]).unwrap();
        assert_eq!(field.bits, 0);
        assert_eq!(field.decode(0), Some(-7));

        let all_null = FieldDescriptor::from_values([None, None]).unwrap();
        assert_eq!(all_null.bits, 0);
        assert!(all_null.nullable);
        assert_eq!(all_null.decode(0), None);
    }

    #[test]
    fn test_builder_chains_offsets() {
        let schema = BitFieldSchemaBuilder::new()
            .field("a", [Some(0), Some(7)])
            .unwrap()
            .field("b", [Some(5), Some(5)])
            .unwrap()
            .field("c", [None, Some(1)])
            .unwrap()
            .build()
            .unwrap();
        let offsets: Vec<_> = schema.fields().iter().map(|f| (f.offset, f.bits)).collect();
        assert_eq!(offsets, vec![(0, 3), (3, 0), (3, 1)]);
        assert_eq!(schema.bits_per_record(), 4);
    }

    #[test]
    fn test_records_round_trip_through_array() {
        let rows = [
            [Some(1), Some(-4), None],
            [Some(9), Some(100), Some(2)],
            [Some(3), None, Some(0)],
        ];
        let mut builder = BitFieldSchemaBuilder::new();
        for (column, name) in ["x", "y", "z"].into_iter().enumerate() {
            builder = builder.field(name, rows.iter().map(|row| row[column])).unwrap();
        }
        let schema = builder.build().unwrap();
        let mut array = BitFieldArray::with_bit_len(schema.bits_for(rows.len() as u64)).unwrap();
        for (index, row) in rows.iter().enumerate() {
            schema.write_record(&mut array, index as u64, row).unwrap();
        }
        for (index, row) in rows.iter().enumerate() {
            for (field, expected) in row.iter().enumerate() {
                let got = schema.read_field(&array, index as u64, field).unwrap();
                assert_eq!(got, *expected, "record {index} field {field}");
            }
        }
    }

    #[test]
    fn test_descriptor_block_round_trip() {
        let schema = BitFieldSchemaBuilder::new()
            .field("a", [Some(-3), Some(3)])
            .unwrap()
            .field("b", [None, Some(1_000_000)])
            .unwrap()
            .build()
            .unwrap();
        let mut buf = Vec::new();
        schema.write_descriptors(&mut buf).unwrap();
        let mut cursor = 0;
        let restored = BitFieldSchema::read_descriptors(&buf, &mut cursor, &["a", "b"]).unwrap();
        assert_eq!(restored, schema);
        assert_eq!(cursor, buf.len());

        let mut cursor = 0;
        let err = BitFieldSchema::read_descriptors(&buf, &mut cursor, &["a"]).unwrap_err();
        assert!(matches!(err, SubgridError::Format { .. }));
    }
}
