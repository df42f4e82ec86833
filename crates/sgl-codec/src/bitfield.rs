//! Fixed-capacity array of variable-width bit fields.
//!
//! Values are packed LSB-first into `u64` words and may straddle a word
//! boundary. A field is at most 64 bits wide; a zero-width field occupies no
//! space and always reads back as zero.
//!
//! Wire layout: `[bit_len u64] [word_count u32] [word_count × u64]`.

use sgl_error::{Result, SubgridError};

use crate::wire::{append_u32_le, append_u64_le, read_u32_le, read_u64_le};

const WORD_BITS: u64 = 64;

/// Number of bits needed to represent every value in `0..=max`.
#[must_use]
pub const fn bits_required(max: u64) -> u8 {
    (u64::BITS - max.leading_zeros()) as u8
}

const fn mask(bits: u8) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1_u64 << bits) - 1
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BitFieldArray {
    words: Vec<u64>,
    bit_len: u64,
}

impl BitFieldArray {
    /// Zeroed array able to hold `bit_len` bits.
    pub fn with_bit_len(bit_len: u64) -> Result<Self> {
        let word_count = usize::try_from(bit_len.div_ceil(WORD_BITS))
            .map_err(|_| SubgridError::out_of_range("bit-field length", bit_len))?;
        Ok(Self {
            words: vec![0; word_count],
            bit_len,
        })
    }

    #[must_use]
    pub const fn bit_len(&self) -> u64 {
        self.bit_len
    }

    /// Heap bytes held by the packed words.
    #[must_use]
    pub fn size_in_bytes(&self) -> usize {
        self.words.len() * std::mem::size_of::<u64>()
    }

    fn check_span(&self, bit_pos: u64, bits: u8) -> Result<()> {
        if bits > 64 {
            return Err(SubgridError::internal(format!(
                "bit-field width {bits} exceeds 64"
            )));
        }
        let end = bit_pos
            .checked_add(u64::from(bits))
            .ok_or_else(|| SubgridError::out_of_range("bit position", bit_pos))?;
        if end > self.bit_len {
            return Err(SubgridError::format(format!(
                "bit-field access [{bit_pos}, {end}) beyond length {}",
                self.bit_len
            )));
        }
        Ok(())
    }

    /// Store the low `bits` bits of `value` at `bit_pos`.
    pub fn write(&mut self, bit_pos: u64, bits: u8, value: u64) -> Result<()> {
        if bits == 0 {
            return Ok(());
        }
        self.check_span(bit_pos, bits)?;
        let field_mask = mask(bits);
        if value & !field_mask != 0 {
            return Err(SubgridError::internal(format!(
                "value {value} does not fit in {bits} bits"
            )));
        }

        let word = (bit_pos / WORD_BITS) as usize;
        let shift = (bit_pos % WORD_BITS) as u32;
        self.words[word] = (self.words[word] & !(field_mask << shift)) | (value << shift);

        if u64::from(shift) + u64::from(bits) > WORD_BITS {
            let carried = WORD_BITS as u32 - shift;
            let next = &mut self.words[word + 1];
            *next = (*next & !(field_mask >> carried)) | (value >> carried);
        }
        Ok(())
    }

    /// Read `bits` bits starting at `bit_pos`.
    pub fn read(&self, bit_pos: u64, bits: u8) -> Result<u64> {
        if bits == 0 {
            return Ok(0);
        }
        self.check_span(bit_pos, bits)?;

        let word = (bit_pos / WORD_BITS) as usize;
        let shift = (bit_pos % WORD_BITS) as u32;
        let mut value = self.words[word] >> shift;
        if u64::from(shift) + u64::from(bits) > WORD_BITS {
            value |= self.words[word + 1] << (WORD_BITS as u32 - shift);
        }
        Ok(value & mask(bits))
    }

    pub fn write_to(&self, buf: &mut Vec<u8>) -> Result<()> {
        append_u64_le(buf, self.bit_len);
        let word_count = u32::try_from(self.words.len())
            .map_err(|_| SubgridError::out_of_range("bit-field word count", self.words.len()))?;
        append_u32_le(buf, word_count);
        for &word in &self.words {
            append_u64_le(buf, word);
        }
        Ok(())
    }

    pub fn read_from(bytes: &[u8], cursor: &mut usize, field: &str) -> Result<Self> {
        let bit_len = read_u64_le(bytes, cursor, field)?;
        let word_count = read_u32_le(bytes, cursor, field)? as usize;
        if (word_count as u64) != bit_len.div_ceil(WORD_BITS) {
            return Err(SubgridError::format(format!(
                "{field}: {word_count} words cannot hold exactly {bit_len} bits"
            )));
        }
        let available = bytes.len().saturating_sub(*cursor) / 8;
        if word_count > available {
            return Err(SubgridError::format(format!(
                "{field}: {word_count} words declared, {available} present"
            )));
        }
        let mut words = Vec::with_capacity(word_count);
        for _ in 0..word_count {
            words.push(read_u64_le(bytes, cursor, field)?);
        }
        Ok(Self { words, bit_len })
    }
}
