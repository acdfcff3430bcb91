use crate::error::CubeError;

/// Bit-level view over a decrypted frame.
///
/// Gen3 frames pack fields at arbitrary bit offsets, MSB-first within each
/// byte. Multi-byte words of 16 or 32 bits may additionally be transmitted
/// with little-endian byte order.
pub struct BitReader<'a> {
    data: &'a [u8],
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// Total number of addressable bits.
    pub fn len_bits(&self) -> usize {
        self.data.len() * 8
    }

    fn check_range(&self, start_bit: usize, bit_len: usize) -> Result<(), CubeError> {
        if start_bit + bit_len > self.len_bits() {
            return Err(CubeError::OutOfRange {
                start_bit,
                bit_len,
                buffer_bits: self.len_bits(),
            });
        }
        Ok(())
    }

    fn bit(&self, index: usize) -> u32 {
        ((self.data[index / 8] >> (7 - (index % 8))) & 1) as u32
    }

    /// Read `bit_len` bits starting at `start_bit`, big-endian bit order.
    pub fn get_bits(&self, start_bit: usize, bit_len: usize) -> Result<u32, CubeError> {
        debug_assert!(bit_len > 0 && bit_len <= 32);
        self.check_range(start_bit, bit_len)?;
        let mut value = 0u32;
        for i in 0..bit_len {
            value = (value << 1) | self.bit(start_bit + i);
        }
        Ok(value)
    }

    /// Read a 16- or 32-bit word at `start_bit` with little-endian byte
    /// order, matching how the cube transmits serials and timestamps.
    pub fn get_bits_le(&self, start_bit: usize, bit_len: usize) -> Result<u32, CubeError> {
        if bit_len != 16 && bit_len != 32 {
            return Err(CubeError::Parse(format!(
                "little-endian reads must be 16 or 32 bits, got {bit_len}"
            )));
        }
        self.check_range(start_bit, bit_len)?;
        let mut value = 0u32;
        for byte_index in (0..bit_len / 8).rev() {
            let byte = self.get_bits(start_bit + byte_index * 8, 8)?;
            value = (value << 8) | byte;
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn isolates_face_code_at_bit_74() {
        // Byte 9 holds direction (2 bits) then face code (6 bits). Surround
        // with all-ones bytes to prove the slice is exact.
        let mut frame = [0xFFu8; 16];
        frame[9] = (0b01 << 6) | 32;
        let reader = BitReader::new(&frame);
        assert_eq!(reader.get_bits(74, 6).unwrap(), 32);
        assert_eq!(reader.get_bits(72, 2).unwrap(), 0b01);
    }

    #[test]
    fn little_endian_word_assembly() {
        let frame = [0x00, 0x00, 0x00, 0x34, 0x12, 0x00];
        let reader = BitReader::new(&frame);
        assert_eq!(reader.get_bits_le(24, 16).unwrap(), 0x1234);

        let frame32 = [0x78, 0x56, 0x34, 0x12];
        let reader = BitReader::new(&frame32);
        assert_eq!(reader.get_bits_le(0, 32).unwrap(), 0x12345678);
    }

    #[test]
    fn unaligned_read_spans_byte_boundary() {
        // bits 6..11 = 0b10110
        let frame = [0b0000_0010, 0b1100_0000];
        let reader = BitReader::new(&frame);
        assert_eq!(reader.get_bits(6, 5).unwrap(), 0b10110);
    }

    #[test]
    fn out_of_range_fails() {
        let frame = [0u8; 2];
        let reader = BitReader::new(&frame);
        assert!(matches!(
            reader.get_bits(12, 8),
            Err(CubeError::OutOfRange { .. })
        ));
        assert!(reader.get_bits(8, 8).is_ok());
    }

    #[test]
    fn rejects_odd_little_endian_width() {
        let frame = [0u8; 4];
        let reader = BitReader::new(&frame);
        assert!(matches!(
            reader.get_bits_le(0, 24),
            Err(CubeError::Parse(_))
        ));
    }
}
