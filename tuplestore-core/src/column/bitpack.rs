//! Bit-level packing for boolean columns
//!
//! Bit order is LSB-first: element `i` lives in byte `i / 8` under mask
//! `1 << (i % 8)`.

/// Accumulates booleans eight to a byte
#[derive(Debug, Default)]
pub struct BitPacker {
    buffer: Vec<u8>,
    current_byte: u8,
    bit_position: u8,
}

impl BitPacker {
    /// Create a new BitPacker
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with capacity hint (in bytes)
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
            current_byte: 0,
            bit_position: 0,
        }
    }

    /// Append a single bit
    #[inline]
    pub fn push(&mut self, bit: bool) {
        if bit {
            self.current_byte |= 1 << self.bit_position;
        }
        self.bit_position += 1;

        if self.bit_position == 8 {
            self.buffer.push(self.current_byte);
            self.current_byte = 0;
            self.bit_position = 0;
        }
    }

    /// Number of bits appended
    pub fn len(&self) -> u64 {
        self.buffer.len() as u64 * 8 + self.bit_position as u64
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty() && self.bit_position == 0
    }

    /// Bytes needed to hold the appended bits
    pub fn byte_len(&self) -> usize {
        self.buffer.len() + usize::from(self.bit_position > 0)
    }

    /// Take the packed bytes (flushing a partial byte) and reset
    pub fn take(&mut self) -> Vec<u8> {
        if self.bit_position > 0 {
            self.buffer.push(self.current_byte);
        }
        self.current_byte = 0;
        self.bit_position = 0;
        std::mem::take(&mut self.buffer)
    }

    /// Finish writing and return the buffer
    pub fn finish(mut self) -> Vec<u8> {
        self.take()
    }
}

/// Random and sequential access over packed bits
#[derive(Debug, Clone, Copy)]
pub struct BitUnpacker<'a> {
    data: &'a [u8],
}

impl<'a> BitUnpacker<'a> {
    /// Create a new BitUnpacker
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// Read the bit at `index`
    #[inline]
    pub fn get(&self, index: usize) -> Option<bool> {
        self.data
            .get(index / 8)
            .map(|byte| (byte >> (index % 8)) & 1 == 1)
    }

    /// Iterate over the first `count` bits
    pub fn iter(&self, count: usize) -> impl Iterator<Item = bool> + 'a {
        let data = self.data;
        (0..count).map_while(move |i| data.get(i / 8).map(|b| (b >> (i % 8)) & 1 == 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_order_is_lsb_first() {
        let mut packer = BitPacker::new();
        for bit in [true, false, false, true, false, false, true, false, false, true] {
            packer.push(bit);
        }
        assert_eq!(packer.len(), 10);
        assert_eq!(packer.byte_len(), 2);

        let bytes = packer.finish();
        assert_eq!(bytes, vec![0b0100_1001, 0b0000_0010]);

        let unpacker = BitUnpacker::new(&bytes);
        let read: Vec<bool> = unpacker.iter(10).collect();
        assert_eq!(
            read,
            vec![true, false, false, true, false, false, true, false, false, true]
        );
        assert_eq!(unpacker.get(9), Some(true));
        assert_eq!(unpacker.get(16), None);
    }

    #[test]
    fn test_take_resets() {
        let mut packer = BitPacker::with_capacity(4);
        packer.push(true);
        assert_eq!(packer.take(), vec![1]);
        assert!(packer.is_empty());

        packer.push(false);
        packer.push(true);
        assert_eq!(packer.take(), vec![0b10]);
    }
}
