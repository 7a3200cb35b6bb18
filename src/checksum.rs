use byteorder::{ByteOrder, LittleEndian};

/// Calculates the 8-bit XOR checksum carried by long command and response frames.
#[derive(Debug, Clone, PartialEq)]
pub struct Checksum {
    current: u8,
}

impl Checksum {
    /// Creates a new `Checksum` instance, initialized to 0.
    #[inline]
    pub fn new() -> Checksum {
        Checksum { current: 0 }
    }

    /// Includes a single byte in the checksum calculation.
    #[inline]
    pub fn push(&mut self, byte: u8) {
        self.current ^= byte;
    }

    /// Includes a slice of bytes in the checksum calculation.
    ///
    /// # Arguments
    ///
    /// * `data` - The byte slice to XOR into the current checksum.
    #[inline]
    pub fn push_slice(&mut self, data: &[u8]) {
        for d in data {
            self.current ^= d;
        }
    }

    /// Returns the calculated checksum value.
    #[inline]
    pub fn checksum(&self) -> u8 {
        self.current
    }
}

/// 16-bit XOR checksum of measurement packets.
///
/// Every little-endian word of the packet except the checksum itself is folded in,
/// starting with the packet marker.
#[derive(Debug, Clone, PartialEq)]
pub struct WordChecksum {
    current: u16,
}

impl WordChecksum {
    /// Starts a checksum seeded with `seed`.
    #[inline]
    pub fn with_seed(seed: u16) -> WordChecksum {
        WordChecksum { current: seed }
    }

    #[inline]
    pub fn push_word(&mut self, word: u16) {
        self.current ^= word;
    }

    /// Folds `data` in as consecutive little-endian words. A trailing odd byte is ignored.
    pub fn push_words(&mut self, data: &[u8]) {
        for pair in data.chunks_exact(2) {
            self.current ^= LittleEndian::read_u16(pair);
        }
    }

    #[inline]
    pub fn checksum(&self) -> u16 {
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::{Checksum, WordChecksum};

    #[test]
    fn byte_checksum_is_xor() {
        let mut checksum = Checksum::new();
        checksum.push_slice(&[0x10, 0x27, 0x00, 0x00]);
        assert_eq!(checksum.checksum(), 0x37);
        checksum.push(0x37);
        assert_eq!(checksum.checksum(), 0);
    }

    #[test]
    fn word_checksum_folds_little_endian_pairs() {
        let mut checksum = WordChecksum::with_seed(0x55AA);
        checksum.push_words(&[0x34, 0x12, 0x00, 0xFF, 0x99]);
        assert_eq!(checksum.checksum(), 0x55AA ^ 0x1234 ^ 0xFF00);
    }
}
