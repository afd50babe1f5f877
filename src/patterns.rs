//! Test pattern definitions for VRAM testing.
//!
//! Each pattern fills a host staging buffer that is then written to the
//! device one stride at a time.

use rand::RngCore;

/// Bit patterns used to stress device memory.
///
/// - Solid patterns (all zeros/ones) detect stuck bits
/// - Alternating patterns detect crosstalk between neighbouring cells
/// - Random patterns provide broad coverage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pattern {
    Random,
    AllZeroBits,
    AlternatingBits01,
    AlternatingBits10,
    AllOneBits,
}

impl Pattern {
    /// All patterns, in the order a run tests them.
    pub const ALL: [Pattern; 5] = [
        Self::Random,
        Self::AllZeroBits,
        Self::AlternatingBits01,
        Self::AlternatingBits10,
        Self::AllOneBits,
    ];

    /// Returns all patterns in test order.
    pub fn all_patterns() -> Vec<Self> {
        Self::ALL.to_vec()
    }

    /// Returns the human-readable name of this pattern.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Random => "Random",
            Self::AllZeroBits => "All Zero Bits",
            Self::AlternatingBits01 => "Alternating Bits 01",
            Self::AlternatingBits10 => "Alternating Bits 10",
            Self::AllOneBits => "All One Bits",
        }
    }

    /// The byte every position holds, or `None` for [`Pattern::Random`].
    pub fn fill_byte(&self) -> Option<u8> {
        match self {
            Self::Random => None,
            Self::AllZeroBits => Some(0x00),
            Self::AlternatingBits01 => Some(0b0101_0101),
            Self::AlternatingBits10 => Some(0b1010_1010),
            Self::AllOneBits => Some(0xFF),
        }
    }

    /// Fills `buf` with this pattern.
    ///
    /// Random draws fresh bytes from `rng` on every call; every other
    /// pattern ignores `rng` and overwrites the whole buffer.
    pub fn fill<R: RngCore + ?Sized>(&self, buf: &mut [u8], rng: &mut R) {
        match self.fill_byte() {
            Some(byte) => buf.fill(byte),
            None => rng.fill_bytes(buf),
        }
    }
}

impl std::fmt::Display for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
