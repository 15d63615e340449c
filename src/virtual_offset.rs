//! BGZF virtual file offsets.

use std::fmt;

/// Number of bits reserved for the offset inside a decompressed block.
const UNCOMPRESSED_BITS: u32 = 16;

/// Largest compressed offset that fits in the high 48 bits.
pub const MAX_COMPRESSED_OFFSET: u64 = (1 << 48) - 1;

/// Virtual file offset in BGZF format.
///
/// A 64-bit value combining:
/// - Bits 63-16: offset of a BGZF block in the compressed file (`coffset`)
/// - Bits 15-0: offset inside that block's decompressed payload (`uoffset`)
///
/// ```
/// use bamtail::VirtualOffset;
///
/// let offset = VirtualOffset::new(1024, 512);
/// assert_eq!(offset.compressed_offset(), 1024);
/// assert_eq!(offset.uncompressed_offset(), 512);
/// assert_eq!(offset.as_raw(), (1024 << 16) | 512);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtualOffset(u64);

impl VirtualOffset {
    /// Pack a block offset and an intra-block offset.
    ///
    /// `coffset` must fit in 48 bits; higher bits are dropped.
    pub fn new(coffset: u64, uoffset: u16) -> Self {
        debug_assert!(coffset <= MAX_COMPRESSED_OFFSET, "coffset {coffset} exceeds 48 bits");
        VirtualOffset((coffset << UNCOMPRESSED_BITS) | u64::from(uoffset))
    }

    /// Like [`VirtualOffset::new`], but `None` if `coffset` does not fit in 48 bits.
    pub fn try_new(coffset: u64, uoffset: u16) -> Option<Self> {
        (coffset <= MAX_COMPRESSED_OFFSET).then(|| Self::new(coffset, uoffset))
    }

    /// Wrap a raw 64-bit value read from an index.
    pub fn from_raw(raw: u64) -> Self {
        VirtualOffset(raw)
    }

    /// Raw 64-bit value.
    pub fn as_raw(self) -> u64 {
        self.0
    }

    /// Byte offset of the BGZF block in the compressed file.
    pub fn compressed_offset(self) -> u64 {
        self.0 >> UNCOMPRESSED_BITS
    }

    /// Byte offset inside the block's decompressed payload.
    pub fn uncompressed_offset(self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }
}

impl From<u64> for VirtualOffset {
    fn from(raw: u64) -> Self {
        Self::from_raw(raw)
    }
}

impl fmt::Display for VirtualOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.compressed_offset(), self.uncompressed_offset())
    }
}
