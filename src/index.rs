//! BAI index reading.
//!
//! Only the parts needed to find a seek point are decoded: every chunk's virtual
//! offsets, and the per-reference metadata held in the pseudo-bin. Linear index
//! entries are skipped.
//!
//! ```text
//! BAI:
//! - 4 bytes: magic ("BAI\1")
//! - int32 n_ref
//! - per reference:
//!   - int32 n_bin
//!   - per bin: uint32 bin, int32 n_chunk, n_chunk x (uint64 beg, uint64 end)
//!   - int32 n_intv, n_intv x uint64 (linear index, skipped)
//! - optional uint64 n_no_coor
//! ```

use log::debug;

use crate::binary::{read_bytes, read_i32, read_u32, read_u64};
use crate::error::{Error, Result};
use crate::virtual_offset::VirtualOffset;

/// BAI magic bytes.
pub const BAI_MAGIC: &[u8; 4] = b"BAI\x01";

/// Bin number of the metadata pseudo-bin. Its second chunk holds read counts,
/// not virtual offsets.
pub const METADATA_BIN: u32 = 37450;

/// Per-reference statistics from the index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceIndex {
    /// Number of bins, excluding the metadata pseudo-bin
    pub bins: usize,
    /// Number of chunks over those bins
    pub chunks: usize,
    /// Number of linear index entries
    pub intervals: usize,
    /// Mapped read count from the pseudo-bin, if present
    pub mapped: Option<u64>,
    /// Unmapped (placed) read count from the pseudo-bin, if present
    pub unmapped: Option<u64>,
}

/// Everything bamtail reads from a BAI file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexSummary {
    /// One entry per reference sequence
    pub references: Vec<ReferenceIndex>,
    /// Largest chunk end over every bin of every reference
    pub max_end: Option<VirtualOffset>,
    /// Count of reads with no coordinate, when the index records it
    pub unplaced_unmapped: Option<u64>,
}

fn count(buf: &[u8], pos: usize, context: &'static str) -> Result<(usize, usize)> {
    let (n, next) = read_i32(buf, pos).ok_or_else(|| Error::truncated(context, buf, pos, 4))?;
    let n = usize::try_from(n)
        .map_err(|_| Error::format(context, format!("negative count {n} at offset {pos}")))?;
    Ok((n, next))
}

fn chunk_pair(buf: &[u8], pos: usize) -> Result<(u64, u64, usize)> {
    let truncated = || Error::truncated("BAI chunk", buf, pos, 16);
    let (beg, next) = read_u64(buf, pos).ok_or_else(truncated)?;
    let (end, next) = read_u64(buf, next).ok_or_else(truncated)?;
    Ok((beg, end, next))
}

impl IndexSummary {
    /// Parse a BAI byte buffer.
    ///
    /// # Errors
    /// Returns [`Error::Format`] on a bad magic or negative count and
    /// [`Error::Truncated`] if the buffer ends inside a declared structure.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        let (magic, mut pos) =
            read_bytes(buf, 0, 4).ok_or_else(|| Error::truncated("BAI magic", buf, 0, 4))?;
        if magic != BAI_MAGIC {
            return Err(Error::format(
                "BAI magic",
                format!("expected {BAI_MAGIC:?}, got {magic:?}"),
            ));
        }

        let (n_ref, next) = count(buf, pos, "BAI reference count")?;
        pos = next;

        let mut summary = IndexSummary::default();
        // Counts come from the file; only reserve what the buffer could hold.
        summary.references.reserve(n_ref.min(buf.len() / 8));

        for _ in 0..n_ref {
            let mut reference = ReferenceIndex::default();

            let (n_bin, next) = count(buf, pos, "BAI bin count")?;
            pos = next;

            for _ in 0..n_bin {
                let (bin, next) = read_u32(buf, pos)
                    .ok_or_else(|| Error::truncated("BAI bin", buf, pos, 4))?;
                let (n_chunk, next) = count(buf, next, "BAI chunk count")?;
                pos = next;

                if bin == METADATA_BIN {
                    // (ref_beg, ref_end) are offsets; (n_mapped, n_unmapped) are counts.
                    for i in 0..n_chunk {
                        let (a, b, next) = chunk_pair(buf, pos)?;
                        pos = next;
                        match i {
                            0 => summary.observe_end(b),
                            1 => {
                                reference.mapped = Some(a);
                                reference.unmapped = Some(b);
                            }
                            _ => {}
                        }
                    }
                    continue;
                }

                reference.bins += 1;
                for _ in 0..n_chunk {
                    let (_beg, end, next) = chunk_pair(buf, pos)?;
                    pos = next;
                    summary.observe_end(end);
                    reference.chunks += 1;
                }
            }

            let (n_intv, next) = count(buf, pos, "BAI linear index count")?;
            let skip = n_intv
                .checked_mul(8)
                .ok_or_else(|| {
                    Error::format("BAI linear index", format!("count {n_intv} overflows"))
                })?;
            let (_, next) = read_bytes(buf, next, skip)
                .ok_or_else(|| Error::truncated("BAI linear index", buf, next, skip))?;
            pos = next;
            reference.intervals = n_intv;

            summary.references.push(reference);
        }

        summary.unplaced_unmapped = read_u64(buf, pos).map(|(n, _)| n);

        debug!(
            "Parsed BAI: {} references, max chunk end {:?}, unplaced unmapped {:?}",
            summary.references.len(),
            summary.max_end,
            summary.unplaced_unmapped
        );
        Ok(summary)
    }

    fn observe_end(&mut self, raw: u64) {
        self.max_end = self.max_end.max(Some(VirtualOffset::from_raw(raw)));
    }

    /// Total chunk count over every reference.
    pub fn chunk_count(&self) -> usize {
        self.references.iter().map(|r| r.chunks).sum()
    }
}

/// Return the largest chunk end referenced by a BAI index.
///
/// Every record at or after this offset is unindexed (in practice, unplaced
/// unmapped reads). `None` means the index has no chunks at all and no safe
/// seek point can be derived from it.
///
/// # Errors
/// Returns an error if the index is malformed or truncated.
pub fn max_virtual_offset(buf: &[u8]) -> Result<Option<VirtualOffset>> {
    IndexSummary::parse(buf).map(|summary| summary.max_end)
}
