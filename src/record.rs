//! BAM container header and raw record parsing.
//!
//! ```text
//! BAM header:
//! - 4 bytes: magic ("BAM\1")
//! - int32 l_text, l_text bytes of SAM header text
//! - int32 n_ref
//! - per reference: int32 l_name, l_name bytes (NUL-terminated name), int32 l_ref
//!
//! BAM record:
//! - int32 block_size, then block_size bytes:
//!   refID(4) pos(4) l_read_name(1) mapq(1) bin(2) n_cigar_op(2) flag(2) l_seq(4)
//!   next_refID(4) next_pos(4) tlen(4) read_name cigar seq qual tags
//! ```
//!
//! Records are never decoded past the flag word. Each one is kept as the exact
//! byte span it occupied so it can be written back unchanged.

use log::warn;

use crate::binary::{read_bytes, read_i32, read_u16};
use crate::error::{Error, Result};

/// BAM magic bytes.
pub const BAM_MAGIC: &[u8; 4] = b"BAM\x01";

/// Width of every length/count prefix in the container.
pub const LENGTH_FIELD_SIZE: usize = 4;

/// Offset of the flag word within a record body (after `block_size`).
pub const FLAG_OFFSET: usize = 14;

/// Length of the fixed-layout part of a record body.
pub const FIXED_BODY_SIZE: usize = 32;

/// SAM flag bits.
pub mod flags {
    /// Template has multiple segments
    pub const PAIRED: u16 = 0x1;
    /// Each segment properly aligned
    pub const PROPER_PAIR: u16 = 0x2;
    /// Segment is not mapped to any reference
    pub const UNMAPPED: u16 = 0x4;
    /// Next segment in the template is unmapped
    pub const MATE_UNMAPPED: u16 = 0x8;
    /// Sequence is reverse complemented
    pub const REVERSE: u16 = 0x10;
    /// Next segment is reverse complemented
    pub const MATE_REVERSE: u16 = 0x20;
    /// First segment in the template
    pub const FIRST_IN_TEMPLATE: u16 = 0x40;
    /// Last segment in the template
    pub const LAST_IN_TEMPLATE: u16 = 0x80;
    /// Secondary alignment
    pub const SECONDARY: u16 = 0x100;
    /// Fails platform/vendor quality checks
    pub const QC_FAIL: u16 = 0x200;
    /// PCR or optical duplicate
    pub const DUPLICATE: u16 = 0x400;
    /// Supplementary alignment
    pub const SUPPLEMENTARY: u16 = 0x800;
}

/// Reference sequence entry from the container header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// Name bytes without the NUL terminator
    pub name: Vec<u8>,
    /// Reference length in bases
    pub length: u32,
}

impl Reference {
    /// Create a new reference.
    pub fn new(name: impl Into<Vec<u8>>, length: u32) -> Self {
        Self {
            name: name.into(),
            length,
        }
    }

    /// Name as text, replacing invalid UTF-8.
    pub fn name_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.name)
    }
}

/// Container header: SAM text plus the reference list.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContainerHeader {
    /// Header text exactly as stored, padding included
    pub text: Vec<u8>,
    /// Reference sequences in file order
    pub references: Vec<Reference>,
}

impl ContainerHeader {
    /// Create a new header.
    pub fn new(text: impl Into<Vec<u8>>, references: Vec<Reference>) -> Self {
        Self {
            text: text.into(),
            references,
        }
    }
}

fn length_field(buf: &[u8], pos: usize, context: &'static str) -> Result<(usize, usize)> {
    let (n, next) = read_i32(buf, pos)
        .ok_or_else(|| Error::truncated(context, buf, pos, LENGTH_FIELD_SIZE))?;
    let n = usize::try_from(n)
        .map_err(|_| Error::format(context, format!("negative value {n} at offset {pos}")))?;
    Ok((n, next))
}

fn field<'a>(
    buf: &'a [u8],
    pos: usize,
    len: usize,
    context: &'static str,
) -> Result<(&'a [u8], usize)> {
    read_bytes(buf, pos, len).ok_or_else(|| Error::truncated(context, buf, pos, len))
}

/// Parse the container header at the start of a decompressed stream.
///
/// Returns the header and the offset of the first record.
///
/// # Errors
/// [`Error::Format`] on a magic mismatch or negative length,
/// [`Error::Truncated`] if the stream ends inside the header.
pub fn parse_header(stream: &[u8]) -> Result<(ContainerHeader, usize)> {
    let (magic, pos) = field(stream, 0, BAM_MAGIC.len(), "BAM magic")?;
    if magic != BAM_MAGIC {
        return Err(Error::format(
            "BAM magic",
            format!("expected {BAM_MAGIC:?}, got {magic:?}"),
        ));
    }

    let (l_text, pos) = length_field(stream, pos, "SAM header length")?;
    let (text, pos) = field(stream, pos, l_text, "SAM header text")?;

    let (n_ref, mut pos) = length_field(stream, pos, "reference count")?;
    let mut references = Vec::with_capacity(n_ref.min(stream.len() / 9));

    for _ in 0..n_ref {
        let (l_name, next) = length_field(stream, pos, "reference name length")?;
        let (name, next) = field(stream, next, l_name, "reference name")?;
        let (length, next) = length_field(stream, next, "reference length")?;
        pos = next;

        let name = name.strip_suffix(&[0u8]).unwrap_or(name);
        let length = u32::try_from(length)
            .map_err(|_| Error::format("reference length", format!("{length} exceeds 32 bits")))?;
        references.push(Reference::new(name, length));
    }

    Ok((ContainerHeader::new(text, references), pos))
}

/// One record as it appears in the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawRecord<'a> {
    bytes: &'a [u8],
    flag: u16,
}

impl<'a> RawRecord<'a> {
    /// Length prefix plus body, exactly as stored.
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// SAM flag word.
    pub fn flag(&self) -> u16 {
        self.flag
    }

    /// Whether the unmapped bit (0x4) is set.
    pub fn is_unmapped(&self) -> bool {
        self.flag & flags::UNMAPPED != 0
    }
}

/// Parse the record starting at `cursor`.
///
/// Returns `None` at the end of the record data. That includes a stream cut in
/// the middle of a record, which is normal after a seeked or size-limited read,
/// and a non-positive or undersized `block_size`.
pub fn parse_record(stream: &[u8], cursor: usize) -> Option<(RawRecord<'_>, usize)> {
    let (block_size, body_start) = read_i32(stream, cursor)?;
    let block_size = usize::try_from(block_size).ok().filter(|&n| n > 0)?;
    let (body, next) = read_bytes(stream, body_start, block_size)?;

    if block_size < FIXED_BODY_SIZE {
        warn!(
            "Record at offset {cursor} declares {block_size} bytes, \
             below the fixed {FIXED_BODY_SIZE}-byte layout"
        );
        return None;
    }

    let (flag, _) = read_u16(body, FLAG_OFFSET)?;
    Some((
        RawRecord {
            bytes: &stream[cursor..next],
            flag,
        },
        next,
    ))
}

/// Location of one record inside a [`Records`] buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RecordSpan {
    offset: usize,
    len: usize,
    flag: u16,
}

/// Every record parsed from one decompressed buffer.
///
/// Records are kept as spans into the buffer, so selecting a subset never copies
/// record bytes.
#[derive(Debug, Clone, Default)]
pub struct Records {
    data: Vec<u8>,
    spans: Vec<RecordSpan>,
    consumed: usize,
}

impl Records {
    /// Parse records from `start` until the data runs out.
    pub fn parse(data: Vec<u8>, start: usize) -> Self {
        let mut spans = Vec::new();
        let mut cursor = start;
        while let Some((record, next)) = parse_record(&data, cursor) {
            spans.push(RecordSpan {
                offset: cursor,
                len: record.bytes.len(),
                flag: record.flag,
            });
            cursor = next;
        }
        Self {
            data,
            spans,
            consumed: cursor,
        }
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.spans.len()
    }

    /// Whether no record was parsed.
    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// Offset where parsing stopped.
    pub fn consumed(&self) -> usize {
        self.consumed
    }

    /// Whether every byte was consumed by whole records.
    pub fn is_complete(&self) -> bool {
        self.consumed == self.data.len()
    }

    /// Iterate over records in stream order.
    pub fn iter(&self) -> impl Iterator<Item = RawRecord<'_>> + '_ {
        self.spans.iter().map(|span| RawRecord {
            bytes: &self.data[span.offset..span.offset + span.len],
            flag: span.flag,
        })
    }

    /// Records matching `predicate`, in stream order.
    pub fn select<F>(&self, predicate: F) -> Vec<RawRecord<'_>>
    where
        F: Fn(&RawRecord<'_>) -> bool,
    {
        self.iter().filter(|record| predicate(record)).collect()
    }
}

/// Flag predicate in the style of `samtools view -f/-F`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlagFilter {
    /// Bits that must all be set
    pub require: u16,
    /// Bits that must all be clear
    pub exclude: u16,
}

impl FlagFilter {
    /// Create a filter from required and excluded bits.
    pub fn new(require: u16, exclude: u16) -> Self {
        Self { require, exclude }
    }

    /// Records whose unmapped bit is set.
    pub fn unmapped() -> Self {
        Self::new(flags::UNMAPPED, 0)
    }

    /// Records whose unmapped bit is clear.
    pub fn mapped() -> Self {
        Self::new(0, flags::UNMAPPED)
    }

    /// Test a flag word.
    pub fn matches(&self, flag: u16) -> bool {
        flag & self.require == self.require && flag & self.exclude == 0
    }

    /// Test a record.
    pub fn matches_record(&self, record: &RawRecord<'_>) -> bool {
        self.matches(record.flag())
    }
}
