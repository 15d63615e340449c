//! BGZF block reading and writing.
//!
//! BGZF header structure, per section 4.1 of the
//! [SAM format](https://samtools.github.io/hts-specs/SAMv1.pdf):
//! - Bytes 0-3: gzip magic (1f 8b) + compression method (08) + flags (04)
//! - Bytes 10-11: XLEN (6 for a plain BGZF block)
//! - Bytes 12-13: subfield identifier SI1='B' (0x42), SI2='C' (0x43)
//! - Bytes 14-15: subfield length SLEN=2 (0x02, 0x00)
//! - Bytes 16-17: BSIZE, total block size minus one (little-endian)
//!
//! The raw-deflate payload follows, then an 8-byte footer (CRC32, ISIZE).

use std::io::{self, Read, Seek, SeekFrom, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use log::{debug, warn};

use crate::binary::read_u32;
use crate::error::{Error, Result};

// BGZF block magic bytes: gzip magic (0x1f 0x8b) + deflate method (0x08) + extra field flag (0x04)
pub const BGZF_MAGIC: &[u8; 4] = &[0x1f, 0x8b, 0x08, 0x04];

/// Fixed header length, up to and including BSIZE.
pub const BGZF_HEADER_SIZE: usize = 18;

/// CRC32 + ISIZE.
pub const BGZF_FOOTER_SIZE: usize = 8;

/// BSIZE value of the end-of-stream marker block.
pub const EOF_BSIZE: u16 = 27;

/// The canonical 28-byte end-of-stream marker.
pub const BGZF_EOF: [u8; 28] = [
    0x1f, 0x8b, 0x08, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0xff, 0x06, 0x00, 0x42, 0x43, 0x02, 0x00,
    0x1b, 0x00, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// Upper bound on both compressed block size and decompressed payload size.
pub const MAX_BLOCK_SIZE: usize = 65536;

/// Uncompressed bytes per written block; leaves room for incompressible input.
pub const WRITE_BLOCK_PAYLOAD: usize = 0xff00;

/// Check that a buffer starts with a BGZF block header.
///
/// This checks 8 specific bytes (64 bits): magic, CM, FLG, the `BC` subfield id and
/// SLEN. A 3-byte gzip magic check alone would accept plain gzip members.
fn is_valid_bgzf_header(buffer: &[u8]) -> bool {
    if buffer.len() < BGZF_HEADER_SIZE {
        return false;
    }

    // Check gzip magic + extra field flag
    if &buffer[..4] != BGZF_MAGIC.as_slice() {
        return false;
    }

    // Check BGZF subfield identifier 'BC' at bytes 12-13
    if buffer[12] != 0x42 || buffer[13] != 0x43 {
        return false;
    }

    // Check SLEN = 2 at bytes 14-15
    buffer[14] == 0x02 && buffer[15] == 0x00
}

/// Fill `buf` from `source`, stopping early only at end of input.
fn read_up_to<R: Read>(source: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// One block read from a BGZF source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    /// A data block and its decompressed payload
    Data {
        /// Decompressed payload
        data: Vec<u8>,
        /// Compressed offset of the following block
        next_offset: u64,
    },
    /// The end-of-stream marker
    EndOfStream {
        /// Compressed offset just past the marker
        next_offset: u64,
    },
}

/// Inflate the payload of a complete block.
///
/// The footer is not checked: the CRC32 is never compared with the output and
/// ISIZE only sizes the buffer. A corrupt payload that still inflates is
/// accepted as-is.
fn inflate(block: &[u8], offset: u64) -> Result<Vec<u8>> {
    let payload = &block[BGZF_HEADER_SIZE..block.len() - BGZF_FOOTER_SIZE];
    let declared_len = read_u32(block, block.len() - 4).map_or(0, |(n, _)| n as usize);

    let mut data = Vec::with_capacity(declared_len.min(MAX_BLOCK_SIZE));
    DeflateDecoder::new(payload)
        .take(MAX_BLOCK_SIZE as u64 + 1)
        .read_to_end(&mut data)
        .map_err(|e| Error::format("BGZF payload", format!("block at offset {offset}: {e}")))?;

    if data.len() > MAX_BLOCK_SIZE {
        return Err(Error::format(
            "BGZF payload",
            format!("block at offset {offset} inflates past {MAX_BLOCK_SIZE} bytes"),
        ));
    }
    Ok(data)
}

/// Read and decompress the block starting at `offset`.
///
/// Returns `Ok(None)` when no bytes remain at `offset`.
///
/// # Errors
/// [`Error::Format`] for a bad header, an impossible size or an undecodable
/// payload, [`Error::Truncated`] if the source ends inside the block, and
/// [`Error::Io`] for failures of the source itself.
pub fn read_block<R: Read + Seek>(source: &mut R, offset: u64) -> Result<Option<Block>> {
    // Consecutive blocks need no seek; on a `BufReader` a seek discards the buffer.
    if source.stream_position()? != offset {
        source.seek(SeekFrom::Start(offset))?;
    }

    let mut header = [0u8; BGZF_HEADER_SIZE];
    let filled = read_up_to(source, &mut header)?;
    if filled == 0 {
        return Ok(None);
    }
    if filled < BGZF_HEADER_SIZE {
        return Err(Error::Truncated {
            context: "BGZF header",
            offset,
            needed: BGZF_HEADER_SIZE,
            available: filled,
        });
    }

    if !is_valid_bgzf_header(&header) {
        return Err(Error::format(
            "BGZF header",
            format!("no BGZF signature at offset {offset}"),
        ));
    }

    let bsize = u16::from_le_bytes([header[16], header[17]]);
    let block_size = usize::from(bsize) + 1;
    let next_offset = offset + block_size as u64;

    if bsize == EOF_BSIZE {
        debug!("End-of-stream marker at offset {offset}");
        return Ok(Some(Block::EndOfStream { next_offset }));
    }

    if block_size < BGZF_HEADER_SIZE + BGZF_FOOTER_SIZE {
        return Err(Error::format(
            "BGZF header",
            format!("block size {block_size} at offset {offset} is smaller than its framing"),
        ));
    }

    let mut block = vec![0u8; block_size];
    block[..BGZF_HEADER_SIZE].copy_from_slice(&header);
    let filled = read_up_to(source, &mut block[BGZF_HEADER_SIZE..])?;
    if filled < block_size - BGZF_HEADER_SIZE {
        return Err(Error::Truncated {
            context: "BGZF block",
            offset,
            needed: block_size,
            available: BGZF_HEADER_SIZE + filled,
        });
    }

    let data = inflate(&block, offset)?;
    Ok(Some(Block::Data { data, next_offset }))
}

/// Why [`read_from`] stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// Hit the end-of-stream marker
    EndOfStream,
    /// No more bytes in the source
    Exhausted,
    /// Accumulated at least the requested number of bytes
    Limit,
    /// A block failed validation; the message says why
    Invalid(String),
}

/// Contiguous decompressed bytes from a run of blocks.
#[derive(Debug, Clone)]
pub struct BlockStream {
    /// Concatenated payloads
    pub data: Vec<u8>,
    /// Number of data blocks decompressed
    pub blocks: usize,
    /// Compressed offset where reading stopped
    pub next_offset: u64,
    /// Why reading stopped
    pub stop: StopReason,
}

/// Decompress consecutive blocks starting at `offset`.
///
/// Stops once `max_bytes` have been accumulated (whole blocks only, so the result
/// may overshoot), at the end-of-stream marker, or when the source runs out. A
/// block that fails validation also stops the read: the error is logged and the
/// bytes gathered so far are returned, which the record parser handles as an
/// ordinary truncated stream.
///
/// # Errors
/// Only I/O failures of the source are returned.
pub fn read_from<R: Read + Seek>(
    source: &mut R,
    offset: u64,
    max_bytes: Option<usize>,
) -> Result<BlockStream> {
    let mut data = Vec::new();
    let mut blocks = 0;
    let mut next_offset = offset;

    let stop = loop {
        if max_bytes.is_some_and(|max| data.len() >= max) {
            break StopReason::Limit;
        }

        match read_block(source, next_offset) {
            Ok(Some(Block::Data { data: payload, next_offset: next })) => {
                if data.is_empty() {
                    data = payload;
                } else {
                    data.extend_from_slice(&payload);
                }
                blocks += 1;
                next_offset = next;
            }
            Ok(Some(Block::EndOfStream { next_offset: next })) => {
                next_offset = next;
                break StopReason::EndOfStream;
            }
            Ok(None) => break StopReason::Exhausted,
            Err(e @ (Error::Format { .. } | Error::Truncated { .. })) => {
                warn!("Stopping BGZF read at offset {next_offset}: {e}");
                break StopReason::Invalid(e.to_string());
            }
            Err(e) => return Err(e),
        }
    };

    debug!(
        "Read {blocks} blocks ({} bytes) from offset {offset}, stopped at {next_offset}: {stop:?}",
        data.len()
    );
    Ok(BlockStream {
        data,
        blocks,
        next_offset,
        stop,
    })
}

/// Compress one payload into a complete BGZF block.
fn compress_block(data: &[u8], level: Compression) -> io::Result<Vec<u8>> {
    let mut deflate = DeflateEncoder::new(Vec::with_capacity(data.len() / 2), level);
    deflate.write_all(data)?;
    let deflated = deflate.finish()?;

    let total_size = BGZF_HEADER_SIZE + deflated.len() + BGZF_FOOTER_SIZE;
    let bsize = u16::try_from(total_size - 1).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("compressed block of {total_size} bytes exceeds BGZF limit"),
        )
    })?;

    let mut block = Vec::with_capacity(total_size);
    block.extend_from_slice(BGZF_MAGIC);
    block.extend_from_slice(&[0, 0, 0, 0]); // MTIME
    block.push(0); // XFL
    block.push(0xff); // OS (unknown)
    block.extend_from_slice(&6u16.to_le_bytes()); // XLEN
    block.extend_from_slice(b"BC");
    block.extend_from_slice(&2u16.to_le_bytes()); // SLEN
    block.extend_from_slice(&bsize.to_le_bytes());
    block.extend_from_slice(&deflated);
    block.extend_from_slice(&crc32fast::hash(data).to_le_bytes());
    block.extend_from_slice(&(data.len() as u32).to_le_bytes());
    Ok(block)
}

/// Streaming BGZF compressor.
///
/// Buffers up to [`WRITE_BLOCK_PAYLOAD`] bytes per block. Call
/// [`BgzfWriter::finish`] to flush the last block and append the end-of-stream
/// marker; dropping the writer without it leaves an unterminated file.
pub struct BgzfWriter<W: Write> {
    inner: W,
    buffer: Vec<u8>,
    level: Compression,
    blocks_written: usize,
}

impl<W: Write> BgzfWriter<W> {
    /// Writer with the default compression level (6).
    pub fn new(inner: W) -> Self {
        Self::with_level(inner, 6)
    }

    /// Writer with an explicit deflate level (0-9).
    pub fn with_level(inner: W, level: u32) -> Self {
        Self {
            inner,
            buffer: Vec::with_capacity(WRITE_BLOCK_PAYLOAD),
            level: Compression::new(level.min(9)),
            blocks_written: 0,
        }
    }

    /// Data blocks written so far, excluding the end-of-stream marker.
    pub fn blocks_written(&self) -> usize {
        self.blocks_written
    }

    fn flush_block(&mut self) -> io::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let block = compress_block(&self.buffer, self.level)?;
        self.inner.write_all(&block)?;
        self.buffer.clear();
        self.blocks_written += 1;
        Ok(())
    }

    /// Flush buffered data, write the end-of-stream marker and return the inner writer.
    ///
    /// # Errors
    /// Returns an error if compression or the inner writer fails.
    pub fn finish(mut self) -> io::Result<W> {
        self.flush_block()?;
        self.inner.write_all(&BGZF_EOF)?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for BgzfWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let space = WRITE_BLOCK_PAYLOAD - self.buffer.len();
        let n = buf.len().min(space);
        self.buffer.extend_from_slice(&buf[..n]);
        if self.buffer.len() == WRITE_BLOCK_PAYLOAD {
            self.flush_block()?;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_block()?;
        self.inner.flush()
    }
}

/// BGZF-compress a whole buffer in memory, end-of-stream marker included.
///
/// # Errors
/// Returns an error if compression fails.
pub fn compress(data: &[u8], level: u32) -> Result<Vec<u8>> {
    let capacity = data.len() / 2 + BGZF_EOF.len();
    let mut writer = BgzfWriter::with_level(Vec::with_capacity(capacity), level);
    writer.write_all(data)?;
    Ok(writer.finish()?)
}
