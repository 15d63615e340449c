//! Reconstruction of BAM containers from a header and raw records.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use log::debug;

use crate::bgzf::BgzfWriter;
use crate::error::Result;
use crate::record::{ContainerHeader, RawRecord, BAM_MAGIC, LENGTH_FIELD_SIZE};

/// Exact uncompressed size of the container [`build_container`] would produce.
pub fn container_size(header: &ContainerHeader, records: &[RawRecord<'_>]) -> usize {
    let references: usize = header
        .references
        .iter()
        .map(|r| LENGTH_FIELD_SIZE + r.name.len() + 1 + LENGTH_FIELD_SIZE)
        .sum();
    let record_bytes: usize = records.iter().map(|r| r.bytes().len()).sum();

    BAM_MAGIC.len()
        + LENGTH_FIELD_SIZE
        + header.text.len()
        + LENGTH_FIELD_SIZE
        + references
        + record_bytes
}

/// Serialize a header and records into an uncompressed BAM stream.
///
/// Record bytes are copied verbatim in the order given, so the result parses
/// back to the same header and records. Works for any selection of records.
pub fn build_container(header: &ContainerHeader, records: &[RawRecord<'_>]) -> Vec<u8> {
    let size = container_size(header, records);
    let mut out = Vec::with_capacity(size);

    out.extend_from_slice(BAM_MAGIC);
    out.extend_from_slice(&(header.text.len() as u32).to_le_bytes());
    out.extend_from_slice(&header.text);

    out.extend_from_slice(&(header.references.len() as u32).to_le_bytes());
    for reference in &header.references {
        out.extend_from_slice(&(reference.name.len() as u32 + 1).to_le_bytes());
        out.extend_from_slice(&reference.name);
        out.push(0);
        out.extend_from_slice(&reference.length.to_le_bytes());
    }

    for record in records {
        out.extend_from_slice(record.bytes());
    }

    debug_assert_eq!(out.len(), size);
    out
}

/// BGZF-compress an uncompressed container into `path`.
///
/// Returns the size of the written file.
///
/// # Errors
/// Returns an error if the file cannot be created or written.
pub fn write_container(path: &Path, container: &[u8], level: u32) -> Result<u64> {
    let file = File::create(path)?;
    let mut writer = BgzfWriter::with_level(BufWriter::new(file), level);
    writer.write_all(container)?;
    let blocks = writer.blocks_written();
    writer.finish()?.flush()?;

    let size = std::fs::metadata(path)?.len();
    debug!("Wrote {} ({size} bytes, {blocks} BGZF blocks)", path.display());
    Ok(size)
}
