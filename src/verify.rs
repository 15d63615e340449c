//! Read-back checks of written containers with htslib.

use std::path::Path;

use log::debug;
use rust_htslib::bam::{self, Read};

use crate::error::{Error, Result};

/// What htslib sees in a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerStats {
    /// Reference names from the binary header, in order
    pub reference_names: Vec<String>,
    /// Total records
    pub records: u64,
    /// Records with the unmapped flag set
    pub unmapped: u64,
}

/// Open `path` with htslib and count its records.
///
/// # Errors
/// Returns [`Error::Format`] if htslib cannot open the file or decode a record.
pub fn inspect_container(path: &Path) -> Result<ContainerStats> {
    let mut reader = bam::Reader::from_path(path)
        .map_err(|e| Error::format("BAM container", format!("{}: {e}", path.display())))?;

    let reference_names = reader
        .header()
        .target_names()
        .into_iter()
        .map(|name| String::from_utf8_lossy(name).into_owned())
        .collect();

    let mut record = bam::Record::new();
    let mut records = 0u64;
    let mut unmapped = 0u64;
    while let Some(result) = reader.read(&mut record) {
        result.map_err(|e| {
            Error::format("BAM record", format!("record {records} of {}: {e}", path.display()))
        })?;
        records += 1;
        if record.is_unmapped() {
            unmapped += 1;
        }
    }

    debug!("{}: {records} records, {unmapped} unmapped", path.display());
    Ok(ContainerStats {
        reference_names,
        records,
        unmapped,
    })
}
