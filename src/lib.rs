//! Extraction of the unplaced tail of an indexed BAM file.
//!
//! A BAI index records the virtual offset of every chunk of placed reads. Reads
//! with no coordinate are written after all of them, so everything past the
//! largest chunk end is the unmapped tail. This crate seeks straight there,
//! decompresses only the remaining BGZF blocks, filters the raw records by flag
//! and writes them behind a copy of the original header as a standalone BAM.
//!
//! ```no_run
//! use std::path::Path;
//! use bamtail::{extract_to_path, ExtractConfig, FlagFilter};
//!
//! let filter = FlagFilter::unmapped();
//! let summary = extract_to_path(
//!     Path::new("sample.bam"),
//!     Path::new("sample.bam.bai"),
//!     Path::new("unmapped.bam"),
//!     |r| filter.matches_record(r),
//!     &ExtractConfig::default(),
//! )?;
//! println!("{} reads", summary.records_selected);
//! # Ok::<(), bamtail::StageError>(())
//! ```

mod binary;
pub mod bgzf;
pub mod container;
pub mod error;
pub mod extract;
pub mod index;
pub mod merge;
pub mod record;
pub mod verify;
pub mod virtual_offset;

#[cfg(test)]
mod test_support;

pub use bgzf::{read_block, read_from, BgzfWriter, Block, BlockStream, StopReason};
pub use container::{build_container, container_size, write_container};
pub use error::{Error, Result, Stage, StageError};
pub use extract::{
    extract_and_merge, extract_from_reader, extract_to_path, EmptyIndexPolicy, ExtractConfig,
    Extraction, ExtractionSummary, MergePlan, State,
};
pub use index::{max_virtual_offset, IndexSummary};
pub use merge::{merge_containers, MergeConfig, MergeReport, MergeTool, Samtools};
pub use record::{
    parse_header, parse_record, ContainerHeader, FlagFilter, RawRecord, Records, Reference,
};
pub use verify::{inspect_container, ContainerStats};
pub use virtual_offset::VirtualOffset;
