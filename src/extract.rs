//! Unmapped-tail extraction.
//!
//! One extraction runs `Idle → IndexParsed → HeaderRead → TailRead →
//! RecordsFiltered → ContainerBuilt → (Merged) → Done`, never revisiting a state.
//! Any failure before `ContainerBuilt` aborts the extraction; a merge failure
//! falls back to the region container.

use std::fs::{self, File};
use std::io::{BufReader, Read, Seek};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::bgzf::{read_from, StopReason};
use crate::container::{build_container, write_container};
use crate::error::{AtStage, Error, Result, Stage, StageError};
use crate::index::IndexSummary;
use crate::merge::{merge_containers, MergeConfig, MergeReport, MergeTool};
use crate::record::{parse_header, ContainerHeader, RawRecord, Records};
use crate::verify::inspect_container;
use crate::virtual_offset::VirtualOffset;

/// What to do when the index holds no chunk to seek to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmptyIndexPolicy {
    /// Fail with [`Error::IndexEmpty`]
    #[default]
    Fail,
    /// Decompress the whole container and filter every record
    FullScan,
}

/// Extraction settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractConfig {
    /// Decompressed bytes read for the first header attempt; doubled on truncation
    pub header_read_bytes: usize,
    /// Behaviour for an index without chunks
    pub empty_index: EmptyIndexPolicy,
    /// Deflate level for the written container
    pub compression_level: u32,
    /// Re-read the written container with htslib and check its record count
    pub verify_output: bool,
    /// Settings for the optional merge step
    pub merge: MergeConfig,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            header_read_bytes: 64 * 1024,
            empty_index: EmptyIndexPolicy::default(),
            compression_level: 6,
            verify_output: true,
            merge: MergeConfig::default(),
        }
    }
}

/// Extraction progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum State {
    Idle,
    IndexParsed,
    HeaderRead,
    TailRead,
    RecordsFiltered,
    ContainerBuilt,
    Merged,
    Done,
}

#[derive(Debug)]
struct Progress {
    state: State,
}

impl Progress {
    fn new() -> Self {
        Self { state: State::Idle }
    }

    fn advance(&mut self, next: State) {
        debug_assert!(next > self.state, "cannot move from {:?} to {:?}", self.state, next);
        debug!("Extraction {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}

/// In-memory result of an extraction.
#[derive(Debug, Clone)]
pub struct Extraction {
    /// Header copied from the source container
    pub header: ContainerHeader,
    /// Uncompressed reconstructed container
    pub container: Vec<u8>,
    /// Virtual offset the tail was read from; `None` after a full scan
    pub seek_offset: Option<VirtualOffset>,
    /// Unplaced read count recorded in the index, if any
    pub unplaced_unmapped: Option<u64>,
    /// Records parsed after the seek point
    pub records_scanned: usize,
    /// Records that matched the predicate
    pub records_selected: usize,
    /// Last state reached
    pub state: State,
}

/// Result of an extraction written to disk.
#[derive(Debug, Clone)]
pub struct ExtractionSummary {
    /// Final output container
    pub output: PathBuf,
    /// Size of `output` in bytes
    pub output_bytes: u64,
    /// Virtual offset the tail was read from; `None` after a full scan
    pub seek_offset: Option<VirtualOffset>,
    /// Records parsed after the seek point
    pub records_scanned: usize,
    /// Records written to the reconstructed container
    pub records_selected: usize,
    /// Record count htslib read back, when verification ran
    pub verified_records: Option<u64>,
    /// Merge outcome, when a merge succeeded
    pub merge: Option<MergeReport>,
    /// Whether the merge failed and `output` is the region container alone
    pub merge_degraded: bool,
    /// Last state reached
    pub state: State,
}

/// Read and parse the container header, growing the prefix until it fits.
fn read_header<R: Read + Seek>(
    source: &mut R,
    initial_bytes: usize,
) -> Result<(ContainerHeader, usize)> {
    let mut limit = initial_bytes.max(1);
    loop {
        let stream = read_from(source, 0, Some(limit))?;
        match parse_header(&stream.data) {
            Ok(parsed) => return Ok(parsed),
            Err(Error::Truncated { .. }) if stream.stop == StopReason::Limit => {
                limit = limit.saturating_mul(2);
                debug!(
                    "Header exceeds {} decompressed bytes, retrying with {limit}",
                    stream.data.len()
                );
            }
            Err(e) => return Err(e),
        }
    }
}

/// Parse every record from the virtual offset `offset` to the end of the stream.
fn read_tail<R: Read + Seek>(
    source: &mut R,
    offset: VirtualOffset,
    header_end: usize,
) -> Result<Records> {
    let stream = read_from(source, offset.compressed_offset(), None)?;

    // A clean end-of-stream marker at the seek point is an empty tail; anything else
    // without a single decodable block means the index does not match the container.
    if stream.blocks == 0
        && matches!(stream.stop, StopReason::Invalid(_) | StopReason::Exhausted)
    {
        return Err(Error::format(
            "virtual offset",
            format!("no BGZF block at {offset}: {:?}", stream.stop),
        ));
    }

    let skip = usize::from(offset.uncompressed_offset());
    if skip > stream.data.len() {
        return Err(Error::format(
            "virtual offset",
            format!(
                "{offset} points past the {} bytes decompressed from that block",
                stream.data.len()
            ),
        ));
    }

    // Never parse header bytes as records when the seek point lies inside the first block.
    let start = if offset.compressed_offset() == 0 {
        skip.max(header_end)
    } else {
        skip
    };
    Ok(Records::parse(stream.data, start))
}

/// Extract the records after the index's last chunk that match `predicate`.
///
/// `source` is the BGZF-compressed container and `index` the raw BAI bytes.
///
/// # Errors
/// Returns a [`StageError`] naming the stage that failed: a malformed or empty
/// index (`index`), an unreadable header (`header`), or a seek point that does
/// not land on the data (`tail-read`).
pub fn extract_from_reader<R, F>(
    source: &mut R,
    index: &[u8],
    predicate: F,
    config: &ExtractConfig,
) -> std::result::Result<Extraction, StageError>
where
    R: Read + Seek,
    F: Fn(&RawRecord<'_>) -> bool,
{
    run_extraction(source, index, predicate, config, &mut Progress::new())
}

fn run_extraction<R, F>(
    source: &mut R,
    index: &[u8],
    predicate: F,
    config: &ExtractConfig,
    progress: &mut Progress,
) -> std::result::Result<Extraction, StageError>
where
    R: Read + Seek,
    F: Fn(&RawRecord<'_>) -> bool,
{
    let index = IndexSummary::parse(index).at(Stage::Index)?;
    let seek_offset = match (index.max_end, config.empty_index) {
        (Some(offset), _) => Some(offset),
        (None, EmptyIndexPolicy::FullScan) => {
            warn!("Index has no chunks; scanning the whole container");
            None
        }
        (None, EmptyIndexPolicy::Fail) => {
            return Err(StageError::new(Stage::Index, Error::IndexEmpty))
        }
    };
    progress.advance(State::IndexParsed);

    let (header, header_end) =
        read_header(source, config.header_read_bytes).at(Stage::Header)?;
    debug!(
        "Header: {} bytes of text, {} references, records start at {header_end}",
        header.text.len(),
        header.references.len()
    );
    progress.advance(State::HeaderRead);

    let records = match seek_offset {
        Some(offset) => {
            info!("Reading records after virtual offset {offset}");
            read_tail(source, offset, header_end).at(Stage::TailRead)?
        }
        None => {
            let stream = read_from(source, 0, None).at(Stage::TailRead)?;
            Records::parse(stream.data, header_end)
        }
    };
    if !records.is_complete() {
        debug!("Record data ended mid-record at byte {}", records.consumed());
    }
    progress.advance(State::TailRead);

    let selected = records.select(predicate);
    progress.advance(State::RecordsFiltered);

    let container = build_container(&header, &selected);
    progress.advance(State::ContainerBuilt);

    info!(
        "Selected {} of {} records ({} bytes uncompressed)",
        selected.len(),
        records.len(),
        container.len()
    );
    if let Some(expected) = index.unplaced_unmapped {
        if expected != selected.len() as u64 {
            info!(
                "Index records {expected} unplaced reads; selected {}",
                selected.len()
            );
        }
    }

    Ok(Extraction {
        records_selected: selected.len(),
        records_scanned: records.len(),
        header,
        container,
        seek_offset,
        unplaced_unmapped: index.unplaced_unmapped,
        state: progress.state,
    })
}

/// Re-read `output` with htslib; on any mismatch the file is removed.
fn verify_written(output: &Path, expected: usize) -> Result<u64> {
    let checked = inspect_container(output).and_then(|stats| {
        if stats.records == expected as u64 {
            Ok(stats.records)
        } else {
            Err(Error::format(
                "reconstructed container",
                format!("htslib read {} records, expected {expected}", stats.records),
            ))
        }
    });

    if checked.is_err() {
        if let Err(e) = fs::remove_file(output) {
            warn!("Cannot remove unverified output {}: {e}", output.display());
        }
    }
    checked
}

/// Extract from files into `output`, leaving `progress` at `ContainerBuilt`.
fn write_extraction<F>(
    input: &Path,
    index: &Path,
    output: &Path,
    predicate: F,
    config: &ExtractConfig,
    progress: &mut Progress,
) -> std::result::Result<ExtractionSummary, StageError>
where
    F: Fn(&RawRecord<'_>) -> bool,
{
    let index_bytes = fs::read(index).map_err(Error::from).at(Stage::Index)?;
    let file = File::open(input).map_err(Error::from).at(Stage::Header)?;
    let mut source = BufReader::new(file);

    let extraction = run_extraction(&mut source, &index_bytes, predicate, config, progress)?;

    let output_bytes = write_container(output, &extraction.container, config.compression_level)
        .at(Stage::Write)?;
    let verified_records = if config.verify_output {
        Some(verify_written(output, extraction.records_selected).at(Stage::Write)?)
    } else {
        None
    };

    info!(
        "Wrote {} records to {} ({output_bytes} bytes)",
        extraction.records_selected,
        output.display()
    );

    Ok(ExtractionSummary {
        output: output.to_path_buf(),
        output_bytes,
        seek_offset: extraction.seek_offset,
        records_scanned: extraction.records_scanned,
        records_selected: extraction.records_selected,
        verified_records,
        merge: None,
        merge_degraded: false,
        state: progress.state,
    })
}

/// Extract from files and write the reconstructed container to `output`.
///
/// # Errors
/// Returns a [`StageError`] for any failing stage, including `write` when the
/// output cannot be written or does not read back with the expected records.
/// An output that fails the read-back check is deleted.
pub fn extract_to_path<F>(
    input: &Path,
    index: &Path,
    output: &Path,
    predicate: F,
    config: &ExtractConfig,
) -> std::result::Result<ExtractionSummary, StageError>
where
    F: Fn(&RawRecord<'_>) -> bool,
{
    let mut progress = Progress::new();
    let mut summary = write_extraction(input, index, output, predicate, config, &mut progress)?;
    progress.advance(State::Done);

    summary.state = progress.state;
    Ok(summary)
}

/// Paths for [`extract_and_merge`].
#[derive(Debug, Clone)]
pub struct MergePlan {
    /// Conventionally produced container of records overlapping the target region
    pub region: PathBuf,
    /// Where the reconstructed container is written before merging
    pub unmapped_output: PathBuf,
    /// Final merged container
    pub output: PathBuf,
}

/// Extract, then merge the result with a region container.
///
/// If the merge fails, the region container is copied to `plan.output` and the
/// summary is marked `merge_degraded`; the call still succeeds.
///
/// # Errors
/// Returns a [`StageError`] if extraction fails, or if the fallback copy fails.
pub fn extract_and_merge<F>(
    input: &Path,
    index: &Path,
    plan: &MergePlan,
    predicate: F,
    config: &ExtractConfig,
    tool: &dyn MergeTool,
) -> std::result::Result<ExtractionSummary, StageError>
where
    F: Fn(&RawRecord<'_>) -> bool,
{
    let mut progress = Progress::new();
    let mut summary = write_extraction(
        input,
        index,
        &plan.unmapped_output,
        predicate,
        config,
        &mut progress,
    )?;

    let inputs = [plan.region.clone(), plan.unmapped_output.clone()];
    match merge_containers(tool, &inputs, &plan.output, &config.merge) {
        Ok(report) => {
            progress.advance(State::Merged);
            summary.output_bytes = report.size;
            summary.merge = Some(report);
        }
        Err(e) => {
            warn!(
                "Merge failed, output is the region container only ({}): {e}",
                plan.region.display()
            );
            summary.output_bytes = fs::copy(&plan.region, &plan.output)
                .map_err(Error::from)
                .at(Stage::Merge)?;
            summary.merge_degraded = true;
        }
    }
    progress.advance(State::Done);

    summary.output = plan.output.clone();
    summary.state = progress.state;
    Ok(summary)
}
