mod common;

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::process::Command;

use bamtail::{
    build_container, extract_and_merge, extract_from_reader, extract_to_path, inspect_container,
    parse_header, read_from, write_container, EmptyIndexPolicy, Error, ExtractConfig,
    ExtractionSummary, FlagFilter, MergePlan, MergeTool, Records, Stage, StageError, State,
};
use common::{Fixture, QC_FAIL, UNMAPPED};
use rust_htslib::bam::{self, Read};

fn unmapped(r: &bamtail::RawRecord<'_>) -> bool {
    FlagFilter::unmapped().matches_record(r)
}

fn extract_default(fixture: &Fixture, output: &Path) -> Result<ExtractionSummary, StageError> {
    extract_to_path(&fixture.bam, &fixture.bai, output, unmapped, &ExtractConfig::default())
}

fn read_names(path: &Path) -> Vec<String> {
    let mut reader = bam::Reader::from_path(path).unwrap();
    reader
        .records()
        .map(|r| String::from_utf8(r.unwrap().qname().to_vec()).unwrap())
        .collect()
}

/// Concatenates its inputs' records behind the first input's header.
struct ConcatTool;

impl MergeTool for ConcatTool {
    fn merge(&self, inputs: &[PathBuf], output: &Path) -> bamtail::Result<()> {
        let mut header = None;
        let mut parsed = Vec::new();
        for input in inputs {
            let stream = read_from(&mut Cursor::new(fs::read(input)?), 0, None)?;
            let (h, start) = parse_header(&stream.data)?;
            header.get_or_insert(h);
            parsed.push(Records::parse(stream.data, start));
        }
        let all: Vec<_> = parsed.iter().flat_map(|records| records.iter()).collect();
        let header = header.unwrap_or_default();
        write_container(output, &build_container(&header, &all), 6)?;
        Ok(())
    }

    fn count_records(&self, path: &Path) -> bamtail::Result<u64> {
        inspect_container(path).map(|stats| stats.records)
    }
}

struct FailingTool;

impl MergeTool for FailingTool {
    fn merge(&self, _inputs: &[PathBuf], _output: &Path) -> bamtail::Result<()> {
        Err(Error::Merge("merge exited with status 1".to_string()))
    }

    fn count_records(&self, path: &Path) -> bamtail::Result<u64> {
        inspect_container(path).map(|stats| stats.records)
    }
}

#[test]
fn test_extracts_tail_from_later_block() {
    let fixture = Fixture::new(200, &[UNMAPPED; 50], 300);
    assert!(
        fixture.tail.compressed_offset() > 0,
        "Fixture tail should start past the first BGZF block, got {}",
        fixture.tail
    );

    let output = fixture.path("unmapped.bam");
    let summary = extract_default(&fixture, &output).unwrap();

    assert_eq!(summary.seek_offset, Some(fixture.tail));
    assert_eq!(summary.records_scanned, 50, "Only tail records should be parsed");
    assert_eq!(summary.records_selected, 50);
    assert_eq!(summary.verified_records, Some(50));
    assert_eq!(summary.state, State::Done);
    assert_eq!(summary.output_bytes, fs::metadata(&output).unwrap().len());

    let stats = inspect_container(&output).unwrap();
    assert_eq!(stats.reference_names, vec!["chr1".to_string()]);
    assert_eq!(stats.unmapped, 50);
    assert_eq!(read_names(&output), fixture.tail_names);
}

#[test]
fn test_tail_inside_first_block_skips_uoffset() {
    let fixture = Fixture::new(5, &[UNMAPPED; 3], 20);
    assert_eq!(fixture.tail.compressed_offset(), 0);
    assert!(fixture.tail.uncompressed_offset() > 0);

    let output = fixture.path("unmapped.bam");
    let summary = extract_default(&fixture, &output).unwrap();

    assert_eq!(summary.records_scanned, 3);
    assert_eq!(read_names(&output), fixture.tail_names);
}

#[test]
fn test_flag_filter_excludes_bits() {
    let fixture = Fixture::new(10, &[UNMAPPED, UNMAPPED | QC_FAIL, UNMAPPED], 40);
    let filter = FlagFilter::new(UNMAPPED, QC_FAIL);

    let output = fixture.path("passing.bam");
    let summary = extract_to_path(
        &fixture.bam,
        &fixture.bai,
        &output,
        |r| filter.matches_record(r),
        &ExtractConfig::default(),
    )
    .unwrap();

    assert_eq!(summary.records_scanned, 3);
    assert_eq!(summary.records_selected, 2);
    assert_eq!(read_names(&output), vec!["tail0".to_string(), "tail2".to_string()]);
}

#[test]
fn test_empty_index_policies() {
    let fixture = Fixture::new(20, &[UNMAPPED; 4], 40);
    fs::write(&fixture.bai, common::empty_bai()).unwrap();
    let output = fixture.path("unmapped.bam");

    let err = extract_default(&fixture, &output).unwrap_err();
    assert_eq!(err.stage, Stage::Index);
    assert!(matches!(err.source, Error::IndexEmpty));
    assert!(!output.exists(), "Nothing should be written when the index is empty");

    let config = ExtractConfig {
        empty_index: EmptyIndexPolicy::FullScan,
        ..ExtractConfig::default()
    };
    let summary = extract_to_path(&fixture.bam, &fixture.bai, &output, unmapped, &config).unwrap();
    assert_eq!(summary.seek_offset, None);
    assert_eq!(summary.records_scanned, 24);
    assert_eq!(summary.records_selected, 4);
}

#[test]
fn test_truncated_source_still_extracts() {
    // The tail spans several blocks; cutting the file damages only the last ones.
    let fixture = Fixture::new(200, &[UNMAPPED; 200], 300);
    let bytes = fs::read(&fixture.bam).unwrap();
    fs::write(&fixture.bam, &bytes[..bytes.len() - 100]).unwrap();

    let output = fixture.path("unmapped.bam");
    let summary = extract_default(&fixture, &output).unwrap();
    assert!(
        summary.records_selected > 0 && summary.records_selected < 200,
        "Expected a partial tail, got {} records",
        summary.records_selected
    );
    assert_eq!(summary.verified_records, Some(summary.records_selected as u64));
}

#[test]
fn test_in_memory_extraction_matches_file() {
    let fixture = Fixture::new(30, &[UNMAPPED; 5], 60);
    let index = fs::read(&fixture.bai).unwrap();
    let mut source = Cursor::new(fs::read(&fixture.bam).unwrap());

    let extraction =
        extract_from_reader(&mut source, &index, unmapped, &ExtractConfig::default()).unwrap();
    assert_eq!(extraction.unplaced_unmapped, Some(5));
    assert_eq!(extraction.state, State::ContainerBuilt);

    let output = fixture.path("unmapped.bam");
    extract_default(&fixture, &output).unwrap();
    let written = read_from(&mut Cursor::new(fs::read(&output).unwrap()), 0, None).unwrap();
    assert_eq!(written.data, extraction.container);
}

#[test]
fn test_extract_and_merge() {
    let fixture = Fixture::new(50, &[UNMAPPED; 7], 80);
    let plan = MergePlan {
        region: fixture.path("region.bam"),
        unmapped_output: fixture.path("unmapped.bam"),
        output: fixture.path("merged.bam"),
    };
    common::write_region(&plan.region, 12);

    let summary = extract_and_merge(
        &fixture.bam,
        &fixture.bai,
        &plan,
        unmapped,
        &ExtractConfig::default(),
        &ConcatTool,
    )
    .unwrap();

    assert!(!summary.merge_degraded);
    assert_eq!(summary.output, plan.output);
    let report = summary.merge.unwrap();
    assert_eq!(report.expected_records, Some(19));
    assert_eq!(report.actual_records, Some(19));
    assert!(!report.missing_reads);

    let stats = inspect_container(&plan.output).unwrap();
    assert_eq!(stats.records, 19);
    assert_eq!(stats.unmapped, 7);
}

#[test]
fn test_failed_merge_falls_back_to_region() {
    let fixture = Fixture::new(50, &[UNMAPPED; 7], 80);
    let plan = MergePlan {
        region: fixture.path("region.bam"),
        unmapped_output: fixture.path("unmapped.bam"),
        output: fixture.path("merged.bam"),
    };
    common::write_region(&plan.region, 12);

    let summary = extract_and_merge(
        &fixture.bam,
        &fixture.bai,
        &plan,
        unmapped,
        &ExtractConfig::default(),
        &FailingTool,
    )
    .unwrap();

    assert!(summary.merge_degraded);
    assert!(summary.merge.is_none());
    assert_eq!(summary.state, State::Done);
    assert_eq!(fs::read(&plan.output).unwrap(), fs::read(&plan.region).unwrap());
    assert_eq!(inspect_container(&plan.unmapped_output).unwrap().records, 7);
}

#[test]
fn test_offset_command_prints_seek_point() {
    let fixture = Fixture::new(200, &[UNMAPPED; 10], 300);

    let output = Command::new(env!("CARGO_BIN_EXE_bamtail"))
        .args(["offset", "--index"])
        .arg(&fixture.bai)
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let stdout = String::from_utf8(output.stdout).unwrap();
    let expected = format!(
        "{} {} {}",
        fixture.tail.as_raw(),
        fixture.tail.compressed_offset(),
        fixture.tail.uncompressed_offset()
    );
    assert_eq!(stdout.trim(), expected);
}

#[test]
fn test_extract_command_writes_output() {
    let fixture = Fixture::new(20, &[UNMAPPED, UNMAPPED | QC_FAIL], 40);
    let output = fixture.path("cli.bam");

    let status = Command::new(env!("CARGO_BIN_EXE_bamtail"))
        .arg("extract")
        .arg("--input")
        .arg(&fixture.bam)
        .arg("--output")
        .arg(&output)
        .args(["--exclude-flags", "512"])
        .status()
        .unwrap();
    assert!(status.success());
    assert_eq!(read_names(&output), vec!["tail0".to_string()]);
}

#[test]
fn test_merge_command_fails_without_samtools() {
    let fixture = Fixture::new(5, &[UNMAPPED; 2], 20);
    let first = fixture.path("first.bam");
    let second = fixture.path("second.bam");
    common::write_region(&first, 3);
    common::write_region(&second, 4);
    let merged = fixture.path("merged.bam");

    let output = Command::new(env!("CARGO_BIN_EXE_bamtail"))
        .arg("merge")
        .arg("--output")
        .arg(&merged)
        .arg("--samtools")
        .arg(fixture.path("no-such-samtools"))
        .arg(&first)
        .arg(&second)
        .env_remove("BAMTAIL_SAMTOOLS")
        .output()
        .unwrap();

    assert!(!output.status.success(), "Merge should fail when samtools is missing");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to merge"), "Unexpected stderr: {stderr}");
    assert!(!merged.exists());
}
