//! Merging containers through an external alignment toolkit.
//!
//! Merge logic itself is not implemented here: [`MergeTool`] wraps whatever does
//! the merge (normally `samtools`), and [`merge_containers`] runs it and checks
//! that the result is plausible.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use log::{debug, info, warn};

use crate::error::{Error, Result};

/// External capability that merges containers and counts their records.
pub trait MergeTool {
    /// Merge `inputs` into a new container at `output`.
    ///
    /// # Errors
    /// Returns [`Error::Merge`] if the tool fails.
    fn merge(&self, inputs: &[PathBuf], output: &Path) -> Result<()>;

    /// Count the records in a container.
    ///
    /// # Errors
    /// Returns [`Error::Merge`] if the tool fails or its output is not a count.
    fn count_records(&self, path: &Path) -> Result<u64>;
}

/// `samtools merge` / `samtools view -c`.
#[derive(Debug, Clone)]
pub struct Samtools {
    program: PathBuf,
    threads: usize,
}

impl Default for Samtools {
    fn default() -> Self {
        Self::new("samtools")
    }
}

impl Samtools {
    /// Use the given samtools executable.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            threads: 0,
        }
    }

    /// Extra threads passed as `-@`.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    fn run(&self, command: &mut Command, what: &str) -> Result<Output> {
        debug!("Running {command:?}");
        let output = command
            .output()
            .map_err(|e| Error::Merge(format!("failed to run {}: {e}", self.program.display())))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Merge(format!(
                "{what} exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(output)
    }
}

impl MergeTool for Samtools {
    fn merge(&self, inputs: &[PathBuf], output: &Path) -> Result<()> {
        let mut command = Command::new(&self.program);
        command.arg("merge").arg("-f");
        if self.threads > 0 {
            command.arg("-@").arg(self.threads.to_string());
        }
        command.arg(output).args(inputs);
        self.run(&mut command, "samtools merge").map(|_| ())
    }

    fn count_records(&self, path: &Path) -> Result<u64> {
        let mut command = Command::new(&self.program);
        command.arg("view").arg("-c").arg(path);
        let output = self.run(&mut command, "samtools view -c")?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout
            .trim()
            .parse()
            .map_err(|e| Error::Merge(format!("unexpected record count {:?}: {e}", stdout.trim())))
    }
}

/// Merge verification settings.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeConfig {
    /// Warn when the merged count falls below this fraction of the input total
    pub min_count_ratio: f64,
    /// Count records before and after merging
    pub verify_counts: bool,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            min_count_ratio: 0.9,
            verify_counts: true,
        }
    }
}

/// Outcome of a merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeReport {
    /// Merged container
    pub output: PathBuf,
    /// Size of the merged container in bytes
    pub size: u64,
    /// Sum of input record counts, when counted
    pub expected_records: Option<u64>,
    /// Record count of the output, when counted
    pub actual_records: Option<u64>,
    /// Whether the output holds noticeably fewer records than the inputs
    pub missing_reads: bool,
}

/// Whether `actual` falls short of `expected` by more than the tolerance allows.
pub fn count_shortfall(expected: u64, actual: u64, min_count_ratio: f64) -> bool {
    (actual as f64) < (expected as f64) * min_count_ratio
}

fn sum_counts(tool: &dyn MergeTool, inputs: &[PathBuf]) -> Option<u64> {
    let mut total = 0u64;
    for input in inputs {
        match tool.count_records(input) {
            Ok(n) => total += n,
            Err(e) => {
                warn!("Cannot count records in {}, skipping count check: {e}", input.display());
                return None;
            }
        }
    }
    Some(total)
}

/// Merge `inputs` into `output` with `tool` and check the result.
///
/// A missing or empty output is an error. A record-count shortfall is only
/// logged and flagged in the report, since the merged file is still usable.
///
/// # Errors
/// Returns [`Error::Merge`] when fewer than two inputs are given, an input does
/// not exist, the tool fails, or the output is missing or empty.
pub fn merge_containers(
    tool: &dyn MergeTool,
    inputs: &[PathBuf],
    output: &Path,
    config: &MergeConfig,
) -> Result<MergeReport> {
    if inputs.len() < 2 {
        return Err(Error::Merge(format!(
            "need at least two containers to merge, got {}",
            inputs.len()
        )));
    }
    if let Some(missing) = inputs.iter().find(|input| !input.exists()) {
        return Err(Error::Merge(format!("input {} does not exist", missing.display())));
    }

    let expected_records = if config.verify_counts {
        sum_counts(tool, inputs)
    } else {
        None
    };

    tool.merge(inputs, output)?;

    let size = fs::metadata(output)
        .map_err(|e| Error::Merge(format!("merged output {} is missing: {e}", output.display())))?
        .len();
    if size == 0 {
        return Err(Error::Merge(format!("merged output {} is empty", output.display())));
    }

    let actual_records = match expected_records {
        Some(_) => match tool.count_records(output) {
            Ok(n) => Some(n),
            Err(e) => {
                warn!("Cannot count records in merged output: {e}");
                None
            }
        },
        None => None,
    };

    let missing_reads = match (expected_records, actual_records) {
        (Some(expected), Some(actual))
            if count_shortfall(expected, actual, config.min_count_ratio) =>
        {
            warn!(
                "Merged container may be missing reads: \
                 expected ~{expected}, found {actual} ({} missing)",
                expected - actual.min(expected)
            );
            true
        }
        _ => false,
    };

    info!(
        "Merged {} containers into {} ({size} bytes, {} records)",
        inputs.len(),
        output.display(),
        actual_records.map_or_else(|| "unknown".to_string(), |n| n.to_string())
    );

    Ok(MergeReport {
        output: output.to_path_buf(),
        size,
        expected_records,
        actual_records,
        missing_reads,
    })
}
