use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use bamtail::{
    extract_and_merge, extract_to_path, merge_containers, EmptyIndexPolicy, ExtractConfig,
    ExtractionSummary, FlagFilter, IndexSummary, MergeConfig, MergePlan, Samtools,
};
use clap::{Args, Parser, Subcommand};

/// Extract the unplaced tail of an indexed BAM file into a standalone BAM
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the largest virtual offset referenced by a BAI index
    Offset {
        /// BAI index file
        #[arg(short, long)]
        index: PathBuf,
    },
    /// Copy the records after the last indexed chunk into a new BAM
    Extract(ExtractArgs),
    /// Merge BAM files with samtools and check the record count
    Merge {
        /// Merged output file
        #[arg(short, long)]
        output: PathBuf,

        #[command(flatten)]
        tool: ToolArgs,

        /// Input BAM files
        #[arg(required = true, num_args = 2..)]
        inputs: Vec<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct ExtractArgs {
    /// Input BAM file
    #[arg(short, long)]
    input: PathBuf,

    /// BAI index of the input (default: <input>.bai)
    #[arg(short = 'x', long)]
    index: Option<PathBuf>,

    /// Output BAM file
    #[arg(short, long)]
    output: PathBuf,

    /// Keep only records with all of these flag bits set
    #[arg(short = 'f', long, default_value_t = 4)]
    require_flags: u16,

    /// Drop records with any of these flag bits set
    #[arg(short = 'F', long, default_value_t = 0)]
    exclude_flags: u16,

    /// Scan the whole file when the index has no chunks instead of failing
    #[arg(long)]
    full_scan_fallback: bool,

    /// Decompressed bytes read for the first attempt at the header
    #[arg(long, default_value_t = 64 * 1024)]
    header_read_bytes: usize,

    /// Deflate level of the output (0-9)
    #[arg(long, default_value_t = 6, value_parser = clap::value_parser!(u32).range(0..=9))]
    compression_level: u32,

    /// Skip re-reading the output with htslib
    #[arg(long)]
    no_verify: bool,

    /// BAM of reads overlapping a region, merged with the extracted records
    #[arg(long, requires = "merged_output")]
    region: Option<PathBuf>,

    /// Destination of the merged BAM
    #[arg(long, requires = "region")]
    merged_output: Option<PathBuf>,

    #[command(flatten)]
    tool: ToolArgs,
}

#[derive(Args, Debug)]
struct ToolArgs {
    /// samtools executable
    #[arg(long, env = "BAMTAIL_SAMTOOLS", default_value = "samtools")]
    samtools: PathBuf,

    /// Warn when the merged record count is below this fraction of the inputs
    #[arg(long, default_value_t = 0.9)]
    min_count_ratio: f64,

    /// Extra samtools threads
    #[arg(short = 't', long, default_value_t = 0)]
    threads: usize,
}

impl ToolArgs {
    fn samtools(&self) -> Samtools {
        Samtools::new(&self.samtools).with_threads(self.threads)
    }

    fn merge_config(&self) -> Result<MergeConfig> {
        if !(0.0..=1.0).contains(&self.min_count_ratio) {
            bail!("--min-count-ratio must be between 0 and 1, got {}", self.min_count_ratio);
        }
        Ok(MergeConfig {
            min_count_ratio: self.min_count_ratio,
            ..MergeConfig::default()
        })
    }
}

fn init_logging(verbose: u8) {
    env_logger::Builder::new()
        .filter_level(match verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .init();
}

fn print_offset(index: &Path) -> Result<()> {
    let bytes = std::fs::read(index)
        .with_context(|| format!("Failed to read index {}", index.display()))?;
    let summary = IndexSummary::parse(&bytes)
        .with_context(|| format!("Failed to parse index {}", index.display()))?;

    let Some(offset) = summary.max_end else {
        bail!("{} has no chunks, so no seek point exists", index.display());
    };
    println!(
        "{} {} {}",
        offset.as_raw(),
        offset.compressed_offset(),
        offset.uncompressed_offset()
    );

    eprintln!(
        "References: {}, chunks: {}, unplaced reads: {}",
        summary.references.len(),
        summary.chunk_count(),
        summary
            .unplaced_unmapped
            .map_or_else(|| "not recorded".to_string(), |n| n.to_string())
    );
    Ok(())
}

fn run_extract(args: &ExtractArgs) -> Result<ExtractionSummary> {
    let index = match &args.index {
        Some(index) => index.clone(),
        None => {
            let mut name = args.input.clone().into_os_string();
            name.push(".bai");
            PathBuf::from(name)
        }
    };

    let config = ExtractConfig {
        header_read_bytes: args.header_read_bytes,
        empty_index: if args.full_scan_fallback {
            EmptyIndexPolicy::FullScan
        } else {
            EmptyIndexPolicy::Fail
        },
        compression_level: args.compression_level,
        verify_output: !args.no_verify,
        merge: args.tool.merge_config()?,
    };
    let filter = FlagFilter::new(args.require_flags, args.exclude_flags);
    let predicate = |r: &bamtail::RawRecord<'_>| filter.matches_record(r);

    let summary = match (&args.region, &args.merged_output) {
        (Some(region), Some(output)) => {
            let plan = MergePlan {
                region: region.clone(),
                unmapped_output: args.output.clone(),
                output: output.clone(),
            };
            extract_and_merge(&args.input, &index, &plan, predicate, &config, &args.tool.samtools())
        }
        _ => extract_to_path(&args.input, &index, &args.output, predicate, &config),
    }
    .with_context(|| format!("Failed to extract from {}", args.input.display()))?;

    Ok(summary)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match &cli.command {
        Command::Offset { index } => print_offset(index)?,
        Command::Extract(args) => {
            let summary = run_extract(args)?;
            if summary.merge_degraded {
                eprintln!("Merge failed; {} holds only the region reads", summary.output.display());
            }
            eprintln!(
                "Total reads extracted: {} of {} scanned",
                summary.records_selected, summary.records_scanned
            );
        }
        Command::Merge { output, tool, inputs } => {
            let report = merge_containers(&tool.samtools(), inputs, output, &tool.merge_config()?)
                .with_context(|| format!("Failed to merge into {}", output.display()))?;
            if let Some(n) = report.actual_records {
                eprintln!("Total reads merged: {n}");
            }
        }
    }
    Ok(())
}
