use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};

use amrseg::fasta::{read_fasta_records, render_segments_fasta};
use amrseg::segment::segment_all;
use amrseg::table::{render_segment_manifest, write_atomic, write_atomic_all, Delimiter};
use amrseg::{
    aggregate_table, merge_genome_tables, run_to_files, BatchedClassifier, CommandClassifier,
    GenomeSource, PipelineConfig, PipelineOutputs, ProgressObserver, SegmentConfig, Stage,
    TableAggregationOptions,
};

static START_TIME: OnceLock<Instant> = OnceLock::new();

#[derive(Parser)]
#[command(name = "amrseg")]
#[command(version)]
#[command(about = "Segment sequences and aggregate AMR classifier output per sequence and genome")]
struct Cli {
    /// Log progress at info level (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Split FASTA records into overlapping segments
    Segment {
        #[arg(short, long)]
        input: PathBuf,
        /// Segment FASTA output
        #[arg(short, long)]
        output: PathBuf,
        /// Optional table of segment_id, parent_id, start, end, length
        #[arg(long)]
        manifest: Option<PathBuf>,
        #[command(flatten)]
        split: SplitArgs,
    },
    /// Aggregate a prediction table to sequence and/or genome level
    Aggregate {
        /// Prediction table (Sequence_ID, Resistant, Susceptible[, Start, End])
        #[arg(short, long)]
        input: PathBuf,
        #[arg(long)]
        sequences: Option<PathBuf>,
        #[arg(long)]
        genomes: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = SourceArg::Sequences)]
        genome_source: SourceArg,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Merge genome-level calls from several classifier runs (MODEL=PATH)
    Genome {
        #[arg(short, long = "run", required = true, value_parser = parse_run)]
        runs: Vec<(String, PathBuf)>,
        #[arg(short, long)]
        output: PathBuf,
        #[command(flatten)]
        out: OutputArgs,
    },
    /// Segment, classify with an external model command, and aggregate
    Run {
        #[arg(short, long)]
        input: PathBuf,
        /// Model command; reads one sequence per line, prints "resistant susceptible" per line
        #[arg(short, long)]
        classifier: String,
        /// Sequences per classifier invocation (0 = single call)
        #[arg(long, default_value_t = 0)]
        batch_size: usize,
        #[arg(long)]
        predictions: PathBuf,
        #[arg(long)]
        sequences: Option<PathBuf>,
        #[arg(long)]
        genomes: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = SourceArg::Sequences)]
        genome_source: SourceArg,
        /// Skip sequence and genome aggregation
        #[arg(long)]
        no_aggregate: bool,
        #[command(flatten)]
        split: SplitArgs,
        #[command(flatten)]
        output: OutputArgs,
    },
}

#[derive(Args)]
struct SplitArgs {
    /// Maximum segment length; 0 disables splitting
    #[arg(long, default_value_t = 0)]
    max_length: usize,
    #[arg(long, default_value_t = amrseg::segment::DEFAULT_MIN_LENGTH)]
    min_length: usize,
    #[arg(long, default_value_t = 0)]
    overlap: usize,
}

impl SplitArgs {
    fn config(&self) -> SegmentConfig {
        SegmentConfig::new(self.max_length, self.min_length, self.overlap)
    }
}

#[derive(Args)]
struct OutputArgs {
    #[arg(short, long, default_value_t = 0.5)]
    threshold: f64,
    /// Output delimiter; defaults to comma for .csv files, tab otherwise
    #[arg(long, value_enum)]
    delimiter: Option<DelimiterArg>,
}

#[derive(Clone, Copy, ValueEnum)]
enum SourceArg {
    Sequences,
    Predictions,
}

impl From<SourceArg> for GenomeSource {
    fn from(s: SourceArg) -> Self {
        match s {
            SourceArg::Sequences => GenomeSource::Sequences,
            SourceArg::Predictions => GenomeSource::Predictions,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum DelimiterArg {
    Tab,
    Comma,
}

impl From<DelimiterArg> for Delimiter {
    fn from(d: DelimiterArg) -> Self {
        match d {
            DelimiterArg::Tab => Delimiter::Tab,
            DelimiterArg::Comma => Delimiter::Comma,
        }
    }
}

fn parse_run(s: &str) -> std::result::Result<(String, PathBuf), String> {
    match s.split_once('=') {
        Some((model, path)) if !model.is_empty() && !path.is_empty() => {
            Ok((model.to_string(), PathBuf::from(path)))
        }
        _ => {
            // bare path: label the run with the file stem
            let path = PathBuf::from(s);
            let model = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .ok_or_else(|| format!("cannot derive a model name from {:?}", s))?;
            Ok((model, path))
        }
    }
}

fn init_logger(verbose: bool) {
    START_TIME.set(Instant::now()).ok();

    let level = if verbose {
        log::LevelFilter::Info
    } else {
        log::LevelFilter::Warn
    };

    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format(|buf, record| {
            let elapsed = START_TIME.get().map(|t| t.elapsed()).unwrap_or_default();
            let secs = elapsed.as_secs();
            writeln!(
                buf,
                "[{:02}:{:02}:{:02}] {}: {}",
                secs / 3600,
                (secs % 3600) / 60,
                secs % 60,
                record.level(),
                record.args()
            )
        })
        .target(env_logger::Target::Stderr)
        .init();
}

fn spinner(color: &str, msg: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    let template = format!("{{spinner:.{}}} {{msg}}", color);
    if let Ok(style) = ProgressStyle::default_spinner()
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])
        .template(&template)
    {
        spinner.set_style(style);
    }
    spinner.enable_steady_tick(std::time::Duration::from_millis(100));
    spinner.set_message(msg.to_string());
    spinner
}

/// Reports pipeline stages on a single spinner.
struct SpinnerObserver {
    bar: ProgressBar,
}

impl ProgressObserver for SpinnerObserver {
    fn on_stage(&mut self, stage: Stage) {
        let msg = match stage {
            Stage::Segmenting { sequences } => format!("Segmenting {} sequence(s)...", sequences),
            Stage::Classifying { segments } => format!("Classifying {} segment(s)...", segments),
            Stage::AggregatingSequences { rows } => format!("Aggregating {} row(s) per sequence...", rows),
            Stage::AggregatingGenomes { rows } => format!("Aggregating {} row(s) per genome...", rows),
            Stage::Writing => "Writing output tables...".to_string(),
            Stage::Done => {
                self.bar.finish_with_message("Pipeline finished.");
                return;
            }
        };
        self.bar.set_message(msg);
    }
}

fn delimiter_for(explicit: Option<DelimiterArg>, path: &Path) -> Delimiter {
    explicit.map(Delimiter::from).unwrap_or_else(|| Delimiter::for_output(path))
}

fn cmd_segment(input: &Path, output: &Path, manifest: Option<&Path>, split: &SplitArgs) -> Result<()> {
    let bar = spinner("blue", "Reading and segmenting sequences...");
    let sequences = read_fasta_records(input)
        .with_context(|| format!("cannot read FASTA {}", input.display()))?;
    let seg = segment_all(&sequences, &split.config());

    let fasta = render_segments_fasta(&seg.segments);
    match manifest {
        Some(path) => {
            let table = render_segment_manifest(&seg.segments, Delimiter::for_output(path));
            write_atomic_all(&[(output, fasta.as_str()), (path, table.as_str())])?;
        }
        None => write_atomic(output, &fasta)?,
    }

    bar.finish_with_message(format!(
        "Wrote {} segment(s) from {} sequence(s); {} short window(s) dropped.",
        seg.segments.len(),
        sequences.len(),
        seg.dropped_windows
    ));
    Ok(())
}

fn cmd_aggregate(
    input: &Path,
    sequences: Option<PathBuf>,
    genomes: Option<PathBuf>,
    source: SourceArg,
    output: &OutputArgs,
) -> Result<()> {
    if sequences.is_none() && genomes.is_none() {
        bail!("nothing to do: pass --sequences and/or --genomes");
    }
    let bar = spinner("green", "Aggregating predictions...");
    let options = TableAggregationOptions {
        threshold: output.threshold,
        sequence_output: sequences,
        genome_output: genomes,
        genome_source: source.into(),
        delimiter: output.delimiter.map(Delimiter::from),
    };
    let result = aggregate_table(input, &options)
        .with_context(|| format!("cannot aggregate {}", input.display()))?;

    bar.finish_with_message(format!(
        "Aggregated {} row(s) into {} sequence(s) and {} genome(s); {} unparsed id(s), {} row(s) without genome.",
        result.input_rows,
        result.sequence_rows.as_ref().map_or(0, Vec::len),
        result.genome_rows.as_ref().map_or(0, Vec::len),
        result.unparsed_ids,
        result.genome_dropped_rows
    ));
    Ok(())
}

fn cmd_genome(runs: &[(String, PathBuf)], output: &Path, out: &OutputArgs) -> Result<()> {
    let bar = spinner("yellow", "Merging genome-level calls...");
    let result = merge_genome_tables(runs, out.threshold, output, out.delimiter.map(Delimiter::from))
        .context("cannot merge genome tables")?;
    bar.finish_with_message(format!(
        "Wrote {} genome row(s) from {} run(s).",
        result.genome_rows.as_ref().map_or(0, Vec::len),
        runs.len()
    ));
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn cmd_run(
    input: &Path,
    classifier: &str,
    batch_size: usize,
    predictions: PathBuf,
    sequences: Option<PathBuf>,
    genomes: Option<PathBuf>,
    source: SourceArg,
    no_aggregate: bool,
    split: &SplitArgs,
    output: &OutputArgs,
) -> Result<()> {
    let records = read_fasta_records(input)
        .with_context(|| format!("cannot read FASTA {}", input.display()))?;

    let config = PipelineConfig {
        segment: split.config(),
        threshold: output.threshold,
        aggregate_sequences: !no_aggregate,
        genome: genomes.as_ref().map(|_| source.into()),
        delimiter: delimiter_for(output.delimiter, &predictions),
    };
    let outputs = PipelineOutputs {
        predictions,
        sequences,
        genomes,
    };

    let model = CommandClassifier::from_command_line(classifier)?;
    let mut observer = SpinnerObserver {
        bar: spinner("cyan", "Starting pipeline..."),
    };
    let result = if batch_size > 0 {
        let batched = BatchedClassifier::new(model, batch_size)?;
        run_to_files(&records, &config, &batched, &outputs, &mut observer)
    } else {
        run_to_files(&records, &config, &model, &outputs, &mut observer)
    };
    let result = match result {
        Ok(r) => r,
        Err(e) => {
            observer.bar.abandon_with_message("Pipeline failed.");
            return Err(e).context("pipeline failed");
        }
    };

    let s = &result.summary;
    log::info!(
        "{} sequence(s) ({} empty), {} segment(s), {} dropped window(s), {} unparsed id(s), {} row(s) without genome",
        s.sequences,
        s.empty_sequences,
        s.segments,
        s.dropped_windows,
        s.unparsed_ids,
        s.genome_dropped_rows
    );
    if s.overlap_corrected {
        log::warn!("overlap was clamped to half the maximum segment length");
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logger(cli.verbose);

    match cli.command {
        Commands::Segment {
            input,
            output,
            manifest,
            split,
        } => cmd_segment(&input, &output, manifest.as_deref(), &split),
        Commands::Aggregate {
            input,
            sequences,
            genomes,
            genome_source,
            output,
        } => cmd_aggregate(&input, sequences, genomes, genome_source, &output),
        Commands::Genome { runs, output, out } => cmd_genome(&runs, &output, &out),
        Commands::Run {
            input,
            classifier,
            batch_size,
            predictions,
            sequences,
            genomes,
            genome_source,
            no_aggregate,
            split,
            output,
        } => cmd_run(
            &input,
            &classifier,
            batch_size,
            predictions,
            sequences,
            genomes,
            genome_source,
            no_aggregate,
            &split,
            &output,
        ),
    }
}
