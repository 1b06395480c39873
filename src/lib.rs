// src/lib.rs
pub mod types;
pub mod errors;
pub mod segment;
pub mod seq_id;
pub mod aggregate;
pub mod table;
pub mod fasta;
pub mod classifier;
pub mod pipeline;

use std::path::{Path, PathBuf};

pub use crate::aggregate::{aggregate_genomes, aggregate_genomes_by_model, aggregate_sequences};
pub use crate::classifier::{BatchedClassifier, Classifier, CommandClassifier};
pub use crate::errors::{AmrError, Result};
pub use crate::pipeline::{
    run, run_to_files, GenomeSource, PipelineConfig, PipelineOutputs, PipelineResult,
    ProgressObserver, RunSummary, Stage,
};
pub use crate::segment::{segment, SegmentConfig};
pub use crate::seq_id::{genomic_file_id, parse as parse_segment_id, ParsedId};
pub use crate::types::{AggregatedRow, Call, PredictionRow, Probabilities, Segment, Sequence};

use crate::table::{read_scored_table, render_aggregated, write_atomic_all, Delimiter, TableKind};

/// Options for aggregating an existing prediction (or sequence-level) table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableAggregationOptions {
    pub threshold: f64,
    pub sequence_output: Option<PathBuf>,
    pub genome_output: Option<PathBuf>,
    pub genome_source: GenomeSource,
    /// Output delimiter; derived from each output file name when unset
    pub delimiter: Option<Delimiter>,
}

impl Default for TableAggregationOptions {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            sequence_output: None,
            genome_output: None,
            genome_source: GenomeSource::Sequences,
            delimiter: None,
        }
    }
}

/// Structured results of [`aggregate_table`]; tables are rendered on demand.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableAggregation {
    pub input_rows: usize,
    pub sequence_rows: Option<Vec<AggregatedRow>>,
    pub genome_rows: Option<Vec<AggregatedRow>>,
    pub unparsed_ids: usize,
    pub genome_dropped_rows: usize,
}

fn validate_threshold(threshold: f64) -> Result<()> {
    let cfg = PipelineConfig {
        threshold,
        ..PipelineConfig::default()
    };
    cfg.validate()
}

fn output_delimiter(explicit: Option<Delimiter>, path: &Path) -> Delimiter {
    explicit.unwrap_or_else(|| Delimiter::for_output(path))
}

/// Aggregate a table written by an external classifier run.
///
/// A per-segment table is folded to sequence level (written when
/// `sequence_output` is set) and optionally on to genome level. A table that
/// is already sequence-level only goes through the genome step.
pub fn aggregate_table<P: AsRef<Path>>(
    input: P,
    options: &TableAggregationOptions,
) -> Result<TableAggregation> {
    validate_threshold(options.threshold)?;
    let (kind, rows) = read_scored_table(&input)?;
    log::info!(
        "read {} row(s) from {} as {:?}",
        rows.len(),
        input.as_ref().display(),
        kind
    );

    let mut result = TableAggregation {
        input_rows: rows.len(),
        ..TableAggregation::default()
    };

    let sequence_rows = match kind {
        TableKind::Predictions => {
            let agg = aggregate_sequences(&rows, options.threshold);
            result.unparsed_ids = agg.unparsed_ids;
            Some(agg.rows)
        }
        TableKind::Sequences => None,
    };

    if options.genome_output.is_some() {
        let agg = match (&sequence_rows, options.genome_source) {
            (Some(seq_rows), GenomeSource::Sequences) => aggregate_genomes(seq_rows, options.threshold),
            _ => aggregate_genomes(&rows, options.threshold),
        };
        result.genome_dropped_rows = agg.dropped_rows;
        result.genome_rows = Some(agg.rows);
    }
    result.sequence_rows = sequence_rows;

    let mut files: Vec<(PathBuf, String)> = Vec::new();
    if let (Some(path), Some(rows)) = (&options.sequence_output, &result.sequence_rows) {
        let delim = output_delimiter(options.delimiter, path);
        files.push((path.clone(), render_aggregated(rows, "sequence_id", delim)));
    }
    if let (Some(path), Some(rows)) = (&options.genome_output, &result.genome_rows) {
        let delim = output_delimiter(options.delimiter, path);
        files.push((path.clone(), render_aggregated(rows, "genomic_file", delim)));
    }
    let refs: Vec<(&Path, &str)> = files.iter().map(|(p, b)| (p.as_path(), b.as_str())).collect();
    write_atomic_all(&refs)?;

    Ok(result)
}

/// Merge several classifier runs into one genome-level table with a `model`
/// column. Each run is `(model label, table path)`.
pub fn merge_genome_tables<P: AsRef<Path>>(
    runs: &[(String, P)],
    threshold: f64,
    output: &Path,
    delimiter: Option<Delimiter>,
) -> Result<TableAggregation> {
    validate_threshold(threshold)?;

    let mut loaded = Vec::with_capacity(runs.len());
    let mut input_rows = 0;
    for (model, path) in runs {
        let (_, rows) = read_scored_table(path)?;
        input_rows += rows.len();
        loaded.push((model.clone(), rows));
    }

    let agg = aggregate_genomes_by_model(&loaded, threshold);
    let body = render_aggregated(&agg.rows, "genomic_file", output_delimiter(delimiter, output));
    write_atomic_all(&[(output, body.as_str())])?;

    Ok(TableAggregation {
        input_rows,
        sequence_rows: None,
        genome_rows: Some(agg.rows),
        unparsed_ids: 0,
        genome_dropped_rows: agg.dropped_rows,
    })
}
