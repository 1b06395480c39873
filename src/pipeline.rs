//src/pipeline.rs

use std::path::PathBuf;

use ahash::AHashMap;

use crate::aggregate::{aggregate_genomes, aggregate_sequences};
use crate::classifier::Classifier;
use crate::errors::{AmrError, Result};
use crate::segment::{segment_all, SegmentConfig};
use crate::seq_id;
use crate::table::{render_aggregated, render_predictions, write_atomic_all, Delimiter};
use crate::types::{AggregatedRow, PredictionRow, Sequence};

/// Which artifact genome-level aggregation chains off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenomeSource {
    /// Raw per-segment prediction rows
    Predictions,
    /// Per-sequence aggregated rows
    Sequences,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub segment: SegmentConfig,
    pub threshold: f64,
    /// When false, segmentation and inference still run but both aggregation levels are skipped
    pub aggregate_sequences: bool,
    pub genome: Option<GenomeSource>,
    pub delimiter: Delimiter,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            segment: SegmentConfig::default(),
            threshold: 0.5,
            aggregate_sequences: true,
            genome: None,
            delimiter: Delimiter::Tab,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.threshold.is_finite() || !(0.0..=1.0).contains(&self.threshold) {
            return Err(AmrError::InvalidConfig(format!(
                "threshold must be within [0, 1], got {}",
                self.threshold
            )));
        }
        Ok(())
    }
}

/// Pipeline stages reported to a [`ProgressObserver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Segmenting { sequences: usize },
    Classifying { segments: usize },
    AggregatingSequences { rows: usize },
    AggregatingGenomes { rows: usize },
    Writing,
    Done,
}

pub trait ProgressObserver {
    fn on_stage(&mut self, stage: Stage);
}

impl ProgressObserver for () {
    fn on_stage(&mut self, _stage: Stage) {}
}

/// Counters for one invocation. Non-fatal conditions end up here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub sequences: usize,
    /// Input sequences without bases, skipped before segmentation
    pub empty_sequences: usize,
    pub segments: usize,
    /// Windows shorter than the minimum length that were skipped
    pub dropped_windows: usize,
    pub overlap_corrected: bool,
    /// Prediction ids matching no naming convention
    pub unparsed_ids: usize,
    /// Segment ids whose parsed parent differs from the sequence they were cut from
    pub ambiguous_ids: usize,
    /// Rows left out of genome aggregation for lack of a genomic-file id
    pub genome_dropped_rows: usize,
    pub sequence_rows: usize,
    pub genome_rows: usize,
}

/// Everything one run produced, held in memory until written.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineResult {
    pub predictions: Vec<PredictionRow>,
    pub sequence_rows: Option<Vec<AggregatedRow>>,
    pub genome_rows: Option<Vec<AggregatedRow>>,
    pub summary: RunSummary,
    pub delimiter: Delimiter,
}

impl PipelineResult {
    pub fn prediction_table(&self) -> String {
        render_predictions(&self.predictions, self.delimiter)
    }

    pub fn sequence_table(&self) -> Option<String> {
        self.sequence_rows
            .as_ref()
            .map(|rows| render_aggregated(rows, "sequence_id", self.delimiter))
    }

    pub fn genome_table(&self) -> Option<String> {
        self.genome_rows
            .as_ref()
            .map(|rows| render_aggregated(rows, "genomic_file", self.delimiter))
    }

    /// Write every requested artifact. Either all files appear or none do.
    pub fn write(&self, outputs: &PipelineOutputs) -> Result<()> {
        let predictions = self.prediction_table();
        let sequences = outputs.sequences.as_ref().zip(self.sequence_table());
        let genomes = outputs.genomes.as_ref().zip(self.genome_table());

        let mut files = vec![(outputs.predictions.as_path(), predictions.as_str())];
        if let Some((path, body)) = &sequences {
            files.push((path.as_path(), body.as_str()));
        }
        if let Some((path, body)) = &genomes {
            files.push((path.as_path(), body.as_str()));
        }
        write_atomic_all(&files)
    }
}

/// Destination paths. Aggregated tables are only written when both a path is
/// given and the corresponding level ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOutputs {
    pub predictions: PathBuf,
    pub sequences: Option<PathBuf>,
    pub genomes: Option<PathBuf>,
}

fn execute<C: Classifier + ?Sized>(
    sequences: &[Sequence],
    config: &PipelineConfig,
    classifier: &C,
    observer: &mut dyn ProgressObserver,
) -> Result<PipelineResult> {
    config.validate()?;
    let mut summary = RunSummary {
        sequences: sequences.len(),
        ..RunSummary::default()
    };

    // 1. Segment everything, remembering where each segment came from
    observer.on_stage(Stage::Segmenting {
        sequences: sequences.len(),
    });
    let segmentation = segment_all(sequences, &config.segment);
    let segments = segmentation.segments;
    summary.segments = segments.len();
    summary.dropped_windows = segmentation.dropped_windows;
    summary.overlap_corrected = segmentation.overlap_corrected;
    summary.empty_sequences = segmentation.empty_sequences;

    let mut origin: AHashMap<&str, &str> = AHashMap::with_capacity(segments.len());
    for seg in &segments {
        if origin.insert(&seg.segment_id, &seg.parent_id).is_some() {
            log::warn!("duplicate segment id {}; sequence ids should be unique", seg.segment_id);
        }
    }
    summary.ambiguous_ids = origin
        .iter()
        .filter(|(segment_id, parent_id)| seq_id::parse(segment_id).parent_id != **parent_id)
        .count();
    if summary.ambiguous_ids > 0 {
        log::warn!(
            "{} segment id(s) do not parse back to their source sequence",
            summary.ambiguous_ids
        );
    }
    log::info!(
        "cut {} sequence(s) into {} segment(s) ({} short window(s) dropped)",
        summary.sequences,
        summary.segments,
        summary.dropped_windows
    );

    // 2. One classifier call over the whole flattened list
    observer.on_stage(Stage::Classifying {
        segments: segments.len(),
    });
    let scores = if segments.is_empty() {
        Vec::new()
    } else {
        let batch: Vec<&str> = segments.iter().map(|s| s.bases.as_str()).collect();
        classifier.classify(&batch)?
    };

    // 3. Positional identity only holds if the cardinality matches
    if scores.len() != segments.len() {
        return Err(AmrError::CountMismatch {
            expected: segments.len(),
            actual: scores.len(),
        });
    }

    // 4. Prediction rows
    let predictions: Vec<PredictionRow> = segments
        .iter()
        .zip(&scores)
        .map(|(seg, probs)| PredictionRow {
            sequence_id: seg.segment_id.clone(),
            length: seg.len(),
            resistant_prob: probs.resistant,
            susceptible_prob: probs.susceptible,
            start: Some(seg.start),
            end: Some(seg.end),
            genomic_id: None,
        })
        .collect();

    let mut result = PipelineResult {
        predictions,
        sequence_rows: None,
        genome_rows: None,
        summary,
        delimiter: config.delimiter,
    };

    if !config.aggregate_sequences {
        if config.genome.is_some() {
            log::info!("sequence aggregation disabled; skipping genome aggregation too");
        }
        return Ok(result);
    }

    // 5. Sequence level
    observer.on_stage(Stage::AggregatingSequences {
        rows: result.predictions.len(),
    });
    let seq_agg = aggregate_sequences(&result.predictions, config.threshold);
    result.summary.unparsed_ids = seq_agg.unparsed_ids;
    result.summary.sequence_rows = seq_agg.rows.len();

    // 6. Genome level, chained off the chosen artifact
    if let Some(source) = config.genome {
        let genome_agg = match source {
            GenomeSource::Predictions => {
                observer.on_stage(Stage::AggregatingGenomes {
                    rows: result.predictions.len(),
                });
                aggregate_genomes(&result.predictions, config.threshold)
            }
            GenomeSource::Sequences => {
                observer.on_stage(Stage::AggregatingGenomes {
                    rows: seq_agg.rows.len(),
                });
                aggregate_genomes(&seq_agg.rows, config.threshold)
            }
        };
        result.summary.genome_dropped_rows = genome_agg.dropped_rows;
        result.summary.genome_rows = genome_agg.rows.len();
        result.genome_rows = Some(genome_agg.rows);
    }
    result.sequence_rows = Some(seq_agg.rows);

    Ok(result)
}

/// Segment, classify and aggregate in memory.
///
/// Configuration and cardinality failures are returned unchanged;
/// unparsed ids and overlap corrections are only counted on the summary.
pub fn run<C: Classifier + ?Sized>(
    sequences: &[Sequence],
    config: &PipelineConfig,
    classifier: &C,
    observer: &mut dyn ProgressObserver,
) -> Result<PipelineResult> {
    let result = execute(sequences, config, classifier, observer)?;
    observer.on_stage(Stage::Done);
    Ok(result)
}

/// Like [`run`], then writes the artifacts. Nothing is written on failure.
pub fn run_to_files<C: Classifier + ?Sized>(
    sequences: &[Sequence],
    config: &PipelineConfig,
    classifier: &C,
    outputs: &PipelineOutputs,
    observer: &mut dyn ProgressObserver,
) -> Result<PipelineResult> {
    let result = execute(sequences, config, classifier, observer)?;
    observer.on_stage(Stage::Writing);
    result.write(outputs)?;
    observer.on_stage(Stage::Done);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Call, Probabilities};

    /// Resistant probability = fraction of G bases.
    fn g_model(batch: &[&str]) -> Result<Vec<Probabilities>> {
        Ok(batch
            .iter()
            .map(|s| {
                let g = s.bytes().filter(|&b| b == b'G').count() as f64 / s.len() as f64;
                Probabilities::new(g, 1.0 - g)
            })
            .collect())
    }

    fn short_model(batch: &[&str]) -> Result<Vec<Probabilities>> {
        Ok(vec![Probabilities::new(0.1, 0.9); batch.len() / 2])
    }

    #[derive(Default)]
    struct Recorder(Vec<Stage>);

    impl ProgressObserver for Recorder {
        fn on_stage(&mut self, stage: Stage) {
            self.0.push(stage);
        }
    }

    fn inputs() -> Vec<Sequence> {
        vec![
            // first half resistant-looking, second half not
            Sequence::new("fasta_a:c1", format!("{}{}", "G".repeat(10), "A".repeat(10))),
            Sequence::new("fasta_a:c2", "G".repeat(8)),
            Sequence::new("fasta_b:c1", "T".repeat(12)),
        ]
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            segment: SegmentConfig::new(10, 1, 0),
            genome: Some(GenomeSource::Sequences),
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn end_to_end_in_memory() {
        let mut rec = Recorder::default();
        let result = run(&inputs(), &config(), &g_model, &mut rec).unwrap();

        let ids: Vec<&str> = result.predictions.iter().map(|p| p.sequence_id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "fasta_a:c1_segment_1_10",
                "fasta_a:c1_segment_11_20",
                "fasta_a:c2",
                "fasta_b:c1_segment_1_10",
                "fasta_b:c1_segment_11_12",
            ]
        );

        let seq_rows = result.sequence_rows.as_ref().unwrap();
        // an unsplit colon id collapses onto its genomic file when parsed
        let seq_ids: Vec<&str> = seq_rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(seq_ids, vec!["fasta_a:c1", "fasta_a", "fasta_b:c1"]);
        let c1 = &seq_rows[0];
        assert_eq!((c1.start, c1.end), (Some(1), Some(20)));
        assert_eq!(c1.any_resistance, Call::Resistant);
        assert_eq!(c1.majority_vote, Call::Susceptible);
        assert!(!c1.methods_agree);

        let genomes = result.genome_rows.as_ref().unwrap();
        assert_eq!(genomes.len(), 2);
        assert_eq!(genomes[0].id, "fasta_a");
        assert_eq!(genomes[0].segment_count, 2);
        assert_eq!(genomes[1].id, "fasta_b");
        assert_eq!(result.summary.genome_dropped_rows, 0);
        assert_eq!(result.summary.segments, 5);
        assert_eq!(result.summary.unparsed_ids, 0);
        assert_eq!(result.summary.ambiguous_ids, 1);

        assert_eq!(rec.0.first(), Some(&Stage::Segmenting { sequences: 3 }));
        assert_eq!(rec.0.last(), Some(&Stage::Done));
    }

    #[test]
    fn unsplit_sequences_reach_genome_level() {
        let seqs = vec![
            Sequence::new("fasta_a:c1", "G".repeat(10)),
            Sequence::new("fasta_a:c2", "A".repeat(10)),
            Sequence::new("fasta_b:c1", "T".repeat(10)),
        ];
        let cfg = PipelineConfig {
            genome: Some(GenomeSource::Sequences),
            ..PipelineConfig::default()
        };
        let result = run(&seqs, &cfg, &g_model, &mut ()).unwrap();

        let seq_ids: Vec<&str> = result
            .sequence_rows
            .as_ref()
            .unwrap()
            .iter()
            .map(|r| r.id.as_str())
            .collect();
        assert_eq!(seq_ids, vec!["fasta_a", "fasta_b"]);

        let genomes = result.genome_rows.as_ref().unwrap();
        let genome_ids: Vec<&str> = genomes.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(genome_ids, vec!["fasta_a", "fasta_b"]);
        assert_eq!(genomes[0].any_resistance, Call::Resistant);
        assert_eq!(result.summary.genome_dropped_rows, 0);
        assert_eq!(result.summary.genome_rows, 2);
    }

    #[test]
    fn empty_sequences_are_skipped_and_counted() {
        let seqs = vec![Sequence::new("blank", ""), Sequence::new("fasta_b:c1", "G".repeat(12))];
        let result = run(&seqs, &config(), &g_model, &mut ()).unwrap();
        assert_eq!(result.summary.empty_sequences, 1);
        assert_eq!(result.summary.sequences, 2);
        let ids: Vec<&str> = result.predictions.iter().map(|p| p.sequence_id.as_str()).collect();
        assert_eq!(ids, vec!["fasta_b:c1_segment_1_10", "fasta_b:c1_segment_11_12"]);

        // nothing left to classify: the model is never asked
        let only_blank = vec![Sequence::new("blank", "")];
        let result = run(&only_blank, &config(), &short_model, &mut ()).unwrap();
        assert!(result.predictions.is_empty());
        assert_eq!(result.summary.empty_sequences, 1);
    }

    #[test]
    fn wrong_cardinality_aborts_before_aggregation() {
        let mut rec = Recorder::default();
        match run(&inputs(), &config(), &short_model, &mut rec) {
            Err(AmrError::CountMismatch { expected, actual }) => {
                assert_eq!((expected, actual), (5, 2));
            }
            other => panic!("expected count mismatch, got {:?}", other),
        }
        assert!(!rec
            .0
            .iter()
            .any(|s| matches!(s, Stage::AggregatingSequences { .. })));
    }

    #[test]
    fn aggregation_can_be_disabled() {
        let cfg = PipelineConfig {
            aggregate_sequences: false,
            ..config()
        };
        let result = run(&inputs(), &cfg, &g_model, &mut ()).unwrap();
        assert_eq!(result.predictions.len(), 5);
        assert!(result.sequence_rows.is_none());
        assert!(result.genome_rows.is_none());
        assert!(result.sequence_table().is_none());
    }

    #[test]
    fn genome_level_can_chain_off_predictions() {
        let cfg = PipelineConfig {
            genome: Some(GenomeSource::Predictions),
            ..config()
        };
        let result = run(&inputs(), &cfg, &g_model, &mut ()).unwrap();
        let genomes = result.genome_rows.unwrap();
        assert_eq!(genomes[0].segment_count, 3);
        assert_eq!(genomes[1].segment_count, 2);
        assert_eq!(result.summary.genome_dropped_rows, 0);
    }

    #[test]
    fn reruns_are_byte_identical() {
        let a = run(&inputs(), &config(), &g_model, &mut ()).unwrap();
        let b = run(&inputs(), &config(), &g_model, &mut ()).unwrap();
        assert_eq!(a.prediction_table(), b.prediction_table());
        assert_eq!(a.sequence_table(), b.sequence_table());
        assert_eq!(a.genome_table(), b.genome_table());
    }

    #[test]
    fn overlap_correction_is_reported_not_fatal() {
        let cfg = PipelineConfig {
            segment: SegmentConfig::new(10, 1, 10),
            ..config()
        };
        let result = run(&inputs(), &cfg, &g_model, &mut ()).unwrap();
        assert!(result.summary.overlap_corrected);
    }

    #[test]
    fn threshold_out_of_range_is_rejected() {
        let cfg = PipelineConfig {
            threshold: 1.5,
            ..config()
        };
        assert!(matches!(
            run(&inputs(), &cfg, &g_model, &mut ()),
            Err(AmrError::InvalidConfig(_))
        ));
    }
}
