// src/aggregate/genome.rs

use super::{Groups, Member};
use crate::seq_id;
use crate::types::{AggregatedRow, PredictionRow};

/// A row that can be folded into a genome-level call.
pub trait GenomeMember {
    /// Genomic-file id this row belongs to, if one can be recovered.
    fn genome_key(&self) -> Option<String>;
    fn member(&self) -> Member;
}

impl GenomeMember for PredictionRow {
    fn genome_key(&self) -> Option<String> {
        self.genomic_id
            .clone()
            .or_else(|| seq_id::genomic_file_id(&self.sequence_id))
    }

    fn member(&self) -> Member {
        let parsed = seq_id::parse(&self.sequence_id);
        Member {
            resistant: self.resistant_prob,
            susceptible: self.susceptible_prob,
            start: self.start.or(parsed.start),
            end: self.end.or(parsed.end),
        }
    }
}

/// Sequence-level rows contribute their averaged probabilities.
impl GenomeMember for AggregatedRow {
    fn genome_key(&self) -> Option<String> {
        self.genomic_id
            .clone()
            .or_else(|| seq_id::genomic_file_id(&self.id))
    }

    fn member(&self) -> Member {
        Member {
            resistant: self.avg_resistance_prob,
            susceptible: self.avg_susceptible_prob,
            start: self.start,
            end: self.end,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenomeAggregation {
    pub rows: Vec<AggregatedRow>,
    /// Rows skipped because no genomic-file id could be extracted
    pub dropped_rows: usize,
}

/// Group rows by genomic-file id and recompute all three calls per genome.
///
/// Unlike sequence aggregation, the grouping key is mandatory here: rows
/// without a recoverable genomic-file id are dropped and counted.
pub fn aggregate_genomes<R: GenomeMember>(rows: &[R], threshold: f64) -> GenomeAggregation {
    let mut groups = Groups::default();
    let mut dropped_rows = 0;

    for row in rows {
        match row.genome_key() {
            Some(key) => groups.push(&key, None, row.member()),
            None => dropped_rows += 1,
        }
    }

    if dropped_rows > 0 {
        log::warn!(
            "{} row(s) had no genomic-file id and were left out of genome aggregation",
            dropped_rows
        );
    }

    GenomeAggregation {
        rows: groups.into_rows(threshold),
        dropped_rows,
    }
}

/// Aggregate several classifier runs separately and concatenate them in run
/// order, tagging each genome row with its model label.
pub fn aggregate_genomes_by_model<R: GenomeMember>(
    runs: &[(String, Vec<R>)],
    threshold: f64,
) -> GenomeAggregation {
    let mut merged = GenomeAggregation::default();
    for (model, rows) in runs {
        let agg = aggregate_genomes(rows, threshold);
        merged.dropped_rows += agg.dropped_rows;
        merged.rows.extend(agg.rows.into_iter().map(|mut row| {
            row.model = Some(model.clone());
            row
        }));
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::aggregate_sequences;
    use crate::types::Call;

    fn predictions() -> Vec<PredictionRow> {
        vec![
            PredictionRow::new("fasta_g1:contig1_segment_1_100", 0.9, 0.1),
            PredictionRow::new("fasta_g1:contig1_segment_101_200", 0.1, 0.9),
            PredictionRow::new("fasta_g1:contig2_1_300", 0.2, 0.8),
            PredictionRow::new("fasta_g2:contig1_1_50", 0.6, 0.4),
            PredictionRow::new("loose_contig", 0.99, 0.01),
        ]
    }

    #[test]
    fn groups_segments_by_genomic_file() {
        let agg = aggregate_genomes(&predictions(), 0.5);
        assert_eq!(agg.dropped_rows, 1);
        assert_eq!(agg.rows.len(), 2);

        let g1 = &agg.rows[0];
        assert_eq!(g1.id, "fasta_g1");
        assert_eq!(g1.segment_count, 3);
        assert_eq!(g1.any_resistance, Call::Resistant);
        assert_eq!(g1.majority_vote, Call::Susceptible);
        assert_eq!(g1.avg_classification, Call::Susceptible);
        assert!(!g1.methods_agree);

        let g2 = &agg.rows[1];
        assert_eq!(g2.id, "fasta_g2");
        assert!(g2.methods_agree);
    }

    #[test]
    fn recomputes_from_sequence_rows() {
        let seq_rows = aggregate_sequences(&predictions(), 0.5).rows;
        let agg = aggregate_genomes(&seq_rows, 0.5);
        assert_eq!(agg.dropped_rows, 1);

        let g1 = &agg.rows[0];
        // contig1 averages 0.5, contig2 is 0.2: nothing is above threshold
        assert_eq!(g1.segment_count, 2);
        assert_eq!(g1.any_resistance, Call::Susceptible);
        assert!((g1.avg_resistance_prob - 0.35).abs() < 1e-12);
        assert!(g1.methods_agree);
    }

    #[test]
    fn unsplit_colon_ids_keep_their_genome() {
        let rows = vec![
            PredictionRow::new("fasta_a:c1", 0.9, 0.1),
            PredictionRow::new("fasta_a:c2", 0.2, 0.8),
            PredictionRow::new("fasta_b:c1", 0.1, 0.9),
        ];
        let seq_rows = aggregate_sequences(&rows, 0.5).rows;
        // both collapse onto their genomic file at sequence level
        let ids: Vec<&str> = seq_rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["fasta_a", "fasta_b"]);
        assert_eq!(seq_rows[0].genomic_id.as_deref(), Some("fasta_a"));

        let agg = aggregate_genomes(&seq_rows, 0.5);
        assert_eq!(agg.dropped_rows, 0);
        assert_eq!(agg.rows.len(), 2);
        assert_eq!(agg.rows[0].id, "fasta_a");
        assert_eq!(agg.rows[0].any_resistance, Call::Resistant);
        assert_eq!(agg.rows[1].id, "fasta_b");
        assert!(agg.rows.iter().all(|r| r.genomic_id.is_none()));
    }

    #[test]
    fn explicit_genomic_id_column_wins() {
        let mut row = PredictionRow::new("contig9_segment_1_50", 0.8, 0.2);
        row.genomic_id = Some("fasta_sub".to_string());
        let agg = aggregate_genomes(&[row], 0.5);
        assert_eq!(agg.dropped_rows, 0);
        assert_eq!(agg.rows[0].id, "fasta_sub");
        assert_eq!((agg.rows[0].start, agg.rows[0].end), (Some(1), Some(50)));
    }

    #[test]
    fn merges_runs_with_model_labels() {
        let runs = vec![
            ("esm".to_string(), predictions()),
            ("dnabert".to_string(), predictions()[3..].to_vec()),
        ];
        let agg = aggregate_genomes_by_model(&runs, 0.5);
        let labels: Vec<(&str, Option<&str>)> = agg
            .rows
            .iter()
            .map(|r| (r.id.as_str(), r.model.as_deref()))
            .collect();
        assert_eq!(
            labels,
            vec![
                ("fasta_g1", Some("esm")),
                ("fasta_g2", Some("esm")),
                ("fasta_g2", Some("dnabert")),
            ]
        );
        assert_eq!(agg.dropped_rows, 2);
    }
}
