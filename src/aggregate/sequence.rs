// src/aggregate/sequence.rs

use super::genome::GenomeMember;
use super::{Groups, Member};
use crate::seq_id;
use crate::types::{AggregatedRow, PredictionRow};

/// Output of [`aggregate_sequences`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SequenceAggregation {
    /// One row per original sequence, in first-seen input order
    pub rows: Vec<AggregatedRow>,
    /// Input rows whose id matched no known naming convention
    pub unparsed_ids: usize,
}

/// Fold segment-level predictions back into one row per original sequence.
///
/// Rows are grouped by the parent id recovered from `sequence_id`. Explicit
/// `start`/`end` values on a row win over coordinates parsed from the id.
/// An id that cannot be parsed still forms its own group, without coordinates.
/// Each row remembers its genomic file so it can be chained to genome level
/// even when the parent id has already collapsed onto it.
pub fn aggregate_sequences(rows: &[PredictionRow], threshold: f64) -> SequenceAggregation {
    let mut groups = Groups::default();
    let mut unparsed_ids = 0;

    for row in rows {
        let parsed = seq_id::parse(&row.sequence_id);
        if parsed.is_unparsed() {
            unparsed_ids += 1;
        }
        groups.push(
            &parsed.parent_id,
            row.genome_key(),
            Member {
                resistant: row.resistant_prob,
                susceptible: row.susceptible_prob,
                start: row.start.or(parsed.start),
                end: row.end.or(parsed.end),
            },
        );
    }

    if unparsed_ids > 0 {
        log::warn!(
            "{} sequence id(s) matched no naming convention; kept as singleton groups",
            unparsed_ids
        );
    }

    SequenceAggregation {
        rows: groups.into_rows(threshold),
        unparsed_ids,
    }
}
