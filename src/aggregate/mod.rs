//src/aggregate/mod.rs

pub mod decision;
pub mod genome;
pub mod sequence;

pub use decision::{decide, Member};
pub use genome::{aggregate_genomes, aggregate_genomes_by_model, GenomeAggregation, GenomeMember};
pub use sequence::{aggregate_sequences, SequenceAggregation};

use ahash::AHashMap;
use crate::types::AggregatedRow;

struct Group {
    key: String,
    genomic_id: Option<String>,
    members: Vec<Member>,
}

/// Rows grouped by key, keeping groups in first-seen order.
#[derive(Default)]
pub(crate) struct Groups {
    index: AHashMap<String, usize>,
    groups: Vec<Group>,
}

impl Groups {
    /// Adds a member; the first genomic id seen for a group is kept.
    pub(crate) fn push(&mut self, key: &str, genomic_id: Option<String>, member: Member) {
        match self.index.get(key) {
            Some(&i) => {
                let group = &mut self.groups[i];
                if group.genomic_id.is_none() {
                    group.genomic_id = genomic_id;
                }
                group.members.push(member);
            }
            None => {
                self.index.insert(key.to_string(), self.groups.len());
                self.groups.push(Group {
                    key: key.to_string(),
                    genomic_id,
                    members: vec![member],
                });
            }
        }
    }

    pub(crate) fn into_rows(self, threshold: f64) -> Vec<AggregatedRow> {
        self.groups
            .into_iter()
            .map(|group| {
                let mut row = decide(group.key, &group.members, threshold);
                row.genomic_id = group.genomic_id;
                row
            })
            .collect()
    }
}
