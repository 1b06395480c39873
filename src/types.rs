//src/types.rs

use std::fmt;

/// An input nucleotide sequence (FASTA record or in-memory submission).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sequence {
    pub id: String,
    pub bases: String,
}

impl Sequence {
    pub fn new(id: impl Into<String>, bases: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            bases: bases.into(),
        }
    }
}

/// A window cut from a [`Sequence`] by the segmenter.
///
/// Coordinates are 1-based and inclusive on both ends, so
/// `end - start + 1 == bases.len()` always holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub segment_id: String,
    pub parent_id: String,
    pub bases: String,
    pub start: u64,
    pub end: u64,
}

impl Segment {
    pub fn len(&self) -> usize {
        self.bases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bases.is_empty()
    }
}

/// The pair of class probabilities returned by the model for one segment.
/// The two values are independent; nothing forces them to sum to 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Probabilities {
    pub resistant: f64,
    pub susceptible: f64,
}

impl Probabilities {
    pub fn new(resistant: f64, susceptible: f64) -> Self {
        Self {
            resistant,
            susceptible,
        }
    }
}

impl From<(f64, f64)> for Probabilities {
    fn from((resistant, susceptible): (f64, f64)) -> Self {
        Self::new(resistant, susceptible)
    }
}

/// One row of the prediction table: a segment (or an unsplit sequence) with its scores.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionRow {
    pub sequence_id: String,
    pub length: usize,
    pub resistant_prob: f64,
    pub susceptible_prob: f64,
    pub start: Option<u64>,            // explicit Start column, if the table had one
    pub end: Option<u64>,              // explicit End column
    pub genomic_id: Option<String>,    // explicit Genomic_ID column
}

impl PredictionRow {
    pub fn new(sequence_id: impl Into<String>, resistant_prob: f64, susceptible_prob: f64) -> Self {
        Self {
            sequence_id: sequence_id.into(),
            length: 0,
            resistant_prob,
            susceptible_prob,
            start: None,
            end: None,
            genomic_id: None,
        }
    }

    pub fn with_coords(mut self, start: u64, end: u64) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }
}

/// A resistance call made by one of the aggregation methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Call {
    Resistant,
    Susceptible,
}

impl Call {
    /// Strict comparison: a probability equal to the threshold is Susceptible.
    #[inline]
    pub fn from_prob(prob: f64, threshold: f64) -> Self {
        if prob > threshold {
            Call::Resistant
        } else {
            Call::Susceptible
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Call::Resistant => "Resistant",
            Call::Susceptible => "Susceptible",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            s if s.eq_ignore_ascii_case("resistant") => Some(Call::Resistant),
            s if s.eq_ignore_ascii_case("susceptible") => Some(Call::Susceptible),
            _ => None,
        }
    }
}

impl fmt::Display for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One aggregated row, keyed either by original sequence id (sequence level)
/// or by genomic-file id (genome level). Both levels share this shape.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedRow {
    /// Original sequence id, or genomic-file id at genome level
    pub id: String,
    /// Number of member rows folded into this one
    pub segment_count: usize,
    pub start: Option<u64>,
    pub end: Option<u64>,

    pub any_resistance: Call,
    /// Members with `resistant_prob > threshold`
    pub any_resistance_count: usize,
    pub majority_vote: Call,
    /// Members that voted for the winning majority label
    pub majority_vote_count: usize,
    pub avg_resistance_prob: f64,
    pub avg_susceptible_prob: f64,
    pub avg_classification: Call,

    pub methods_agree: bool,
    /// Genomic file a sequence-level row belongs to, carried forward so the
    /// genome level does not have to re-derive it from `id`
    pub genomic_id: Option<String>,
    /// Classifier run label, only set when several runs are merged
    pub model: Option<String>,
}
