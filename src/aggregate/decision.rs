// src/aggregate/decision.rs

use crate::types::{AggregatedRow, Call};

/// One scored member of a group: a segment, or a whole sequence when
/// aggregating sequence rows up to genome level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Member {
    pub resistant: f64,
    pub susceptible: f64,
    pub start: Option<u64>,
    pub end: Option<u64>,
}

/// Apply the three decision rules to one non-empty group.
///
///   - any-resistance: Resistant if any member is above threshold
///   - majority-vote: Resistant if strictly more than half are above (ties are Susceptible)
///   - avg-classification: Resistant if the mean resistant probability is above threshold
///
/// All comparisons are strict `>`.
pub fn decide(id: String, members: &[Member], threshold: f64) -> AggregatedRow {
    let n = members.len();
    let resistant_count = members
        .iter()
        .filter(|m| Call::from_prob(m.resistant, threshold) == Call::Resistant)
        .count();

    let any_resistance = if resistant_count > 0 {
        Call::Resistant
    } else {
        Call::Susceptible
    };

    let (majority_vote, majority_vote_count) = if resistant_count * 2 > n {
        (Call::Resistant, resistant_count)
    } else {
        (Call::Susceptible, n - resistant_count)
    };

    let (sum_r, sum_s) = members
        .iter()
        .fold((0.0f64, 0.0f64), |(r, s), m| (r + m.resistant, s + m.susceptible));
    let (avg_resistance_prob, avg_susceptible_prob) = if n == 0 {
        (0.0, 0.0)
    } else {
        (sum_r / n as f64, sum_s / n as f64)
    };
    let avg_classification = Call::from_prob(avg_resistance_prob, threshold);

    let start = members.iter().filter_map(|m| m.start).min();
    let end = members.iter().filter_map(|m| m.end).max();

    AggregatedRow {
        id,
        segment_count: n,
        start,
        end,
        any_resistance,
        any_resistance_count: resistant_count,
        majority_vote,
        majority_vote_count,
        avg_resistance_prob,
        avg_susceptible_prob,
        avg_classification,
        methods_agree: any_resistance == majority_vote && majority_vote == avg_classification,
        genomic_id: None,
        model: None,
    }
}
