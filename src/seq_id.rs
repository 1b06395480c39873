//src/seq_id.rs

//! Recovery of the original sequence id and coordinates from segment ids.
//!
//! Several naming conventions have been produced over time. They are tried
//! as an ordered rule table; the first rule that matches wins:
//!
//! 1. segment/contig marker: `{parent}_segment_{start}_{end}`,
//!    `{parent}_contig_{n}_{start}_{end}`, legacy `{parent}_segment_{n}`
//! 2. trailing coordinates: `{parent}_{start}_{end}`
//! 3. genomic file: `{file}:{anything}` (no coordinates)
//!
//! Anything else is returned unchanged and flagged as unparsed.

/// Window length assumed by the legacy `_segment_{n}` ordinal form.
pub const LEGACY_SEGMENT_LENGTH: u64 = 6000;

const SEGMENT_MARKER: &str = "_segment_";
const CONTIG_MARKER: &str = "_contig_";
const GENOMIC_FILE_PREFIX: &str = "fasta_";

/// Which convention produced a [`ParsedId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdConvention {
    SegmentMarker,
    TrailingCoordinates,
    GenomicFile,
    Unparsed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedId {
    pub parent_id: String,
    pub start: Option<u64>,
    pub end: Option<u64>,
    pub convention: IdConvention,
}

impl ParsedId {
    fn unparsed(id: &str) -> Self {
        Self {
            parent_id: id.to_string(),
            start: None,
            end: None,
            convention: IdConvention::Unparsed,
        }
    }

    pub fn is_unparsed(&self) -> bool {
        self.convention == IdConvention::Unparsed
    }

    pub fn coords(&self) -> Option<(u64, u64)> {
        self.start.zip(self.end)
    }
}

type IdRule = fn(&str) -> Option<ParsedId>;

/// Priority order matters: existing outputs depend on it.
const ID_RULES: &[IdRule] = &[
    parse_marked_segment,
    parse_trailing_coordinates,
    parse_genomic_file,
];

/// Parse a segment id into `(parent_id, start, end)`. Never fails; ids that
/// match no convention come back as their own parent with no coordinates.
pub fn parse(segment_id: &str) -> ParsedId {
    ID_RULES
        .iter()
        .find_map(|rule| rule(segment_id))
        .unwrap_or_else(|| ParsedId::unparsed(segment_id))
}

/// Genomic-file id: the text before the first `:`, narrowed to the
/// `fasta_...` part when the prefix contains one. `None` without a colon.
pub fn genomic_file_id(id: &str) -> Option<String> {
    let (prefix, _) = id.split_once(':')?;
    let key = match prefix.find(GENOMIC_FILE_PREFIX) {
        Some(pos) if prefix.len() > pos + GENOMIC_FILE_PREFIX.len() => &prefix[pos..],
        _ => prefix,
    };
    if key.is_empty() {
        None
    } else {
        Some(key.to_string())
    }
}

/// Removes every `{marker}[0-9_]+` occurrence, returning the stripped id and
/// the removed digit runs in order.
fn strip_marker<'a>(id: &'a str, marker: &str) -> (String, Vec<&'a str>) {
    let mut stripped = String::with_capacity(id.len());
    let mut runs = Vec::new();
    let mut rest = id;

    while let Some(pos) = rest.find(marker) {
        let after = &rest[pos + marker.len()..];
        let run = after
            .bytes()
            .take_while(|b| b.is_ascii_digit() || *b == b'_')
            .count();
        if run == 0 {
            // not a marker here; resume one byte later
            stripped.push_str(&rest[..pos + 1]);
            rest = &rest[pos + 1..];
            continue;
        }
        stripped.push_str(&rest[..pos]);
        runs.push(&after[..run]);
        rest = &after[run..];
    }
    stripped.push_str(rest);
    (stripped, runs)
}

fn run_numbers(runs: &[&str]) -> Vec<u64> {
    runs.iter()
        .flat_map(|run| run.split('_'))
        .filter(|tok| !tok.is_empty())
        .filter_map(|tok| tok.parse().ok())
        .collect()
}

fn last_pair(nums: &[u64]) -> Option<(u64, u64)> {
    match nums {
        [.., start, end] => Some((*start, *end)),
        _ => None,
    }
}

fn is_coordinate(tok: &str) -> bool {
    !tok.is_empty() && tok.bytes().all(|b| b.is_ascii_digit())
}

/// Splits `{parent}_{a}_{b}` into `(parent, a, b)` when `a` and `b` are integers.
fn split_trailing_pair(id: &str) -> Option<(&str, u64, u64)> {
    let mut parts = id.rsplitn(3, '_');
    let end = parts.next()?;
    let start = parts.next()?;
    let parent = parts.next()?;
    if parent.is_empty() || !is_coordinate(start) || !is_coordinate(end) {
        return None;
    }
    Some((parent, start.parse().ok()?, end.parse().ok()?))
}

/// Window of the `n`-th legacy segment; `None` for ordinal 0 or on overflow.
fn legacy_window(n: u64) -> Option<(u64, u64)> {
    let end = n.checked_mul(LEGACY_SEGMENT_LENGTH)?;
    let start = end.checked_sub(LEGACY_SEGMENT_LENGTH)?.checked_add(1)?;
    Some((start, end))
}

fn parse_marked_segment(id: &str) -> Option<ParsedId> {
    let (without_segments, segment_runs) = strip_marker(id, SEGMENT_MARKER);
    let (stripped, contig_runs) = strip_marker(&without_segments, CONTIG_MARKER);
    if segment_runs.is_empty() && contig_runs.is_empty() {
        return None;
    }

    let segment_nums = run_numbers(&segment_runs);
    let contig_nums = run_numbers(&contig_runs);

    let mut parent_id = stripped.clone();
    let coords = if let Some(pair) = last_pair(&segment_nums).or_else(|| last_pair(&contig_nums)) {
        Some(pair)
    } else if let Some((parent, start, end)) = split_trailing_pair(&stripped) {
        parent_id = parent.to_string();
        Some((start, end))
    } else {
        // legacy ordinal: approximate window from the fixed length
        segment_nums.first().and_then(|&n| legacy_window(n))
    };

    Some(ParsedId {
        parent_id,
        start: coords.map(|c| c.0),
        end: coords.map(|c| c.1),
        convention: IdConvention::SegmentMarker,
    })
}

fn parse_trailing_coordinates(id: &str) -> Option<ParsedId> {
    let (parent, start, end) = split_trailing_pair(id)?;
    Some(ParsedId {
        parent_id: parent.to_string(),
        start: Some(start),
        end: Some(end),
        convention: IdConvention::TrailingCoordinates,
    })
}

fn parse_genomic_file(id: &str) -> Option<ParsedId> {
    Some(ParsedId {
        parent_id: genomic_file_id(id)?,
        start: None,
        end: None,
        convention: IdConvention::GenomicFile,
    })
}
