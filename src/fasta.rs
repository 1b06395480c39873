//src/fasta.rs

use std::io::BufRead;
use std::path::Path;

use crate::errors::Result;
use crate::table::open_text;
use crate::types::{Segment, Sequence};

/// Minimal FASTA reader that also supports .gz
///
/// The id is the header text up to the first whitespace. Sequence lines are
/// joined and upper-cased. Records without bases are skipped with a warning,
/// since they cannot be segmented.
pub fn read_fasta_records<P: AsRef<Path>>(path: P) -> Result<Vec<Sequence>> {
    parse_fasta(open_text(path)?)
}

pub fn parse_fasta<R: BufRead>(reader: R) -> Result<Vec<Sequence>> {
    let mut sequences = Vec::new();
    let mut current: Option<Sequence> = None;
    let mut skipped = 0usize;

    let mut finish = |record: Option<Sequence>, out: &mut Vec<Sequence>| {
        if let Some(record) = record {
            if record.bases.is_empty() {
                skipped += 1;
            } else {
                out.push(record);
            }
        }
    };

    for line in reader.lines() {
        let line = line?;
        let line = line.trim_end();
        if let Some(header) = line.strip_prefix('>') {
            finish(current.take(), &mut sequences);
            let id = header.split_whitespace().next().unwrap_or("").to_string();
            current = Some(Sequence::new(id, String::new()));
        } else if let Some(record) = current.as_mut() {
            record
                .bases
                .extend(line.chars().filter(|c| !c.is_whitespace()).map(|c| c.to_ascii_uppercase()));
        }
        // bases before the first header are ignored
    }
    finish(current.take(), &mut sequences);

    if skipped > 0 {
        log::warn!("skipped {} FASTA record(s) without bases", skipped);
    }
    Ok(sequences)
}

/// Render segments as FASTA, wrapping at 60 columns.
pub fn render_segments_fasta(segments: &[Segment]) -> String {
    let mut out = String::new();
    for seg in segments {
        out.push('>');
        out.push_str(&seg.segment_id);
        out.push('\n');
        let bytes = seg.bases.as_bytes();
        for chunk in bytes.chunks(60) {
            out.push_str(&String::from_utf8_lossy(chunk));
            out.push('\n');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn parses_multiline_records() {
        let text = ">seq1 some description\nacgt\nACGN-\n\n>empty\n>seq2\nTTTT\n";
        let seqs = parse_fasta(Cursor::new(text)).unwrap();
        assert_eq!(
            seqs,
            vec![Sequence::new("seq1", "ACGTACGN-"), Sequence::new("seq2", "TTTT")]
        );
    }

    #[test]
    fn writes_wrapped_fasta() {
        let seg = Segment {
            segment_id: "x_segment_1_70".to_string(),
            parent_id: "x".to_string(),
            bases: "A".repeat(70),
            start: 1,
            end: 70,
        };
        let text = render_segments_fasta(&[seg]);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], ">x_segment_1_70");
        assert_eq!(lines[1].len(), 60);
        assert_eq!(lines[2].len(), 10);
    }
}
