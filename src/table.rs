//src/table.rs

//! Delimited-table I/O.
//!
//! Input tables may be comma- or tab-delimited (optionally gzipped); the
//! delimiter is detected from the header line, never from the file name.
//! Columns are located by header name, case-insensitively, so extra or
//! reordered columns are fine.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use flate2::read::MultiGzDecoder;
use tempfile::{Builder, NamedTempFile};

use crate::errors::{AmrError, Result};
use crate::types::{AggregatedRow, PredictionRow, Segment};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Delimiter {
    #[default]
    Tab,
    Comma,
}

impl Delimiter {
    pub fn as_char(self) -> char {
        match self {
            Delimiter::Tab => '\t',
            Delimiter::Comma => ',',
        }
    }

    /// Tab wins only when the sample has more tabs than commas.
    pub fn detect(sample: &str) -> Self {
        let tabs = sample.matches('\t').count();
        let commas = sample.matches(',').count();
        if tabs > commas {
            Delimiter::Tab
        } else {
            Delimiter::Comma
        }
    }

    /// Output delimiter for a path: `.csv` (or `.csv.gz`) is comma, anything else tab.
    pub fn for_output(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if name.ends_with(".csv") || name.ends_with(".csv.gz") {
            Delimiter::Comma
        } else {
            Delimiter::Tab
        }
    }
}

/// Opens a text file, transparently decompressing `.gz`.
pub fn open_text<P: AsRef<Path>>(path: P) -> Result<Box<dyn BufRead>> {
    let path = path.as_ref();
    let f = File::open(path)?;
    let is_gz = path.extension().map(|ext| ext == "gz").unwrap_or(false);
    Ok(if is_gz {
        Box::new(BufReader::new(MultiGzDecoder::new(f)))
    } else {
        Box::new(BufReader::new(f))
    })
}

/// Splits one record, honouring double-quoted fields with `""` escapes.
pub fn split_record(line: &str, delimiter: Delimiter) -> Vec<String> {
    let delim = delimiter.as_char();
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            c if c == delim && !in_quotes => fields.push(std::mem::take(&mut field)),
            c => field.push(c),
        }
    }
    fields.push(field);
    fields
}

/// Which flavour of scored table a file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    /// Per-segment classifier output (`Sequence_ID`, `Resistant`, `Susceptible`)
    Predictions,
    /// Previously written sequence-level aggregation
    Sequences,
}

struct ColumnSpec {
    id: &'static [&'static str],
    resistant: &'static [&'static str],
    susceptible: &'static [&'static str],
    length: &'static [&'static str],
}

const PREDICTION_COLUMNS: ColumnSpec = ColumnSpec {
    id: &["Sequence_ID"],
    resistant: &["Resistant", "resistant_prob"],
    susceptible: &["Susceptible", "susceptible_prob"],
    length: &["Length"],
};

const SEQUENCE_COLUMNS: ColumnSpec = ColumnSpec {
    id: &["sequence_id", "original_id"],
    resistant: &["avg_resistance_prob"],
    susceptible: &["avg_susceptible_prob"],
    length: &["segment_count"],
};

impl TableKind {
    fn columns(self) -> &'static ColumnSpec {
        match self {
            TableKind::Predictions => &PREDICTION_COLUMNS,
            TableKind::Sequences => &SEQUENCE_COLUMNS,
        }
    }

    /// A header carrying `avg_resistance_prob` is a sequence-level table.
    pub fn detect(header: &[String]) -> Self {
        if find_column(header, SEQUENCE_COLUMNS.resistant).is_some() {
            TableKind::Sequences
        } else {
            TableKind::Predictions
        }
    }
}

fn find_column(header: &[String], names: &[&str]) -> Option<usize> {
    names.iter().find_map(|name| {
        header
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(name))
    })
}

fn parse_prob(value: &str, line: usize, column: &str) -> Result<f64> {
    value.trim().parse::<f64>().map_err(|_| AmrError::InvalidValue {
        line,
        column: column.to_string(),
        value: value.to_string(),
    })
}

/// Coordinates may come back from dataframe tools as `"120.0"`; empty means absent.
fn parse_coord(value: &str, line: usize, column: &str) -> Result<Option<u64>> {
    let v = value.trim();
    if v.is_empty() || v.eq_ignore_ascii_case("nan") || v.eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    if let Ok(n) = v.parse::<u64>() {
        return Ok(Some(n));
    }
    match v.parse::<f64>() {
        Ok(f) if f >= 0.0 && f.fract() == 0.0 => Ok(Some(f as u64)),
        _ => Err(AmrError::InvalidValue {
            line,
            column: column.to_string(),
            value: value.to_string(),
        }),
    }
}

/// Parse a scored table from any line source. `source_name` only labels errors.
pub fn parse_scored_table<R: BufRead>(
    reader: R,
    kind: Option<TableKind>,
    source_name: &str,
) -> Result<(TableKind, Vec<PredictionRow>)> {
    let mut lines = reader.lines().enumerate();

    let (delimiter, header) = loop {
        match lines.next() {
            Some((_, line)) => {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let delimiter = Delimiter::detect(&line);
                break (delimiter, split_record(line.trim_end_matches('\r'), delimiter));
            }
            None => {
                return Err(AmrError::Schema {
                    missing: vec!["<header>".to_string()],
                    source_name: source_name.to_string(),
                })
            }
        }
    };

    let kind = kind.unwrap_or_else(|| TableKind::detect(&header));
    let spec = kind.columns();

    let mut missing = Vec::new();
    let mut required = |names: &[&str]| {
        let idx = find_column(&header, names);
        if idx.is_none() {
            missing.push(names[0].to_string());
        }
        idx.unwrap_or(0)
    };
    let id_col = required(spec.id);
    let res_col = required(spec.resistant);
    let sus_col = required(spec.susceptible);
    if !missing.is_empty() {
        return Err(AmrError::Schema {
            missing,
            source_name: source_name.to_string(),
        });
    }
    let start_col = find_column(&header, &["Start"]);
    let end_col = find_column(&header, &["End"]);
    let len_col = find_column(&header, spec.length);
    let genome_col = find_column(&header, &["Genomic_ID", "genomic_file"]);

    let mut rows = Vec::new();
    for (idx, line) in lines {
        let line = line?;
        let line_no = idx + 1;
        if line.trim().is_empty() {
            continue;
        }
        let fields = split_record(line.trim_end_matches('\r'), delimiter);
        let field = |col: usize| fields.get(col).map(String::as_str).unwrap_or("");

        let start = match start_col {
            Some(c) => parse_coord(field(c), line_no, "Start")?,
            None => None,
        };
        let end = match end_col {
            Some(c) => parse_coord(field(c), line_no, "End")?,
            None => None,
        };
        let length = match len_col {
            Some(c) => parse_coord(field(c), line_no, &header[c])?.unwrap_or(0) as usize,
            None => match (start, end) {
                (Some(s), Some(e)) if e >= s => (e - s + 1) as usize,
                _ => 0,
            },
        };
        let genomic_id = genome_col
            .map(|c| field(c).trim().to_string())
            .filter(|g| !g.is_empty());

        rows.push(PredictionRow {
            sequence_id: field(id_col).trim().to_string(),
            length,
            resistant_prob: parse_prob(field(res_col), line_no, &header[res_col])?,
            susceptible_prob: parse_prob(field(sus_col), line_no, &header[sus_col])?,
            start,
            end,
            genomic_id,
        });
    }

    Ok((kind, rows))
}

/// Read a per-segment prediction table.
pub fn read_prediction_table<P: AsRef<Path>>(path: P) -> Result<Vec<PredictionRow>> {
    let path = path.as_ref();
    let reader = open_text(path)?;
    let (_, rows) = parse_scored_table(reader, Some(TableKind::Predictions), &path.display().to_string())?;
    Ok(rows)
}

/// Read either table flavour, deciding from the header. Sequence-level rows
/// come back as one scored row per sequence carrying its averaged probabilities.
pub fn read_scored_table<P: AsRef<Path>>(path: P) -> Result<(TableKind, Vec<PredictionRow>)> {
    let path = path.as_ref();
    let reader = open_text(path)?;
    parse_scored_table(reader, None, &path.display().to_string())
}

fn push_field(out: &mut String, value: &str, delimiter: Delimiter) {
    let needs_quotes = value.contains(delimiter.as_char()) || value.contains('"') || value.contains('\n');
    if needs_quotes {
        out.push('"');
        out.push_str(&value.replace('"', "\"\""));
        out.push('"');
    } else {
        out.push_str(value);
    }
}

fn push_row(out: &mut String, fields: &[String], delimiter: Delimiter) {
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push(delimiter.as_char());
        }
        push_field(out, field, delimiter);
    }
    out.push('\n');
}

fn opt(v: Option<u64>) -> String {
    v.map(|n| n.to_string()).unwrap_or_default()
}

/// Render the prediction table in the same shape the reader expects.
pub fn render_predictions(rows: &[PredictionRow], delimiter: Delimiter) -> String {
    let mut out = String::new();
    let header = ["Sequence_ID", "Length", "Resistant", "Susceptible", "Start", "End"];
    push_row(&mut out, &header.map(String::from), delimiter);
    for row in rows {
        push_row(
            &mut out,
            &[
                row.sequence_id.clone(),
                row.length.to_string(),
                row.resistant_prob.to_string(),
                row.susceptible_prob.to_string(),
                opt(row.start),
                opt(row.end),
            ],
            delimiter,
        );
    }
    out
}

/// Segment manifest: where each emitted segment came from.
pub fn render_segment_manifest(segments: &[Segment], delimiter: Delimiter) -> String {
    let mut out = String::new();
    let header = ["segment_id", "parent_id", "start", "end", "length"];
    push_row(&mut out, &header.map(String::from), delimiter);
    for seg in segments {
        push_row(
            &mut out,
            &[
                seg.segment_id.clone(),
                seg.parent_id.clone(),
                seg.start.to_string(),
                seg.end.to_string(),
                seg.len().to_string(),
            ],
            delimiter,
        );
    }
    out
}

const AGGREGATE_COLUMNS: [&str; 11] = [
    "segment_count",
    "start",
    "end",
    "any_resistance",
    "any_resistance_count",
    "majority_vote",
    "majority_vote_count",
    "avg_resistance_prob",
    "avg_susceptible_prob",
    "avg_classification",
    "methods_agree",
];

/// Render aggregated rows. `key_column` is `sequence_id` or `genomic_file`.
///
/// Sequence-level rows that know their genomic file get a trailing
/// `genomic_file` column, which the table reader picks up again; a trailing
/// `model` column is added when any row carries a model label.
pub fn render_aggregated(rows: &[AggregatedRow], key_column: &str, delimiter: Delimiter) -> String {
    let with_genome = rows.iter().any(|r| r.genomic_id.is_some());
    let with_model = rows.iter().any(|r| r.model.is_some());

    let mut header = vec![key_column.to_string()];
    header.extend(AGGREGATE_COLUMNS.iter().map(|c| c.to_string()));
    if with_genome {
        header.push("genomic_file".to_string());
    }
    if with_model {
        header.push("model".to_string());
    }

    let mut out = String::new();
    push_row(&mut out, &header, delimiter);

    for row in rows {
        let mut fields = vec![
            row.id.clone(),
            row.segment_count.to_string(),
            opt(row.start),
            opt(row.end),
            row.any_resistance.to_string(),
            row.any_resistance_count.to_string(),
            row.majority_vote.to_string(),
            row.majority_vote_count.to_string(),
            // fixed precision keeps reruns byte-identical
            format!("{:.6}", row.avg_resistance_prob),
            format!("{:.6}", row.avg_susceptible_prob),
            row.avg_classification.to_string(),
            row.methods_agree.to_string(),
        ];
        if with_genome {
            fields.push(row.genomic_id.clone().unwrap_or_default());
        }
        if with_model {
            fields.push(row.model.clone().unwrap_or_default());
        }
        push_row(&mut out, &fields, delimiter);
    }
    out
}

fn temp_sibling(path: &Path) -> Result<NamedTempFile> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    Ok(Builder::new()
        .prefix(".amrseg_")
        .suffix(".tmp")
        .tempfile_in(parent)?)
}

/// Write several files so that either all of them appear or none do.
///
/// Every body is first written to a temp file beside its destination; the
/// temps are only renamed into place once all writes succeeded.
pub fn write_atomic_all(outputs: &[(&Path, &str)]) -> Result<()> {
    let mut staged = Vec::with_capacity(outputs.len());
    for (path, content) in outputs {
        let mut tmp = temp_sibling(path)?;
        {
            let mut w = BufWriter::new(tmp.as_file_mut());
            w.write_all(content.as_bytes())?;
            w.flush()?;
        }
        staged.push((tmp, *path));
    }
    for (tmp, path) in staged {
        tmp.persist(path).map_err(|e| AmrError::Io(e.error))?;
    }
    Ok(())
}

pub fn write_atomic(path: &Path, content: &str) -> Result<()> {
    write_atomic_all(&[(path, content)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Call;
    use std::io::Cursor;

    #[test]
    fn detects_delimiter_by_counting() {
        assert_eq!(Delimiter::detect("Sequence_ID\tResistant\tSusceptible"), Delimiter::Tab);
        assert_eq!(Delimiter::detect("Sequence_ID,Resistant,Susceptible"), Delimiter::Comma);
        // comma-heavy ids inside a tab file still lose to the tabs
        assert_eq!(Delimiter::detect("a,b\tc\td"), Delimiter::Tab);
    }

    #[test]
    fn output_delimiter_from_extension() {
        assert_eq!(Delimiter::for_output(Path::new("out/seq.csv")), Delimiter::Comma);
        assert_eq!(Delimiter::for_output(Path::new("seq.CSV.gz")), Delimiter::Comma);
        assert_eq!(Delimiter::for_output(Path::new("seq.tsv")), Delimiter::Tab);
    }

    #[test]
    fn splits_quoted_fields() {
        let fields = split_record("\"a,b\",0.5,\"say \"\"hi\"\"\"", Delimiter::Comma);
        assert_eq!(fields, vec!["a,b", "0.5", "say \"hi\""]);
    }

    #[test]
    fn reads_csv_predictions_with_optional_columns() {
        let text = "Sequence_ID,Length,Resistant,Susceptible,Start,End\n\
                    g1_segment_1_100,100,0.9,0.1,1,100\n\
                    g1_segment_101_200,100,0.2,0.8,101.0,200.0\n\
                    \n\
                    other,50,0.3,0.7,,\n";
        let (kind, rows) = parse_scored_table(Cursor::new(text), None, "mem").unwrap();
        assert_eq!(kind, TableKind::Predictions);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1].start, Some(101));
        assert_eq!(rows[1].end, Some(200));
        assert_eq!(rows[2].start, None);
        assert_eq!(rows[2].length, 50);
    }

    #[test]
    fn column_names_are_case_insensitive() {
        let text = "sequence_id\tresistant_prob\tsusceptible_prob\ns_1_10\t0.4\t0.6\n";
        let (_, rows) = parse_scored_table(Cursor::new(text), None, "mem").unwrap();
        assert_eq!(rows[0].resistant_prob, 0.4);
        assert_eq!(rows[0].length, 0);
    }

    #[test]
    fn missing_columns_are_a_schema_error() {
        let text = "Sequence_ID,Resistant\nx,0.5\n";
        match parse_scored_table(Cursor::new(text), None, "mem") {
            Err(AmrError::Schema { missing, .. }) => assert_eq!(missing, vec!["Susceptible"]),
            other => panic!("expected schema error, got {:?}", other),
        }
    }

    #[test]
    fn bad_number_reports_line() {
        let text = "Sequence_ID,Resistant,Susceptible\nx,0.5,0.5\ny,high,0.1\n";
        match parse_scored_table(Cursor::new(text), None, "mem") {
            Err(AmrError::InvalidValue { line, value, .. }) => {
                assert_eq!(line, 3);
                assert_eq!(value, "high");
            }
            other => panic!("expected invalid value, got {:?}", other),
        }
    }

    #[test]
    fn aggregated_table_reads_back_as_sequence_rows() {
        let row = AggregatedRow {
            id: "fasta_a:c1".to_string(),
            segment_count: 2,
            start: Some(1),
            end: Some(200),
            any_resistance: Call::Resistant,
            any_resistance_count: 1,
            majority_vote: Call::Susceptible,
            majority_vote_count: 1,
            avg_resistance_prob: 0.55,
            avg_susceptible_prob: 0.45,
            avg_classification: Call::Resistant,
            methods_agree: false,
            genomic_id: None,
            model: None,
        };
        let text = render_aggregated(&[row.clone()], "sequence_id", Delimiter::Comma);
        assert_eq!(
            text.lines().next().unwrap(),
            "sequence_id,segment_count,start,end,any_resistance,any_resistance_count,\
             majority_vote,majority_vote_count,avg_resistance_prob,avg_susceptible_prob,\
             avg_classification,methods_agree"
        );
        assert!(text.contains("fasta_a:c1,2,1,200,Resistant,1,Susceptible,1,0.550000,0.450000,Resistant,false"));

        let (kind, rows) = parse_scored_table(Cursor::new(text), None, "mem").unwrap();
        assert_eq!(kind, TableKind::Sequences);
        assert_eq!(rows[0].sequence_id, "fasta_a:c1");
        assert_eq!(rows[0].length, 2);
        assert_eq!((rows[0].start, rows[0].end), (Some(1), Some(200)));
        assert_eq!(rows[0].genomic_id, None);

        // an unsplit row already keyed by its genomic file keeps it in its own column
        let collapsed = AggregatedRow {
            id: "fasta_a".to_string(),
            genomic_id: Some("fasta_a".to_string()),
            ..row
        };
        let text = render_aggregated(&[collapsed], "sequence_id", Delimiter::Tab);
        assert!(text.lines().next().unwrap().ends_with("\tmethods_agree\tgenomic_file"));
        let (_, rows) = parse_scored_table(Cursor::new(text), None, "mem").unwrap();
        assert_eq!(rows[0].sequence_id, "fasta_a");
        assert_eq!(rows[0].genomic_id.as_deref(), Some("fasta_a"));
    }

    #[test]
    fn atomic_writes_land_together() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.tsv");
        let b = dir.path().join("b.tsv");
        write_atomic_all(&[(a.as_path(), "x\n"), (b.as_path(), "y\n")]).unwrap();
        assert_eq!(std::fs::read_to_string(&a).unwrap(), "x\n");
        assert_eq!(std::fs::read_to_string(&b).unwrap(), "y\n");

        let leftovers = std::fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| e.as_ref().unwrap().file_name().to_string_lossy().starts_with(".amrseg_"))
            .count();
        assert_eq!(leftovers, 0);
    }
}
