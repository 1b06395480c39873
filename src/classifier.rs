//src/classifier.rs

//! The model boundary.
//!
//! A [`Classifier`] takes an ordered list of nucleotide strings and returns
//! one probability pair per input, in the same order. The engine calls it
//! exactly once per pipeline run; any batching or parallelism lives behind
//! this trait.

use std::io::{Seek, SeekFrom, Write};
use std::process::{Command, Stdio};

use rayon::prelude::*;
use tempfile::NamedTempFile;

use crate::errors::{AmrError, Result};
use crate::types::Probabilities;

pub trait Classifier {
    fn classify(&self, sequences: &[&str]) -> Result<Vec<Probabilities>>;
}

impl<F> Classifier for F
where
    F: Fn(&[&str]) -> Result<Vec<Probabilities>>,
{
    fn classify(&self, sequences: &[&str]) -> Result<Vec<Probabilities>> {
        self(sequences)
    }
}

/// Splits the input into fixed-size batches and classifies them in parallel.
///
/// Results are concatenated in input order. Each batch must come back with
/// exactly as many results as it had inputs.
pub struct BatchedClassifier<C> {
    inner: C,
    batch_size: usize,
}

impl<C: Classifier + Sync> BatchedClassifier<C> {
    pub fn new(inner: C, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(AmrError::InvalidConfig("batch size must be at least 1".to_string()));
        }
        Ok(Self { inner, batch_size })
    }
}

impl<C: Classifier + Sync> Classifier for BatchedClassifier<C> {
    fn classify(&self, sequences: &[&str]) -> Result<Vec<Probabilities>> {
        let batches = sequences
            .par_chunks(self.batch_size)
            .map(|batch| {
                let out = self.inner.classify(batch)?;
                if out.len() != batch.len() {
                    return Err(AmrError::CountMismatch {
                        expected: batch.len(),
                        actual: out.len(),
                    });
                }
                Ok(out)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(batches.into_iter().flatten().collect())
    }
}

/// Runs an external model program once per call.
///
/// The program receives one sequence per line on stdin and must print one
/// line per sequence holding the resistant and susceptible probabilities,
/// separated by whitespace or a comma.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandClassifier {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandClassifier {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Builds a classifier from a shell-like string split on whitespace.
    pub fn from_command_line(command: &str) -> Result<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| AmrError::InvalidConfig("empty classifier command".to_string()))?;
        Ok(Self::new(program, parts.collect()))
    }

    fn describe(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn parse_score_line(line: &str, line_no: usize) -> Result<Probabilities> {
    let mut values = line
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|tok| !tok.is_empty())
        .map(str::parse::<f64>);

    match (values.next(), values.next(), values.next()) {
        (Some(Ok(r)), Some(Ok(s)), None) => Ok(Probabilities::new(r, s)),
        _ => Err(AmrError::Classifier(format!(
            "unreadable score line {}: {:?}",
            line_no, line
        ))),
    }
}

impl Classifier for CommandClassifier {
    fn classify(&self, sequences: &[&str]) -> Result<Vec<Probabilities>> {
        // stage stdin in a temp file so large inputs cannot block on a full pipe
        let mut input = NamedTempFile::new()?;
        for seq in sequences {
            input.write_all(seq.as_bytes())?;
            input.write_all(b"\n")?;
        }
        input.flush()?;
        let mut stdin = input.reopen()?;
        stdin.seek(SeekFrom::Start(0))?;

        log::info!(
            "running classifier `{}` on {} sequence(s)",
            self.describe(),
            sequences.len()
        );
        let output = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::from(stdin))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| AmrError::Classifier(format!("cannot start `{}`: {}", self.describe(), e)))?;

        if !output.status.success() {
            return Err(AmrError::Classifier(format!(
                "`{}` exited with {}: {}",
                self.describe(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        String::from_utf8_lossy(&output.stdout)
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| parse_score_line(line, i + 1))
            .collect()
    }
}
