//! Result files: one mapping `offset -> trace` per sweep range, stored as a
//! Python literal such as
//!
//! ```text
//! {330: ([0.0, 1.0], [2.2, 2.3], [2.19, 2.31], [0.1, 0.2], [0.11, 0.19])}
//! ```

use std::{
    collections::BTreeMap,
    fmt::Write as _,
    fs, io,
    path::{Path, PathBuf},
};

use ensemble::TraceDataset;
use utilities::atomic_file::write_atomic;

#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("at byte {position}: {message}")]
    Syntax { position: usize, message: String },

    #[error("offset {offset}: columns have different lengths")]
    Ragged { offset: i32 },
}

#[derive(Debug, thiserror::Error)]
pub enum ResultFileError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed result file {path}: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: FormatError,
    },
}

/// Captured traces keyed by commutation offset, in ascending offset order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    traces: BTreeMap<i32, TraceDataset>,
}

impl ResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `dataset` for `offset`, replacing any earlier capture.
    pub fn insert(&mut self, offset: i32, dataset: TraceDataset) -> Option<TraceDataset> {
        self.traces.insert(offset, dataset)
    }

    pub fn get(&self, offset: i32) -> Option<&TraceDataset> {
        self.traces.get(&offset)
    }

    pub fn contains(&self, offset: i32) -> bool {
        self.traces.contains_key(&offset)
    }

    pub fn len(&self) -> usize {
        self.traces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }

    pub fn offsets(&self) -> impl Iterator<Item = i32> + '_ {
        self.traces.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (i32, &TraceDataset)> {
        self.traces.iter().map(|(offset, dataset)| (*offset, dataset))
    }

    /// Adds every trace of `other`; entries of `other` win.
    pub fn merge(&mut self, other: ResultSet) {
        self.traces.extend(other.traces);
    }

    pub fn to_literal(&self) -> String {
        let mut out = String::from("{");

        for (index, (offset, dataset)) in self.traces.iter().enumerate() {
            if index > 0 {
                out.push_str(", ");
            }
            let _ = write!(out, "{offset}: (");

            for (column_index, column) in dataset.columns().into_iter().enumerate() {
                if column_index > 0 {
                    out.push_str(", ");
                }
                write_list(&mut out, column);
            }
            out.push(')');
        }

        out.push('}');
        out
    }

    pub fn from_literal(text: &str) -> Result<Self, FormatError> {
        Parser::new(text).result_set()
    }
}

fn write_list(out: &mut String, values: &[f64]) {
    out.push('[');
    for (index, value) in values.iter().enumerate() {
        if index > 0 {
            out.push_str(", ");
        }
        write_number(out, *value);
    }
    out.push(']');
}

fn write_number(out: &mut String, value: f64) {
    if value.is_nan() {
        out.push_str("nan");
    } else if value.is_infinite() {
        out.push_str(if value > 0.0 { "inf" } else { "-inf" });
    } else {
        let _ = write!(out, "{value:?}");
    }
}

struct Parser<'a> {
    text: &'a str,
    position: usize,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        Self { text, position: 0 }
    }

    fn error(&self, message: impl Into<String>) -> FormatError {
        FormatError::Syntax {
            position: self.position,
            message: message.into(),
        }
    }

    fn rest(&self) -> &'a str {
        &self.text[self.position..]
    }

    fn skip_whitespace(&mut self) {
        let rest = self.rest();
        self.position += rest.len() - rest.trim_start().len();
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_whitespace();
        self.rest().chars().next()
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.position += expected.len_utf8();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), FormatError> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{expected}'")))
        }
    }

    fn token(&mut self) -> &'a str {
        self.skip_whitespace();
        let rest = self.rest();
        let len = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.' | '_')))
            .unwrap_or(rest.len());
        self.position += len;
        &rest[..len]
    }

    fn result_set(mut self) -> Result<ResultSet, FormatError> {
        let mut results = ResultSet::new();

        self.expect('{')?;
        while !self.eat('}') {
            let offset_position = self.position;
            let offset: i32 = self.token().parse().map_err(|_| FormatError::Syntax {
                position: offset_position,
                message: "expected an integer offset".to_string(),
            })?;
            self.expect(':')?;

            let dataset = self.dataset(offset)?;
            results.insert(offset, dataset);

            if !self.eat(',') {
                self.expect('}')?;
                break;
            }
        }

        if self.peek().is_some() {
            return Err(self.error("trailing data after mapping"));
        }

        Ok(results)
    }

    fn dataset(&mut self, offset: i32) -> Result<TraceDataset, FormatError> {
        let close = self.open_sequence()?;
        let mut columns: [Vec<f64>; 5] = Default::default();

        for (index, column) in columns.iter_mut().enumerate() {
            if index > 0 {
                self.expect(',')?;
            }
            *column = self.list()?;
        }
        self.eat(',');
        self.expect(close)?;

        TraceDataset::from_columns(columns).ok_or(FormatError::Ragged { offset })
    }

    /// Accepts either a tuple or a list and returns the matching closer.
    fn open_sequence(&mut self) -> Result<char, FormatError> {
        if self.eat('(') {
            Ok(')')
        } else if self.eat('[') {
            Ok(']')
        } else {
            Err(self.error("expected '(' or '['"))
        }
    }

    fn list(&mut self) -> Result<Vec<f64>, FormatError> {
        let close = self.open_sequence()?;
        let mut values = Vec::new();

        while !self.eat(close) {
            values.push(self.number()?);

            if !self.eat(',') {
                self.expect(close)?;
                break;
            }
        }

        Ok(values)
    }

    fn number(&mut self) -> Result<f64, FormatError> {
        let start = self.position;
        let token = self.token();

        token.parse().map_err(|_| FormatError::Syntax {
            position: start,
            message: format!("invalid number {token:?}"),
        })
    }
}

/// Reads one result file.
pub fn load(path: impl AsRef<Path>) -> Result<ResultSet, ResultFileError> {
    let path = path.as_ref();

    let text = fs::read_to_string(path).map_err(|source| ResultFileError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    ResultSet::from_literal(&text).map_err(|source| ResultFileError::Format {
        path: path.to_path_buf(),
        source,
    })
}

/// Reads and merges several result files; later files win on shared offsets.
pub fn load_all<P: AsRef<Path>>(paths: &[P]) -> Result<ResultSet, ResultFileError> {
    let mut merged = ResultSet::new();

    for path in paths {
        merged.merge(load(path)?);
    }

    Ok(merged)
}

/// The result file of one sweep range.
#[derive(Debug, Clone)]
pub struct ResultStore {
    path: PathBuf,
}

impl ResultStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn for_range(dir: impl AsRef<Path>, low: i32, high: i32) -> Self {
        Self::new(dir.as_ref().join(format!("results-{low}-{high}.txt")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Contents of an earlier run, or an empty set when there is none.
    pub fn load_existing(&self) -> Result<ResultSet, ResultFileError> {
        if !self.path.exists() {
            return Ok(ResultSet::new());
        }

        load(&self.path)
    }

    pub fn save(&self, results: &ResultSet) -> Result<(), ResultFileError> {
        let mut text = results.to_literal();
        text.push('\n');

        write_atomic(&self.path, text.as_bytes()).map_err(|source| ResultFileError::Io {
            path: self.path.clone(),
            source,
        })
    }
}
