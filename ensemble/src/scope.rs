use std::time::Duration;

use tokio::{
    io::{AsyncRead, AsyncWrite, BufStream},
    net::{TcpStream, ToSocketAddrs},
    time::timeout,
};
use tracing::debug;

use crate::{
    client::DEFAULT_RESPONSE_TIMEOUT,
    error::{EnsembleError, Result},
    protocol::{STATUS_CHARS, parse_response, read_line, write_line},
};

/// Default data socket the scope buffer is served on.
pub const DEFAULT_SCOPE_PORT: u16 = 8001;

/// One scope acquisition: five parallel columns, one row per sample.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TraceDataset {
    pub sample: Vec<f64>,
    pub position_command: Vec<f64>,
    pub position_feedback: Vec<f64>,
    pub current_command: Vec<f64>,
    pub current_feedback: Vec<f64>,
}

impl TraceDataset {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            sample: Vec::with_capacity(capacity),
            position_command: Vec::with_capacity(capacity),
            position_feedback: Vec::with_capacity(capacity),
            current_command: Vec::with_capacity(capacity),
            current_feedback: Vec::with_capacity(capacity),
        }
    }

    /// Builds a dataset from columns in wire order. `None` if the columns do
    /// not all have the same length.
    pub fn from_columns(columns: [Vec<f64>; 5]) -> Option<Self> {
        let len = columns[0].len();
        if columns.iter().any(|column| column.len() != len) {
            return None;
        }

        let [sample, position_command, position_feedback, current_command, current_feedback] =
            columns;

        Some(Self {
            sample,
            position_command,
            position_feedback,
            current_command,
            current_feedback,
        })
    }

    pub fn columns(&self) -> [&[f64]; 5] {
        [
            &self.sample,
            &self.position_command,
            &self.position_feedback,
            &self.current_command,
            &self.current_feedback,
        ]
    }

    pub fn push_row(&mut self, row: [f64; 5]) {
        self.sample.push(row[0]);
        self.position_command.push(row[1]);
        self.position_feedback.push(row[2]);
        self.current_command.push(row[3]);
        self.current_feedback.push(row[4]);
    }

    pub fn len(&self) -> usize {
        self.sample.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sample.is_empty()
    }
}

fn parse_row(line: &str) -> Result<[f64; 5]> {
    let parse_error = || EnsembleError::Parse {
        what: "scope row",
        value: line.to_string(),
    };

    let mut row = [0.0; 5];
    let mut fields = line.split(',');

    for value in row.iter_mut() {
        *value = fields
            .next()
            .and_then(|field| field.trim().parse().ok())
            .ok_or_else(parse_error)?;
    }

    if fields.next().is_some() {
        return Err(parse_error());
    }

    Ok(row)
}

/// Reader for the scope buffer on the secondary data socket.
///
/// A request `SCOPEDATA <points>` is answered with up to `points` rows of
/// `sample,position_command,position_feedback,current_command,current_feedback`
/// followed by a single `%` line.
pub struct ScopeDataReader<S> {
    stream: BufStream<S>,
    line_timeout: Duration,
}

impl ScopeDataReader<TcpStream> {
    pub async fn connect(addr: impl ToSocketAddrs) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self::new(stream))
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> ScopeDataReader<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufStream::new(stream),
            line_timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }

    pub fn with_line_timeout(mut self, line_timeout: Duration) -> Self {
        self.line_timeout = line_timeout;
        self
    }

    pub async fn read_data(&mut self, points: u32) -> Result<TraceDataset> {
        let command = format!("SCOPEDATA {points}");
        write_line(&mut self.stream, &command).await?;

        let mut dataset = TraceDataset::with_capacity(points as usize);

        loop {
            let line = timeout(self.line_timeout, read_line(&mut self.stream))
                .await
                .map_err(|_| EnsembleError::Timeout(self.line_timeout))??;

            if line.starts_with(STATUS_CHARS) {
                parse_response(&command, &line)?;
                break;
            }

            if dataset.len() == points as usize {
                return Err(EnsembleError::InvalidResponse {
                    command,
                    response: format!("more than {points} rows"),
                });
            }

            dataset.push_row(parse_row(&line)?);
        }

        debug!(rows = dataset.len(), requested = points, "Scope data read");
        Ok(dataset)
    }
}
