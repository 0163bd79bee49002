use std::{io, time::Duration};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnsembleError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// No reply arrived within the client-side response timeout.
    #[error("Timed out after {0:?} waiting for a response")]
    Timeout(Duration),

    #[error("Controller rejected command '{command}'")]
    InvalidCommand { command: String },

    #[error("Controller reported a fault executing '{command}'")]
    Fault { command: String },

    /// The controller itself answered with its timeout character.
    #[error("Controller timed out executing '{command}'")]
    TimeoutResponse { command: String },

    #[error("Unexpected response to '{command}': {response:?}")]
    InvalidResponse { command: String, response: String },

    #[error("Failed to parse {what} from {value:?}")]
    Parse { what: &'static str, value: String },
}

impl EnsembleError {
    pub fn is_timeout_response(&self) -> bool {
        matches!(self, EnsembleError::TimeoutResponse { .. })
    }

    /// True when the session is gone and only a reconnect can help.
    pub fn is_connection_lost(&self) -> bool {
        match self {
            EnsembleError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, EnsembleError>;
