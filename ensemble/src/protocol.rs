//! Line framing shared by the command and scope channels.
//!
//! Every request is one line terminated by [`EOS`]. Every reply starts with a
//! status character: [`SUCCESS`] followed by the payload, or one of
//! [`INVALID`], [`FAULT`], [`TIMEOUT`].

use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{EnsembleError, Result};

pub const EOS: u8 = b'\n';
pub const SUCCESS: char = '%';
pub const INVALID: char = '!';
pub const FAULT: char = '#';
pub const TIMEOUT: char = '$';

pub(crate) const STATUS_CHARS: [char; 4] = [SUCCESS, INVALID, FAULT, TIMEOUT];

pub(crate) async fn write_line<W: AsyncWrite + Unpin>(
    writer: &mut W,
    line: &str,
) -> io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(&[EOS]).await?;
    writer.flush().await
}

pub(crate) async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> io::Result<String> {
    let mut line = String::new();

    if reader.read_line(&mut line).await? == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "controller closed the connection",
        ));
    }

    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Splits a reply into its payload or the matching error.
pub(crate) fn parse_response(command: &str, line: &str) -> Result<String> {
    let mut chars = line.chars();

    match chars.next() {
        Some(SUCCESS) => Ok(chars.as_str().to_string()),
        Some(INVALID) => Err(EnsembleError::InvalidCommand {
            command: command.to_string(),
        }),
        Some(FAULT) => Err(EnsembleError::Fault {
            command: command.to_string(),
        }),
        Some(TIMEOUT) => Err(EnsembleError::TimeoutResponse {
            command: command.to_string(),
        }),
        _ => Err(EnsembleError::InvalidResponse {
            command: command.to_string(),
            response: line.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_status_characters() {
        assert_eq!(parse_response("TASKSTATE(1)", "%3").unwrap(), "3");
        assert_eq!(parse_response("ENABLE X", "%").unwrap(), "");

        assert!(matches!(
            parse_response("FOO", "!"),
            Err(EnsembleError::InvalidCommand { .. })
        ));
        assert!(matches!(
            parse_response("ENABLE X", "#"),
            Err(EnsembleError::Fault { .. })
        ));
        assert!(parse_response("COMMITPARAMETERS", "$")
            .unwrap_err()
            .is_timeout_response());
        assert!(matches!(
            parse_response("ENABLE X", "hello"),
            Err(EnsembleError::InvalidResponse { .. })
        ));
    }

    #[tokio::test]
    async fn read_line_strips_terminators_and_reports_eof() {
        let mut reader: &[u8] = b"%12\r\n";
        assert_eq!(read_line(&mut reader).await.unwrap(), "%12");

        let err = read_line(&mut reader).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
