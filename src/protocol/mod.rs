//! Wire format: length-prefixed frames carrying newline-delimited commands
//! and events.
//!
//! Every frame is a 64-byte ASCII header holding the decimal byte length of
//! the payload, right-padded with spaces, followed by the UTF-8 payload.

use crate::domain::{Angle, TimeRange};
use crate::errors::{ErrorKind, ResolveError, ResolveResult};
use crate::utils::format_timestamp;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const HEADER_LEN: usize = 64;
pub const DISCONNECT: &str = "!DISCONNECT";
const MAX_PAYLOAD: usize = 1 << 20;

/// Read one frame's raw payload. Returns `None` on a clean end of stream.
///
/// Only a malformed header is an error here; the payload is checked by
/// [`frame_text`] so a bad payload fails its own request, not the stream.
pub async fn read_frame<R>(reader: &mut R) -> io::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let len = std::str::from_utf8(&header)
        .ok()
        .map(|h| h.trim_matches(|c: char| c.is_whitespace() || c == '\0'))
        .and_then(|h| h.parse::<usize>().ok())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "malformed frame header"))?;
    if len > MAX_PAYLOAD {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {} bytes exceeds limit", len),
        ));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

/// Decode a frame payload as UTF-8 text.
pub fn frame_text(frame: Vec<u8>) -> ResolveResult<String> {
    String::from_utf8(frame).map_err(|e| {
        ResolveError::protocol(format!("payload is not valid UTF-8: {}", e.utf8_error()))
    })
}

pub fn is_disconnect(frame: &[u8]) -> bool {
    std::str::from_utf8(frame).is_ok_and(|text| text.trim_end() == DISCONNECT)
}

pub async fn write_frame<W>(writer: &mut W, payload: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = payload.len().to_string();
    if len.len() > HEADER_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "payload too large"));
    }
    let header = format!("{:<width$}", len, width = HEADER_LEN);
    writer.write_all(header.as_bytes()).await?;
    writer.write_all(payload.as_bytes()).await?;
    writer.flush().await
}

/// A caller command with its fields split out but not yet interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Resolve {
        name: String,
        start: String,
        stop: String,
        flag: String,
    },
    PushRaDec {
        ra: String,
        dec: String,
        start: String,
        stop: String,
        name: String,
    },
}

/// Split a payload into a command, validating the verb and field count.
pub fn decode(payload: &str) -> ResolveResult<Command> {
    let payload = payload.trim_end_matches(['\r', '\n']);
    let fields: Vec<String> = payload
        .split('\n')
        .map(|f| f.trim_end_matches('\r').to_string())
        .collect();
    let verb = fields[0].clone();

    match verb.as_str() {
        "resolve_request" => {
            expect_fields(&verb, &fields, 5)?;
            let [_, name, start, stop, flag]: [String; 5] = take(fields)?;
            Ok(Command::Resolve {
                name,
                start,
                stop,
                flag,
            })
        }
        "pushing_ra_dec" => {
            expect_fields(&verb, &fields, 6)?;
            let [_, ra, dec, start, stop, name]: [String; 6] = take(fields)?;
            Ok(Command::PushRaDec {
                ra,
                dec,
                start,
                stop,
                name,
            })
        }
        "" => Err(ResolveError::protocol("empty command")),
        other => Err(ResolveError::protocol(format!("unknown command '{}'", other))),
    }
}

fn expect_fields(verb: &str, fields: &[String], count: usize) -> ResolveResult<()> {
    if fields.len() != count {
        return Err(ResolveError::protocol(format!(
            "{} expects {} fields, got {}",
            verb,
            count - 1,
            fields.len() - 1
        )));
    }
    Ok(())
}

fn take<const N: usize>(fields: Vec<String>) -> ResolveResult<[String; N]> {
    fields
        .try_into()
        .map_err(|_| ResolveError::protocol("field count mismatch"))
}

/// What the caller learns once coordinates are resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum Solution {
    Fixed {
        name: String,
        ra: Angle,
        dec: Angle,
        range: Option<TimeRange>,
    },
    Ephemeris {
        name: String,
        samples: usize,
        range: TimeRange,
    },
}

/// Server-to-caller notifications.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    ExpectedFilename(String),
    CoordinatesSolved(Solution),
    OutputFileGenerated(String),
    Failed {
        kind: ErrorKind,
        detail: Option<String>,
    },
}

impl Event {
    pub fn failure(err: &ResolveError) -> Self {
        Event::Failed {
            kind: err.kind(),
            detail: err.detail(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Event::ExpectedFilename(_) => "expected_filename",
            Event::CoordinatesSolved(_) => "coordinates_solved",
            Event::OutputFileGenerated(_) => "output_file_generated",
            Event::Failed { kind, .. } => kind.as_str(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Event::OutputFileGenerated(_) | Event::Failed { .. })
    }

    /// Render the event as a newline-delimited payload.
    pub fn encode(&self) -> String {
        let mut lines = vec![self.name().to_string()];
        match self {
            Event::ExpectedFilename(filename) | Event::OutputFileGenerated(filename) => {
                lines.push(filename.clone());
            }
            Event::CoordinatesSolved(Solution::Fixed {
                name,
                ra,
                dec,
                range,
            }) => {
                lines.push(name.clone());
                lines.push(ra.to_string());
                lines.push(dec.to_string());
                if let Some(range) = range {
                    lines.push(format_timestamp(range.start()));
                    lines.push(format_timestamp(range.stop()));
                }
            }
            Event::CoordinatesSolved(Solution::Ephemeris {
                name,
                samples,
                range,
            }) => {
                lines.push(name.clone());
                lines.push(samples.to_string());
                lines.push(format_timestamp(range.start()));
                lines.push(format_timestamp(range.stop()));
            }
            Event::Failed { detail, .. } => {
                if let Some(detail) = detail {
                    lines.push(detail.clone());
                }
            }
        }
        lines.join("\n")
    }
}
