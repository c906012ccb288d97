//! Line parser for the `TYPE:VALUE` wire protocol

use gse_types::{ParseError, TelemetryChannel, TelemetryEvent};
use tracing::{debug, warn};

/// Longest partial line kept between chunks before it is discarded.
const MAX_PENDING_LINE: usize = 4096;

/// Parses every complete line in `raw`.
///
/// Blank lines are skipped; malformed lines and unknown types are logged
/// and dropped. Never fails.
pub fn parse(raw: &str) -> Vec<TelemetryEvent> {
    raw.split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| match parse_line(line) {
            Ok(event) => Some(event),
            Err(ParseError::UnknownType(tag)) => {
                debug!(tag = %tag, "Unknown data type, dropping line");
                None
            }
            Err(e) => {
                warn!("Dropping malformed line: {}", e);
                None
            }
        })
        .collect()
}

/// Parses a single trimmed line.
pub fn parse_line(line: &str) -> Result<TelemetryEvent, ParseError> {
    let (tag, value) = line
        .split_once(':')
        .ok_or_else(|| ParseError::MissingSeparator(line.to_string()))?;
    let (tag, value) = (tag.trim(), value.trim());
    if tag.is_empty() || value.is_empty() {
        return Err(ParseError::EmptyField(line.to_string()));
    }

    let channel = TelemetryChannel::from_wire_tag(tag)
        .ok_or_else(|| ParseError::UnknownType(tag.to_ascii_lowercase()))?;

    match channel {
        TelemetryChannel::ValveStatus => {
            let (name, state) = split_nested(tag, value)?;
            Ok(TelemetryEvent::valve(name, state.eq_ignore_ascii_case("open")))
        }
        TelemetryChannel::ServoStatus => {
            let (name, position) = split_nested(tag, value)?;
            Ok(TelemetryEvent::servo(name, parse_number(tag, position)?))
        }
        scalar => {
            let number = parse_number(tag, value)?;
            TelemetryEvent::scalar(scalar, number)
                .ok_or_else(|| ParseError::ValueMismatch(scalar.name().to_string()))
        }
    }
}

fn split_nested<'a>(tag: &str, value: &'a str) -> Result<(&'a str, &'a str), ParseError> {
    let invalid = || ParseError::InvalidNested {
        tag: tag.to_string(),
        value: value.to_string(),
    };
    let (name, sub) = value.split_once(':').ok_or_else(invalid)?;
    let (name, sub) = (name.trim(), sub.trim());
    if name.is_empty() || sub.is_empty() {
        return Err(invalid());
    }
    Ok((name, sub))
}

fn parse_number(tag: &str, value: &str) -> Result<f64, ParseError> {
    value
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| ParseError::InvalidNumber {
            tag: tag.to_string(),
            value: value.to_string(),
        })
}

/// Joins transport chunks back into whole lines.
///
/// Serial reads end wherever the driver's buffer did, so a line can arrive
/// split across several chunks.
#[derive(Debug, Default)]
pub struct LineAssembler {
    pending: String,
}

impl LineAssembler {
    /// Appends `chunk` and returns everything up to and including the last
    /// newline, if any.
    pub fn push(&mut self, chunk: &str) -> Option<String> {
        self.pending.push_str(chunk);
        let complete = match self.pending.rfind('\n') {
            Some(idx) => {
                let rest = self.pending.split_off(idx + 1);
                Some(std::mem::replace(&mut self.pending, rest))
            }
            None => None,
        };
        if self.pending.len() > MAX_PENDING_LINE {
            warn!(len = self.pending.len(), "Discarding oversized partial line");
            self.pending.clear();
        }
        complete
    }

    /// Returns the trailing partial line, leaving the assembler empty.
    pub fn flush(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        (!rest.trim().is_empty()).then_some(rest)
    }
}
