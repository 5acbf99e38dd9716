//! Telemetry frame decoding
//!
//! The motion controller reports status as `\r\n` terminated lines of the form
//! `<key1:val1,key2:val2,key3:val3>`. A value that itself contains commas is a
//! five-axis tuple `X,Y,Z,P,T`. Lines that are not wrapped in `<...>` are
//! controller chatter and are ignored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Maximum number of `key:value` segments in one frame
pub const MAX_SEGMENTS: usize = 3;

/// Default cap on a single line before it is discarded as noise
pub const DEFAULT_MAX_LINE_LEN: usize = 4096;

/// Key of the settled flag; `ssf:0` means the controller has nothing left to do
pub const SETTLED_KEY: &str = "ssf";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FrameDecodeError {
    #[error("Frame has no content")]
    EmptyFrame,
    #[error("Frame has {0} segments, at most {max} allowed", max = MAX_SEGMENTS)]
    TooManySegments(usize),
    #[error("Segment \"{0}\" has no key:value separator")]
    MissingSeparator(String),
    #[error("Segment \"{0}\" has an empty key")]
    EmptyKey(String),
    #[error("Value \"{0}\" is not a five-axis tuple")]
    BadAxisTuple(String),
}

/// Five-axis position reported by the controller, serialized as `{X,Y,Z,P,T}`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub struct AxisTuple {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub p: f64,
    pub t: f64,
}

impl AxisTuple {
    pub fn to_array(&self) -> [f64; 5] {
        [self.x, self.y, self.z, self.p, self.t]
    }
}

/// A decoded telemetry value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TelemetryValue {
    Number(f64),
    Axes(AxisTuple),
    Text(String),
}

impl TelemetryValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            TelemetryValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_axes(&self) -> Option<&AxisTuple> {
        match self {
            TelemetryValue::Axes(a) => Some(a),
            _ => None,
        }
    }
}

/// One status frame as a key → value mapping
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusRecord(pub BTreeMap<String, TelemetryValue>);

impl StatusRecord {
    pub fn get(&self, key: &str) -> Option<&TelemetryValue> {
        self.0.get(key)
    }

    pub fn number(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(TelemetryValue::as_number)
    }

    pub fn axes(&self, key: &str) -> Option<&AxisTuple> {
        self.get(key).and_then(TelemetryValue::as_axes)
    }

    /// True when the record carries `ssf:0`
    pub fn is_settled(&self) -> bool {
        self.number(SETTLED_KEY) == Some(0.0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Records collected between two drains of the link
#[derive(Debug, Clone, Serialize)]
pub struct IdleWindow {
    /// Records in the order their frames arrived
    pub records: Vec<StatusRecord>,
    /// Whether any record reported the controller as settled
    pub idle: bool,
    pub flushed_at: DateTime<Utc>,
}

/// Decode one line; `Ok(None)` for lines that are not frames
pub fn decode_frame(line: &str) -> Result<Option<StatusRecord>, FrameDecodeError> {
    let Some(body) = line
        .strip_prefix('<')
        .and_then(|rest| rest.strip_suffix('>'))
    else {
        return Ok(None);
    };
    if body.trim().is_empty() {
        return Err(FrameDecodeError::EmptyFrame);
    }

    let segments = split_segments(body);
    if segments.len() > MAX_SEGMENTS {
        return Err(FrameDecodeError::TooManySegments(segments.len()));
    }

    let mut record = StatusRecord::default();
    for segment in segments {
        let (key, raw) = segment
            .split_once(':')
            .ok_or_else(|| FrameDecodeError::MissingSeparator(segment.clone()))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(FrameDecodeError::EmptyKey(segment.clone()));
        }
        record.0.insert(key.to_string(), decode_value(raw)?);
    }
    Ok(Some(record))
}

/// Split a frame body on top-level commas
///
/// A comma only starts a new segment when the text after it contains a `:`,
/// so the commas inside an axis tuple stay part of its value.
fn split_segments(body: &str) -> Vec<String> {
    let mut segments: Vec<String> = Vec::new();
    for piece in body.split(',') {
        match segments.last_mut() {
            Some(last) if !piece.contains(':') => {
                last.push(',');
                last.push_str(piece);
            }
            _ => segments.push(piece.to_string()),
        }
    }
    segments
}

fn decode_value(raw: &str) -> Result<TelemetryValue, FrameDecodeError> {
    let raw = raw.trim();
    if raw.contains(',') {
        let parts: Vec<f64> = raw
            .split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .map_err(|_| FrameDecodeError::BadAxisTuple(raw.to_string()))?;
        let [x, y, z, p, t] = parts[..] else {
            return Err(FrameDecodeError::BadAxisTuple(raw.to_string()));
        };
        return Ok(TelemetryValue::Axes(AxisTuple { x, y, z, p, t }));
    }

    Ok(match raw.parse::<f64>() {
        Ok(n) => TelemetryValue::Number(n),
        Err(_) => TelemetryValue::Text(raw.to_string()),
    })
}

/// Where the line assembler currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    /// Accumulating bytes until a line terminator arrives
    AwaitingLine,
    /// At least one complete line is buffered
    HaveLine,
}

/// Counters for lines that did not produce a record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ParserStats {
    pub frames: u64,
    pub ignored_lines: u64,
    pub malformed_frames: u64,
    pub overlong_lines: u64,
}

/// Incremental decoder turning raw link bytes into pending status records
#[derive(Debug)]
pub struct TelemetryParser {
    buf: Vec<u8>,
    pending: Vec<StatusRecord>,
    stats: ParserStats,
    max_line_len: usize,
}

impl Default for TelemetryParser {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINE_LEN)
    }
}

impl TelemetryParser {
    pub fn new(max_line_len: usize) -> Self {
        Self {
            buf: Vec::new(),
            pending: Vec::new(),
            stats: ParserStats::default(),
            max_line_len,
        }
    }

    pub fn state(&self) -> ParserState {
        if self.buf.contains(&b'\n') {
            ParserState::HaveLine
        } else {
            ParserState::AwaitingLine
        }
    }

    pub fn stats(&self) -> ParserStats {
        self.stats
    }

    /// Number of records waiting for the next flush
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Buffer bytes without extracting lines
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Buffer bytes and decode every complete line; returns the number of new records
    pub fn feed(&mut self, bytes: &[u8]) -> usize {
        self.push(bytes);
        let mut decoded = 0;
        while let Some(line) = self.next_line() {
            if self.process_line(&line) {
                decoded += 1;
            }
        }

        if self.buf.len() > self.max_line_len {
            warn!(len = self.buf.len(), "Discarding overlong telemetry line");
            self.buf.clear();
            self.stats.overlong_lines += 1;
        }
        decoded
    }

    fn next_line(&mut self) -> Option<String> {
        let end = self.buf.iter().position(|b| *b == b'\n')?;
        let raw: Vec<u8> = self.buf.drain(..=end).collect();
        let text = String::from_utf8_lossy(&raw);
        Some(text.trim_end_matches(['\r', '\n']).to_string())
    }

    fn process_line(&mut self, line: &str) -> bool {
        match decode_frame(line) {
            Ok(Some(record)) => {
                trace!(fields = record.len(), "Decoded telemetry frame");
                self.pending.push(record);
                self.stats.frames += 1;
                true
            }
            Ok(None) => {
                if !line.is_empty() {
                    trace!(line = %line, "Ignoring non-frame line");
                    self.stats.ignored_lines += 1;
                }
                false
            }
            Err(e) => {
                debug!(error = %e, line = %line, "Dropping malformed telemetry frame");
                self.stats.malformed_frames += 1;
                false
            }
        }
    }

    /// Hand over pending records and test them for the settled flag
    ///
    /// The pending buffer is always cleared. A partially received line stays
    /// buffered for the next feed.
    pub fn flush(&mut self) -> IdleWindow {
        let records = std::mem::take(&mut self.pending);
        let idle = records.iter().any(StatusRecord::is_settled);
        IdleWindow {
            records,
            idle,
            flushed_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_frame_with_axes() {
        let record = decode_frame("<ssf:0,pos:10,20,30,5,5>").unwrap().unwrap();
        assert_eq!(record.number("ssf"), Some(0.0));
        assert_eq!(
            record.axes("pos"),
            Some(&AxisTuple {
                x: 10.0,
                y: 20.0,
                z: 30.0,
                p: 5.0,
                t: 5.0
            })
        );
        assert_eq!(
            serde_json::to_value(&record).unwrap(),
            json!({"ssf": 0.0, "pos": {"X": 10.0, "Y": 20.0, "Z": 30.0, "P": 5.0, "T": 5.0}})
        );
    }

    #[test]
    fn test_decode_scalar_text() {
        let record = decode_frame("<state:Idle,feed:1200,ssf:1>").unwrap().unwrap();
        assert_eq!(record.get("state"), Some(&TelemetryValue::Text("Idle".to_string())));
        assert_eq!(record.number("feed"), Some(1200.0));
        assert!(!record.is_settled());
    }

    #[test]
    fn test_non_frame_lines_ignored() {
        assert_eq!(decode_frame("ok"), Ok(None));
        assert_eq!(decode_frame("<ssf:0"), Ok(None));
        assert_eq!(decode_frame(""), Ok(None));
    }

    #[test]
    fn test_malformed_frames() {
        assert_eq!(decode_frame("<>"), Err(FrameDecodeError::EmptyFrame));
        assert_eq!(
            decode_frame("<a:1,b:2,c:3,d:4>"),
            Err(FrameDecodeError::TooManySegments(4))
        );
        assert!(matches!(
            decode_frame("<garbage>"),
            Err(FrameDecodeError::MissingSeparator(_))
        ));
        assert!(matches!(decode_frame("<:5>"), Err(FrameDecodeError::EmptyKey(_))));
        assert!(matches!(
            decode_frame("<pos:1,2,3>"),
            Err(FrameDecodeError::BadAxisTuple(_))
        ));
        assert!(matches!(
            decode_frame("<pos:1,2,x,4,5>"),
            Err(FrameDecodeError::BadAxisTuple(_))
        ));
    }

    #[test]
    fn test_idle_detection() {
        let mut parser = TelemetryParser::default();
        parser.feed(b"<ssf:0,pos:10,20,30,5,5>\r\n");
        let window = parser.flush();
        assert!(window.idle);
        assert_eq!(window.records.len(), 1);
        assert_eq!(parser.pending(), 0);

        parser.feed(b"<ssf:1>\r\n");
        let window = parser.flush();
        assert!(!window.idle);
        assert_eq!(parser.pending(), 0);
    }

    #[test]
    fn test_garbage_does_not_stop_parsing() {
        let mut parser = TelemetryParser::default();
        let decoded = parser.feed(b"<ssf:1>\r\ngarbage\r\n<bad>\r\n<ssf:0,pos:1,2,3,4,5>\r\n");
        assert_eq!(decoded, 2);

        let stats = parser.stats();
        assert_eq!(stats.frames, 2);
        assert_eq!(stats.ignored_lines, 1);
        assert_eq!(stats.malformed_frames, 1);

        let window = parser.flush();
        assert_eq!(window.records.len(), 2);
        assert_eq!(window.records[0].number("ssf"), Some(1.0));
        assert!(window.idle);
    }

    #[test]
    fn test_partial_line_survives_flush() {
        let mut parser = TelemetryParser::default();
        parser.feed(b"<ssf:");
        assert_eq!(parser.state(), ParserState::AwaitingLine);
        let window = parser.flush();
        assert!(window.records.is_empty());
        assert!(!window.idle);

        parser.push(b"0>\r\n");
        assert_eq!(parser.state(), ParserState::HaveLine);
        parser.feed(b"");
        assert_eq!(parser.state(), ParserState::AwaitingLine);
        assert!(parser.flush().idle);
    }

    #[test]
    fn test_overlong_line_discarded() {
        let mut parser = TelemetryParser::new(16);
        parser.feed(&[b'x'; 32]);
        assert_eq!(parser.stats().overlong_lines, 1);

        parser.feed(b"<ssf:0>\n");
        assert!(parser.flush().idle);
    }
}
