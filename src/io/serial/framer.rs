// src/io/serial/framer.rs
//
// Framing for the ASCII telemetry line protocol.
//
// Wire format: `$state;weight;current;voltage;pwm\n`. Anything outside a
// `$...\n` span is noise. A frame that is still in flight stays in the
// buffer across reads; a newer `$` abandons it. When several complete
// frames pile up between extractions only the newest is decoded.

use serde::Serialize;

use crate::error::BridgeError;

// =============================================================================
// Protocol Constants
// =============================================================================

pub const START_MARKER: char = '$';
pub const END_MARKER: char = '\n';
pub const FIELD_SEPARATOR: char = ';';

/// Number of positional fields a sample needs.
pub const SAMPLE_FIELDS: usize = 5;

/// Default cap on buffered text before it is cut back.
pub const DEFAULT_MAX_BUFFERED: usize = 4096;

// =============================================================================
// Types
// =============================================================================

/// Location of one complete frame inside a [`ByteBuffer`].
/// `start` indexes the start marker, `end` the end marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub start: usize,
    pub end: usize,
}

impl Frame {
    /// A frame exists only when both markers were found and the end follows the start.
    pub fn new(start: Option<usize>, end: Option<usize>) -> Option<Self> {
        match (start, end) {
            (Some(start), Some(end)) if end > start => Some(Frame { start, end }),
            _ => None,
        }
    }
}

/// One decoded telemetry sample, fields kept as the raw strings from the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TelemetrySample {
    pub state: String,
    pub weight: String,
    pub current: String,
    pub voltage: String,
    pub pwm: String,
}

/// Typed view of a [`TelemetrySample`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TelemetryReading {
    pub state: i64,
    pub weight: f64,
    pub current: f64,
    pub voltage: f64,
    pub pwm: i64,
}

impl TelemetrySample {
    /// Convert the raw fields. `None` if any field does not parse.
    pub fn reading(&self) -> Option<TelemetryReading> {
        Some(TelemetryReading {
            state: self.state.trim().parse().ok()?,
            weight: self.weight.trim().parse().ok()?,
            current: self.current.trim().parse().ok()?,
            voltage: self.voltage.trim().parse().ok()?,
            pwm: self.pwm.trim().parse().ok()?,
        })
    }
}

// =============================================================================
// Byte Buffer
// =============================================================================

/// Text accumulated from the device between frame extractions.
#[derive(Debug)]
pub struct ByteBuffer {
    text: String,
    max_len: usize,
}

impl Default for ByteBuffer {
    fn default() -> Self {
        ByteBuffer::new(DEFAULT_MAX_BUFFERED)
    }
}

impl ByteBuffer {
    pub fn new(max_len: usize) -> Self {
        ByteBuffer {
            text: String::new(),
            max_len: max_len.max(1),
        }
    }

    /// Append bytes read from the device.
    /// Past the cap the buffer is cut back to its last start marker, or emptied.
    pub fn push(&mut self, bytes: &[u8]) {
        self.text.push_str(&String::from_utf8_lossy(bytes));

        if self.text.len() > self.max_len {
            match self.text.rfind(START_MARKER) {
                Some(last) => {
                    self.text.drain(..last);
                }
                None => self.text.clear(),
            }
            if self.text.len() > self.max_len {
                self.text.clear();
            }
        }
    }

    /// Look for a complete frame. See [`extract`].
    pub fn extract(&mut self) -> Option<Frame> {
        extract(&mut self.text)
    }

    /// Drop a frame that has been decoded, plus any noise up to the next start marker.
    pub fn consume(&mut self, frame: Frame) {
        let end = (frame.end + END_MARKER.len_utf8()).min(self.text.len());
        self.text.drain(..end);
        if let Some(next) = self.text.find(START_MARKER) {
            self.text.drain(..next);
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn clear(&mut self) {
        self.text.clear();
    }
}

// =============================================================================
// Extraction
// =============================================================================

/// Find the most recent complete frame in `buffer`.
///
/// Everything before its start marker is discarded, so older complete frames
/// that were never extracted are dropped rather than replayed late. With no
/// complete frame, text before the last start marker is discarded and the
/// partial message is kept. Without any start marker the buffer is left
/// untouched. Text after the returned frame (an in-flight message) stays.
pub fn extract(buffer: &mut String) -> Option<Frame> {
    let first = buffer.find(START_MARKER)?;

    // The latest complete frame ends at the last newline after a start marker
    let pending_end = buffer[first..]
        .rfind(END_MARKER)
        .map(|offset| first + offset)
        .unwrap_or(buffer.len());
    if let Some(last) = buffer[..pending_end].rfind(START_MARKER) {
        buffer.drain(..last);
    }

    let start = buffer.find(START_MARKER);
    let end = start.and_then(|s| {
        buffer[s + 1..]
            .find(END_MARKER)
            .map(|offset| s + 1 + offset)
    });

    Frame::new(start, end)
}

/// Split the text strictly between the markers on `;`.
pub fn decode(buffer: &str, frame: Frame) -> Vec<&str> {
    buffer[frame.start + 1..frame.end]
        .split(FIELD_SEPARATOR)
        .collect()
}

/// Map decoded fields positionally onto a sample.
/// Fewer than five fields is a `MalformedFrame`; extra fields are ignored.
pub fn to_sample(fields: &[&str]) -> Result<TelemetrySample, BridgeError> {
    if fields.len() < SAMPLE_FIELDS {
        return Err(BridgeError::MalformedFrame {
            fields: fields.len(),
        });
    }
    Ok(TelemetrySample {
        state: fields[0].to_string(),
        weight: fields[1].to_string(),
        current: fields[2].to_string(),
        voltage: fields[3].to_string(),
        pwm: fields[4].to_string(),
    })
}
