// src/protocol/track.rs
//
// Track data codec for the MSR206 escape-delimited block format.
// Encodes outgoing track payloads (formatted ASCII or raw bytes) and
// decodes incoming read responses. Decode is authoritative over frame
// completeness for the two multi-track read shapes: the frame reader asks
// this module whether the accumulated bytes form a finished response.

use serde::Serialize;

use crate::error::Error;
use crate::protocol::command::{Track, TrackSelection, DATA_END_MARKER, ESC};

/// Per-track payload. Formatted reads/writes carry ASCII text; raw
/// reads/writes carry byte buffers edited as hex text.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrackData {
    Absent,
    Text(String),
    Raw(Vec<u8>),
}

impl TrackData {
    pub fn is_absent(&self) -> bool {
        matches!(self, TrackData::Absent)
    }

    /// Empty text or empty raw buffers count as absent for encoding: the
    /// device block omits the segment entirely rather than sending it empty.
    fn is_empty(&self) -> bool {
        match self {
            TrackData::Absent => true,
            TrackData::Text(s) => s.is_empty(),
            TrackData::Raw(b) => b.is_empty(),
        }
    }
}

/// Contents of the three magnetic stripe tracks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TrackSet {
    tracks: [TrackData; 3],
}

impl Default for TrackSet {
    fn default() -> Self {
        TrackSet::new()
    }
}

impl TrackSet {
    pub fn new() -> Self {
        TrackSet {
            tracks: [TrackData::Absent, TrackData::Absent, TrackData::Absent],
        }
    }

    pub fn get(&self, track: Track) -> &TrackData {
        &self.tracks[track.index()]
    }

    pub fn set(&mut self, track: Track, data: TrackData) {
        self.tracks[track.index()] = data;
    }

    pub fn set_text(&mut self, track: Track, text: impl Into<String>) {
        self.tracks[track.index()] = TrackData::Text(text.into());
    }

    pub fn set_raw(&mut self, track: Track, bytes: Vec<u8>) {
        self.tracks[track.index()] = TrackData::Raw(bytes);
    }

    /// Set a track from hex text (raw write input). Both cases are accepted;
    /// invalid hex rejects the whole write, naming the offending track.
    pub fn set_raw_hex(&mut self, track: Track, hex_text: &str) -> Result<(), Error> {
        let bytes = hex::decode(hex_text.trim()).map_err(|_| {
            Error::local(format!(
                "invalid hexadecimal data for track {}",
                track.number()
            ))
        })?;
        self.tracks[track.index()] = TrackData::Raw(bytes);
        Ok(())
    }

    pub fn text(&self, track: Track) -> Option<&str> {
        match self.get(track) {
            TrackData::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn raw(&self, track: Track) -> Option<&[u8]> {
        match self.get(track) {
            TrackData::Raw(b) => Some(b),
            _ => None,
        }
    }

    /// Lowercase hex form of a raw track, for display/editing.
    pub fn raw_hex(&self, track: Track) -> Option<String> {
        self.raw(track).map(hex::encode)
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.iter().all(|t| t.is_empty())
    }
}

// ============================================================================
// Encoding
// ============================================================================

/// Build the formatted write data block:
/// `ESC 's'` then `ESC <n> <ascii>` per selected non-empty track, then `? FS`.
pub fn encode_formatted(tracks: &TrackSet, selection: TrackSelection) -> Vec<u8> {
    let mut block = vec![ESC, b's'];
    for track in Track::ALL {
        if !selection.contains(track) {
            continue;
        }
        if let TrackData::Text(text) = tracks.get(track) {
            if text.is_empty() {
                continue;
            }
            block.push(ESC);
            block.push(track.number());
            block.extend_from_slice(text.as_bytes());
        }
    }
    block.extend_from_slice(&DATA_END_MARKER);
    block
}

/// Build the raw write data block:
/// `ESC 's'` then `ESC <n> <len> <bytes>` per selected non-empty track, then `? FS`.
/// Track payloads longer than 255 bytes cannot be length-prefixed and are
/// rejected locally.
pub fn encode_raw(tracks: &TrackSet, selection: TrackSelection) -> Result<Vec<u8>, Error> {
    let mut block = vec![ESC, b's'];
    for track in Track::ALL {
        if !selection.contains(track) {
            continue;
        }
        if let TrackData::Raw(bytes) = tracks.get(track) {
            if bytes.is_empty() {
                continue;
            }
            if bytes.len() > 255 {
                return Err(Error::local(format!(
                    "track {} raw data is {} bytes, maximum is 255",
                    track.number(),
                    bytes.len()
                )));
            }
            block.push(ESC);
            block.push(track.number());
            block.push(bytes.len() as u8);
            block.extend_from_slice(bytes);
        }
    }
    block.extend_from_slice(&DATA_END_MARKER);
    Ok(block)
}

// ============================================================================
// Decoding
// ============================================================================

/// Result of attempting to decode an accumulating read response.
/// `Incomplete` tells the frame reader to keep polling.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decoded {
    Complete { tracks: TrackSet, status: u8 },
    Incomplete,
}

/// Decode a formatted read response:
/// `ESC 's' (ESC <n> <data...>)* '?' ... ESC <status>`.
///
/// Segment data runs until the next ESC or the `'?'` delimiter. Bytes that
/// open no segment are skipped. The response is complete once the `'?'`
/// terminator has arrived followed by an `ESC <status>` tail; the status
/// byte is always the final byte and is interpreted independently of track
/// parsing.
pub fn decode_formatted(buf: &[u8]) -> Result<Decoded, Error> {
    if buf.len() < 2 {
        return Ok(Decoded::Incomplete);
    }
    if buf[0] != ESC || buf[1] != b's' {
        return Err(Error::Malformed { raw: buf.to_vec() });
    }

    let mut tracks = TrackSet::new();
    let mut pos = 2;
    while pos < buf.len() {
        if buf[pos] == ESC && pos + 1 < buf.len() {
            if let Some(track) = Track::from_number(buf[pos + 1]) {
                let start = pos + 2;
                let mut end = start;
                while end < buf.len() && buf[end] != ESC && buf[end] != b'?' {
                    end += 1;
                }
                if end == buf.len() {
                    // Segment still arriving: no delimiter observed yet.
                    return Ok(Decoded::Incomplete);
                }
                tracks.set_text(track, String::from_utf8_lossy(&buf[start..end]).into_owned());
                pos = end;
                continue;
            }
        }
        if buf[pos] == b'?' {
            let tail = &buf[pos + 1..];
            if tail.len() >= 2 && tail[tail.len() - 2] == ESC {
                return Ok(Decoded::Complete {
                    tracks,
                    status: tail[tail.len() - 1],
                });
            }
            return Ok(Decoded::Incomplete);
        }
        pos += 1;
    }
    Ok(Decoded::Incomplete)
}

/// Decode a raw read response:
/// `ESC 's' (ESC <n> <len> <bytes>)* ... ESC <status>`.
///
/// Segments continue while the next byte is ESC and the byte after it is a
/// track number 1–3; this degrades gracefully to the fixed three-track form
/// when exactly three segments are present. The final byte is the status.
pub fn decode_raw(buf: &[u8]) -> Result<Decoded, Error> {
    if buf.len() < 2 {
        return Ok(Decoded::Incomplete);
    }
    if buf[0] != ESC || buf[1] != b's' {
        return Err(Error::Malformed { raw: buf.to_vec() });
    }

    let mut tracks = TrackSet::new();
    let mut pos = 2;
    while pos < buf.len() && buf[pos] == ESC {
        if pos + 1 >= buf.len() {
            return Ok(Decoded::Incomplete);
        }
        let Some(track) = Track::from_number(buf[pos + 1]) else {
            // Not a track segment — this is the trailing ESC <status>.
            break;
        };
        if pos + 2 >= buf.len() {
            return Ok(Decoded::Incomplete);
        }
        let len = buf[pos + 2] as usize;
        let start = pos + 3;
        if start + len > buf.len() {
            return Ok(Decoded::Incomplete);
        }
        tracks.set_raw(track, buf[start..start + len].to_vec());
        pos = start + len;
    }

    // Tail is `? FS ESC <status>` on stricter firmware, bare `ESC <status>`
    // otherwise; either way the response ends with ESC followed by status.
    let tail = &buf[pos..];
    if tail.len() >= 2 && tail[tail.len() - 2] == ESC {
        return Ok(Decoded::Complete {
            tracks,
            status: tail[tail.len() - 1],
        });
    }
    Ok(Decoded::Incomplete)
}
