// src/protocol/status.rs
//
// Status interpretation for complete response frames.
// One declarative classification per response shape; anything that does not
// match its shape's expected pattern is Malformed, never coerced into a
// success.

use crate::error::Error;
use crate::protocol::command::{Coercivity, ResponseShape, ESC};
use crate::protocol::track::{decode_formatted, decode_raw, Decoded, TrackSet};

/// Success status byte reported by the device.
pub const STATUS_OK: u8 = 0x30;
/// Generic failure status byte for the test/config command family.
pub const STATUS_FAIL: u8 = 0x41;

/// Decoded payload of a successful operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResponsePayload {
    /// Command succeeded with nothing to return.
    None,
    Model(String),
    Firmware(String),
    Coercivity(Coercivity),
    LeadingZeros { tracks_1_3: u8, track_2: u8 },
    Bpc { track1: u8, track2: u8, track3: u8 },
    Tracks(TrackSet),
}

fn malformed(buf: &[u8]) -> Error {
    Error::Malformed { raw: buf.to_vec() }
}

/// Classify a complete response frame against its command's shape.
pub fn interpret(shape: ResponseShape, buf: &[u8]) -> Result<ResponsePayload, Error> {
    match shape {
        ResponseShape::None => Ok(ResponsePayload::None),

        ResponseShape::Status => {
            if buf.len() < 2 || buf[0] != ESC {
                return Err(malformed(buf));
            }
            match buf[1] {
                STATUS_OK => Ok(ResponsePayload::None),
                code => Err(Error::Device { code }),
            }
        }

        ResponseShape::CommTest => match buf {
            [ESC, 0x79] => Ok(ResponsePayload::None),
            _ => Err(malformed(buf)),
        },

        ResponseShape::TestStatus => match buf {
            [ESC, STATUS_OK] => Ok(ResponsePayload::None),
            [ESC, STATUS_FAIL] => Err(Error::Device { code: STATUS_FAIL }),
            _ => Err(malformed(buf)),
        },

        ResponseShape::Model => {
            if buf.len() >= 3 && buf[0] == ESC && buf[buf.len() - 1] == 0x53 {
                let model = String::from_utf8_lossy(&buf[1..buf.len() - 1]).into_owned();
                Ok(ResponsePayload::Model(model))
            } else {
                Err(malformed(buf))
            }
        }

        ResponseShape::Firmware => {
            if buf.len() >= 2 && buf[0] == ESC {
                let version = String::from_utf8_lossy(&buf[1..]).into_owned();
                Ok(ResponsePayload::Firmware(version))
            } else {
                Err(malformed(buf))
            }
        }

        ResponseShape::CoercivityStatus => match buf {
            [ESC, 0x48] => Ok(ResponsePayload::Coercivity(Coercivity::High)),
            [ESC, 0x4C] => Ok(ResponsePayload::Coercivity(Coercivity::Low)),
            _ => Err(malformed(buf)),
        },

        ResponseShape::LeadingZeros => match buf {
            [ESC, lz13, lz2] => Ok(ResponsePayload::LeadingZeros {
                tracks_1_3: *lz13,
                track_2: *lz2,
            }),
            _ => Err(malformed(buf)),
        },

        ResponseShape::BpcEcho => match buf {
            [ESC, STATUS_OK, b1, b2, b3] => Ok(ResponsePayload::Bpc {
                track1: *b1,
                track2: *b2,
                track3: *b3,
            }),
            [ESC, code, ..] if *code != STATUS_OK => Err(Error::Device { code: *code }),
            _ => Err(malformed(buf)),
        },

        ResponseShape::FormattedTracks => match decode_formatted(buf)? {
            Decoded::Complete { tracks, status } if status == STATUS_OK => {
                Ok(ResponsePayload::Tracks(tracks))
            }
            Decoded::Complete { status, .. } => Err(Error::Device { code: status }),
            // A frame finalized without the codec accepting it (heuristic
            // fallback path) is malformed, not a truncated success.
            Decoded::Incomplete => Err(malformed(buf)),
        },

        ResponseShape::RawTracks => match decode_raw(buf)? {
            Decoded::Complete { tracks, status } if status == STATUS_OK => {
                Ok(ResponsePayload::Tracks(tracks))
            }
            Decoded::Complete { status, .. } => Err(Error::Device { code: status }),
            Decoded::Incomplete => Err(malformed(buf)),
        },
    }
}
