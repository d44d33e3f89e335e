// src/protocol/mod.rs
//
// MSR206 device protocol engine: command catalog, response framing, track
// codec, and status interpretation. Everything here is pure — the session
// layer owns the transport and drives the poll loop.

pub mod command;
pub mod frame;
pub mod status;
pub mod track;

pub use command::{
    Bpi, Coercivity, Command, Led, ResponseShape, Track, TrackSelection, ESC,
};
pub use frame::{Completion, FrameAccumulator};
pub use status::{ResponsePayload, STATUS_OK};
pub use track::{TrackData, TrackSet};
