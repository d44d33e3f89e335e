// src/lib.rs
//
// msr206 — serial protocol driver and test-card toolkit for MSR206/MSRE206
// magnetic stripe reader/writers.
//
// Layering, leaf-first: transport (serial port ownership), protocol
// (command catalog, frame reader, track codec, status interpreter),
// session (single-worker request/response engine), cardgen (synthetic
// test card numbers). The CLI in main.rs is one thin collaborator; any
// other front end couples only through DeviceSession and OperationOutcome.

pub mod cardgen;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod session;
pub mod transport;

pub use cardgen::{Brand, GeneratedCard};
pub use error::{Error, OperationOutcome};
pub use protocol::{
    Bpi, Coercivity, Command, Led, ResponsePayload, Track, TrackData, TrackSelection, TrackSet,
};
pub use session::DeviceSession;
pub use transport::{list_ports, ConnectionState, SerialPortInfo, SerialTransport, Transport};
