// src/session.rs
//
// Device session: a dedicated worker thread owns the transport and executes
// one command at a time. Callers hand a Command over a bounded channel with
// a per-request reply channel and block on the reply (or hold the receiver
// for asynchronous delivery). Serializing through the single worker is what
// enforces the protocol's one-outstanding-command rule.

use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::error::{Error, OperationOutcome};
use crate::protocol::command::{self, Bpi, Coercivity, Command, Led, Track, TrackSelection};
use crate::protocol::frame::{Completion, FrameAccumulator};
use crate::protocol::status::{interpret, ResponsePayload};
use crate::protocol::track::TrackSet;
use crate::tlog;
use crate::transport::{SerialTransport, Transport};

/// Cadence of the response poll loop. The transport's own read timeout is
/// shorter, so each poll returns quickly whether or not bytes arrived.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

struct Request {
    command: Command,
    reply: SyncSender<Result<ResponsePayload, Error>>,
}

/// One open connection to an MSR206 device.
pub struct DeviceSession {
    tx: Option<SyncSender<Request>>,
    worker: Option<JoinHandle<()>>,
    port_name: String,
}

impl DeviceSession {
    /// Open `port` and spawn the worker. Reconnecting requires dropping or
    /// disconnecting any prior session first — the port handle is exclusive.
    pub fn connect(port: &str) -> Result<Self, Error> {
        let transport = SerialTransport::open(port)?;
        tlog!("[session:{}] connected", port);
        Ok(Self::with_transport(Box::new(transport), port))
    }

    /// Build a session over an arbitrary transport (used by tests).
    pub fn with_transport(transport: Box<dyn Transport + Send>, port: &str) -> Self {
        let (tx, rx) = sync_channel::<Request>(8);
        let worker = std::thread::spawn(move || run_worker(transport, rx));
        DeviceSession {
            tx: Some(tx),
            worker: Some(worker),
            port_name: port.to_string(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.tx.is_some()
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Close the session: drop the request channel and join the worker,
    /// which drops the port handle.
    pub fn disconnect(&mut self) {
        self.tx = None;
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        tlog!("[session:{}] disconnected", self.port_name);
    }

    /// Queue a command for execution and block until its outcome. Exactly
    /// one command is in flight at a time; concurrent callers queue behind
    /// each other. The outcome is logged against the command name.
    pub fn execute(&self, command: Command) -> Result<ResponsePayload, Error> {
        let name = command.name;
        let result = self.submit(command).and_then(|rx| {
            rx.recv().map_err(|_| Error::NotConnected)?
        });
        tlog!(
            "[session:{}] {}: {}",
            self.port_name,
            name,
            OperationOutcome::of(&result)
        );
        result
    }

    /// Queue a command and return the reply receiver without blocking, for
    /// callers that must not stall on long waits (card swipes, sensor test).
    pub fn submit(&self, command: Command) -> Result<Receiver<Result<ResponsePayload, Error>>, Error> {
        let tx = self.tx.as_ref().ok_or(Error::NotConnected)?;
        let (reply_tx, reply_rx) = sync_channel(1);
        tx.send(Request {
            command,
            reply: reply_tx,
        })
        .map_err(|_| Error::NotConnected)?;
        Ok(reply_rx)
    }

    // ------------------------------------------------------------------
    // Typed convenience operations, one per catalog entry
    // ------------------------------------------------------------------

    pub fn reset(&self) -> Result<(), Error> {
        self.execute(command::reset()).map(|_| ())
    }

    pub fn read_card(&self) -> Result<TrackSet, Error> {
        expect_tracks(self.execute(command::read_card()))
    }

    pub fn read_raw(&self) -> Result<TrackSet, Error> {
        expect_tracks(self.execute(command::read_raw()))
    }

    pub fn write_card(&self, tracks: &TrackSet, selection: TrackSelection) -> Result<(), Error> {
        self.execute(command::write_card(tracks, selection)?).map(|_| ())
    }

    pub fn write_raw(&self, tracks: &TrackSet, selection: TrackSelection) -> Result<(), Error> {
        self.execute(command::write_raw(tracks, selection)?).map(|_| ())
    }

    pub fn erase(&self, selection: TrackSelection) -> Result<(), Error> {
        self.execute(command::erase(selection)?).map(|_| ())
    }

    pub fn led(&self, state: Led) -> Result<(), Error> {
        self.execute(command::led(state)).map(|_| ())
    }

    pub fn communication_test(&self) -> Result<(), Error> {
        self.execute(command::communication_test()).map(|_| ())
    }

    pub fn sensor_test(&self) -> Result<(), Error> {
        self.execute(command::sensor_test()).map(|_| ())
    }

    pub fn ram_test(&self) -> Result<(), Error> {
        self.execute(command::ram_test()).map(|_| ())
    }

    pub fn model(&self) -> Result<String, Error> {
        match self.execute(command::get_model())? {
            ResponsePayload::Model(model) => Ok(model),
            other => Err(unexpected_payload(other)),
        }
    }

    pub fn firmware(&self) -> Result<String, Error> {
        match self.execute(command::get_firmware())? {
            ResponsePayload::Firmware(version) => Ok(version),
            other => Err(unexpected_payload(other)),
        }
    }

    pub fn coercivity(&self) -> Result<Coercivity, Error> {
        match self.execute(command::get_coercivity())? {
            ResponsePayload::Coercivity(c) => Ok(c),
            other => Err(unexpected_payload(other)),
        }
    }

    pub fn set_coercivity(&self, coercivity: Coercivity) -> Result<(), Error> {
        self.execute(command::set_coercivity(coercivity)).map(|_| ())
    }

    /// Returns (tracks 1&3 count, track 2 count).
    pub fn leading_zeros(&self) -> Result<(u8, u8), Error> {
        match self.execute(command::check_leading_zeros())? {
            ResponsePayload::LeadingZeros {
                tracks_1_3,
                track_2,
            } => Ok((tracks_1_3, track_2)),
            other => Err(unexpected_payload(other)),
        }
    }

    pub fn set_leading_zeros(&self, tracks_1_3: u8, track_2: u8) -> Result<(), Error> {
        self.execute(command::set_leading_zeros(tracks_1_3, track_2))
            .map(|_| ())
    }

    pub fn set_bpi(&self, track: Track, bpi: Bpi) -> Result<(), Error> {
        self.execute(command::set_bpi(track, bpi)).map(|_| ())
    }

    /// Returns the per-track BPC values echoed by the device.
    pub fn set_bpc(&self, track1: u8, track2: u8, track3: u8) -> Result<(u8, u8, u8), Error> {
        match self.execute(command::set_bpc(track1, track2, track3)?)? {
            ResponsePayload::Bpc {
                track1,
                track2,
                track3,
            } => Ok((track1, track2, track3)),
            other => Err(unexpected_payload(other)),
        }
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        if self.tx.is_some() {
            self.disconnect();
        }
    }
}

fn expect_tracks(result: Result<ResponsePayload, Error>) -> Result<TrackSet, Error> {
    match result? {
        ResponsePayload::Tracks(tracks) => Ok(tracks),
        other => Err(unexpected_payload(other)),
    }
}

fn unexpected_payload(payload: ResponsePayload) -> Error {
    Error::Io(format!("unexpected response payload: {:?}", payload))
}

// ============================================================================
// Worker
// ============================================================================

fn run_worker(mut transport: Box<dyn Transport + Send>, rx: Receiver<Request>) {
    while let Ok(request) = rx.recv() {
        let result = execute_on(transport.as_mut(), &request.command);
        let _ = request.reply.send(result);
    }
    // Channel closed: session disconnected, port handle drops here.
}

/// Write one command and, when a response is expected, poll the transport
/// until the frame completes or the command's budget elapses. Open-ended
/// replies (no declared terminator) finalize with whatever arrived by the
/// deadline; everything else discards partial data and reports a timeout.
fn execute_on(
    transport: &mut dyn Transport,
    command: &Command,
) -> Result<ResponsePayload, Error> {
    transport.write(&command.bytes)?;
    if !command.expects_response() {
        return Ok(ResponsePayload::None);
    }

    let mut frame = FrameAccumulator::new(Completion::for_shape(command.shape));
    let deadline = Instant::now() + command.timeout;
    loop {
        let chunk = transport.poll_available()?;
        if !chunk.is_empty() {
            frame.extend(&chunk);
            if frame.is_complete() {
                break;
            }
        }
        if Instant::now() >= deadline {
            if frame.finalizes_at_deadline() {
                break;
            }
            return Err(Error::Timeout);
        }
        if chunk.is_empty() {
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    interpret(command.shape, frame.bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::command::ResponseShape;
    use crate::transport::MockTransport;

    fn session_with(chunks: Vec<Vec<u8>>) -> DeviceSession {
        DeviceSession::with_transport(Box::new(MockTransport::with_replies(chunks)), "mock")
    }

    #[test]
    fn test_communication_test_success() {
        let session = session_with(vec![vec![0x1B, 0x79]]);
        assert!(session.communication_test().is_ok());
    }

    #[test]
    fn test_unexpected_comm_test_reply_is_malformed() {
        let session = session_with(vec![vec![0x1B, 0x41]]);
        assert!(matches!(
            session.communication_test(),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn test_model_query() {
        let session = session_with(vec![vec![0x1B, b'M', b'S', b'R', 0x53]]);
        assert_eq!(session.model().unwrap(), "MSR");
    }

    #[test]
    fn test_read_card_across_chunk_boundaries() {
        // Response arrives split over three polls.
        let session = session_with(vec![
            vec![0x1B, b's', 0x1B, 0x01],
            vec![b'A', b'B', b'C'],
            vec![0x3F, 0x1C, 0x1B, 0x30],
        ]);
        let tracks = session.read_card().unwrap();
        assert_eq!(tracks.text(Track::One), Some("ABC"));
    }

    #[test]
    fn test_bpc_echo_roundtrip() {
        // The five-byte echo arrives in one chunk and has no trailing
        // ESC <status>, so completion is by size.
        let session = session_with(vec![vec![0x1B, 0x30, 7, 5, 5]]);
        assert_eq!(session.set_bpc(7, 5, 5).unwrap(), (7, 5, 5));
    }

    #[test]
    fn test_leading_zeros_query() {
        let session = session_with(vec![vec![0x1B, 61, 22]]);
        assert_eq!(session.leading_zeros().unwrap(), (61, 22));
    }

    #[test]
    fn test_firmware_reply_collected_until_deadline() {
        // The version reply has no terminator; the frame is whatever has
        // arrived when the budget expires.
        let session = session_with(vec![
            vec![0x1B, b'R', b'E'],
            vec![b'V', b'U', b'3'],
        ]);
        let command = Command {
            name: "get firmware",
            bytes: vec![0x1B, 0x76],
            shape: ResponseShape::Firmware,
            timeout: Duration::from_millis(50),
        };
        match session.execute(command).unwrap() {
            ResponsePayload::Firmware(v) => assert_eq!(v, "REVU3"),
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn test_timeout_when_device_stays_silent() {
        let session = session_with(vec![]);
        let command = Command {
            name: "communication test",
            bytes: vec![0x1B, 0x65],
            shape: ResponseShape::CommTest,
            timeout: Duration::from_millis(50),
        };
        let started = Instant::now();
        assert!(matches!(session.execute(command), Err(Error::Timeout)));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_fire_and_forget_commands_skip_the_wait() {
        let session = session_with(vec![]);
        assert!(session.led(Led::Green).is_ok());
        assert!(session.reset().is_ok());
    }

    #[test]
    fn test_execute_after_disconnect_is_not_connected() {
        let mut session = session_with(vec![]);
        session.disconnect();
        assert!(!session.is_connected());
        assert!(matches!(
            session.communication_test(),
            Err(Error::NotConnected)
        ));
    }

    #[test]
    fn test_write_card_sends_wrapped_block() {
        let mut tracks = TrackSet::new();
        tracks.set_text(Track::One, "DATA");
        let transport = MockTransport::with_replies(vec![vec![0x1B, 0x30]]);
        let written = transport.written_handle();
        let session = DeviceSession::with_transport(Box::new(transport), "mock");
        assert!(session
            .write_card(&tracks, TrackSelection::from_tracks(true, false, false))
            .is_ok());
        assert_eq!(
            *written.lock().unwrap(),
            vec![
                0x1B, 0x77, // write command
                0x1B, b's', 0x1B, 0x01, b'D', b'A', b'T', b'A', // data block
                0x3F, 0x1C, // end marker
            ]
        );
    }

    #[test]
    fn test_device_error_reported_with_code() {
        let mut tracks = TrackSet::new();
        tracks.set_text(Track::One, "DATA");
        let session = session_with(vec![vec![0x1B, 0x32]]);
        assert!(matches!(
            session.write_card(&tracks, TrackSelection::from_tracks(true, false, false)),
            Err(Error::Device { code: 0x32 })
        ));
    }

    #[test]
    fn test_local_validation_sends_nothing() {
        let session = session_with(vec![]);
        // Empty selection is rejected before any bytes are written; were the
        // command sent, the silent mock would force a long timeout instead.
        let started = Instant::now();
        assert!(matches!(
            session.erase(TrackSelection::from_tracks(false, false, false)),
            Err(Error::LocalValidation(_))
        ));
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
