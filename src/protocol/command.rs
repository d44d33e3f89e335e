// src/protocol/command.rs
//
// Command catalog for the MSR206 escape-coded protocol.
// Each constructor is a pure function from parameters to the exact byte
// sequence plus the expected response shape and time budget. Caller input
// is validated here, before any bytes are sent.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::protocol::track::{encode_formatted, encode_raw, TrackSet};

/// Protocol escape byte. Every command and response opens with it.
pub const ESC: u8 = 0x1B;

/// Data block terminator for write payloads: `'?'` followed by FS.
pub const DATA_END_MARKER: [u8; 2] = [0x3F, 0x1C];

/// Default response budget.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
/// Card I/O (read/write/erase, formatted or raw) waits for a swipe.
pub const CARD_IO_TIMEOUT: Duration = Duration::from_secs(15);
/// The sensor test waits for a card to pass the sensor.
pub const SENSOR_TEST_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Parameter Types
// ============================================================================

/// One of the three magnetic stripe tracks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Track {
    One,
    Two,
    Three,
}

impl Track {
    pub const ALL: [Track; 3] = [Track::One, Track::Two, Track::Three];

    /// Wire number, 1-3.
    pub fn number(self) -> u8 {
        match self {
            Track::One => 1,
            Track::Two => 2,
            Track::Three => 3,
        }
    }

    pub fn from_number(n: u8) -> Option<Track> {
        match n {
            1 => Some(Track::One),
            2 => Some(Track::Two),
            3 => Some(Track::Three),
            _ => None,
        }
    }

    pub(crate) fn index(self) -> usize {
        (self.number() - 1) as usize
    }
}

/// Track selection bitmask: bit0 = track 1, bit1 = track 2, bit2 = track 3.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TrackSelection {
    bits: u8,
}

impl TrackSelection {
    pub fn from_tracks(track1: bool, track2: bool, track3: bool) -> Self {
        let mut bits = 0u8;
        if track1 {
            bits |= 0x01;
        }
        if track2 {
            bits |= 0x02;
        }
        if track3 {
            bits |= 0x04;
        }
        TrackSelection { bits }
    }

    pub fn contains(self, track: Track) -> bool {
        self.bits & (1 << track.index()) != 0
    }

    pub fn select_byte(self) -> u8 {
        self.bits
    }

    pub fn is_empty(self) -> bool {
        self.bits == 0
    }

    /// At least one track must be selected before a command is built.
    fn validated(self, operation: &str) -> Result<Self, Error> {
        if self.is_empty() {
            return Err(Error::local(format!(
                "{} requires at least one selected track",
                operation
            )));
        }
        Ok(self)
    }
}

/// LED control states.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Led {
    AllOff,
    AllOn,
    Green,
    Yellow,
    Red,
}

impl Led {
    fn opcode(self) -> u8 {
        match self {
            Led::AllOff => 0x81,
            Led::AllOn => 0x82,
            Led::Green => 0x83,
            Led::Yellow => 0x84,
            Led::Red => 0x85,
        }
    }
}

/// Magnetic coercivity class of the card stock.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Coercivity {
    High,
    Low,
}

/// Supported recording densities.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Bpi {
    Bpi75,
    Bpi210,
}

/// BPI codes are track-specific, not a single generic mapping.
fn bpi_code(track: Track, bpi: Bpi) -> u8 {
    match (track, bpi) {
        (Track::One, Bpi::Bpi75) => 0xA0,
        (Track::One, Bpi::Bpi210) => 0xA1,
        (Track::Two, Bpi::Bpi75) => 0x4B,
        (Track::Two, Bpi::Bpi210) => 0xD2,
        (Track::Three, Bpi::Bpi75) => 0xC0,
        (Track::Three, Bpi::Bpi210) => 0xC1,
    }
}

// ============================================================================
// Command
// ============================================================================

/// Expected response shape for a command, driving both frame completion and
/// status interpretation. Adding a command is a data change here, not new
/// control flow.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseShape {
    /// No response expected.
    None,
    /// `ESC <status>`: 0x30 is success, anything else a device error code.
    Status,
    /// Exactly `ESC 0x79`; any other reply is malformed.
    CommTest,
    /// `ESC 0x30` success, `ESC 0x41` failure, anything else malformed.
    TestStatus,
    /// Starts with ESC, ends with 0x53; the middle bytes are the model.
    Model,
    /// Starts with ESC; the remaining bytes are the firmware version.
    Firmware,
    /// `ESC 'H'` (high) or `ESC 'L'` (low).
    CoercivityStatus,
    /// Three bytes: `ESC <lz13> <lz2>`.
    LeadingZeros,
    /// Five bytes: `ESC 0x30 <bpc1> <bpc2> <bpc3>`.
    BpcEcho,
    /// Multi-track formatted read frame; the track codec judges completion.
    FormattedTracks,
    /// Multi-track raw read frame; the track codec judges completion.
    RawTracks,
}

/// One encoded protocol operation: exact bytes, expected response shape, and
/// time budget. Immutable once built.
#[derive(Clone, Debug)]
pub struct Command {
    pub name: &'static str,
    pub bytes: Vec<u8>,
    pub shape: ResponseShape,
    pub timeout: Duration,
}

impl Command {
    fn fixed(name: &'static str, opcode: u8, shape: ResponseShape, timeout: Duration) -> Self {
        Command {
            name,
            bytes: vec![ESC, opcode],
            shape,
            timeout,
        }
    }

    pub fn expects_response(&self) -> bool {
        self.shape != ResponseShape::None
    }
}

// ============================================================================
// Catalog
// ============================================================================

/// `ESC a` — reset the device to its ready state. No response.
pub fn reset() -> Command {
    Command::fixed("reset", 0x61, ResponseShape::None, DEFAULT_TIMEOUT)
}

/// `ESC r` — read a card in formatted (ISO) mode.
pub fn read_card() -> Command {
    Command::fixed(
        "read card",
        0x72,
        ResponseShape::FormattedTracks,
        CARD_IO_TIMEOUT,
    )
}

/// `ESC m` — read a card in raw mode.
pub fn read_raw() -> Command {
    Command::fixed("read raw", 0x6D, ResponseShape::RawTracks, CARD_IO_TIMEOUT)
}

/// `ESC c <select>` — erase the selected tracks.
pub fn erase(selection: TrackSelection) -> Result<Command, Error> {
    let selection = selection.validated("erase")?;
    Ok(Command {
        name: "erase",
        bytes: vec![ESC, 0x63, selection.select_byte()],
        shape: ResponseShape::Status,
        timeout: CARD_IO_TIMEOUT,
    })
}

/// LED control. No response.
pub fn led(state: Led) -> Command {
    Command::fixed("led", state.opcode(), ResponseShape::None, DEFAULT_TIMEOUT)
}

/// `ESC e` — communication test. Success is exactly `ESC y`.
pub fn communication_test() -> Command {
    Command::fixed(
        "communication test",
        0x65,
        ResponseShape::CommTest,
        DEFAULT_TIMEOUT,
    )
}

/// `ESC 0x86` — sensor test. The device waits for a card to pass; the
/// only defined success reply is `ESC 0x30`.
pub fn sensor_test() -> Command {
    Command::fixed(
        "sensor test",
        0x86,
        ResponseShape::TestStatus,
        SENSOR_TEST_TIMEOUT,
    )
}

/// `ESC 0x87` — RAM test.
pub fn ram_test() -> Command {
    Command::fixed("ram test", 0x87, ResponseShape::TestStatus, DEFAULT_TIMEOUT)
}

/// `ESC t` — query the device model.
pub fn get_model() -> Command {
    Command::fixed("get model", 0x74, ResponseShape::Model, DEFAULT_TIMEOUT)
}

/// `ESC v` — query the firmware version.
pub fn get_firmware() -> Command {
    Command::fixed(
        "get firmware",
        0x76,
        ResponseShape::Firmware,
        DEFAULT_TIMEOUT,
    )
}

/// `ESC d` — query the coercivity setting.
pub fn get_coercivity() -> Command {
    Command::fixed(
        "get coercivity",
        0x64,
        ResponseShape::CoercivityStatus,
        DEFAULT_TIMEOUT,
    )
}

/// `ESC x` / `ESC y` — set high/low coercivity.
pub fn set_coercivity(coercivity: Coercivity) -> Command {
    let opcode = match coercivity {
        Coercivity::High => 0x78,
        Coercivity::Low => 0x79,
    };
    Command::fixed("set coercivity", opcode, ResponseShape::Status, DEFAULT_TIMEOUT)
}

/// `ESC z <lz13> <lz2>` — set leading zero counts for tracks 1&3 and track 2.
/// The `u8` parameters enforce the 0-255 range by construction.
pub fn set_leading_zeros(tracks_1_3: u8, track_2: u8) -> Command {
    Command {
        name: "set leading zeros",
        bytes: vec![ESC, 0x7A, tracks_1_3, track_2],
        shape: ResponseShape::TestStatus,
        timeout: DEFAULT_TIMEOUT,
    }
}

/// `ESC l` — query the leading zero counts.
pub fn check_leading_zeros() -> Command {
    Command::fixed(
        "check leading zeros",
        0x6C,
        ResponseShape::LeadingZeros,
        DEFAULT_TIMEOUT,
    )
}

/// `ESC b <code>` — set the recording density for one track.
pub fn set_bpi(track: Track, bpi: Bpi) -> Command {
    Command {
        name: "set bpi",
        bytes: vec![ESC, 0x62, bpi_code(track, bpi)],
        shape: ResponseShape::Status,
        timeout: DEFAULT_TIMEOUT,
    }
}

/// `ESC o <bpc1> <bpc2> <bpc3>` — set bits-per-character for all tracks.
/// Each value must lie in 5..=8.
pub fn set_bpc(track1: u8, track2: u8, track3: u8) -> Result<Command, Error> {
    for (track, value) in [(1, track1), (2, track2), (3, track3)] {
        if !(5..=8).contains(&value) {
            return Err(Error::local(format!(
                "BPC for track {} is {}, must be between 5 and 8",
                track, value
            )));
        }
    }
    Ok(Command {
        name: "set bpc",
        bytes: vec![ESC, 0x6F, track1, track2, track3],
        shape: ResponseShape::BpcEcho,
        timeout: DEFAULT_TIMEOUT,
    })
}

/// `ESC w <data block>` — write formatted track data.
pub fn write_card(tracks: &TrackSet, selection: TrackSelection) -> Result<Command, Error> {
    let selection = selection.validated("write")?;
    let block = encode_formatted(tracks, selection);
    if block.len() == 2 + DATA_END_MARKER.len() {
        return Err(Error::local("no track data to write"));
    }
    let mut bytes = vec![ESC, 0x77];
    bytes.extend_from_slice(&block);
    Ok(Command {
        name: "write card",
        bytes,
        shape: ResponseShape::Status,
        timeout: CARD_IO_TIMEOUT,
    })
}

/// `ESC n <data block>` — write raw track data.
pub fn write_raw(tracks: &TrackSet, selection: TrackSelection) -> Result<Command, Error> {
    let selection = selection.validated("raw write")?;
    let block = encode_raw(tracks, selection)?;
    if block.len() == 2 + DATA_END_MARKER.len() {
        return Err(Error::local("no raw track data to write"));
    }
    let mut bytes = vec![ESC, 0x6E];
    bytes.extend_from_slice(&block);
    Ok(Command {
        name: "write raw",
        bytes,
        shape: ResponseShape::Status,
        timeout: CARD_IO_TIMEOUT,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_opcodes() {
        assert_eq!(reset().bytes, vec![0x1B, 0x61]);
        assert_eq!(read_card().bytes, vec![0x1B, 0x72]);
        assert_eq!(read_raw().bytes, vec![0x1B, 0x6D]);
        assert_eq!(communication_test().bytes, vec![0x1B, 0x65]);
        assert_eq!(sensor_test().bytes, vec![0x1B, 0x86]);
        assert_eq!(ram_test().bytes, vec![0x1B, 0x87]);
        assert_eq!(get_model().bytes, vec![0x1B, 0x74]);
        assert_eq!(get_firmware().bytes, vec![0x1B, 0x76]);
        assert_eq!(get_coercivity().bytes, vec![0x1B, 0x64]);
        assert_eq!(check_leading_zeros().bytes, vec![0x1B, 0x6C]);
    }

    #[test]
    fn test_led_opcodes() {
        assert_eq!(led(Led::AllOff).bytes, vec![0x1B, 0x81]);
        assert_eq!(led(Led::AllOn).bytes, vec![0x1B, 0x82]);
        assert_eq!(led(Led::Green).bytes, vec![0x1B, 0x83]);
        assert_eq!(led(Led::Yellow).bytes, vec![0x1B, 0x84]);
        assert_eq!(led(Led::Red).bytes, vec![0x1B, 0x85]);
        assert!(!led(Led::Red).expects_response());
    }

    #[test]
    fn test_erase_select_byte() {
        let cmd = erase(TrackSelection::from_tracks(true, false, true)).unwrap();
        assert_eq!(cmd.bytes, vec![0x1B, 0x63, 0x05]);
    }

    #[test]
    fn test_erase_empty_selection_rejected_locally() {
        let result = erase(TrackSelection::from_tracks(false, false, false));
        assert!(matches!(result, Err(Error::LocalValidation(_))));
    }

    #[test]
    fn test_bpi_codes_are_track_specific() {
        assert_eq!(set_bpi(Track::One, Bpi::Bpi75).bytes, vec![0x1B, 0x62, 0xA0]);
        assert_eq!(set_bpi(Track::One, Bpi::Bpi210).bytes, vec![0x1B, 0x62, 0xA1]);
        assert_eq!(set_bpi(Track::Two, Bpi::Bpi75).bytes, vec![0x1B, 0x62, 0x4B]);
        assert_eq!(set_bpi(Track::Two, Bpi::Bpi210).bytes, vec![0x1B, 0x62, 0xD2]);
        assert_eq!(set_bpi(Track::Three, Bpi::Bpi75).bytes, vec![0x1B, 0x62, 0xC0]);
        assert_eq!(set_bpi(Track::Three, Bpi::Bpi210).bytes, vec![0x1B, 0x62, 0xC1]);
    }

    #[test]
    fn test_bpc_range_validation() {
        assert!(set_bpc(5, 8, 7).is_ok());
        assert!(matches!(set_bpc(4, 8, 7), Err(Error::LocalValidation(_))));
        assert!(matches!(set_bpc(5, 9, 7), Err(Error::LocalValidation(_))));
        assert_eq!(set_bpc(6, 7, 8).unwrap().bytes, vec![0x1B, 0x6F, 6, 7, 8]);
    }

    #[test]
    fn test_set_coercivity_opcodes() {
        assert_eq!(set_coercivity(Coercivity::High).bytes, vec![0x1B, 0x78]);
        assert_eq!(set_coercivity(Coercivity::Low).bytes, vec![0x1B, 0x79]);
    }

    #[test]
    fn test_set_leading_zeros_bytes() {
        assert_eq!(set_leading_zeros(61, 22).bytes, vec![0x1B, 0x7A, 61, 22]);
    }

    #[test]
    fn test_write_card_wraps_data_block() {
        let mut tracks = TrackSet::new();
        tracks.set_text(Track::Two, ";123=456");
        let cmd = write_card(&tracks, TrackSelection::from_tracks(false, true, false)).unwrap();

        assert_eq!(&cmd.bytes[..4], &[0x1B, 0x77, 0x1B, b's']);
        assert_eq!(&cmd.bytes[cmd.bytes.len() - 2..], &[0x3F, 0x1C]);
        assert_eq!(cmd.timeout, CARD_IO_TIMEOUT);
    }

    #[test]
    fn test_write_card_with_no_content_rejected() {
        let tracks = TrackSet::new();
        let result = write_card(&tracks, TrackSelection::from_tracks(true, true, true));
        assert!(matches!(result, Err(Error::LocalValidation(_))));
    }

    #[test]
    fn test_write_raw_wraps_length_prefixed_block() {
        let mut tracks = TrackSet::new();
        tracks.set_raw(Track::One, vec![0xDE, 0xAD]);
        let cmd = write_raw(&tracks, TrackSelection::from_tracks(true, false, false)).unwrap();
        assert_eq!(
            cmd.bytes,
            vec![0x1B, 0x6E, 0x1B, b's', 0x1B, 0x01, 0x02, 0xDE, 0xAD, 0x3F, 0x1C]
        );
    }

    #[test]
    fn test_sensor_test_only_accepts_exact_success_reply() {
        // Replies outside the defined set must classify as malformed,
        // not be coerced into a device error code.
        assert_eq!(sensor_test().shape, ResponseShape::TestStatus);
    }

    #[test]
    fn test_timeout_budgets() {
        assert_eq!(reset().timeout, DEFAULT_TIMEOUT);
        assert_eq!(read_card().timeout, CARD_IO_TIMEOUT);
        assert_eq!(read_raw().timeout, CARD_IO_TIMEOUT);
        assert_eq!(sensor_test().timeout, SENSOR_TEST_TIMEOUT);
    }
}
