// src/main.rs
//
// msr206 CLI: one subcommand per catalog operation, plus port listing and
// test card generation. Prints a human-readable line per operation, or
// JSON with --json.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;

use msr206::cardgen::{self, Brand};
use msr206::error::{Error, OperationOutcome};
use msr206::protocol::command::{Bpi, Coercivity, Led, Track, TrackSelection};
use msr206::protocol::track::TrackSet;
use msr206::session::DeviceSession;
use msr206::tlog;
use msr206::transport;

#[derive(Parser)]
#[command(name = "msr206", about = "MSR206/MSRE206 magnetic stripe reader/writer tool")]
struct Cli {
    /// Serial port (e.g. /dev/ttyUSB0, COM3). Required for device commands.
    #[arg(short, long, global = true)]
    port: Option<String>,

    /// Emit results as JSON instead of human-readable lines.
    #[arg(long, global = true)]
    json: bool,

    /// Tee log output to a timestamped file in this directory.
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Clone, Copy, ValueEnum)]
enum LedArg {
    Off,
    On,
    Green,
    Yellow,
    Red,
}

impl From<LedArg> for Led {
    fn from(value: LedArg) -> Led {
        match value {
            LedArg::Off => Led::AllOff,
            LedArg::On => Led::AllOn,
            LedArg::Green => Led::Green,
            LedArg::Yellow => Led::Yellow,
            LedArg::Red => Led::Red,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum BrandArg {
    Visa,
    Mastercard,
    Amex,
    Diners,
}

impl From<BrandArg> for Brand {
    fn from(value: BrandArg) -> Brand {
        match value {
            BrandArg::Visa => Brand::Visa,
            BrandArg::Mastercard => Brand::Mastercard,
            BrandArg::Amex => Brand::Amex,
            BrandArg::Diners => Brand::Diners,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum CoercivityArg {
    Hi,
    Lo,
}

#[derive(Subcommand)]
enum Cmd {
    /// List available serial ports.
    Ports,
    /// Reset the device to its ready state.
    Reset,
    /// Read a card (formatted, or raw hex with --raw).
    Read {
        #[arg(long)]
        raw: bool,
    },
    /// Write track data (formatted text, or hex with --raw).
    Write {
        #[arg(long)]
        raw: bool,
        #[arg(long)]
        track1: Option<String>,
        #[arg(long)]
        track2: Option<String>,
        #[arg(long)]
        track3: Option<String>,
    },
    /// Erase the selected tracks, e.g. --tracks 1,3
    Erase {
        #[arg(long, default_value = "1,2,3")]
        tracks: String,
    },
    /// Drive the LEDs.
    Led { state: LedArg },
    /// Run the communication test.
    CommTest,
    /// Run the sensor test (requires swiping a card).
    SensorTest,
    /// Run the RAM test.
    RamTest,
    /// Query the device model.
    Model,
    /// Query the firmware version.
    Firmware,
    /// Query or set coercivity.
    Coercivity { value: Option<CoercivityArg> },
    /// Query or set leading zero counts.
    LeadingZeros {
        #[arg(long, requires = "track_2")]
        tracks_1_3: Option<u8>,
        #[arg(long, requires = "tracks_1_3")]
        track_2: Option<u8>,
    },
    /// Set the recording density for one track.
    Bpi {
        #[arg(long)]
        track: u8,
        #[arg(long)]
        density: u16,
    },
    /// Set bits-per-character for all three tracks.
    Bpc { track1: u8, track2: u8, track3: u8 },
    /// Generate a Luhn-valid test card and its track strings.
    Generate {
        #[arg(long)]
        brand: BrandArg,
        #[arg(long)]
        bin: Option<String>,
        #[arg(long, default_value = "TEST/CARDHOLDER")]
        holder: String,
        #[arg(long, default_value = "101")]
        service_code: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Some(ref dir) = cli.log_dir {
        if let Err(e) = msr206::logging::init_file_logging(dir) {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    }

    let result = run(&cli);
    msr206::logging::stop_file_logging();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let outcome = OperationOutcome::from_error(&e);
            if cli.json {
                match serde_json::to_string(&outcome) {
                    Ok(line) => println!("{}", line),
                    Err(_) => eprintln!("{}", outcome),
                }
            } else {
                tlog!("[msr206] {}", outcome);
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<(), Error> {
    match &cli.command {
        Cmd::Ports => {
            let ports = transport::list_ports()?;
            if cli.json {
                print_json(&json!({ "ports": ports }));
            } else if ports.is_empty() {
                println!("No serial ports found");
            } else {
                for p in ports {
                    match (p.manufacturer.as_deref(), p.product.as_deref()) {
                        (_, Some(product)) => {
                            println!("{}  [{}] {}", p.port_name, p.port_type, product)
                        }
                        (Some(manufacturer), None) => {
                            println!("{}  [{}] {}", p.port_name, p.port_type, manufacturer)
                        }
                        _ => println!("{}  [{}]", p.port_name, p.port_type),
                    }
                }
            }
            Ok(())
        }

        Cmd::Generate {
            brand,
            bin,
            holder,
            service_code,
        } => {
            let brand = Brand::from(*brand);
            if let Some(bin) = bin.as_deref() {
                cardgen::validate_bin(bin)?;
                if let Some(warning) = cardgen::bin_warning(brand, bin) {
                    tlog!("[cardgen] warning: {} — proceeding anyway", warning);
                }
            }
            let card = cardgen::generate(brand, bin.as_deref())?;
            let track1 = card.track1(holder, service_code);
            let track2 = card.track2(service_code);
            if cli.json {
                print_json(&json!({
                    "card": card,
                    "track1": track1,
                    "track2": track2,
                }));
            } else {
                println!("Brand:   {}", card.brand.label());
                println!("Number:  {}", card.number);
                println!("Expiry:  {} (YYMM)", card.expiry);
                println!("CVV:     {}", card.cvv);
                println!("Track 1: {}", track1);
                println!("Track 2: {}", track2);
            }
            Ok(())
        }

        device_cmd => {
            let port = cli
                .port
                .as_deref()
                .ok_or_else(|| Error::local("a serial port is required; pass --port"))?;
            let mut session = DeviceSession::connect(port)?;
            let result = run_device(cli, device_cmd, &session);
            session.disconnect();
            result
        }
    }
}

fn run_device(cli: &Cli, cmd: &Cmd, session: &DeviceSession) -> Result<(), Error> {
    match cmd {
        Cmd::Reset => {
            session.reset()?;
            report(cli, "Device reset", &json!({ "outcome": "success" }));
        }
        Cmd::Read { raw: false } => {
            let tracks = session.read_card()?;
            if cli.json {
                print_json(&json!({ "tracks": tracks }));
            } else {
                for track in Track::ALL {
                    println!(
                        "Track {}: {}",
                        track.number(),
                        tracks.text(track).unwrap_or("<empty>")
                    );
                }
            }
        }
        Cmd::Read { raw: true } => {
            let tracks = session.read_raw()?;
            if cli.json {
                print_json(&json!({ "tracks": tracks }));
            } else {
                for track in Track::ALL {
                    println!(
                        "Track {}: {}",
                        track.number(),
                        tracks.raw_hex(track).as_deref().unwrap_or("<empty>")
                    );
                }
            }
        }
        Cmd::Write {
            raw,
            track1,
            track2,
            track3,
        } => {
            let mut tracks = TrackSet::new();
            let inputs = [
                (Track::One, track1),
                (Track::Two, track2),
                (Track::Three, track3),
            ];
            for (track, value) in inputs {
                if let Some(value) = value {
                    if *raw {
                        tracks.set_raw_hex(track, value)?;
                    } else {
                        tracks.set_text(track, value.clone());
                    }
                }
            }
            let selection = TrackSelection::from_tracks(
                track1.is_some(),
                track2.is_some(),
                track3.is_some(),
            );
            if *raw {
                session.write_raw(&tracks, selection)?;
            } else {
                session.write_card(&tracks, selection)?;
            }
            report(cli, "Write ok", &json!({ "outcome": "success" }));
        }
        Cmd::Erase { tracks } => {
            let selection = parse_track_list(tracks)?;
            session.erase(selection)?;
            report(cli, "Erase ok", &json!({ "outcome": "success" }));
        }
        Cmd::Led { state } => {
            session.led(Led::from(*state))?;
            report(cli, "LED command sent", &json!({ "outcome": "success" }));
        }
        Cmd::CommTest => {
            session.communication_test()?;
            report(cli, "Communication test ok", &json!({ "outcome": "success" }));
        }
        Cmd::SensorTest => {
            println!("Swipe a card to exercise the sensor...");
            session.sensor_test()?;
            report(cli, "Sensor test ok", &json!({ "outcome": "success" }));
        }
        Cmd::RamTest => {
            session.ram_test()?;
            report(cli, "RAM test ok", &json!({ "outcome": "success" }));
        }
        Cmd::Model => {
            let model = session.model()?;
            report(cli, &format!("Model: {}", model), &json!({ "model": model }));
        }
        Cmd::Firmware => {
            let version = session.firmware()?;
            report(
                cli,
                &format!("Firmware: {}", version),
                &json!({ "firmware": version }),
            );
        }
        Cmd::Coercivity { value: None } => {
            let coercivity = session.coercivity()?;
            let label = match coercivity {
                Coercivity::High => "high (Hi-Co)",
                Coercivity::Low => "low (Low-Co)",
            };
            report(
                cli,
                &format!("Coercivity: {}", label),
                &json!({ "coercivity": coercivity }),
            );
        }
        Cmd::Coercivity { value: Some(value) } => {
            let coercivity = match value {
                CoercivityArg::Hi => Coercivity::High,
                CoercivityArg::Lo => Coercivity::Low,
            };
            session.set_coercivity(coercivity)?;
            report(cli, "Coercivity set", &json!({ "coercivity": coercivity }));
        }
        Cmd::LeadingZeros {
            tracks_1_3: Some(lz13),
            track_2: Some(lz2),
        } => {
            session.set_leading_zeros(*lz13, *lz2)?;
            report(cli, "Leading zeros set", &json!({ "outcome": "success" }));
        }
        Cmd::LeadingZeros { .. } => {
            let (lz13, lz2) = session.leading_zeros()?;
            report(
                cli,
                &format!("Leading zeros - tracks 1&3: {}, track 2: {}", lz13, lz2),
                &json!({ "tracks_1_3": lz13, "track_2": lz2 }),
            );
        }
        Cmd::Bpi { track, density } => {
            let track = Track::from_number(*track)
                .ok_or_else(|| Error::local("track must be 1, 2 or 3"))?;
            let bpi = match density {
                75 => Bpi::Bpi75,
                210 => Bpi::Bpi210,
                other => {
                    return Err(Error::local(format!(
                        "unsupported density {} bpi, expected 75 or 210",
                        other
                    )))
                }
            };
            session.set_bpi(track, bpi)?;
            report(cli, "BPI set", &json!({ "outcome": "success" }));
        }
        Cmd::Bpc {
            track1,
            track2,
            track3,
        } => {
            let (b1, b2, b3) = session.set_bpc(*track1, *track2, *track3)?;
            report(
                cli,
                &format!("BPC set - track 1: {}, track 2: {}, track 3: {}", b1, b2, b3),
                &json!({ "track1": b1, "track2": b2, "track3": b3 }),
            );
        }
        // Handled in run().
        Cmd::Ports | Cmd::Generate { .. } => unreachable!(),
    }
    Ok(())
}

/// Parse a comma-separated track list ("1,3") into a selection.
fn parse_track_list(input: &str) -> Result<TrackSelection, Error> {
    let mut t1 = false;
    let mut t2 = false;
    let mut t3 = false;
    for part in input.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        match part {
            "1" => t1 = true,
            "2" => t2 = true,
            "3" => t3 = true,
            other => {
                return Err(Error::local(format!(
                    "invalid track '{}', expected 1, 2 or 3",
                    other
                )))
            }
        }
    }
    Ok(TrackSelection::from_tracks(t1, t2, t3))
}

fn report(cli: &Cli, line: &str, payload: &serde_json::Value) {
    if cli.json {
        print_json(payload);
    } else {
        println!("{}", line);
    }
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("failed to serialize output: {}", e),
    }
}
