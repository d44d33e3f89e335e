// src/error.rs
//
// Error taxonomy for the msr206 driver.
// Local validation failures are rejected before any bytes hit the wire;
// device-reported failures carry the raw status code; nothing here closes
// the serial session — only an explicit disconnect does that.

use serde::Serialize;

/// Errors surfaced by the protocol engine and its collaborators.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Malformed caller input (bad BIN, out-of-range BPC, empty track
    /// selection, invalid hex). Never sent to the device.
    #[error("invalid input: {0}")]
    LocalValidation(String),

    /// Operation attempted without an open serial session.
    #[error("not connected to a device")]
    NotConnected,

    /// The OS/driver refused to open the port. The underlying error string
    /// is passed through unchanged.
    #[error("failed to open {port}: {message}")]
    ConnectionFailed { port: String, message: String },

    /// Serial read/write failure after the port was opened.
    #[error("serial I/O error: {0}")]
    Io(String),

    /// No complete response within the operation's time budget.
    #[error("timed out waiting for device response")]
    Timeout,

    /// Bytes arrived but did not match the expected response pattern.
    /// The raw bytes are kept for diagnosis.
    #[error("malformed response: {}", hex::encode(.raw))]
    Malformed { raw: Vec<u8> },

    /// The peripheral reported a failure status.
    #[error("device reported status 0x{code:02X}")]
    Device { code: u8 },
}

impl Error {
    /// Shorthand for a local validation failure.
    pub fn local(reason: impl Into<String>) -> Self {
        Error::LocalValidation(reason.into())
    }
}

/// Tagged outcome of one protocol operation, for log lines and JSON output.
/// Every public operation maps to exactly one of these.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum OperationOutcome {
    Success,
    LocalValidationError { reason: String },
    NotConnected,
    ConnectionError { message: String },
    IoError { message: String },
    Timeout,
    Malformed { raw: String },
    DeviceError { code: u8 },
}

impl OperationOutcome {
    /// Classify a result from any protocol operation.
    pub fn of<T>(result: &Result<T, Error>) -> Self {
        match result {
            Ok(_) => OperationOutcome::Success,
            Err(e) => Self::from_error(e),
        }
    }

    pub fn from_error(error: &Error) -> Self {
        match error {
            Error::LocalValidation(reason) => OperationOutcome::LocalValidationError {
                reason: reason.clone(),
            },
            Error::NotConnected => OperationOutcome::NotConnected,
            Error::ConnectionFailed { port, message } => OperationOutcome::ConnectionError {
                message: format!("{}: {}", port, message),
            },
            Error::Io(message) => OperationOutcome::IoError {
                message: message.clone(),
            },
            Error::Timeout => OperationOutcome::Timeout,
            Error::Malformed { raw } => OperationOutcome::Malformed {
                raw: hex::encode(raw),
            },
            Error::Device { code } => OperationOutcome::DeviceError { code: *code },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, OperationOutcome::Success)
    }
}

impl std::fmt::Display for OperationOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationOutcome::Success => write!(f, "ok"),
            OperationOutcome::LocalValidationError { reason } => {
                write!(f, "rejected: {}", reason)
            }
            OperationOutcome::NotConnected => write!(f, "not connected"),
            OperationOutcome::ConnectionError { message } => {
                write!(f, "connection failed: {}", message)
            }
            OperationOutcome::IoError { message } => write!(f, "I/O error: {}", message),
            OperationOutcome::Timeout => write!(f, "timeout"),
            OperationOutcome::Malformed { raw } => write!(f, "malformed response ({})", raw),
            OperationOutcome::DeviceError { code } => {
                write!(f, "device error 0x{:02X}", code)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errors_compare_by_value() {
        // Decode results are asserted with assert_eq! elsewhere, which
        // needs Error itself to be comparable.
        assert_eq!(Error::Timeout, Error::Timeout);
        assert_ne!(
            Error::Device { code: 0x30 },
            Error::Device { code: 0x41 }
        );
        assert_eq!(
            Error::Malformed { raw: vec![0x1B] },
            Error::Malformed { raw: vec![0x1B] }
        );
    }

    #[test]
    fn test_outcome_of_ok() {
        let result: Result<(), Error> = Ok(());
        assert!(OperationOutcome::of(&result).is_success());
    }

    #[test]
    fn test_outcome_of_device_error() {
        let result: Result<(), Error> = Err(Error::Device { code: 0x41 });
        match OperationOutcome::of(&result) {
            OperationOutcome::DeviceError { code } => assert_eq!(code, 0x41),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_malformed_outcome_keeps_raw_bytes_as_hex() {
        let err = Error::Malformed {
            raw: vec![0x1B, 0x41],
        };
        match OperationOutcome::from_error(&err) {
            OperationOutcome::Malformed { raw } => assert_eq!(raw, "1b41"),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_display_is_log_friendly() {
        assert_eq!(OperationOutcome::Timeout.to_string(), "timeout");
        assert_eq!(
            OperationOutcome::DeviceError { code: 0x41 }.to_string(),
            "device error 0x41"
        );
    }
}
