use std::fmt;
use std::io;

use super::version::SemVer;

/// Failure talking to the driver process.
#[derive(Debug)]
pub enum DriverError {
    /// Transport failed or timed out
    Io(io::Error),
    /// Driver answered with nothing
    NoResponse,
    /// Leading token did not echo the expected command
    UnexpectedResponse { expected: &'static str, response: String },
    /// Arguments of an otherwise valid response did not parse
    Malformed { response: String },
    Incompatible { found: String, expected: SemVer },
    InvalidTrackerCount(i64),
    UnexpectedTrackerId { expected: usize, found: i64 },
    RegistrationIncomplete { expected: usize, registered: usize },
}

impl DriverError {
    /// Timeouts and broken connections. A single failed round trip of this
    /// kind only costs one frame; everything else is a protocol fault.
    pub fn is_transport(&self) -> bool {
        matches!(self, DriverError::Io(_))
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverError::Io(e) => write!(f, "driver connection failed: {}", e),
            DriverError::NoResponse => write!(f, "no response from driver"),
            DriverError::UnexpectedResponse { expected, response } => write!(
                f,
                "command response indicated failure (expected '{}'): {}",
                expected, response
            ),
            DriverError::Malformed { response } => {
                write!(f, "malformed driver response: {}", response)
            }
            DriverError::Incompatible { found, expected } => write!(
                f,
                "incompatible bridge driver: {} expected: {}",
                found, expected
            ),
            DriverError::InvalidTrackerCount(n) => write!(f, "invalid tracker count: {}", n),
            DriverError::UnexpectedTrackerId { expected, found } => write!(
                f,
                "unexpected tracker id in response: expected {}, got {}",
                expected, found
            ),
            DriverError::RegistrationIncomplete {
                expected,
                registered,
            } => write!(
                f,
                "some or all trackers were not registered with driver ({} of {})",
                registered, expected
            ),
        }
    }
}

impl std::error::Error for DriverError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DriverError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for DriverError {
    fn from(e: io::Error) -> Self {
        DriverError::Io(e)
    }
}
