use can_transport::TransportError;
use core::fmt;
use std::time::Duration;
use thiserror::Error;

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// A single request/response exchange went wrong.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error("negative response to service 0x{service:02X}: {code}")]
    Negative { service: u8, code: Nrc },
    #[error("unexpected response 0x{got:02X} to service 0x{service:02X}")]
    Unexpected { service: u8, got: u8 },
    #[error("malformed message: {0}")]
    Malformed(&'static str),
}

/// Startup and polling failures, one variant per phase.
#[derive(Debug, Error)]
pub enum Error {
    #[error("session handshake failed: {0}")]
    Handshake(#[source] ProtocolError),
    #[error("could not clear record definition 0x{local_id:02X}: {source}")]
    ClearDefinition {
        local_id: u8,
        #[source]
        source: ProtocolError,
    },
    #[error("registration of field #{index} ({name}) failed: {source}")]
    Registration {
        index: usize,
        name: String,
        #[source]
        source: ProtocolError,
    },
    #[error("record read failed: {0}")]
    Transport(#[source] ProtocolError),
}

impl Error {
    /// True for failures that happen while binding fields to the record.
    pub fn is_registration(&self) -> bool {
        matches!(self, Error::ClearDefinition { .. } | Error::Registration { .. })
    }
}

/// Problems with a field list, found before any request is sent.
#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("no fields configured")]
    Empty,
    #[error("{0} fields configured, at most 255 can be bound")]
    TooMany(usize),
    #[error("record needs {len} bytes, a single read carries at most {max}")]
    RecordTooLarge { len: usize, max: usize },
    #[error("field {name}: invalid formula '{formula}': {reason}")]
    Formula {
        name: String,
        formula: String,
        reason: String,
    },
}

/// KWP2000 negative response code.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Nrc(pub u8);

impl Nrc {
    pub const GENERAL_REJECT: Nrc = Nrc(0x10);
    pub const SERVICE_NOT_SUPPORTED: Nrc = Nrc(0x11);
    pub const SUBFUNCTION_NOT_SUPPORTED: Nrc = Nrc(0x12);
    pub const BUSY_REPEAT_REQUEST: Nrc = Nrc(0x21);
    pub const CONDITIONS_NOT_CORRECT: Nrc = Nrc(0x22);
    pub const REQUEST_OUT_OF_RANGE: Nrc = Nrc(0x31);
    pub const SECURITY_ACCESS_DENIED: Nrc = Nrc(0x33);
    pub const RESPONSE_PENDING: Nrc = Nrc(0x78);

    fn name(self) -> Option<&'static str> {
        Some(match self {
            Nrc::GENERAL_REJECT => "general reject",
            Nrc::SERVICE_NOT_SUPPORTED => "service not supported",
            Nrc::SUBFUNCTION_NOT_SUPPORTED => "sub-function not supported",
            Nrc::BUSY_REPEAT_REQUEST => "busy, repeat request",
            Nrc::CONDITIONS_NOT_CORRECT => "conditions not correct",
            Nrc::REQUEST_OUT_OF_RANGE => "request out of range",
            Nrc::SECURITY_ACCESS_DENIED => "security access denied",
            Nrc::RESPONSE_PENDING => "response pending",
            _ => return None,
        })
    }
}

impl fmt::Display for Nrc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name} (0x{:02X})", self.0),
            None => write!(f, "code 0x{:02X}", self.0),
        }
    }
}
