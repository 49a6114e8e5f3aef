//! Top-level error kinds (§7). Protocol parsers never panic; they set an
//! error state on the response object and the channel completes the
//! pending command with [`ErrorKind::AsyncFailed`]. Only transport
//! failures surface as [`ErrorKind::Unavailable`]/[`ErrorKind::General`].
use strum::Display;

#[derive(Clone, Debug, Display, Eq, PartialEq)]
pub enum ErrorKind {
    /// Accepted, completion pending.
    InProgress,
    /// Caller's command was structurally invalid.
    BadRequest,
    /// No response within the allotted wait.
    TimedOut,
    /// Remote returned a protocol-level failure; `byte` is the
    /// kind-specific status/error code kept for inspection.
    AsyncFailed { byte: u8 },
    /// Cancelled by the application.
    AsyncAborted,
    /// Operation not valid in the current state.
    IllegalState,
    /// Idempotent pairing: already connected.
    AlreadyConnected,
    /// Idempotent unpairing: already released.
    AlreadyReleased,
    /// Catch-all transport failure.
    Unavailable,
    /// Catch-all, carries an internal sub-error.
    General(Internal),
}

#[derive(Clone, Debug, Display, Eq, PartialEq)]
pub enum Internal {
    Io(std::io::ErrorKind),
    Record(crate::record::RecordError),
    SdpPayload(crate::sdp::payload::SdpPayloadError),
    Uuid(crate::uuid::UuidError),
    Key(crate::keys::KeyError),
    Hci(crate::hci::HciError),
    Mgmt(crate::mgmt::MgmtError),
    Att(crate::att::AttError),
    Sdp(crate::sdp::SdpError),
    Avdtp(crate::avdtp::AvdtpError),
    Scan(crate::scan::ScanError),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: String::new(),
        }
    }

    pub fn with_message(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", &self.kind)
        } else {
            write!(f, "{}: {}", &self.kind, &self.message)
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self {
            kind: ErrorKind::General(Internal::Io(err.kind())),
            message: err.to_string(),
        }
    }
}

macro_rules! from_internal {
    ($variant:ident, $ty:ty) => {
        impl From<$ty> for Error {
            fn from(err: $ty) -> Self {
                Self {
                    kind: ErrorKind::General(Internal::$variant(err)),
                    message: String::new(),
                }
            }
        }
    };
}

from_internal!(Record, crate::record::RecordError);
from_internal!(SdpPayload, crate::sdp::payload::SdpPayloadError);
from_internal!(Uuid, crate::uuid::UuidError);
from_internal!(Key, crate::keys::KeyError);
from_internal!(Hci, crate::hci::HciError);
from_internal!(Mgmt, crate::mgmt::MgmtError);
from_internal!(Att, crate::att::AttError);
from_internal!(Sdp, crate::sdp::SdpError);
from_internal!(Avdtp, crate::avdtp::AvdtpError);
from_internal!(Scan, crate::scan::ScanError);

pub type Result<T> = std::result::Result<T, Error>;
