//! The engine-level error taxonomy: runtime errors (a server handler signalled a
//! named D-Bus error), transport errors (dispatcher-level failure: timeout, cancellation, peer
//! vanished), and codec errors (signature mismatch on decode), plus the ambient I/O and name
//! validation failures the rest of the crate needs to report.

use std::{fmt, io};

use simppl_names::ErrorName;

/// Well-known error name fired when a blocking/async call's deadline elapses without a reply.
pub const ERROR_NO_REPLY: &str = "org.freedesktop.DBus.Error.NoReply";
/// Well-known error name the broker itself uses when it reports a timeout.
pub const ERROR_TIMEOUT: &str = "org.freedesktop.DBus.Error.Timeout";
/// Error name a skeleton replies with when a handler panics or returns an unexpected error.
pub const ERROR_UNHANDLED_EXCEPTION: &str = "simppl.dbus.UnhandledException";

#[derive(Debug)]
pub enum Error {
    /// A server handler signalled an error: the peer's declared D-Bus error name, plus an
    /// optional human-readable message (the error reply's first string argument).
    Runtime { name: String, message: Option<String> },
    /// A dispatcher-level failure: request timeout, call cancellation, or the peer vanishing
    /// from the bus. Carries the D-Bus error name under which it is reported.
    Transport { name: String, message: String },
    /// A value's wire signature didn't match what the codec expected at this position.
    Codec(simppl_codec::Error),
    /// A bus/interface/member/error name failed validation.
    Name(simppl_names::Error),
    /// Address string parsing or resolution failed.
    Address(String),
    /// The underlying socket or process I/O failed.
    Io(io::Error),
    /// A method was called that the interface declaration marks `oneway`, or some other misuse
    /// of the stub/skeleton API that is a programming error rather than a runtime condition.
    Misuse(String),
    /// A freeform message, used sparingly for conditions with no dedicated variant.
    Message(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn runtime(name: impl Into<String>, message: impl Into<Option<String>>) -> Self {
        Error::Runtime {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn timeout() -> Self {
        Error::Transport {
            name: ERROR_NO_REPLY.to_owned(),
            message: "method call timed out".to_owned(),
        }
    }

    pub fn cancelled() -> Self {
        Error::Transport {
            name: ERROR_NO_REPLY.to_owned(),
            message: "pending call was cancelled".to_owned(),
        }
    }

    pub fn unhandled_exception(message: impl Into<String>) -> Self {
        Error::Runtime {
            name: ERROR_UNHANDLED_EXCEPTION.to_owned(),
            message: Some(message.into()),
        }
    }

    /// The D-Bus error name this error would be reported under, if it were sent as an `ERROR`
    /// reply (used by the skeleton when turning a handler's `Result::Err` into a wire reply).
    pub fn dbus_name(&self) -> Option<&str> {
        match self {
            Error::Runtime { name, .. } | Error::Transport { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Error::Runtime { message, .. } => message.as_deref(),
            Error::Transport { message, .. } => Some(message),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Runtime { name, message: Some(m) } => write!(f, "{name}: {m}"),
            Error::Runtime { name, message: None } => write!(f, "{name}"),
            Error::Transport { name, message } => write!(f, "{name}: {message}"),
            Error::Codec(e) => write!(f, "codec error: {e}"),
            Error::Name(e) => write!(f, "invalid name: {e}"),
            Error::Address(s) => write!(f, "address error: {s}"),
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::Misuse(s) => write!(f, "programming error: {s}"),
            Error::Message(s) => write!(f, "{s}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Codec(e) => Some(e),
            Error::Name(e) => Some(e),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<simppl_codec::Error> for Error {
    fn from(e: simppl_codec::Error) -> Self {
        Error::Codec(e)
    }
}

impl From<simppl_names::Error> for Error {
    fn from(e: simppl_names::Error) -> Self {
        Error::Name(e)
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

/// Maps a declared error name back to its typed representation, for interfaces whose methods
/// registered one via `#[simppl(throws = "...")]`.
pub trait DeclaredError: Sized {
    const NAME: &'static str;

    fn from_message(message: Option<&str>) -> Self;
}

pub fn error_name_is<'e>(error: &Error, expected: &ErrorName<'e>) -> bool {
    error.dbus_name() == Some(expected.as_str())
}
