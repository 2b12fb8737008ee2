use std::{fmt, io, str};

/// Errors produced by the signature model and wire codec.
///
/// This mirrors the split the rest of the workspace relies on: a handful of structural errors
/// (bad signature, incomplete type, excess data) that indicate a programming error or peer
/// contract drift, plus a wrapped [`io::Error`] for the underlying transport.
#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    Message(String),
    /// The signature string was not well-formed D-Bus grammar.
    InvalidSignature(String),
    /// A value's signature did not match what the decoder expected at this position.
    ///
    /// The caller is expected to have already validated the incoming signature against the
    /// method's declared output signature, so seeing this here means the peer sent something
    /// that does not match its own contract.
    SignatureMismatch {
        expected: String,
        actual: String,
    },
    /// Too few or too many bytes remained for a value's declared type.
    InsufficientData,
    ExcessData,
    Utf8(str::Utf8Error),
    /// A string carried an interior NUL, which D-Bus forbids.
    NulInString(usize),
}

static_assertions::assert_impl_all!(Error: Send, Sync, Unpin);

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::Message(s) => write!(f, "{s}"),
            Error::InvalidSignature(s) => write!(f, "invalid signature: `{s}`"),
            Error::SignatureMismatch { expected, actual } => write!(
                f,
                "signature mismatch: expected `{expected}`, got `{actual}`"
            ),
            Error::InsufficientData => write!(f, "insufficient data"),
            Error::ExcessData => write!(f, "excess data"),
            Error::Utf8(e) => write!(f, "UTF-8 error: {e}"),
            Error::NulInString(pos) => write!(f, "interior NUL at byte {pos}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Utf8(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<str::Utf8Error> for Error {
    fn from(e: str::Utf8Error) -> Self {
        Error::Utf8(e)
    }
}

impl serde::de::Error for Error {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        Error::Message(msg.to_string())
    }
}

impl serde::ser::Error for Error {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        Error::Message(msg.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
