//! Validated D-Bus name newtypes: bus names, interface names, member names, error names.
//!
//! D-Bus requires several different kinds of dot-separated or plain identifier strings, each
//! with its own grammar. Modelling them as distinct newtypes means a malformed name is rejected
//! once, at construction, rather than silently accepted and only failing much later on the wire.

use std::{borrow::Cow, fmt};

use serde::{Deserialize, Serialize};
use simppl_codec::{Basic, Codec, Error as CodecError, Signature, Type};

/// A name validation failure.
#[derive(Debug)]
pub struct Error(String);

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for Error {}

impl From<Error> for CodecError {
    fn from(e: Error) -> Self {
        CodecError::Message(e.0)
    }
}

type Result<T> = std::result::Result<T, Error>;

fn is_valid_segment(segment: &str, first_char_digit_ok: bool) -> bool {
    if segment.is_empty() {
        return false;
    }
    let mut chars = segment.chars();
    let first = chars.next().unwrap();
    if !(first.is_ascii_alphabetic() || first == '_' || (first_char_digit_ok && first.is_ascii_digit())) {
        return false;
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Validate a dot-separated name (interface names, well-known bus names, error names): at least
/// two segments, each a valid identifier, total length at most 255 bytes.
fn validate_dotted(s: &str, kind: &str) -> Result<()> {
    if s.is_empty() || s.len() > 255 {
        return Err(Error(format!("{kind} `{s}` has invalid length")));
    }
    let segments: Vec<&str> = s.split('.').collect();
    if segments.len() < 2 {
        return Err(Error(format!(
            "{kind} `{s}` must have at least two dot-separated segments"
        )));
    }
    if segments.iter().any(|seg| !is_valid_segment(seg, false)) {
        return Err(Error(format!("{kind} `{s}` has an invalid segment")));
    }
    Ok(())
}

fn validate_member(s: &str) -> Result<()> {
    if s.is_empty() || s.len() > 255 {
        return Err(Error(format!("member name `{s}` has invalid length")));
    }
    if !is_valid_segment(s, false) {
        return Err(Error(format!("member name `{s}` is not a valid identifier")));
    }
    Ok(())
}

macro_rules! dotted_name {
    ($(#[$doc:meta])* $name:ident, $kind:literal) => {
        $(#[$doc])*
        #[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name<'n>(Cow<'n, str>);

        impl<'n> $name<'n> {
            pub fn try_from(s: impl Into<Cow<'n, str>>) -> Result<Self> {
                let s = s.into();
                validate_dotted(&s, $kind)?;
                Ok(Self(s))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn to_owned(&self) -> $name<'static> {
                $name(Cow::Owned(self.0.clone().into_owned()))
            }
        }

        impl fmt::Display for $name<'_> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl<'n> TryFrom<&'n str> for $name<'n> {
            type Error = Error;

            fn try_from(s: &'n str) -> Result<Self> {
                $name::try_from(s)
            }
        }

        impl TryFrom<String> for $name<'static> {
            type Error = Error;

            fn try_from(s: String) -> Result<Self> {
                $name::try_from(s)
            }
        }

        impl PartialEq<str> for $name<'_> {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl Type for $name<'_> {
            fn signature() -> Signature<'static> {
                Signature::from_str_unchecked("s")
            }
        }

        impl Basic for $name<'_> {
            const SIGNATURE_CHAR: char = 's';
        }

        impl Codec for $name<'_> {
            fn encode<B: simppl_codec::ByteOrder>(
                &self,
                w: &mut simppl_codec::Writer<B>,
            ) -> simppl_codec::Result<()> {
                self.0.as_ref().to_owned().encode(w)
            }

            fn decode<B: simppl_codec::ByteOrder>(
                r: &mut simppl_codec::Reader<'_, B>,
            ) -> simppl_codec::Result<Self> {
                let s = String::decode(r)?;
                $name::try_from(s).map_err(Into::into)
            }
        }
    };
}

dotted_name!(
    /// A validated D-Bus interface name, e.g. `"org.freedesktop.DBus.Properties"`.
    InterfaceName,
    "interface name"
);

dotted_name!(
    /// A validated D-Bus error name, e.g. `"org.freedesktop.DBus.Error.NoReply"`.
    ErrorName,
    "error name"
);

/// A validated D-Bus bus name: either a well-known name (`"com.example.Foo"`) or a unique name
/// (`":1.42"`, broker-assigned).
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BusName<'n>(Cow<'n, str>);

impl<'n> BusName<'n> {
    pub fn try_from(s: impl Into<Cow<'n, str>>) -> Result<Self> {
        let s = s.into();
        if let Some(unique) = s.strip_prefix(':') {
            if unique.is_empty() || s.len() > 255 {
                return Err(Error(format!("unique bus name `{s}` is invalid")));
            }
            // Unique names are ":" followed by dot-separated segments that may start with a digit.
            if unique.split('.').any(|seg| !is_valid_segment(seg, true)) {
                return Err(Error(format!("unique bus name `{s}` is invalid")));
            }
        } else {
            validate_dotted(&s, "bus name")?;
        }
        Ok(Self(s))
    }

    pub fn is_unique(&self) -> bool {
        self.0.starts_with(':')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_owned(&self) -> BusName<'static> {
        BusName(Cow::Owned(self.0.clone().into_owned()))
    }
}

impl fmt::Display for BusName<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'n> TryFrom<&'n str> for BusName<'n> {
    type Error = Error;

    fn try_from(s: &'n str) -> Result<Self> {
        BusName::try_from(s)
    }
}

impl TryFrom<String> for BusName<'static> {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        BusName::try_from(s)
    }
}

impl PartialEq<str> for BusName<'_> {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl Type for BusName<'_> {
    fn signature() -> Signature<'static> {
        Signature::from_str_unchecked("s")
    }
}

impl Codec for BusName<'_> {
    fn encode<B: simppl_codec::ByteOrder>(&self, w: &mut simppl_codec::Writer<B>) -> simppl_codec::Result<()> {
        self.0.as_ref().to_owned().encode(w)
    }

    fn decode<B: simppl_codec::ByteOrder>(r: &mut simppl_codec::Reader<'_, B>) -> simppl_codec::Result<Self> {
        let s = String::decode(r)?;
        BusName::try_from(s).map_err(Into::into)
    }
}

/// A validated D-Bus member name (method, signal, or property name): a single identifier segment.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberName<'n>(Cow<'n, str>);

impl<'n> MemberName<'n> {
    pub fn try_from(s: impl Into<Cow<'n, str>>) -> Result<Self> {
        let s = s.into();
        validate_member(&s)?;
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_owned(&self) -> MemberName<'static> {
        MemberName(Cow::Owned(self.0.clone().into_owned()))
    }
}

impl fmt::Display for MemberName<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'n> TryFrom<&'n str> for MemberName<'n> {
    type Error = Error;

    fn try_from(s: &'n str) -> Result<Self> {
        MemberName::try_from(s)
    }
}

impl TryFrom<String> for MemberName<'static> {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        MemberName::try_from(s)
    }
}

impl PartialEq<str> for MemberName<'_> {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl Type for MemberName<'_> {
    fn signature() -> Signature<'static> {
        Signature::from_str_unchecked("s")
    }
}

impl Codec for MemberName<'_> {
    fn encode<B: simppl_codec::ByteOrder>(&self, w: &mut simppl_codec::Writer<B>) -> simppl_codec::Result<()> {
        self.0.as_ref().to_owned().encode(w)
    }

    fn decode<B: simppl_codec::ByteOrder>(r: &mut simppl_codec::Reader<'_, B>) -> simppl_codec::Result<Self> {
        let s = String::decode(r)?;
        MemberName::try_from(s).map_err(Into::into)
    }
}

static_assertions::assert_impl_all!(BusName<'static>: Send, Sync);
static_assertions::assert_impl_all!(InterfaceName<'static>: Send, Sync);
static_assertions::assert_impl_all!(MemberName<'static>: Send, Sync);
static_assertions::assert_impl_all!(ErrorName<'static>: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interface_names() {
        InterfaceName::try_from("org.freedesktop.DBus.Properties").unwrap();
        assert!(InterfaceName::try_from("NoDot").is_err());
        assert!(InterfaceName::try_from("1.leading.digit").is_err());
    }

    #[test]
    fn bus_names() {
        let unique = BusName::try_from(":1.42").unwrap();
        assert!(unique.is_unique());
        let well_known = BusName::try_from("com.example.Foo").unwrap();
        assert!(!well_known.is_unique());
        assert!(BusName::try_from(":").is_err());
        assert!(BusName::try_from("NoDot").is_err());
    }

    #[test]
    fn member_names() {
        MemberName::try_from("Echo").unwrap();
        assert!(MemberName::try_from("has.dot").is_err());
        assert!(MemberName::try_from("").is_err());
    }

    #[test]
    fn error_names() {
        ErrorName::try_from("org.freedesktop.DBus.Error.NoReply").unwrap();
        assert!(ErrorName::try_from("NoDot").is_err());
    }
}
