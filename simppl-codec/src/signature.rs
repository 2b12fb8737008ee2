use std::{borrow::Cow, fmt};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A validated D-Bus type-signature string.
///
/// Every type the codec knows how to encode has a unique canonical signature, generated at
/// compile time by [`crate::Type::signature`]; this wrapper is what both the compile-time
/// generator and the runtime decoder (which checks an incoming signature against what it
/// expected) exchange.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signature<'s>(Cow<'s, str>);

impl<'s> Signature<'s> {
    /// Validate and wrap `sig`.
    pub fn new(sig: impl Into<Cow<'s, str>>) -> Result<Self> {
        let sig = sig.into();
        validate(&sig)?;
        Ok(Self(sig))
    }

    /// Build a `Signature` without validating it.
    ///
    /// Used internally when the signature is known-good by construction (e.g. concatenated from
    /// already-validated sub-signatures).
    pub fn from_str_unchecked(sig: &'s str) -> Self {
        Self(Cow::Borrowed(sig))
    }

    pub fn from_string_unchecked(sig: String) -> Self {
        Self(Cow::Owned(sig))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_owned(&self) -> Signature<'static> {
        Signature(Cow::Owned(self.0.clone().into_owned()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over the top-level complete types in this signature.
    ///
    /// A struct signature `"(ii)"` has a single top-level type (the whole struct); a message
    /// body signature like `"si"` has two: `"s"` and `"i"`.
    pub fn iter(&self) -> SignatureIter<'_> {
        SignatureIter { rest: &self.0 }
    }

    /// Does this top-level signature describe exactly one complete type?
    pub fn is_single_complete_type(&self) -> bool {
        self.iter().count() == 1
    }

    /// A message body's signature as it appears on the wire: the flat concatenation of its
    /// arguments' signatures, not a single STRUCT wrapping them.
    ///
    /// `Type::signature()` of a Rust tuple always wraps its fields in `(...)`, since a tuple is
    /// also how the codec represents a genuine nested STRUCT value. A method call/return body
    /// built from such a tuple needs the outer pair of parens stripped once to match the real
    /// D-Bus wire convention (arguments are concatenated, not boxed in a struct); the wire bytes
    /// are unaffected either way, since a struct's own alignment requirement is trivially met at
    /// the body's starting offset.
    pub fn as_body(&self) -> Signature<'static> {
        let s = self.0.as_ref();
        if s.len() >= 2 && s.as_bytes()[0] == b'(' && s.as_bytes()[s.len() - 1] == b')' {
            Signature::from_string_unchecked(s[1..s.len() - 1].to_owned())
        } else {
            self.to_owned()
        }
    }
}

impl crate::Type for Signature<'_> {
    fn signature() -> Signature<'static> {
        Signature::from_str_unchecked("g")
    }
}

impl fmt::Display for Signature<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'s> TryFrom<&'s str> for Signature<'s> {
    type Error = Error;

    fn try_from(s: &'s str) -> Result<Self> {
        Signature::new(s)
    }
}

impl TryFrom<String> for Signature<'static> {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Signature::new(s)
    }
}

impl PartialEq<str> for Signature<'_> {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

/// Iterator over the top-level complete types of a [`Signature`].
pub struct SignatureIter<'s> {
    rest: &'s str,
}

impl<'s> Iterator for SignatureIter<'s> {
    type Item = &'s str;

    fn next(&mut self) -> Option<&'s str> {
        if self.rest.is_empty() {
            return None;
        }
        let len = complete_type_len(self.rest.as_bytes(), false).expect("pre-validated signature");
        let (head, tail) = self.rest.split_at(len);
        self.rest = tail;
        Some(head)
    }
}

/// Length, in bytes, of the single complete type starting at the front of `bytes`.
///
/// `in_array` is true only when parsing the element type directly after an `a`; a dict-entry
/// (`{kv}`) is only legal grammar in that position, never as a bare top-level type.
fn complete_type_len(bytes: &[u8], in_array: bool) -> Result<usize> {
    let mut i = 0;
    let b = *bytes.first().ok_or(Error::InsufficientData)?;
    match b {
        b'y' | b'b' | b'n' | b'q' | b'i' | b'u' | b'x' | b't' | b'd' | b's' | b'o' | b'g'
        | b'v' => i += 1,
        b'a' => {
            i += 1;
            let elem_len = complete_type_len(&bytes[i..], true)?;
            i += elem_len;
        }
        b'(' => {
            i += 1;
            loop {
                match bytes.get(i) {
                    Some(b')') => {
                        i += 1;
                        break;
                    }
                    Some(_) => i += complete_type_len(&bytes[i..], false)?,
                    None => return Err(Error::InvalidSignature("unterminated struct".into())),
                }
            }
        }
        b'{' if in_array => {
            i += 1;
            // key: must be a single basic type.
            let key_len = complete_type_len(&bytes[i..], false)?;
            if key_len != 1 || !is_basic(bytes[i]) {
                return Err(Error::InvalidSignature("dict key must be basic".into()));
            }
            i += key_len;
            let val_len = complete_type_len(&bytes[i..], false)?;
            i += val_len;
            match bytes.get(i) {
                Some(b'}') => i += 1,
                _ => return Err(Error::InvalidSignature("unterminated dict entry".into())),
            }
        }
        other => {
            return Err(Error::InvalidSignature(format!(
                "unknown type code `{}`",
                other as char
            )))
        }
    }
    Ok(i)
}

fn is_basic(code: u8) -> bool {
    matches!(
        code,
        b'y' | b'b' | b'n' | b'q' | b'i' | b'u' | b'x' | b't' | b'd' | b's' | b'o' | b'g'
    )
}

fn validate(s: &str) -> Result<()> {
    if !s.is_ascii() {
        return Err(Error::InvalidSignature(s.to_owned()));
    }
    let bytes = s.as_bytes();
    let mut pos = 0;
    while pos < bytes.len() {
        pos += complete_type_len(&bytes[pos..], false)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_signatures() {
        for sig in ["", "i", "ai", "(ii)", "a{si}", "a(sv)", "a{s(ii)}", "v"] {
            Signature::new(sig).unwrap_or_else(|e| panic!("{sig} should be valid: {e}"));
        }
    }

    #[test]
    fn invalid_signatures() {
        for sig in ["(", ")", "{sv", "a", "z", "{ii}"] {
            assert!(Signature::new(sig).is_err(), "{sig} should be invalid");
        }
    }

    #[test]
    fn iter_splits_top_level_types() {
        let sig = Signature::new("sia{si}").unwrap();
        let parts: Vec<_> = sig.iter().collect();
        assert_eq!(parts, vec!["s", "i", "a{si}"]);
    }

    #[test]
    fn empty_array_and_dict_signatures_round_trip() {
        let sig = Signature::new("a{si}").unwrap();
        assert!(sig.is_single_complete_type());
    }

    #[test]
    fn as_body_strips_one_outer_struct_layer() {
        let sig = Signature::new("(su)").unwrap();
        assert_eq!(sig.as_body().as_str(), "su");
    }

    #[test]
    fn as_body_is_noop_for_flat_or_single_arg_signatures() {
        assert_eq!(Signature::new("s").unwrap().as_body().as_str(), "s");
        assert_eq!(Signature::new("").unwrap().as_body().as_str(), "");
        assert_eq!(
            Signature::new("a(si)").unwrap().as_body().as_str(),
            "a(si)"
        );
    }
}
