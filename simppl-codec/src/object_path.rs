use std::{borrow::Cow, fmt};

use serde::{Deserialize, Serialize};

use crate::{Error, Result, Signature, Type};

/// A D-Bus object path: a syntactically constrained string (`/`-separated segments of
/// `[A-Za-z0-9_]+`, or the root path `/` alone).
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectPath<'p>(Cow<'p, str>);

impl<'p> ObjectPath<'p> {
    pub fn try_from(path: impl Into<Cow<'p, str>>) -> Result<Self> {
        let path = path.into();
        validate(&path)?;
        Ok(Self(path))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_owned(&self) -> ObjectPath<'static> {
        ObjectPath(Cow::Owned(self.0.clone().into_owned()))
    }
}

impl fmt::Display for ObjectPath<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'p> TryFrom<&'p str> for ObjectPath<'p> {
    type Error = Error;

    fn try_from(s: &'p str) -> Result<Self> {
        ObjectPath::try_from(s)
    }
}

impl TryFrom<String> for ObjectPath<'static> {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        ObjectPath::try_from(s)
    }
}

impl PartialEq<str> for ObjectPath<'_> {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl Type for ObjectPath<'_> {
    fn signature() -> Signature<'static> {
        Signature::from_str_unchecked("o")
    }
}

fn validate(s: &str) -> Result<()> {
    if !s.starts_with('/') {
        return Err(Error::Message(format!("object path `{s}` must start with `/`")));
    }
    if s == "/" {
        return Ok(());
    }
    if s.ends_with('/') {
        return Err(Error::Message(format!(
            "object path `{s}` must not end with `/` (unless it's the root)"
        )));
    }
    for segment in s[1..].split('/') {
        if segment.is_empty()
            || !segment
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_')
        {
            return Err(Error::Message(format!(
                "object path `{s}` has an invalid segment `{segment}`"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_paths() {
        for p in ["/", "/foo", "/foo/bar", "/foo/bar_baz/Qux42"] {
            ObjectPath::try_from(p).unwrap();
        }
    }

    #[test]
    fn invalid_paths() {
        for p in ["", "foo", "/foo/", "/foo//bar", "/foo.bar"] {
            assert!(ObjectPath::try_from(p).is_err(), "{p} should be invalid");
        }
    }
}
