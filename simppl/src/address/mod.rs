//! D-Bus server address parsing and session/system bus discovery: the dispatcher constructor
//! accepts `bus:session`, `bus:system`, or a raw address string.
//!
//! Each transport kind keeps its own option-parsing logic in its own module; this module adds
//! the top-level `Address` type that splits a full address string
//! (`transport:key=value,key=value;transport:...`) into one or more `Transport`s, plus the two
//! well-known discovery entry points.

use std::{collections::HashMap, env};

use crate::{Error, Result};

mod process;
pub mod transport;

pub use transport::{autolaunch::Autolaunch, launchd::Launchd, tcp::Tcp, unix::Unix, vsock::Vsock};

/// One transport alternative parsed out of a D-Bus address string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transport<'t> {
    Unix(Unix<'t>),
    Tcp(Tcp),
    Autolaunch(Autolaunch),
    Launchd(Launchd<'t>),
    Vsock(Vsock),
}

/// A parsed D-Bus server address: an ordered list of transport alternatives, tried in turn
/// (mirrors the real protocol's `;`-separated address list, used for failover).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Address<'a> {
    transports: Vec<Transport<'a>>,
}

impl<'a> Address<'a> {
    /// Parse a raw D-Bus address string, e.g. `"unix:path=/run/dbus/system_bus_socket"`.
    pub fn parse(s: &'a str) -> Result<Self> {
        let transports = s
            .split(';')
            .filter(|s| !s.is_empty())
            .map(parse_one_transport)
            .collect::<Result<Vec<_>>>()?;
        if transports.is_empty() {
            return Err(Error::Address("empty D-Bus address".to_owned()));
        }
        Ok(Self { transports })
    }

    pub fn transports(&self) -> &[Transport<'a>] {
        &self.transports
    }

    /// Resolve `"bus:session"` via `DBUS_SESSION_BUS_ADDRESS`, falling back to the XDG runtime
    /// directory default.
    pub fn session() -> Result<Address<'static>> {
        if let Ok(addr) = env::var("DBUS_SESSION_BUS_ADDRESS") {
            return Address::parse_owned(addr);
        }
        let runtime_dir = xdg_home::home_dir()
            .map(|h| h.join(".dbus").join("session-bus"))
            .ok_or_else(|| Error::Address("could not determine home directory".to_owned()))?;
        Ok(Address {
            transports: vec![Transport::Unix(Unix::new(transport::unix::UnixPath::Dir(
                runtime_dir.into_os_string().into(),
            )))],
        })
    }

    /// Resolve `"bus:system"` via `DBUS_SYSTEM_BUS_ADDRESS`, falling back to the well-known
    /// system bus socket path.
    pub fn system() -> Result<Address<'static>> {
        if let Ok(addr) = env::var("DBUS_SYSTEM_BUS_ADDRESS") {
            return Address::parse_owned(addr);
        }
        Ok(Address {
            transports: vec![Transport::Unix(Unix::new(transport::unix::UnixPath::File(
                "/var/run/dbus/system_bus_socket".into(),
            )))],
        })
    }

    /// Bus discovery runs once per dispatcher construction, not per call, so leaking the env
    /// var string to get a `'static` parse is cheap enough to avoid threading an owned-`Cow`
    /// variant of every transport option parser just for this one path.
    fn parse_owned(s: String) -> Result<Address<'static>> {
        let parsed = Address::parse(Box::leak(s.into_boxed_str()))?;
        Ok(Address {
            transports: parsed.transports,
        })
    }
}

fn parse_one_transport(s: &str) -> Result<Transport<'_>> {
    let (kind, rest) = s
        .split_once(':')
        .ok_or_else(|| Error::Address(format!("address `{s}` is missing a `:`")))?;
    let opts = parse_options(rest)?;
    match kind {
        "unix" => Ok(Transport::Unix(Unix::from_options(opts)?)),
        "tcp" => Ok(Transport::Tcp(Tcp::from_options(opts)?)),
        "autolaunch" => Ok(Transport::Autolaunch(Autolaunch::from_options(opts)?)),
        "launchd" => Ok(Transport::Launchd(Launchd::from_options(opts)?)),
        "vsock" => Ok(Transport::Vsock(Vsock::from_options(opts)?)),
        other => Err(Error::Address(format!("unsupported transport `{other}`"))),
    }
}

fn parse_options(s: &str) -> Result<HashMap<&str, &str>> {
    s.split(',')
        .filter(|s| !s.is_empty())
        .map(|kv| {
            kv.split_once('=')
                .ok_or_else(|| Error::Address(format!("malformed address key/value `{kv}`")))
        })
        .collect()
}

/// Percent-decode a D-Bus address value (the grammar allows `%XX` escapes for bytes that
/// wouldn't otherwise be legal in an address).
pub(crate) fn decode_percents(s: &str) -> Result<Vec<u8>> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes
                .get(i + 1..i + 3)
                .ok_or_else(|| Error::Address(format!("truncated percent escape in `{s}`")))?;
            let hex = std::str::from_utf8(hex)
                .map_err(|_| Error::Address(format!("invalid percent escape in `{s}`")))?;
            let byte = u8::from_str_radix(hex, 16)
                .map_err(|_| Error::Address(format!("invalid percent escape in `{s}`")))?;
            out.push(byte);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_unix_path_address() {
        let addr = Address::parse("unix:path=/tmp/bus-socket").unwrap();
        assert_eq!(addr.transports().len(), 1);
        assert!(matches!(addr.transports()[0], Transport::Unix(_)));
    }

    #[test]
    fn parses_tcp_address() {
        let addr = Address::parse("tcp:host=127.0.0.1,port=1234").unwrap();
        match &addr.transports()[0] {
            Transport::Tcp(tcp) => {
                assert_eq!(tcp.host(), "127.0.0.1");
                assert_eq!(tcp.port(), 1234);
            }
            _ => panic!("expected tcp transport"),
        }
    }

    #[test]
    fn rejects_missing_colon() {
        assert!(Address::parse("not-an-address").is_err());
    }

    #[test]
    fn percent_decoding() {
        assert_eq!(decode_percents("ab%20cd").unwrap(), b"ab cd".to_vec());
    }
}
