use crate::{Error, Result};
use std::collections::HashMap;

/// A `tcp:` D-Bus address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tcp {
    pub(super) host: String,
    pub(super) port: u16,
}

impl Tcp {
    /// Create a new TCP transport address.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub(super) fn from_options(opts: HashMap<&str, &str>) -> Result<Self> {
        let host = opts
            .get("host")
            .ok_or_else(|| Error::Address("tcp: address is missing host=".into()))?;
        let port = opts
            .get("port")
            .ok_or_else(|| Error::Address("tcp: address is missing port=".into()))?;
        let port = port
            .parse::<u16>()
            .map_err(|e| Error::Address(format!("failed to parse tcp port `{port}`: {e}")))?;

        Ok(Self {
            host: (*host).to_owned(),
            port,
        })
    }
}
