//! Remote service endpoints and the candidate pool used for failover.

use std::fmt::{self, Display};
use std::str::FromStr;

use rand::Rng;
use rand::seq::SliceRandom;

use crate::error::{RemoteError, Result};

/// A `host:port` pair a client can be bound to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Endpoint {
    type Err = RemoteError;

    /// Parse `host:port`, accepting `[v6addr]:port` for IPv6 literals.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (host, port) = s.rsplit_once(':').ok_or_else(|| {
            RemoteError::Configuration(format!("endpoint '{}' is not in host:port form", s))
        })?;

        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() {
            return Err(RemoteError::Configuration(format!(
                "endpoint '{}' has an empty host",
                s
            )));
        }

        let port = port.parse::<u16>().map_err(|_| {
            RemoteError::Configuration(format!("endpoint '{}' has an invalid port", s))
        })?;

        Ok(Self::new(host, port))
    }
}

/// Static list of candidate endpoints, read-only once loaded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointPool {
    endpoints: Vec<Endpoint>,
}

impl EndpointPool {
    pub fn new(endpoints: Vec<Endpoint>) -> Self {
        Self { endpoints }
    }

    /// Parse a configured list of `host:port` strings, keeping their order.
    pub fn parse<I, S>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let endpoints = entries
            .into_iter()
            .map(|e| e.as_ref().parse::<Endpoint>())
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { endpoints })
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Candidate order for one wrapper instance, randomized with `rng`.
    pub fn shuffled_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<Endpoint> {
        let mut order = self.endpoints.clone();
        order.shuffle(rng);
        order
    }

    /// Candidate order for one wrapper instance, randomized with the thread RNG.
    pub fn shuffled(&self) -> Vec<Endpoint> {
        self.shuffled_with(&mut rand::rng())
    }
}
