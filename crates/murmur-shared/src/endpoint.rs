//! Peer transport addresses.
//!
//! An endpoint looks like `scheme://host[:port][/path][?query][#extra]` with
//! `scheme` one of `local`, `i2p` or `tor`. The first path segment names the
//! account on the receiving ingress, e.g. `i2p://abc.b32.i2p/alice`.
//!
//! The empty string is a valid endpoint meaning "no known address"; such an
//! endpoint is never deliverable.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EndpointError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Local,
    I2p,
    Tor,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Local => "local",
            Scheme::I2p => "i2p",
            Scheme::Tor => "tor",
        }
    }
}

impl FromStr for Scheme {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(Scheme::Local),
            "i2p" => Ok(Scheme::I2p),
            "tor" => Ok(Scheme::Tor),
            other => Err(EndpointError::UnsupportedScheme(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Endpoint {
    raw: String,
    scheme: Option<Scheme>,
    host: String,
    port: Option<u16>,
    path: String,
    query: Option<String>,
    extra: Option<String>,
}

impl Endpoint {
    /// The "no address" endpoint.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn parse(input: &str) -> Result<Self, EndpointError> {
        let raw = input.trim();
        if raw.is_empty() {
            return Ok(Self::none());
        }

        let (scheme, rest) = raw
            .split_once("://")
            .ok_or_else(|| EndpointError::MissingScheme(raw.to_string()))?;
        if scheme.is_empty() {
            return Err(EndpointError::MissingScheme(raw.to_string()));
        }
        let scheme: Scheme = scheme.parse()?;

        let (rest, extra) = match rest.split_once('#') {
            Some((head, frag)) => (head, Some(frag.to_string())),
            None => (rest, None),
        };
        let (rest, query) = match rest.split_once('?') {
            Some((head, q)) => (head, Some(q.to_string())),
            None => (rest, None),
        };
        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], rest[idx..].to_string()),
            None => (rest, String::new()),
        };
        let (host, port) = match authority.rsplit_once(':') {
            Some((h, p)) if !p.is_empty() => {
                let port = p
                    .parse::<u16>()
                    .map_err(|_| EndpointError::InvalidPort(p.to_string()))?;
                (h.to_string(), Some(port))
            }
            Some((h, _)) => (h.to_string(), None),
            None => (authority.to_string(), None),
        };

        Ok(Self {
            raw: raw.to_string(),
            scheme: Some(scheme),
            host,
            port,
            path,
            query,
            extra,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn scheme(&self) -> Option<Scheme> {
        self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// The fragment ("hash part") of the endpoint.
    pub fn extra(&self) -> Option<&str> {
        self.extra.as_deref()
    }

    /// First non-empty path segment: the receiving account.
    pub fn account(&self) -> Option<&str> {
        self.path.split('/').find(|segment| !segment.is_empty())
    }

    fn authority(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{}", self.host, port),
            None => self.host.clone(),
        }
    }

    /// Plain HTTP URL the transport should hit, or `None` when the endpoint
    /// cannot be routed (no host, or no account segment for the ingress).
    pub fn http_url(&self) -> Option<String> {
        if self.host.is_empty() || self.account().is_none() {
            return None;
        }
        let mut url = format!("http://{}{}", self.authority(), self.path);
        if let Some(query) = &self.query {
            url.push('?');
            url.push_str(query);
        }
        Some(url)
    }

    pub fn is_deliverable(&self) -> bool {
        self.http_url().is_some()
    }

    /// Resolve a locator relative to this endpoint's account, e.g.
    /// `i2p://host/alice` + `files/x/y` => `i2p://host/alice/files/x/y`.
    pub fn join(&self, locator: &str) -> Option<Endpoint> {
        let scheme = self.scheme?;
        let account = self.account()?;
        if self.host.is_empty() {
            return None;
        }
        let joined = format!(
            "{}://{}/{}/{}",
            scheme.as_str(),
            self.authority(),
            account,
            locator.trim_start_matches('/')
        );
        Endpoint::parse(&joined).ok()
    }
}

impl FromStr for Endpoint {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Endpoint::parse(s)
    }
}

impl TryFrom<String> for Endpoint {
    type Error = EndpointError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Endpoint::parse(&value)
    }
}

impl From<Endpoint> for String {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.raw
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}
