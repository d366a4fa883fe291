//! Resolution of an event source URL into a connect target.

use url::{Host, Url};

use crate::error::{EventSourceError, Result};

/// Host, port and request target extracted from an event source URL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Target {
    host: String,
    port: u16,
    request_target: String,
}

impl Target {
    /// Parse an event source URL.
    ///
    /// Both host and port must be present in the URL; scheme default ports
    /// are not assumed. The request target is `path[?query]`.
    ///
    /// # Errors
    ///
    /// Returns [`EventSourceError::InvalidUrl`] if the URL does not parse or
    /// lacks a host or an explicit port.
    pub fn parse(input: &str) -> Result<Self> {
        let url =
            Url::parse(input).map_err(|e| EventSourceError::invalid_url(format!("{input}: {e}")))?;

        let host = match url.host() {
            Some(Host::Domain(domain)) if !domain.is_empty() => domain.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            _ => return Err(EventSourceError::invalid_url(format!("{url}: missing host"))),
        };

        // `Url::port` hides a port equal to the scheme default, so `:80` on
        // `http` is only visible in the input.
        let port = url
            .port()
            .or_else(|| url.port_or_known_default().filter(|_| has_explicit_port(input)))
            .ok_or_else(|| EventSourceError::invalid_url(format!("{url}: missing port")))?;

        let path = match url.path() {
            "" => "/",
            path => path,
        };
        let request_target = match url.query() {
            Some(query) => format!("{path}?{query}"),
            None => path.to_string(),
        };

        Ok(Self {
            host,
            port,
            request_target,
        })
    }

    /// Host to connect to, without brackets for IPv6.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port to connect to.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// `path[?query]` as sent on the request line.
    pub fn request_target(&self) -> &str {
        &self.request_target
    }
}

/// Whether the authority of `input` carries a `:port` suffix.
fn has_explicit_port(input: &str) -> bool {
    let Some((_, rest)) = input.split_once("://") else {
        return false;
    };
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, hp)| hp);
    let after_host = match host_port.rfind(']') {
        Some(end) => &host_port[end + 1..],
        None => host_port,
    };
    after_host
        .rsplit_once(':')
        .is_some_and(|(_, port)| !port.is_empty())
}
