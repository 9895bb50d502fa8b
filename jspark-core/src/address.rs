// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! `(host, port)` addresses and their canonical `jspark://host:port` URL form.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{RpcError, RpcResult};

const SCHEME: &str = "jspark://";

/// A remote node's address. Equality and hashing are structural over `(host, port)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RpcAddress {
    pub host: String,
    pub port: u16,
}

impl RpcAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// The distinguished "client-only" sentinel used as the sender address for
    /// environments with no listening server.
    pub fn client_only() -> Self {
        Self::new("", 0)
    }

    pub fn is_client_only(&self) -> bool {
        self.host.is_empty() && self.port == 0
    }

    pub fn to_url(&self) -> String {
        format!("{SCHEME}{}:{}", self.host, self.port)
    }

    /// Parses the canonical `jspark://host:port` form. Rejects a missing host or port.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::InvalidAddress`] if `url` doesn't carry the `jspark://` scheme,
    /// or is missing either the host or the port segment.
    pub fn parse_url(url: &str) -> RpcResult<Self> {
        let rest = url
            .strip_prefix(SCHEME)
            .ok_or_else(|| RpcError::InvalidAddress(url.to_string()))?;

        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| RpcError::InvalidAddress(url.to_string()))?;

        if host.is_empty() || port.is_empty() {
            return Err(RpcError::InvalidAddress(url.to_string()));
        }

        let port: u16 = port
            .parse()
            .map_err(|_| RpcError::InvalidAddress(url.to_string()))?;

        Ok(Self::new(host, port))
    }
}

impl fmt::Display for RpcAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_url())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    use super::*;

    #[test]
    fn round_trips_through_its_own_url_form() {
        let addr = RpcAddress::new("example.com", 4242);
        let url = addr.to_url();
        assert_eq!(RpcAddress::parse_url(&url).unwrap(), addr);
    }

    #[test_case("jspark://host:1234", "host", 1234 ; "plain host")]
    #[test_case("jspark://127.0.0.1:9999", "127.0.0.1", 9999 ; "ip literal")]
    fn parses_valid_urls(url: &str, host: &str, port: u16) {
        let addr = RpcAddress::parse_url(url).unwrap();
        assert_eq!(addr.host, host);
        assert_eq!(addr.port, port);
    }

    #[test_case("host:1234" ; "missing scheme")]
    #[test_case("jspark://:1234" ; "missing host")]
    #[test_case("jspark://host:" ; "missing port")]
    #[test_case("jspark://host" ; "missing colon")]
    #[test_case("jspark://host:notanumber" ; "non numeric port")]
    fn rejects_invalid_urls(url: &str) {
        assert!(matches!(
            RpcAddress::parse_url(url),
            Err(RpcError::InvalidAddress(_))
        ));
    }

    #[test]
    fn client_only_sentinel_round_trips_as_a_marker_not_a_real_address() {
        let sentinel = RpcAddress::client_only();
        assert!(sentinel.is_client_only());
        assert!(!RpcAddress::new("host", 1).is_client_only());
    }
}
