//! Route selection.
//!
//! Routes are scanned in declaration order; the first route whose domain
//! set matches the SNI host wins. The chosen route's ACL then decides
//! whether the peer may proceed; a denied peer is refused outright, it
//! never falls through to a later route.

use std::net::IpAddr;

use thiserror::Error;
use tracing::debug;

use crate::config::{Backend, Config, Route};

/// What kind of traffic the connection carries, for backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    /// Ordinary TLS traffic.
    Tls,
    /// A plaintext ACME HTTP-01 challenge. The TLS listener never
    /// produces this; see [`Route::acme`].
    AcmeChallenge,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("no route for host {host:?}")]
    NoRoute { host: String },

    #[error("{peer} denied for host {host:?}")]
    Forbidden { host: String, peer: IpAddr },
}

/// A matched route and the backend the connection should go to.
#[derive(Debug, Clone, Copy)]
pub struct RouteMatch<'a> {
    pub route: &'a Route,
    pub backend: &'a Backend,
}

/// Select the route and effective backend for an SNI host and peer.
pub fn select<'a>(
    config: &'a Config,
    host: &str,
    peer: IpAddr,
    kind: ConnectionKind,
) -> Result<RouteMatch<'a>, RouteError> {
    for route in &config.routes {
        if !route.matches(host) {
            continue;
        }

        if !route.acl.permits(peer) {
            return Err(RouteError::Forbidden {
                host: host.to_string(),
                peer,
            });
        }

        let backend = match kind {
            ConnectionKind::AcmeChallenge => route.acme.as_ref().unwrap_or(&route.backend),
            ConnectionKind::Tls => &route.backend,
        };
        debug!(host, backend = %backend.addr, "route matched");
        return Ok(RouteMatch { route, backend });
    }

    Err(RouteError::NoRoute {
        host: host.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(text: &str) -> Config {
        Config::parse(text).unwrap()
    }

    fn peer() -> IpAddr {
        "192.0.2.7".parse().unwrap()
    }

    #[test]
    fn first_matching_route_wins() {
        let config = config(
            "*.example.com { backend first:1 }\n a.example.com { backend second:2 }",
        );
        let matched = select(&config, "a.example.com", peer(), ConnectionKind::Tls).unwrap();
        assert_eq!(matched.backend.addr, "first:1");
    }

    #[test]
    fn later_route_matches_when_earlier_does_not() {
        let config = config(
            "b.example.com { backend first:1 }\n a.example.com { backend second:2 }",
        );
        let matched = select(&config, "a.example.com", peer(), ConnectionKind::Tls).unwrap();
        assert_eq!(matched.backend.addr, "second:2");
    }

    #[test]
    fn unmatched_host_is_no_route() {
        let config = config("example.com { backend x:1 }");
        let err = select(&config, "other.com", peer(), ConnectionKind::Tls).unwrap_err();
        assert_eq!(
            err,
            RouteError::NoRoute {
                host: "other.com".to_string()
            }
        );
    }

    #[test]
    fn denied_peer_is_forbidden() {
        let config = config("example.com { backend x:1\n deny 192.0.2.0/24 }");
        let err = select(&config, "example.com", peer(), ConnectionKind::Tls).unwrap_err();
        assert!(matches!(err, RouteError::Forbidden { .. }));
    }

    #[test]
    fn denied_peer_does_not_fall_through_to_later_routes() {
        // The second route would accept the peer, but the first match is
        // authoritative.
        let config = config(
            "example.com { backend x:1\n deny 192.0.2.0/24 }\n example.com { backend y:2 }",
        );
        let err = select(&config, "example.com", peer(), ConnectionKind::Tls).unwrap_err();
        assert!(matches!(err, RouteError::Forbidden { .. }));
    }

    #[test]
    fn acme_traffic_prefers_the_acme_backend() {
        let config = config("example.com { backend x:1\n acme y:2 }");
        let matched =
            select(&config, "example.com", peer(), ConnectionKind::AcmeChallenge).unwrap();
        assert_eq!(matched.backend.addr, "y:2");

        let matched = select(&config, "example.com", peer(), ConnectionKind::Tls).unwrap();
        assert_eq!(matched.backend.addr, "x:1");
    }

    #[test]
    fn acme_traffic_without_acme_backend_uses_the_default() {
        let config = config("example.com { backend x:1 }");
        let matched =
            select(&config, "example.com", peer(), ConnectionKind::AcmeChallenge).unwrap();
        assert_eq!(matched.backend.addr, "x:1");
    }
}
