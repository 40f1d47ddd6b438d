//! Transparent SNI-routing layer-4 reverse proxy.
//!
//! Accepts TLS connections without terminating them: the initial
//! ClientHello is peeked for its SNI host, a route is selected, the peer
//! is checked against the route's IP ACL, and the connection is spliced
//! to the route's backend, optionally behind a PROXY protocol preamble.
//! A plain-HTTP companion listener redirects to the HTTPS origin.

pub mod config;
pub mod proxy;
pub mod redirect;

pub use config::{Backend, Config, ConfigError, Route, SendProxy};
pub use proxy::{ClientHello, ConnError, PeekError, Proxy, ProxyConfig, RouteError};
