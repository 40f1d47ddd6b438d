//! The connection pipeline.
//!
//! This module provides:
//! - the accept loop and per-connection supervision
//! - ClientHello peeking for SNI
//! - route selection and per-route IP ACLs
//! - PROXY protocol v1/v2 preambles
//! - bidirectional splicing
//!
//! ```text
//! Client -> Listener -> SNI peek -> Router/ACL -> dial -> Backend
//!                                                  |
//!                             PROXY preamble + ClientHello replay
//! ```

pub mod acl;
mod listener;
mod proxy_protocol;
mod router;
mod sni;
mod splice;

pub use acl::IpAcl;
pub use listener::{
    ConnError, Proxy, ProxyConfig, DEFAULT_MAX_CONNECTIONS, DEFAULT_SETUP_TIMEOUT,
};
pub use proxy_protocol::preamble;
pub use router::{select, ConnectionKind, RouteError, RouteMatch};
pub use sni::{peek_client_hello, ClientHello, PeekError, DEFAULT_PEEK_TIMEOUT, MAX_RECORD_LEN};
pub use splice::{splice, SpliceError, COPY_BUF_LEN};
