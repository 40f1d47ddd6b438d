//! Route configuration: data model and loader.
//!
//! A configuration file is a sequence of route blocks. The block name is a
//! comma-separated list of domain patterns; inside the block, `backend`
//! names the address to splice matched connections to, `acme` an alternate
//! backend for ACME challenge traffic, and `deny`/`allow` build the
//! per-route IP ACL:
//!
//! ```text
//! example.com,*.example.com {
//!     backend "127.0.0.1:9000" { send-proxy-v2 }
//!     allow 10.0.0.0/8
//!     deny 10.1.0.0/16
//! }
//! ```
//!
//! The configuration is read once at startup and immutable afterwards.

mod syntax;

use std::io;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use ip_network::IpNetwork;
use regex::{Regex, RegexBuilder};
use thiserror::Error;

use crate::proxy::acl::IpAcl;
pub use syntax::{Directive, SyntaxError};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Syntax(#[from] SyntaxError),

    #[error("line {line}: invalid domain pattern {pattern:?}")]
    InvalidDomain { pattern: String, line: usize },

    #[error("line {line}: could not parse address or prefix {value:?}")]
    InvalidPrefix { value: String, line: usize },

    #[error("line {line}: invalid {directive} directive")]
    BadArity { directive: String, line: usize },

    #[error("route {domains:?} has no backend")]
    MissingBackend { domains: String },
}

/// PROXY protocol variant to prepend on the backend connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SendProxy {
    #[default]
    None,
    V1,
    V2,
}

/// A backend address plus its per-backend options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backend {
    /// `host:port` to dial.
    pub addr: String,
    pub send_proxy: SendProxy,
}

/// One route: domain matchers, a backend, and an IP ACL.
#[derive(Debug)]
pub struct Route {
    /// Anchored, case-insensitive matchers tried against the full SNI host.
    pub domains: Vec<Regex>,
    pub backend: Backend,
    /// Alternate backend for ACME HTTP-01 challenge traffic.
    ///
    /// The TLS listener never classifies a connection as an ACME
    /// challenge, so while this backend is parsed, stored, and selectable
    /// through the router, nothing reaches it unless a separate mechanism
    /// steers plaintext challenges here.
    pub acme: Option<Backend>,
    pub acl: IpAcl,
}

impl Route {
    /// Whether any domain matcher accepts `host`.
    pub fn matches(&self, host: &str) -> bool {
        self.domains.iter().any(|d| d.is_match(host))
    }
}

/// The whole configuration: routes in declaration order.
#[derive(Debug, Default)]
pub struct Config {
    pub routes: Vec<Route>,
}

impl Config {
    /// Read and parse a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    /// Parse configuration source text.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let directives = syntax::parse(text)?;
        let mut routes = Vec::with_capacity(directives.len());
        for directive in &directives {
            routes.push(build_route(directive)?);
        }
        Ok(Self { routes })
    }
}

fn build_route(directive: &Directive) -> Result<Route, ConfigError> {
    let mut domains = Vec::new();
    for pattern in directive.name.split(',') {
        domains.push(domain_matcher(pattern, directive.line)?);
    }

    let mut backend = None;
    let mut acme = None;
    let mut deny: Vec<IpNetwork> = Vec::new();
    let mut allow: Vec<IpNetwork> = Vec::new();

    for child in &directive.children {
        match child.name.as_str() {
            "backend" => backend = Some(build_backend(child)?),
            "acme" => acme = Some(build_backend(child)?),
            "deny" => collect_prefixes(child, &mut deny)?,
            "allow" => collect_prefixes(child, &mut allow)?,
            // Unknown directives are ignored.
            _ => {}
        }
    }

    let backend = backend.ok_or_else(|| ConfigError::MissingBackend {
        domains: directive.name.clone(),
    })?;

    if !allow.is_empty() {
        // An allow list blocks every address it does not cover.
        deny.push(IpNetwork::from_str("0.0.0.0/0").expect("valid prefix"));
        deny.push(IpNetwork::from_str("::/0").expect("valid prefix"));
    }

    Ok(Route {
        domains,
        backend,
        acme,
        acl: IpAcl::new(&deny, &allow),
    })
}

fn build_backend(directive: &Directive) -> Result<Backend, ConfigError> {
    if directive.args.len() != 1 {
        return Err(ConfigError::BadArity {
            directive: directive.name.clone(),
            line: directive.line,
        });
    }

    let mut send_proxy = SendProxy::None;
    for child in &directive.children {
        match child.name.as_str() {
            "send-proxy" | "send-proxy-v2" => {
                if !child.args.is_empty() {
                    return Err(ConfigError::BadArity {
                        directive: child.name.clone(),
                        line: child.line,
                    });
                }
                send_proxy = if child.name == "send-proxy" {
                    SendProxy::V1
                } else {
                    SendProxy::V2
                };
            }
            _ => {}
        }
    }

    Ok(Backend {
        addr: directive.args[0].clone(),
        send_proxy,
    })
}

fn collect_prefixes(
    directive: &Directive,
    prefixes: &mut Vec<IpNetwork>,
) -> Result<(), ConfigError> {
    if directive.args.len() != 1 {
        return Err(ConfigError::BadArity {
            directive: directive.name.clone(),
            line: directive.line,
        });
    }
    for value in directive.args[0].split(',') {
        prefixes.push(parse_prefix(value.trim(), directive.line)?);
    }
    Ok(())
}

/// Parse a CIDR prefix or a bare IP (treated as /32 or /128).
fn parse_prefix(value: &str, line: usize) -> Result<IpNetwork, ConfigError> {
    let invalid = || ConfigError::InvalidPrefix {
        value: value.to_string(),
        line,
    };

    if let Some((addr, prefix)) = value.split_once('/') {
        let addr: IpAddr = addr.parse().map_err(|_| invalid())?;
        let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
        return IpNetwork::new_truncate(addr, prefix).map_err(|_| invalid());
    }

    let addr: IpAddr = value.parse().map_err(|_| invalid())?;
    let prefix = match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    };
    Ok(IpNetwork::new(addr, prefix).expect("host prefix is always valid"))
}

/// Translate a domain glob into an anchored, case-insensitive matcher.
///
/// `*` matches any run of characters (including dots); everything else is
/// literal.
fn domain_matcher(pattern: &str, line: usize) -> Result<Regex, ConfigError> {
    let mut source = String::with_capacity(pattern.len() + 8);
    source.push('^');
    for c in pattern.chars() {
        if c == '*' {
            source.push_str(".*");
        } else {
            source.push_str(&regex::escape(&c.to_string()));
        }
    }
    source.push('$');

    RegexBuilder::new(&source)
        .case_insensitive(true)
        .build()
        .map_err(|_| ConfigError::InvalidDomain {
            pattern: pattern.to_string(),
            line,
        })
}
