//! snirelay
//!
//! SNI-routing L4 reverse proxy with TLS passthrough.
//!
//! This binary:
//! - loads the route configuration once at startup
//! - accepts TLS connections and routes them on the ClientHello SNI
//! - enforces per-route IP ACLs
//! - splices permitted connections to their backends, optionally behind a
//!   PROXY protocol preamble
//! - redirects plain HTTP on port 80 to the HTTPS origin

use std::net::{IpAddr, Ipv6Addr, SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use snirelay::config::Config;
use snirelay::proxy::{Proxy, ProxyConfig};
use snirelay::redirect;

/// Port of the plain-HTTP redirect listener.
const REDIRECT_PORT: u16 = 80;

#[derive(Debug, Parser)]
#[command(name = "snirelay", version, about = "SNI-routing TCP reverse proxy")]
struct Args {
    /// Configuration file.
    #[arg(long, value_name = "PATH")]
    conf: PathBuf,

    /// Address and port to bind to.
    #[arg(long, value_name = "ADDR", default_value = ":443")]
    bind: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load(&args.conf)
        .with_context(|| format!("could not load config {:?}", args.conf))?;
    let bind_addr = parse_bind_addr(&args.bind)
        .with_context(|| format!("invalid bind address {:?}", args.bind))?;
    info!(%bind_addr, routes = config.routes.len(), "configuration loaded");

    let proxy = Proxy::bind(ProxyConfig::new(bind_addr), Arc::new(config))
        .await
        .with_context(|| format!("could not bind {bind_addr}"))?;

    let redirect_listener = tokio::net::TcpListener::bind(SocketAddr::new(
        IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        REDIRECT_PORT,
    ))
    .await
    .with_context(|| format!("could not bind redirect listener on :{REDIRECT_PORT}"))?;

    tokio::try_join!(
        Arc::new(proxy).run(),
        redirect::serve(redirect_listener, bind_addr.port()),
    )?;

    Ok(())
}

/// Parse a bind address, accepting `:port` for all interfaces, a literal
/// socket address, or a resolvable `host:port`.
fn parse_bind_addr(s: &str) -> Result<SocketAddr> {
    if let Some(port) = s.strip_prefix(':') {
        let port: u16 = port.parse().context("invalid port")?;
        return Ok(SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port));
    }
    if let Ok(addr) = s.parse::<SocketAddr>() {
        return Ok(addr);
    }
    s.to_socket_addrs()
        .context("could not resolve")?
        .next()
        .ok_or_else(|| anyhow!("no address for {s:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_port_binds_all_interfaces() {
        assert_eq!(
            parse_bind_addr(":443").unwrap(),
            "[::]:443".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn literal_addresses_pass_through() {
        assert_eq!(
            parse_bind_addr("127.0.0.1:8443").unwrap(),
            "127.0.0.1:8443".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            parse_bind_addr("[::1]:8443").unwrap(),
            "[::1]:8443".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(parse_bind_addr(":not-a-port").is_err());
        assert!(parse_bind_addr("").is_err());
    }
}
