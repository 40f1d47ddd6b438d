//! HAProxy PROXY protocol preamble generation.
//!
//! When a backend is declared with `send-proxy` or `send-proxy-v2`, the
//! original client/listener 4-tuple is written to the backend before any
//! payload.
//!
//! v1 is a single text line:
//! `PROXY TCP4|TCP6 <src_ip> <dst_ip> <src_port> <dst_port>\r\n`
//!
//! v2 is binary:
//! - 12 bytes signature
//! - 1 byte version and command
//! - 1 byte address family and transport protocol
//! - 2 bytes address block length
//! - addresses and ports in network byte order, no TLVs

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::config::SendProxy;

/// PROXY protocol v2 signature (12 bytes).
const PROXY_V2_SIGNATURE: [u8; 12] = [
    0x0D, 0x0A, 0x0D, 0x0A, 0x00, 0x0D, 0x0A, 0x51, 0x55, 0x49, 0x54, 0x0A,
];

/// Version 2 with PROXY command (high nibble = version, low nibble = command).
const VERSION_COMMAND_PROXY: u8 = 0x21;

/// Address family: AF_INET (IPv4).
const AF_INET: u8 = 0x10;

/// Address family: AF_INET6 (IPv6).
const AF_INET6: u8 = 0x20;

/// Transport protocol: STREAM (TCP).
const TRANSPORT_STREAM: u8 = 0x01;

/// Length of the IPv4 address block (4 + 4 + 2 + 2).
const IPV4_ADDR_LEN: u16 = 12;

/// Length of the IPv6 address block (16 + 16 + 2 + 2).
const IPV6_ADDR_LEN: u16 = 36;

/// Build the preamble for a connection from `client` accepted on `local`.
///
/// Returns an empty buffer for [`SendProxy::None`]. The address family is
/// taken from the client address; a local address of the other family is
/// converted, falling back to the unspecified address when it cannot be.
pub fn preamble(variant: SendProxy, client: SocketAddr, local: SocketAddr) -> Vec<u8> {
    match variant {
        SendProxy::None => Vec::new(),
        SendProxy::V1 => encode_v1(client, local),
        SendProxy::V2 => encode_v2(client, local),
    }
}

fn encode_v1(client: SocketAddr, local: SocketAddr) -> Vec<u8> {
    let line = match client.ip() {
        IpAddr::V4(src) => format!(
            "PROXY TCP4 {} {} {} {}\r\n",
            src,
            local_v4(local),
            client.port(),
            local.port()
        ),
        IpAddr::V6(src) => format!(
            "PROXY TCP6 {} {} {} {}\r\n",
            src,
            local_v6(local),
            client.port(),
            local.port()
        ),
    };
    line.into_bytes()
}

fn encode_v2(client: SocketAddr, local: SocketAddr) -> Vec<u8> {
    match client.ip() {
        IpAddr::V4(src) => {
            let dst = local_v4(local);
            let mut buf = Vec::with_capacity(16 + IPV4_ADDR_LEN as usize);
            buf.extend_from_slice(&PROXY_V2_SIGNATURE);
            buf.push(VERSION_COMMAND_PROXY);
            buf.push(AF_INET | TRANSPORT_STREAM);
            buf.extend_from_slice(&IPV4_ADDR_LEN.to_be_bytes());
            buf.extend_from_slice(&src.octets());
            buf.extend_from_slice(&dst.octets());
            buf.extend_from_slice(&client.port().to_be_bytes());
            buf.extend_from_slice(&local.port().to_be_bytes());
            buf
        }
        IpAddr::V6(src) => {
            let dst = local_v6(local);
            let mut buf = Vec::with_capacity(16 + IPV6_ADDR_LEN as usize);
            buf.extend_from_slice(&PROXY_V2_SIGNATURE);
            buf.push(VERSION_COMMAND_PROXY);
            buf.push(AF_INET6 | TRANSPORT_STREAM);
            buf.extend_from_slice(&IPV6_ADDR_LEN.to_be_bytes());
            buf.extend_from_slice(&src.octets());
            buf.extend_from_slice(&dst.octets());
            buf.extend_from_slice(&client.port().to_be_bytes());
            buf.extend_from_slice(&local.port().to_be_bytes());
            buf
        }
    }
}

fn local_v4(local: SocketAddr) -> Ipv4Addr {
    match local.ip().to_canonical() {
        IpAddr::V4(ip) => ip,
        IpAddr::V6(_) => Ipv4Addr::UNSPECIFIED,
    }
}

fn local_v6(local: SocketAddr) -> Ipv6Addr {
    match local.ip() {
        IpAddr::V6(ip) => ip,
        IpAddr::V4(ip) => ip.to_ipv6_mapped(),
    }
}
