//! Per-route IP access control.
//!
//! A route carries two prefix sets, deny and allow. The most specific
//! prefix containing the peer address decides; when a deny and an allow
//! prefix are equally specific, deny wins. An address matched by no prefix
//! at all is allowed.

use std::net::IpAddr;

use ip_network::IpNetwork;
use ip_network_table::IpNetworkTable;

/// Compiled allow/deny rule for one route.
///
/// Built once at configuration load; lookups are longest-prefix matches
/// over two tables and never allocate.
pub struct IpAcl {
    deny: IpNetworkTable<()>,
    allow: IpNetworkTable<()>,
}

impl IpAcl {
    pub fn new(deny: &[IpNetwork], allow: &[IpNetwork]) -> Self {
        let mut deny_table = IpNetworkTable::new();
        for net in deny {
            deny_table.insert(*net, ());
        }
        let mut allow_table = IpNetworkTable::new();
        for net in allow {
            allow_table.insert(*net, ());
        }
        Self {
            deny: deny_table,
            allow: allow_table,
        }
    }

    /// An ACL with no rules; permits everything.
    pub fn permissive() -> Self {
        Self::new(&[], &[])
    }

    /// Decide whether `ip` may use the route.
    pub fn permits(&self, ip: IpAddr) -> bool {
        let denied = self.deny.longest_match(ip);
        let allowed = self.allow.longest_match(ip);
        match (denied, allowed) {
            (None, _) => true,
            (Some(_), None) => false,
            // Equal specificity means deny wins.
            (Some((deny_net, _)), Some((allow_net, _))) => {
                allow_net.netmask() > deny_net.netmask()
            }
        }
    }
}

impl std::fmt::Debug for IpAcl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("IpAcl")
    }
}
