use crate::error::ProbeError;
use std::net::{IpAddr, Ipv4Addr};

/// Resolves a host name (or parses a dotted address) to the first IPv4
/// address it maps to.
pub fn lookup_host_v4(host: &str) -> Result<Ipv4Addr, ProbeError> {
    if let Ok(address) = host.parse::<Ipv4Addr>() {
        return Ok(address);
    }
    let addresses = dns_lookup::lookup_host(host).map_err(|_| ProbeError::Resolve {
        host: host.to_string(),
    })?;
    addresses
        .into_iter()
        .find_map(|address| match address {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        })
        .ok_or_else(|| ProbeError::Resolve {
            host: host.to_string(),
        })
}

/// Reverse-resolves an address for display, falling back to the dotted
/// form when there is no name for it.
#[must_use]
pub fn display_address(address: Ipv4Addr) -> String {
    dns_lookup::lookup_addr(&IpAddr::V4(address)).unwrap_or_else(|_| address.to_string())
}
