//! Host-side network utilities.

use log::debug;
use std::net::IpAddr;

/// Shown when the host has no usable IPv4 address.
pub const UNKNOWN_ADDRESS: &str = "?";

/// First non-loopback IPv4 address of this host, or `"?"` if there is none.
///
/// Only used to tell the user where to point the upload client.
#[must_use]
pub fn local_ipv4_address() -> String {
    match if_addrs::get_if_addrs() {
        Ok(interfaces) => interfaces
            .iter()
            .filter(|iface| !iface.is_loopback())
            .find_map(|iface| match iface.ip() {
                IpAddr::V4(addr) => Some(addr.to_string()),
                IpAddr::V6(_) => None,
            })
            .unwrap_or_else(|| UNKNOWN_ADDRESS.to_string()),
        Err(e) => {
            debug!("Failed to list network interfaces: {e}");
            UNKNOWN_ADDRESS.to_string()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_local_address_is_ipv4_or_unknown() {
        let addr = local_ipv4_address();
        if addr != UNKNOWN_ADDRESS {
            let parsed: Ipv4Addr = addr.parse().unwrap();
            assert!(!parsed.is_loopback());
        }
    }
}
