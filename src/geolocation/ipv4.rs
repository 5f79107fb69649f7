//! Public IPv4 classification
//!
//! Only globally routable unicast addresses are worth geolocating. The
//! reserved blocks below come from the IANA special-purpose registry.

use std::net::Ipv4Addr;

/// (network, prefix length) pairs that are never geolocated
const RESERVED_V4: &[([u8; 4], u8)] = &[
    ([0, 0, 0, 0], 8),       // "this" network
    ([10, 0, 0, 0], 8),      // private
    ([100, 64, 0, 0], 10),   // carrier-grade NAT
    ([127, 0, 0, 0], 8),     // loopback
    ([169, 254, 0, 0], 16),  // link-local
    ([172, 16, 0, 0], 12),   // private
    ([192, 0, 0, 0], 24),    // IETF protocol assignments
    ([192, 0, 2, 0], 24),    // TEST-NET-1
    ([192, 168, 0, 0], 16),  // private
    ([198, 18, 0, 0], 15),   // benchmarking
    ([198, 51, 100, 0], 24), // TEST-NET-2
    ([203, 0, 113, 0], 24),  // TEST-NET-3
    ([224, 0, 0, 0], 4),     // multicast
    ([240, 0, 0, 0], 4),     // reserved, includes broadcast
];

fn in_block(ip: Ipv4Addr, network: [u8; 4], prefix: u8) -> bool {
    let mask = if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    };
    (u32::from(ip) & mask) == (u32::from(Ipv4Addr::from(network)) & mask)
}

pub fn is_public_ipv4(ip: Ipv4Addr) -> bool {
    if ip == Ipv4Addr::BROADCAST {
        return false;
    }
    !RESERVED_V4
        .iter()
        .any(|(network, prefix)| in_block(ip, *network, *prefix))
}

/// Parse `s` and check it is a public IPv4 address
pub fn is_public_ipv4_str(s: &str) -> bool {
    s.trim()
        .parse::<Ipv4Addr>()
        .map(is_public_ipv4)
        .unwrap_or(false)
}
