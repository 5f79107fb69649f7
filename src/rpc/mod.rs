//! Pod RPC protocol: envelope client and typed method results

pub mod client;
pub mod types;

pub use client::{host_of, rpc_endpoint, RpcClient};
pub use types::{PodInfo, PodList, PodStats, PodVersion, UNAVAILABLE_PUBKEY};

/// Fixed RPC port every pod listens on
pub const DEFAULT_RPC_PORT: u16 = 6000;

/// Where a pod's RPC interface lives, given only its advertised address
///
/// Pods advertise a gossip address (`ip:port`) whose port is unrelated to
/// RPC, so the port is stripped and replaced with the fixed RPC port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcTarget {
    pub scheme: String,
    pub port: u16,
}

impl Default for RpcTarget {
    fn default() -> Self {
        Self {
            scheme: "http".to_string(),
            port: DEFAULT_RPC_PORT,
        }
    }
}

impl RpcTarget {
    pub fn endpoint_for(&self, address: &str) -> String {
        rpc_endpoint(&self.scheme, host_of(address), self.port)
    }
}
