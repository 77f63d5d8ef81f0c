//! Source-address filtering shared by agent and collector
//!
//! The agent reports its own address in the `X-Real-IP` header; a collector
//! with a trusted subnet rejects requests whose address falls outside it.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::str::FromStr;

/// Header carrying the agent's address
pub const REAL_IP_HEADER: &str = "X-Real-IP";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid subnet {input:?}: {reason}")]
pub struct SubnetParseError {
    input: String,
    reason: &'static str,
}

/// CIDR block such as `192.168.0.0/24` or `fd00::/8`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrustedSubnet {
    network: IpAddr,
    prefix: u8,
}

impl TrustedSubnet {
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.network, ip.to_canonical()) {
            (IpAddr::V4(network), IpAddr::V4(ip)) => {
                let mask = mask_v4(self.prefix);
                u32::from(network) & mask == u32::from(ip) & mask
            }
            (IpAddr::V6(network), IpAddr::V6(ip)) => {
                let mask = mask_v6(self.prefix);
                u128::from(network) & mask == u128::from(ip) & mask
            }
            _ => false,
        }
    }
}

fn mask_v4(prefix: u8) -> u32 {
    u32::MAX.checked_shl(32 - u32::from(prefix)).unwrap_or(0)
}

fn mask_v6(prefix: u8) -> u128 {
    u128::MAX.checked_shl(128 - u32::from(prefix)).unwrap_or(0)
}

impl FromStr for TrustedSubnet {
    type Err = SubnetParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let error = |reason| SubnetParseError {
            input: s.to_string(),
            reason,
        };

        let (address, prefix) = s.trim().split_once('/').ok_or(error("missing prefix length"))?;
        let network: IpAddr = address.parse().map_err(|_| error("bad address"))?;
        let prefix: u8 = prefix.parse().map_err(|_| error("bad prefix length"))?;

        let max = if network.is_ipv4() { 32 } else { 128 };
        if prefix > max {
            return Err(error("prefix length too large"));
        }

        Ok(Self { network, prefix })
    }
}

impl fmt::Display for TrustedSubnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

/// Local address the OS would use to reach `address` (`host:port`, with or
/// without an `http://` prefix)
///
/// Connecting a UDP socket only selects a route; no packet is sent.
pub fn local_ip_for(address: &str) -> std::io::Result<IpAddr> {
    let target = address
        .trim_start_matches("http://")
        .trim_start_matches("https://")
        .trim_end_matches('/');

    let remote = target.to_socket_addrs()?.next().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{target} did not resolve"),
        )
    })?;

    let unspecified: SocketAddr = match remote {
        SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
    };

    let socket = UdpSocket::bind(unspecified)?;
    socket.connect(remote)?;
    Ok(socket.local_addr()?.ip())
}
