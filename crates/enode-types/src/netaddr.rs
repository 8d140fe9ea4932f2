//! Network addresses of enodes.
//!
//! Only IPv4 participates in the election path; everything else is
//! rejected at validation time rather than carried around as an enum.

use crate::TypeError;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddrV4};

/// An enode's advertised endpoint.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NetAddr {
    /// IPv4 address.
    pub ip: Ipv4Addr,
    /// TCP port.
    pub port: u16,
}

impl NetAddr {
    /// Create from parts.
    pub fn new(ip: Ipv4Addr, port: u16) -> Self {
        Self { ip, port }
    }

    /// Parse `ip:port`.
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        let sock: SocketAddrV4 = s
            .parse()
            .map_err(|_| TypeError::InvalidAddress(format!("not an ipv4 endpoint: {s}")))?;
        Ok(Self::new(*sock.ip(), sock.port()))
    }

    /// RFC1918 private-range test.
    pub fn is_rfc1918(&self) -> bool {
        self.ip.is_private()
    }

    /// Loopback test.
    pub fn is_local(&self) -> bool {
        self.ip.is_loopback()
    }

    /// Routable on the public internet.
    pub fn is_routable(&self) -> bool {
        !self.ip.is_unspecified()
            && !self.ip.is_loopback()
            && !self.ip.is_private()
            && !self.ip.is_link_local()
            && !self.ip.is_broadcast()
            && !self.ip.is_documentation()
    }

    /// 16-byte v4-mapped form used by the wire codec.
    pub fn to_mapped_bytes(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[10] = 0xff;
        out[11] = 0xff;
        out[12..16].copy_from_slice(&self.ip.octets());
        out
    }

    /// Parse the 16-byte v4-mapped form.
    pub fn from_mapped_bytes(bytes: &[u8; 16], port: u16) -> Result<Self, TypeError> {
        if bytes[..10] != [0u8; 10] || bytes[10] != 0xff || bytes[11] != 0xff {
            return Err(TypeError::InvalidAddress("not a v4-mapped address".into()));
        }
        Ok(Self::new(
            Ipv4Addr::new(bytes[12], bytes[13], bytes[14], bytes[15]),
            port,
        ))
    }
}

impl Default for NetAddr {
    fn default() -> Self {
        Self::new(Ipv4Addr::UNSPECIFIED, 0)
    }
}

impl std::fmt::Display for NetAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

impl std::fmt::Debug for NetAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NetAddr({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display() {
        let addr = NetAddr::parse("203.0.114.7:18384").unwrap();
        assert_eq!(addr.to_string(), "203.0.114.7:18384");
        assert!(NetAddr::parse("::1:8384").is_err());
    }

    #[test]
    fn routability() {
        assert!(NetAddr::parse("8.8.8.8:1").unwrap().is_routable());
        assert!(!NetAddr::parse("10.0.0.1:1").unwrap().is_routable());
        assert!(!NetAddr::parse("127.0.0.1:1").unwrap().is_routable());
        assert!(NetAddr::parse("192.168.1.4:1").unwrap().is_rfc1918());
    }

    #[test]
    fn mapped_bytes_roundtrip() {
        let addr = NetAddr::parse("1.2.3.4:5678").unwrap();
        let mapped = addr.to_mapped_bytes();
        assert_eq!(NetAddr::from_mapped_bytes(&mapped, 5678).unwrap(), addr);
    }
}
