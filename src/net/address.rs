//! IPv4/IPv6 endpoint representation: a tagged sum type over
//! `std::net::SocketAddrV4`/`SocketAddrV6` rather than a single
//! `std::net::SocketAddr` re-export, keeping `valid()` and the
//! host-order accessors as inherent methods on our own type, the way
//! `queen_io::sys::socket::sockaddr_to_addr` hands back a concrete
//! variant rather than a trait object.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Address {
    V4(SocketAddrV4),
    V6(SocketAddrV6),
}

impl Address {
    pub fn new(ip: Ipv4Addr, port: u16) -> Address {
        Address::V4(SocketAddrV4::new(ip, port))
    }

    pub fn new_v6(ip: Ipv6Addr, port: u16) -> Address {
        Address::V6(SocketAddrV6::new(ip, port, 0, 0))
    }

    pub fn ip_string(&self) -> String {
        match self {
            Address::V4(a) => a.ip().to_string(),
            Address::V6(a) => a.ip().to_string(),
        }
    }

    pub fn port(&self) -> u16 {
        match self {
            Address::V4(a) => a.port(),
            Address::V6(a) => a.port(),
        }
    }

    /// Rejects an all-zero address (`INADDR_ANY`/`::`, meaningful only as
    /// a bind wildcard, never as a valid peer identity) or a zero port.
    pub fn valid(&self) -> bool {
        if self.port() == 0 {
            return false;
        }
        match self {
            Address::V4(a) => !a.ip().is_unspecified(),
            Address::V6(a) => !a.ip().is_unspecified(),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip_string(), self.port())
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Address {
        match addr {
            SocketAddr::V4(a) => Address::V4(a),
            SocketAddr::V6(a) => Address::V6(a),
        }
    }
}

impl From<Address> for SocketAddr {
    fn from(addr: Address) -> SocketAddr {
        match addr {
            Address::V4(a) => SocketAddr::V4(a),
            Address::V6(a) => SocketAddr::V6(a),
        }
    }
}

#[cfg(test)]
mod test {
    use super::Address;
    use std::net::Ipv4Addr;

    #[test]
    fn valid_rejects_zero_port_and_unspecified() {
        assert!(!Address::new(Ipv4Addr::new(0, 0, 0, 0), 8080).valid());
        assert!(!Address::new(Ipv4Addr::new(127, 0, 0, 1), 0).valid());
        assert!(Address::new(Ipv4Addr::new(127, 0, 0, 1), 8080).valid());
    }

    #[test]
    fn display_renders_ip_colon_port() {
        let addr = Address::new(Ipv4Addr::new(192, 168, 1, 1), 9000);
        assert_eq!(addr.to_string(), "192.168.1.1:9000");
    }
}
