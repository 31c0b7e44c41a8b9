// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Immutable peer-endpoint identity.
//!
//! Grounded on `examples/original_source/gw/wap_addr.c`: a plain
//! four-field value compared structurally, duplicated freely instead of
//! reference counted.

use std::{fmt, net::IpAddr};

/// `(remote_addr, remote_port, local_addr, local_port)`. Two tuples are
/// equal iff all four fields match; this is the sole identity used to
/// key WTP machines, the TID cache and WSP sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddrTuple {
    pub remote_addr: IpAddr,
    pub remote_port: u16,
    pub local_addr: IpAddr,
    pub local_port: u16,
}

impl AddrTuple {
    pub const fn new(
        remote_addr: IpAddr,
        remote_port: u16,
        local_addr: IpAddr,
        local_port: u16,
    ) -> Self {
        Self {
            remote_addr,
            remote_port,
            local_addr,
            local_port,
        }
    }

    /// The tuple as seen from the peer's side: remote/local swapped.
    /// Used when the dispatcher needs to address a reply datagram back
    /// through the bearerbox.
    pub const fn reversed(&self) -> Self {
        Self {
            remote_addr: self.local_addr,
            remote_port: self.local_port,
            local_addr: self.remote_addr,
            local_port: self.remote_port,
        }
    }
}

impl fmt::Display for AddrTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}<-{}:{}",
            self.local_addr, self.local_port, self.remote_addr, self.remote_port
        )
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    fn sample() -> AddrTuple {
        AddrTuple::new(
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            9201,
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
            9200,
        )
    }

    #[test]
    fn duplicate_is_structurally_equal() {
        let t = sample();
        let dup = t;
        assert_eq!(t, dup);
    }

    #[test]
    fn reversed_swaps_both_pairs() {
        let t = sample();
        let r = t.reversed();
        assert_eq!(r.remote_addr, t.local_addr);
        assert_eq!(r.remote_port, t.local_port);
        assert_eq!(r.local_addr, t.remote_addr);
        assert_eq!(r.local_port, t.remote_port);
    }

    #[test]
    fn differing_port_breaks_equality() {
        let mut other = sample();
        other.remote_port += 1;
        assert_ne!(sample(), other);
    }
}
