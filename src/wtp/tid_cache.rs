// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Per-peer last-accepted-TID store, grounded line-for-line
//! on `examples/original_source/gw/wtp_tid.c`'s `wtp_tid_is_valid` /
//! `tid_in_window`. The original guards a `List` with its own mutex; the
//! API here is defined thread-safe via `DashMap` even though only the
//! Responder task currently calls it.

use dashmap::DashMap;

use crate::{addr::AddrTuple, wtp::constants::WTP_TID_WINDOW_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// No prior entry; `rcv_tid` has been recorded.
    AcceptedNew,
    /// A prior entry existed and `rcv_tid` fell inside its forward
    /// window; the entry was overwritten.
    AcceptedInWindow,
    /// A prior entry existed and `rcv_tid` fell outside the window.
    OutOfWindow,
    /// No prior entry and the peer declared it does not support TID
    /// caching; the caller must enter TID verification instead of
    /// recording anything.
    NoCacheSupported,
}

pub struct TidCache {
    last_tid: DashMap<AddrTuple, u16>,
}

impl TidCache {
    pub fn new() -> Self {
        Self {
            last_tid: DashMap::new(),
        }
    }

    /// `wtp_tid_is_valid` for the non-`tid_new` path: checks and updates
    /// the cache for one received TID from `addr`.
    pub fn validate(&self, addr: AddrTuple, rcv_tid: u16, no_cache_supported: bool) -> Verdict {
        let Some(mut entry) = self.last_tid.get_mut(&addr) else {
            if no_cache_supported {
                return Verdict::NoCacheSupported;
            }
            self.last_tid.insert(addr, rcv_tid);
            return Verdict::AcceptedNew;
        };
        if tid_in_window(rcv_tid, *entry) {
            *entry = rcv_tid;
            Verdict::AcceptedInWindow
        } else {
            Verdict::OutOfWindow
        }
    }

    /// `tid_new` flag set: the peer announces a restart. Reset to 0 and
    /// require TID verification.
    pub fn reset_for_verification(&self, addr: AddrTuple) {
        self.last_tid.insert(addr, 0);
    }

    /// Records a TID that has just completed TID verification
    /// (`RcvAck(tid_ok=1)` in the Responder's `TIDOK_WAIT` state).
    pub fn confirm(&self, addr: AddrTuple, tid: u16) {
        self.last_tid.insert(addr, tid);
    }

    pub fn stored(&self, addr: AddrTuple) -> Option<u16> {
        self.last_tid.get(&addr).map(|v| *v)
    }
}

impl Default for TidCache {
    fn default() -> Self {
        Self::new()
    }
}

/// The forward-window acceptance test: given stored `L`
/// and received `R`, valid iff `R != L` and
/// `((R>L) && (R-L<=WINDOW)) || ((R<L) && (L-R>=WINDOW))`.
fn tid_in_window(received: u16, last: u16) -> bool {
    let r = u32::from(received);
    let l = u32::from(last);
    if r == l {
        return false;
    }
    if r > l {
        r - l <= WTP_TID_WINDOW_SIZE
    } else {
        l - r >= WTP_TID_WINDOW_SIZE
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use super::*;

    fn addr() -> AddrTuple {
        AddrTuple::new(
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            9201,
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
            9200,
        )
    }

    #[test]
    fn first_invoke_with_caching_peer_is_accepted_and_recorded() {
        let cache = TidCache::new();
        assert_eq!(cache.validate(addr(), 0x0001, false), Verdict::AcceptedNew);
        assert_eq!(cache.stored(addr()), Some(0x0001));
    }

    #[test]
    fn first_invoke_with_no_cache_supported_requires_verification() {
        let cache = TidCache::new();
        assert_eq!(
            cache.validate(addr(), 0x4000, true),
            Verdict::NoCacheSupported
        );
        assert_eq!(cache.stored(addr()), None);
    }

    #[test]
    fn in_window_advance_is_accepted_and_overwrites() {
        let cache = TidCache::new();
        cache.confirm(addr(), 0x4000);
        assert_eq!(
            cache.validate(addr(), 0x4001, false),
            Verdict::AcceptedInWindow
        );
        assert_eq!(cache.stored(addr()), Some(0x4001));
    }

    #[test]
    fn scenario_3_duplicate_just_below_stored_is_out_of_window() {
        // A duplicate arriving just below the stored high-water mark:
        // stored=0x4000, received=0x3FFF.
        let cache = TidCache::new();
        cache.confirm(addr(), 0x4000);
        assert_eq!(
            cache.validate(addr(), 0x3FFF, false),
            Verdict::OutOfWindow
        );
        // An out-of-window verdict never overwrites the stored value.
        assert_eq!(cache.stored(addr()), Some(0x4000));
    }

    #[test]
    fn window_boundary_is_inclusive_on_the_forward_edge() {
        // R>L, R-L == WINDOW exactly: still accepted.
        assert!(tid_in_window(16384, 0));
        // One past the boundary: rejected.
        assert!(!tid_in_window(16385, 0));
    }

    #[test]
    fn equal_tid_is_never_in_window() {
        assert!(!tid_in_window(5, 5));
    }

    #[test]
    fn reset_for_verification_zeroes_the_entry() {
        let cache = TidCache::new();
        cache.confirm(addr(), 0x1234);
        cache.reset_for_verification(addr());
        assert_eq!(cache.stored(addr()), Some(0));
    }
}
