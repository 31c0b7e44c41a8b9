// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The WTP Initiator state machine, grounded on
//! `examples/original_source/gw/wtp_init_state-decl.h`. Class 0 traffic
//! never retains a machine; class 1 allocates one that lives through a
//! single retransmit-guarded round trip.

use std::sync::atomic::{AtomicU16, Ordering};

use bytes::Bytes;

use crate::{
    addr::AddrTuple,
    error::AbortReason,
    event::{MachineId, WapEvent},
    timer::TimerHandle,
    wtp::{constants::MAX_RCR, pdu::WtpPdu},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Null,
    ResultWait,
}

/// Per-initiator-context TID allocator. One instance is owned by the Initiator task, not global.
pub struct TidAllocator {
    next: AtomicU16,
}

impl TidAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU16::new(0),
        }
    }

    /// Returns the next TID and whether this allocation wrapped the
    /// 15-bit space (in which case the caller must set `tid_new`).
    pub fn allocate(&self) -> (u16, bool) {
        let prev = self.next.fetch_add(1, Ordering::Relaxed) & 0x7fff;
        let wrapped = prev == 0x7fff;
        (prev, wrapped)
    }
}

impl Default for TidAllocator {
    fn default() -> Self {
        Self::new()
    }
}

pub struct InitiatorMachine {
    pub id: MachineId,
    pub state: State,
    pub tid: u16,
    pub addr: AddrTuple,
    pub tid_new: bool,
    pub u_ack: bool,
    pub rcr: u8,
    pub tidok_sent: bool,
    pub rid: bool,
    pub timer: TimerHandle,
    pub last_invoke: Option<Bytes>,
}

pub enum Effect {
    SendPdu(WtpPdu),
    Publish(WapEvent),
    StartTimerR,
    StopTimer,
    Destroy,
}

impl InitiatorMachine {
    pub fn new(id: MachineId, addr: AddrTuple, tid: u16, tid_new: bool, timer: TimerHandle) -> Self {
        Self {
            id,
            state: State::Null,
            tid,
            addr,
            tid_new,
            u_ack: false,
            rcr: 0,
            tidok_sent: false,
            rid: false,
            timer,
            last_invoke: None,
        }
    }

    /// `TR_Invoke_Req(tcl=1)`: allocate, pack, send, start the machine.
    pub fn on_invoke_req_class1(&mut self, u_ack: bool, user_data: Bytes) -> Vec<Effect> {
        self.u_ack = u_ack;
        let pdu = WtpPdu::Invoke {
            tid: self.tid,
            gtr: true,
            ttr: true,
            rid: false,
            tid_new: self.tid_new,
            u_ack,
            tcl: 1,
            user_data,
            tpi: Vec::new(),
        };
        self.last_invoke = Some(pdu.pack());
        self.state = State::ResultWait;
        vec![Effect::SendPdu(pdu), Effect::StartTimerR]
    }

    pub fn on_rcv_ack(&mut self, tid_ok: bool) -> Vec<Effect> {
        if self.state != State::ResultWait {
            return vec![];
        }
        if !tid_ok {
            self.state = State::Null;
            vec![
                Effect::StopTimer,
                Effect::Publish(WapEvent::TrInvokeCnf { handle: self.id }),
                Effect::Destroy,
            ]
        } else if self.rcr < MAX_RCR {
            self.tidok_sent = true;
            self.rcr += 1;
            vec![
                Effect::SendPdu(WtpPdu::Ack {
                    tid: self.tid,
                    rid: false,
                    tid_verify: true,
                    tpi: Vec::new(),
                }),
                Effect::StartTimerR,
            ]
        } else {
            vec![]
        }
    }

    pub fn on_timer_r(&mut self) -> Vec<Effect> {
        if self.state != State::ResultWait {
            return vec![];
        }
        if self.rcr >= MAX_RCR {
            self.state = State::Null;
            return vec![
                Effect::Publish(WapEvent::TrAbortInd {
                    handle: self.id,
                    reason: AbortReason::NoResponse,
                }),
                Effect::Destroy,
            ];
        }
        if self.tidok_sent {
            return vec![];
        }
        self.rcr += 1;
        if let Some(packed) = &mut self.last_invoke {
            let mut bytes = packed.to_vec();
            WtpPdu::set_rid_bit(&mut bytes);
            *packed = Bytes::from(bytes.clone());
            return vec![
                Effect::Publish(WapEvent::TDUnitdataReq {
                    addr: self.addr,
                    user_data: Bytes::from(bytes),
                }),
                Effect::StartTimerR,
            ];
        }
        vec![Effect::StartTimerR]
    }

    pub fn on_rcv_abort(&mut self, reason: AbortReason) -> Vec<Effect> {
        self.state = State::Null;
        vec![
            Effect::StopTimer,
            Effect::Publish(WapEvent::TrAbortInd {
                handle: self.id,
                reason,
            }),
            Effect::Destroy,
        ]
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
    fn allocator_wraps_the_15_bit_space() {
        let alloc = TidAllocator::new();
        for _ in 0..0x7fff {
            let (_, wrapped) = alloc.allocate();
            assert!(!wrapped);
        }
        let (_, wrapped) = alloc.allocate();
        assert!(wrapped);
    }

    #[test]
    fn tid_ok_zero_ends_the_transaction() {
        let mut m = InitiatorMachine::new(1, addr(), 1, false, TimerHandle::default_for_test());
        m.on_invoke_req_class1(true, Bytes::new());
        let effects = m.on_rcv_ack(false);
        assert_eq!(m.state, State::Null);
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::Publish(WapEvent::TrInvokeCnf { .. }))));
    }

    #[test]
    fn tid_ok_one_sends_verify_ack_and_stays() {
        let mut m = InitiatorMachine::new(1, addr(), 1, false, TimerHandle::default_for_test());
        m.on_invoke_req_class1(true, Bytes::new());
        let effects = m.on_rcv_ack(true);
        assert_eq!(m.state, State::ResultWait);
        assert!(m.tidok_sent);
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::SendPdu(WtpPdu::Ack { tid_verify: true, .. }))));
    }

    #[test]
    fn timer_exhaustion_delivers_no_response_abort() {
        let mut m = InitiatorMachine::new(1, addr(), 1, false, TimerHandle::default_for_test());
        m.on_invoke_req_class1(true, Bytes::new());
        m.rcr = MAX_RCR;
        let effects = m.on_timer_r();
        assert_eq!(m.state, State::Null);
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::Publish(WapEvent::TrAbortInd { reason: AbortReason::NoResponse, .. }))));
    }
}
