// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The WTP Responder state machine, grounded row-by-row on
//! `examples/original_source/gw/wtp_resp_state-decl.h`. One instance per
//! `(addr, tid)`; lives in the Responder task's slotted arena and is driven purely by `handle_event`, which returns the PDUs to
//! send and events to publish — no I/O happens inside the state table.

use bytes::Bytes;

use crate::{
    addr::AddrTuple,
    error::AbortReason,
    event::{MachineId, WapEvent},
    timer::TimerHandle,
    wtp::{
        constants::{AEC_MAX, MAX_RCR},
        pdu::{AbortType as PduAbortType, Tpi, WtpPdu},
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Listen,
    TidokWait,
    InvokeRespWait,
    ResultWait,
    ResultRespWait,
}

pub struct ResponderMachine {
    pub id: MachineId,
    pub state: State,
    pub tid: u16,
    pub addr: AddrTuple,
    pub tcl: u8,
    pub u_ack: bool,
    pub aec: u8,
    pub rcr: u8,
    pub rid: bool,
    pub ack_pdu_sent: bool,
    pub timer: TimerHandle,
    /// Packed Result PDU kept for retransmission in RESULT_RESP_WAIT.
    pub last_result: Option<Bytes>,
    /// The Invoke indication buffered while waiting out TID verification.
    pub deferred_invoke: Option<WapEvent>,
}

/// Side effects a transition asks the owning task to carry out: send a
/// PDU on the wire, publish an event to another layer's queue, (re)start
/// or stop this machine's timer, or destroy the machine.
pub enum Effect {
    SendPdu(WtpPdu),
    Publish(WapEvent),
    StartTimerA,
    StartTimerR,
    StopTimer,
    Destroy,
}

impl ResponderMachine {
    pub fn new(id: MachineId, addr: AddrTuple, tid: u16, timer: TimerHandle) -> Self {
        Self {
            id,
            state: State::Listen,
            tid,
            addr,
            tcl: 2,
            u_ack: false,
            aec: 0,
            rcr: 0,
            rid: false,
            ack_pdu_sent: false,
            timer,
            last_result: None,
            deferred_invoke: None,
        }
    }

    /// Entry point for `RcvInvoke` once the TID cache has already
    /// accepted it.
    pub fn on_accepted_invoke(&mut self, tcl: u8, u_ack: bool, user_data: Bytes) -> Vec<Effect> {
        match self.state {
            State::Listen if tcl == 1 || tcl == 2 => {
                self.tcl = tcl;
                self.u_ack = u_ack;
                self.state = State::InvokeRespWait;
                vec![
                    Effect::Publish(WapEvent::TrInvokeInd {
                        handle: self.id,
                        addr: self.addr,
                        tcl,
                        user_data,
                    }),
                    Effect::StartTimerA,
                ]
            },
            State::Listen if tcl == 0 => {
                vec![Effect::Publish(WapEvent::TrInvokeInd {
                    handle: self.id,
                    addr: self.addr,
                    tcl,
                    user_data,
                })]
            },
            _ => vec![],
        }
    }

    /// LISTEN row: the TID cache rejected the TID as uncached and the
    /// peer does not support caching. Reply with a TID-verify Ack and
    /// buffer the indication.
    pub fn on_needs_tid_verification(&mut self, deferred: WapEvent) -> Vec<Effect> {
        self.deferred_invoke = Some(deferred);
        self.state = State::TidokWait;
        vec![Effect::SendPdu(WtpPdu::Ack {
            tid: WtpPdu::send_tid(self.tid),
            rid: false,
            tid_verify: true,
            tpi: Vec::new(),
        })]
    }

    pub fn on_rcv_error_pdu(&mut self) -> Vec<Effect> {
        if self.state == State::Listen {
            vec![Effect::SendPdu(WtpPdu::Abort {
                tid: WtpPdu::send_tid(self.tid),
                abort_type: PduAbortType::Provider,
                abort_reason: AbortReason::ProtoErr,
                tpi: Vec::new(),
            })]
        } else {
            vec![]
        }
    }

    pub fn on_rcv_ack(&mut self, tid_ok: bool) -> Vec<Effect> {
        match self.state {
            State::TidokWait if tid_ok => {
                self.state = State::InvokeRespWait;
                let deferred = self.deferred_invoke.take();
                let mut effects = vec![Effect::StartTimerA];
                if let Some(ev) = deferred {
                    effects.push(Effect::Publish(ev));
                }
                effects
            },
            State::ResultRespWait => {
                self.state = State::Listen;
                vec![
                    Effect::Publish(WapEvent::TrResultCnf { handle: self.id }),
                    Effect::StopTimer,
                    Effect::Destroy,
                ]
            },
            _ => vec![],
        }
    }

    pub fn on_rcv_abort(&mut self) -> Vec<Effect> {
        match self.state {
            State::TidokWait | State::InvokeRespWait | State::ResultWait | State::ResultRespWait => {
                self.state = State::Listen;
                vec![Effect::StopTimer, Effect::Destroy]
            },
            State::Listen => vec![],
        }
    }

    /// A retransmitted Invoke (RID=1) arriving while waiting on a
    /// provider response: retransmit whatever acknowledgement we already
    /// committed to.
    pub fn on_retransmitted_invoke(&mut self) -> Vec<Effect> {
        match self.state {
            State::TidokWait => vec![Effect::SendPdu(WtpPdu::Ack {
                tid: WtpPdu::send_tid(self.tid),
                rid: false,
                tid_verify: true,
                tpi: Vec::new(),
            })],
            State::ResultWait if self.ack_pdu_sent => vec![Effect::SendPdu(WtpPdu::Ack {
                tid: WtpPdu::send_tid(self.tid),
                rid: false,
                tid_verify: false,
                tpi: Vec::new(),
            })],
            _ => vec![],
        }
    }

    pub fn on_tr_invoke_res(&mut self) -> Vec<Effect> {
        if self.state == State::InvokeRespWait && self.tcl == 2 {
            self.state = State::ResultWait;
            vec![Effect::StartTimerA]
        } else {
            vec![]
        }
    }

    pub fn on_timer_a(&mut self) -> Vec<Effect> {
        match self.state {
            State::InvokeRespWait if self.tcl == 2 && !self.u_ack => {
                self.ack_pdu_sent = true;
                self.state = State::ResultWait;
                vec![Effect::SendPdu(WtpPdu::Ack {
                    tid: WtpPdu::send_tid(self.tid),
                    rid: false,
                    tid_verify: false,
                    tpi: Vec::new(),
                })]
            },
            State::InvokeRespWait if self.u_ack && self.aec < AEC_MAX => {
                self.aec += 1;
                vec![Effect::StartTimerA]
            },
            State::InvokeRespWait if self.u_ack && self.aec >= AEC_MAX => {
                self.state = State::Listen;
                vec![
                    Effect::SendPdu(WtpPdu::Abort {
                        tid: WtpPdu::send_tid(self.tid),
                        abort_type: PduAbortType::Provider,
                        abort_reason: AbortReason::NoResponse,
                        tpi: Vec::new(),
                    }),
                    Effect::Publish(WapEvent::TrAbortInd {
                        handle: self.id,
                        reason: AbortReason::ProtoErr,
                    }),
                    Effect::Destroy,
                ]
            },
            _ => vec![],
        }
    }

    pub fn on_tr_abort_req(&mut self, reason: AbortReason) -> Vec<Effect> {
        self.state = State::Listen;
        vec![
            Effect::SendPdu(WtpPdu::Abort {
                tid: WtpPdu::send_tid(self.tid),
                abort_type: PduAbortType::User,
                abort_reason: reason,
                tpi: Vec::new(),
            }),
            Effect::StopTimer,
            Effect::Destroy,
        ]
    }

    pub fn on_tr_result_req(&mut self, user_data: Bytes) -> Vec<Effect> {
        if self.state != State::ResultWait {
            return vec![];
        }
        let pdu = WtpPdu::Result {
            tid: WtpPdu::send_tid(self.tid),
            gtr: true,
            ttr: true,
            rid: false,
            user_data,
            tpi: Vec::new(),
        };
        self.last_result = Some(pdu.pack());
        self.rcr = 0;
        self.state = State::ResultRespWait;
        vec![Effect::SendPdu(pdu), Effect::StartTimerR]
    }

    pub fn on_timer_r(&mut self) -> Vec<Effect> {
        if self.state != State::ResultRespWait {
            return vec![];
        }
        if self.rcr < MAX_RCR {
            self.rcr += 1;
            if let Some(packed) = &mut self.last_result {
                let mut bytes = packed.to_vec();
                WtpPdu::set_rid_bit(&mut bytes);
                *packed = Bytes::from(bytes.clone());
                return vec![Effect::Publish(WapEvent::TDUnitdataReq {
                    addr: self.addr.reversed(),
                    user_data: Bytes::from(bytes),
                }), Effect::StartTimerR];
            }
            vec![Effect::StartTimerR]
        } else {
            self.state = State::Listen;
            vec![
                Effect::Publish(WapEvent::TrAbortInd {
                    handle: self.id,
                    reason: AbortReason::NoResponse,
                }),
                Effect::Destroy,
            ]
        }
    }
}

/// Constructs a User-type Abort PDU intended for the peer (helper kept
/// separate from the state table since a few error paths need to build
/// one outside of a machine, e.g. unmatched datagrams at the dispatcher).
pub fn abort_pdu_for(tid: u16, reason: AbortReason) -> WtpPdu {
    WtpPdu::Abort {
        tid: WtpPdu::send_tid(tid),
        abort_type: PduAbortType::Provider,
        abort_reason: reason,
        tpi: Vec::<Tpi>::new(),
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

    fn machine() -> ResponderMachine {
        ResponderMachine::new(1, addr(), 0x0001, TimerHandle::default_for_test())
    }

    #[test]
    fn class_2_invoke_moves_to_invoke_resp_wait() {
        let mut m = machine();
        let effects = m.on_accepted_invoke(2, true, Bytes::from_static(b"CONNECT"));
        assert_eq!(m.state, State::InvokeRespWait);
        assert!(matches!(effects[0], Effect::Publish(WapEvent::TrInvokeInd { .. })));
    }

    #[test]
    fn class_0_invoke_does_not_change_state() {
        let mut m = machine();
        m.on_accepted_invoke(0, false, Bytes::new());
        assert_eq!(m.state, State::Listen);
    }

    #[test]
    fn timer_a_exhaustion_sends_no_response_abort_and_dies() {
        let mut m = machine();
        m.on_accepted_invoke(2, true, Bytes::new());
        m.aec = AEC_MAX;
        let effects = m.on_timer_a();
        assert_eq!(m.state, State::Listen);
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::SendPdu(WtpPdu::Abort { abort_reason: AbortReason::NoResponse, .. }))));
    }

    #[test]
    fn result_retransmission_sets_rid_and_increments_rcr() {
        let mut m = machine();
        m.on_accepted_invoke(2, true, Bytes::new());
        m.on_tr_invoke_res();
        m.on_tr_result_req(Bytes::from_static(b"REPLY"));
        m.rcr = 2;
        let effects = m.on_timer_r();
        assert_eq!(m.rcr, 3);
        assert!(effects.iter().any(|e| matches!(e, Effect::Publish(_))));
    }

    #[test]
    fn result_retransmission_gives_up_after_max_rcr() {
        let mut m = machine();
        m.on_accepted_invoke(2, true, Bytes::new());
        m.on_tr_invoke_res();
        m.on_tr_result_req(Bytes::from_static(b"REPLY"));
        m.rcr = MAX_RCR;
        let effects = m.on_timer_r();
        assert_eq!(m.state, State::Listen);
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::Publish(WapEvent::TrAbortInd { reason: AbortReason::NoResponse, .. }))));
    }
}
