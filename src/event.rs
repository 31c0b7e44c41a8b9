// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The event union that flows between every layer's queue. Re-architected as a native tagged enum —
//! the original's macro-generated struct-per-event duplicator/destructor
//! pattern collapses into the derived `Clone`/`Drop` a sum type gets for
//! free.

use bytes::Bytes;

use crate::{addr::AddrTuple, error::AbortReason, wsp::headers::HeaderList, wtp::pdu::WtpPdu};

/// Stable small-integer identity for a WTP or WSP state machine instance.
pub type MachineId = u64;

/// Which side raised an `Abort`: WTP distinguishes provider-originated
/// (protocol/local) aborts from user-originated ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortType {
    Provider,
    User,
}

#[derive(Debug, Clone)]
pub enum WapEvent {
    // --- Datagram boundary ---
    TDUnitdataInd {
        addr: AddrTuple,
        user_data: Bytes,
    },
    TDUnitdataReq {
        addr: AddrTuple,
        user_data: Bytes,
    },

    // --- WTP wire events ---
    RcvInvoke {
        addr: AddrTuple,
        pdu: WtpPdu,
    },
    RcvAck {
        addr: AddrTuple,
        pdu: WtpPdu,
    },
    RcvAbort {
        addr: AddrTuple,
        pdu: WtpPdu,
    },
    RcvErrorPdu {
        addr: AddrTuple,
        tid: u16,
        reason: AbortReason,
    },

    // --- WTP service interface ---
    TrInvokeInd {
        handle: MachineId,
        addr: AddrTuple,
        tcl: u8,
        user_data: Bytes,
    },
    TrInvokeRes {
        handle: MachineId,
    },
    TrInvokeReq {
        handle: MachineId,
        addr: AddrTuple,
        tcl: u8,
        user_data: Bytes,
    },
    TrInvokeCnf {
        handle: MachineId,
    },
    TrResultInd {
        handle: MachineId,
        user_data: Bytes,
    },
    TrResultRes {
        handle: MachineId,
    },
    TrResultReq {
        handle: MachineId,
        user_data: Bytes,
    },
    TrResultCnf {
        handle: MachineId,
    },
    TrAbortInd {
        handle: MachineId,
        reason: AbortReason,
    },
    TrAbortReq {
        handle: MachineId,
        abort_type: AbortType,
        reason: AbortReason,
    },

    // --- WSP service interface ---
    SConnectInd {
        session: MachineId,
        addr: AddrTuple,
    },
    SConnectRes {
        session: MachineId,
    },
    SDisconnectInd {
        session: MachineId,
        reason: AbortReason,
    },
    SMethodInvokeInd {
        session: MachineId,
        method: MachineId,
    },
    SMethodInvokeRes {
        method: MachineId,
    },
    SMethodResultReq {
        method: MachineId,
    },
    SMethodResultCnf {
        method: MachineId,
    },
    SMethodAbortInd {
        method: MachineId,
        reason: AbortReason,
    },
    SUnitMethodInvokeInd {
        addr: AddrTuple,
        tid: u8,
        uri: String,
        headers: HeaderList,
        body: Bytes,
    },
    SUnitMethodResultReq {
        addr: AddrTuple,
        tid: u8,
    },

    // --- Internal ---
    DisconnectEvent {
        handle: MachineId,
        reason: AbortReason,
    },
    SuspendEvent {
        handle: MachineId,
    },
    ReleaseEvent {
        method: MachineId,
    },
    AbortEvent {
        handle: MachineId,
        reason: AbortReason,
    },
    TimerToA {
        handle: MachineId,
    },
    TimerToR {
        handle: MachineId,
    },
    TimerToW {
        handle: MachineId,
    },
}

impl WapEvent {
    /// The machine this event targets, when it targets exactly one. Used
    /// by a layer's dispatch loop to look the machine up in its arena;
    /// events with no single target (datagram boundary, connectionless)
    /// return `None` and are routed by address instead.
    pub fn target(&self) -> Option<MachineId> {
        match self {
            WapEvent::TrInvokeInd { handle, .. }
            | WapEvent::TrInvokeRes { handle }
            | WapEvent::TrInvokeReq { handle, .. }
            | WapEvent::TrInvokeCnf { handle }
            | WapEvent::TrResultInd { handle, .. }
            | WapEvent::TrResultRes { handle }
            | WapEvent::TrResultReq { handle, .. }
            | WapEvent::TrResultCnf { handle }
            | WapEvent::TrAbortInd { handle, .. }
            | WapEvent::TrAbortReq { handle, .. }
            | WapEvent::DisconnectEvent { handle, .. }
            | WapEvent::SuspendEvent { handle }
            | WapEvent::AbortEvent { handle, .. }
            | WapEvent::TimerToA { handle }
            | WapEvent::TimerToR { handle }
            | WapEvent::TimerToW { handle } => Some(*handle),
            WapEvent::SConnectInd { session, .. } | WapEvent::SConnectRes { session } => {
                Some(*session)
            },
            WapEvent::SDisconnectInd { session, .. } => Some(*session),
            WapEvent::SMethodInvokeInd { method, .. }
            | WapEvent::SMethodInvokeRes { method }
            | WapEvent::SMethodResultReq { method }
            | WapEvent::SMethodResultCnf { method }
            | WapEvent::SMethodAbortInd { method, .. }
            | WapEvent::ReleaseEvent { method } => Some(*method),
            WapEvent::TDUnitdataInd { .. }
            | WapEvent::TDUnitdataReq { .. }
            | WapEvent::RcvInvoke { .. }
            | WapEvent::RcvAck { .. }
            | WapEvent::RcvAbort { .. }
            | WapEvent::RcvErrorPdu { .. }
            | WapEvent::SUnitMethodInvokeInd { .. }
            | WapEvent::SUnitMethodResultReq { .. } => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            WapEvent::TDUnitdataInd { .. } => "T-DUnitdata.ind",
            WapEvent::TDUnitdataReq { .. } => "T-DUnitdata.req",
            WapEvent::RcvInvoke { .. } => "RcvInvoke",
            WapEvent::RcvAck { .. } => "RcvAck",
            WapEvent::RcvAbort { .. } => "RcvAbort",
            WapEvent::RcvErrorPdu { .. } => "RcvErrorPDU",
            WapEvent::TrInvokeInd { .. } => "TR-Invoke.ind",
            WapEvent::TrInvokeRes { .. } => "TR-Invoke.res",
            WapEvent::TrInvokeReq { .. } => "TR-Invoke.req",
            WapEvent::TrInvokeCnf { .. } => "TR-Invoke.cnf",
            WapEvent::TrResultInd { .. } => "TR-Result.ind",
            WapEvent::TrResultRes { .. } => "TR-Result.res",
            WapEvent::TrResultReq { .. } => "TR-Result.req",
            WapEvent::TrResultCnf { .. } => "TR-Result.cnf",
            WapEvent::TrAbortInd { .. } => "TR-Abort.ind",
            WapEvent::TrAbortReq { .. } => "TR-Abort.req",
            WapEvent::SConnectInd { .. } => "S-Connect.ind",
            WapEvent::SConnectRes { .. } => "S-Connect.res",
            WapEvent::SDisconnectInd { .. } => "S-Disconnect.ind",
            WapEvent::SMethodInvokeInd { .. } => "S-MethodInvoke.ind",
            WapEvent::SMethodInvokeRes { .. } => "S-MethodInvoke.res",
            WapEvent::SMethodResultReq { .. } => "S-MethodResult.req",
            WapEvent::SMethodResultCnf { .. } => "S-MethodResult.cnf",
            WapEvent::SMethodAbortInd { .. } => "S-MethodAbort.ind",
            WapEvent::SUnitMethodInvokeInd { .. } => "S-Unit-MethodInvoke.ind",
            WapEvent::SUnitMethodResultReq { .. } => "S-Unit-MethodResult.req",
            WapEvent::DisconnectEvent { .. } => "Disconnect-Event",
            WapEvent::SuspendEvent { .. } => "Suspend-Event",
            WapEvent::ReleaseEvent { .. } => "Release-Event",
            WapEvent::AbortEvent { .. } => "Abort-Event",
            WapEvent::TimerToA { .. } => "TimerTO-A",
            WapEvent::TimerToR { .. } => "TimerTO-R",
            WapEvent::TimerToW { .. } => "TimerTO-W",
        }
    }
}
