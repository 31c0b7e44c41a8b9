// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The datagram dispatcher, grounded on the main receive
//! loop in `examples/original_source/gw/wapbox.c`. Reads framed
//! datagrams from the bearerbox channel, decides connectionless vs WTP
//! by destination port, then Responder vs Initiator by the TID's high
//! bit, and fans out to the right layer's queue.

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::{
    addr::AddrTuple,
    error::WtpPduError,
    event::WapEvent,
    wtp::{constants::CONNECTIONLESS_PORT, pdu::WtpPdu},
};

/// The bearerbox envelope around an opaque datagram: `(src_addr, src_port, dst_addr, dst_port,
/// user_data)`.
#[derive(Debug, Clone)]
pub struct WdpDatagram {
    pub addr: AddrTuple,
    pub dst_port: u16,
    pub user_data: Bytes,
}

pub struct DispatcherChannels {
    pub connectionless: mpsc::UnboundedSender<WapEvent>,
    pub wtp_responder: mpsc::UnboundedSender<WapEvent>,
    pub wtp_initiator: mpsc::UnboundedSender<WapEvent>,
}

/// Routes one inbound datagram. Returns `Err` only for a decode failure
/// the caller should log and drop; routing itself never fails once the
/// PDU decodes.
pub fn route(datagram: WdpDatagram, channels: &DispatcherChannels) {
    if datagram.dst_port == CONNECTIONLESS_PORT {
        match crate::wsp::connectionless::decode_request(datagram.addr, &datagram.user_data) {
            Ok(ev) => {
                let _ = channels.connectionless.send(ev);
            },
            Err(err) => {
                tracing::warn!(?err, "dropping malformed connectionless datagram");
            },
        }
        return;
    }

    match WtpPdu::unpack(&datagram.user_data) {
        Ok(pdu) => {
            let is_initiator_side = pdu.tid() & 0x8000 != 0;
            let ev = to_wtp_event(datagram.addr, pdu);
            let target = if is_initiator_side {
                &channels.wtp_initiator
            } else {
                &channels.wtp_responder
            };
            let _ = target.send(ev);
        },
        Err(err @ (WtpPduError::BadVersion | WtpPduError::SegmentationRequested | WtpPduError::BadTcl(_))) => {
            // The 3-octet fixed header (and so the TID at bytes 1-2) is
            // present whenever one of these is raised; Truncated and
            // UnknownPduType give no such guarantee and are just dropped.
            let tid = u16::from_be_bytes([datagram.user_data[1], datagram.user_data[2]]);
            tracing::warn!(?err, tid, "aborting malformed WTP datagram");
            let _ = channels.wtp_responder.send(WapEvent::RcvErrorPdu {
                addr: datagram.addr,
                tid,
                reason: err.abort_reason(),
            });
        },
        Err(err) => {
            tracing::warn!(?err, "dropping undecodable WTP datagram");
        },
    }
}

fn to_wtp_event(addr: AddrTuple, pdu: WtpPdu) -> WapEvent {
    match pdu {
        WtpPdu::Invoke { .. } => WapEvent::RcvInvoke { addr, pdu },
        WtpPdu::Ack { .. } => WapEvent::RcvAck { addr, pdu },
        WtpPdu::Abort { .. } => WapEvent::RcvAbort { addr, pdu },
        WtpPdu::Result { .. } => WapEvent::RcvAck { addr, pdu },
    }
}
