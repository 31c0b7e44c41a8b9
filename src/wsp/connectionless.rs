// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Stateless connectionless WSP: one datagram in, one
//! datagram out, on the well-known connectionless port. No timers, no
//! retransmits, no duplicate suppression.

use bytes::Bytes;

use crate::{
    addr::AddrTuple,
    error::HeaderCodecError,
    event::WapEvent,
    wsp::{headers::HeaderList, pdu::WspPdu},
};

/// Decodes an inbound connectionless datagram: the leading byte is the
/// transaction ID, followed by a Get or Post WSP PDU. The decoded
/// `uri`/`headers`/`body` ride along on the event so the connectionless
/// task can dispatch a real fetch instead of just acknowledging receipt.
pub fn decode_request(addr: AddrTuple, datagram: &[u8]) -> Result<WapEvent, HeaderCodecError> {
    let Some((&tid, rest)) = datagram.split_first() else {
        return Err(HeaderCodecError::MalformedValue("empty connectionless datagram"));
    };
    match WspPdu::unpack(rest)? {
        WspPdu::Get { uri, headers } => Ok(WapEvent::SUnitMethodInvokeInd {
            addr,
            tid,
            uri,
            headers,
            body: Bytes::new(),
        }),
        WspPdu::Post { uri, headers, body } => Ok(WapEvent::SUnitMethodInvokeInd { addr, tid, uri, headers, body }),
        other => Err(HeaderCodecError::UnknownField(other.pdu_type().tag(), 0)),
    }
}

/// Packs a Reply PDU and prepends the transaction-ID byte, ready to be
/// sent as a `T_DUnitdata_Req`.
pub fn encode_reply(tid: u8, status: u8, headers: HeaderList, body: Bytes) -> Bytes {
    let pdu = WspPdu::Reply {
        status,
        headers,
        body,
    };
    let mut out = Vec::with_capacity(1 + pdu.pack().len());
    out.push(tid);
    out.extend(pdu.pack());
    Bytes::from(out)
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use super::*;

    fn addr() -> AddrTuple {
        AddrTuple::new(
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            9200,
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
            9200,
        )
    }

    #[test]
    fn decodes_get_with_leading_tid_byte() {
        let pdu = WspPdu::Get {
            uri: "kannel:alive".to_string(),
            headers: HeaderList::new(),
        };
        let mut datagram = vec![0x07];
        datagram.extend(pdu.pack());
        let ev = decode_request(addr(), &datagram).expect("decode");
        let WapEvent::SUnitMethodInvokeInd { tid, uri, .. } = ev else { panic!("expected SUnitMethodInvokeInd") };
        assert_eq!(tid, 0x07);
        assert_eq!(uri, "kannel:alive");
    }

    #[test]
    fn decodes_post_with_body() {
        let pdu = WspPdu::Post {
            uri: "kannel:alive".to_string(),
            headers: HeaderList::new(),
            body: Bytes::from_static(b"payload"),
        };
        let mut datagram = vec![0x09];
        datagram.extend(pdu.pack());
        let ev = decode_request(addr(), &datagram).expect("decode");
        let WapEvent::SUnitMethodInvokeInd { tid, body, .. } = ev else { panic!("expected SUnitMethodInvokeInd") };
        assert_eq!(tid, 0x09);
        assert_eq!(&body[..], b"payload");
    }

    #[test]
    fn encode_reply_prepends_tid_byte() {
        let reply = encode_reply(0x07, 0x20, HeaderList::new(), Bytes::from_static(b"ok"));
        assert_eq!(reply[0], 0x07);
    }
}
