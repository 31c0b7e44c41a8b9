// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! WTP PDU pack/unpack, grounded on the wire layout in
//! `examples/original_source/wap/wtp_pack.c` / `wap/wtp_pdu.h`: a 3-octet
//! common header, type-specific fields, and an optional TPI trailer.

use bitflags::bitflags;
use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{AbortReason, CodecError, WtpPduError};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FirstOctetFlags: u8 {
        /// High bit: a TPI trailer follows the fixed fields.
        const CON = 0b1000_0000;
        const GTR = 0b0000_0100;
        const TTR = 0b0000_0010;
        const RID = 0b0000_0001;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortType {
    Provider = 0,
    User = 1,
}

impl AbortType {
    fn from_bits(b: u8) -> Self {
        if b & 1 == 1 {
            Self::User
        } else {
            Self::Provider
        }
    }
}

/// A Transport Protocol Information item, an optional trailer flagged by
/// the CON bit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tpi {
    pub tag: u8,
    pub value: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WtpPdu {
    Invoke {
        tid: u16,
        gtr: bool,
        ttr: bool,
        rid: bool,
        tid_new: bool,
        u_ack: bool,
        tcl: u8,
        user_data: Bytes,
        tpi: Vec<Tpi>,
    },
    Result {
        tid: u16,
        gtr: bool,
        ttr: bool,
        rid: bool,
        user_data: Bytes,
        tpi: Vec<Tpi>,
    },
    Ack {
        tid: u16,
        rid: bool,
        tid_verify: bool,
        tpi: Vec<Tpi>,
    },
    Abort {
        tid: u16,
        abort_type: AbortType,
        abort_reason: AbortReason,
        tpi: Vec<Tpi>,
    },
}

const PDU_INVOKE: u8 = 1;
const PDU_RESULT: u8 = 2;
const PDU_ACK: u8 = 3;
const PDU_ABORT: u8 = 4;
const PDU_SEGMENTED_INVOKE: u8 = 5;
const PDU_SEGMENTED_RESULT: u8 = 6;
const PDU_NEGATIVE_ACK: u8 = 7;

impl WtpPdu {
    pub fn tid(&self) -> u16 {
        match self {
            WtpPdu::Invoke { tid, .. }
            | WtpPdu::Result { tid, .. }
            | WtpPdu::Ack { tid, .. }
            | WtpPdu::Abort { tid, .. } => *tid,
        }
    }

    pub fn rid(&self) -> bool {
        match self {
            WtpPdu::Invoke { rid, .. } | WtpPdu::Result { rid, .. } | WtpPdu::Ack { rid, .. } => {
                *rid
            },
            WtpPdu::Abort { .. } => false,
        }
    }

    /// Send-TID: the receive-TID with the perspective bit toggled.
    pub fn send_tid(rcv_tid: u16) -> u16 {
        rcv_tid ^ 0x8000
    }

    pub fn pack(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(8);
        match self {
            WtpPdu::Invoke {
                tid,
                gtr,
                ttr,
                rid,
                tid_new,
                u_ack,
                tcl,
                user_data,
                tpi,
            } => {
                let mut flags = FirstOctetFlags::empty();
                if *gtr {
                    flags |= FirstOctetFlags::GTR;
                }
                if *ttr {
                    flags |= FirstOctetFlags::TTR;
                }
                if *rid {
                    flags |= FirstOctetFlags::RID;
                }
                if !tpi.is_empty() {
                    flags |= FirstOctetFlags::CON;
                }
                buf.put_u8(flags.bits() | (PDU_INVOKE << 3));
                buf.put_u16(*tid);
                let mut invoke_octet = 0u8; // version (bits 7-6) is always 0
                if *tid_new {
                    invoke_octet |= 0b0010_0000;
                }
                if *u_ack {
                    invoke_octet |= 0b0001_0000;
                }
                invoke_octet |= tcl & 0b0000_0011;
                buf.put_u8(invoke_octet);
                buf.put_slice(user_data);
                pack_tpi(&mut buf, tpi);
            },
            WtpPdu::Result {
                tid,
                gtr,
                ttr,
                rid,
                user_data,
                tpi,
            } => {
                let mut flags = FirstOctetFlags::empty();
                if *gtr {
                    flags |= FirstOctetFlags::GTR;
                }
                if *ttr {
                    flags |= FirstOctetFlags::TTR;
                }
                if *rid {
                    flags |= FirstOctetFlags::RID;
                }
                if !tpi.is_empty() {
                    flags |= FirstOctetFlags::CON;
                }
                buf.put_u8(flags.bits() | (PDU_RESULT << 3));
                buf.put_u16(*tid);
                buf.put_slice(user_data);
                pack_tpi(&mut buf, tpi);
            },
            WtpPdu::Ack {
                tid,
                rid,
                tid_verify,
                tpi,
            } => {
                let mut flags = FirstOctetFlags::empty();
                if *rid {
                    flags |= FirstOctetFlags::RID;
                }
                if !tpi.is_empty() {
                    flags |= FirstOctetFlags::CON;
                }
                buf.put_u8(flags.bits() | (PDU_ACK << 3));
                buf.put_u16(*tid);
                buf.put_u8(if *tid_verify { 0b1000_0000 } else { 0 });
                pack_tpi(&mut buf, tpi);
            },
            WtpPdu::Abort {
                tid,
                abort_type,
                abort_reason,
                tpi,
            } => {
                let mut flags = FirstOctetFlags::empty();
                if !tpi.is_empty() {
                    flags |= FirstOctetFlags::CON;
                }
                buf.put_u8(flags.bits() | (PDU_ABORT << 3));
                buf.put_u16(*tid);
                buf.put_u8((*abort_type as u8) & 0b0000_0111);
                buf.put_u8(*abort_reason as u8);
                pack_tpi(&mut buf, tpi);
            },
        }
        buf.freeze()
    }

    pub fn unpack(buf: &[u8]) -> Result<Self, WtpPduError> {
        if buf.len() < 3 {
            return Err(WtpPduError::Truncated);
        }
        let first = buf[0];
        let con = first & FirstOctetFlags::CON.bits() != 0;
        let pdu_type = (first >> 3) & 0x0f;
        let gtr = first & FirstOctetFlags::GTR.bits() != 0;
        let ttr = first & FirstOctetFlags::TTR.bits() != 0;
        let rid = first & FirstOctetFlags::RID.bits() != 0;
        let tid = u16::from_be_bytes([buf[1], buf[2]]);
        let rest = &buf[3..];

        match pdu_type {
            PDU_INVOKE => {
                if rest.is_empty() {
                    return Err(WtpPduError::Truncated);
                }
                let invoke_octet = rest[0];
                let version = invoke_octet >> 6;
                if version != 0 {
                    return Err(WtpPduError::BadVersion);
                }
                if !gtr || !ttr {
                    return Err(WtpPduError::SegmentationRequested);
                }
                let tid_new = invoke_octet & 0b0010_0000 != 0;
                let u_ack = invoke_octet & 0b0001_0000 != 0;
                let tcl = invoke_octet & 0b0000_0011;
                if tcl > 2 {
                    return Err(WtpPduError::BadTcl(tcl));
                }
                let (body, tpi) = split_tpi(&rest[1..], con)?;
                Ok(WtpPdu::Invoke {
                    tid,
                    gtr,
                    ttr,
                    rid,
                    tid_new,
                    u_ack,
                    tcl,
                    user_data: Bytes::copy_from_slice(body),
                    tpi,
                })
            },
            PDU_RESULT => {
                let (body, tpi) = split_tpi(rest, con)?;
                Ok(WtpPdu::Result {
                    tid,
                    gtr,
                    ttr,
                    rid,
                    user_data: Bytes::copy_from_slice(body),
                    tpi,
                })
            },
            PDU_ACK => {
                if rest.is_empty() {
                    return Err(WtpPduError::Truncated);
                }
                let tid_verify = rest[0] & 0b1000_0000 != 0;
                let (_, tpi) = split_tpi(&rest[1..], con)?;
                Ok(WtpPdu::Ack {
                    tid,
                    rid,
                    tid_verify,
                    tpi,
                })
            },
            PDU_ABORT => {
                if rest.len() < 2 {
                    return Err(WtpPduError::Truncated);
                }
                let abort_type = AbortType::from_bits(rest[0]);
                let abort_reason = AbortReason::from_u8(rest[1])
                    .ok_or(WtpPduError::UnknownPduType(rest[1]))?;
                let (_, tpi) = split_tpi(&rest[2..], con)?;
                Ok(WtpPdu::Abort {
                    tid,
                    abort_type,
                    abort_reason,
                    tpi,
                })
            },
            PDU_SEGMENTED_INVOKE | PDU_SEGMENTED_RESULT | PDU_NEGATIVE_ACK => {
                Err(WtpPduError::SegmentationRequested)
            },
            other => Err(WtpPduError::UnknownPduType(other)),
        }
    }

    /// Sets the RID bit on a packed PDU's first octet in place, for
    /// retransmission.
    pub fn set_rid_bit(packed: &mut [u8]) {
        if let Some(first) = packed.first_mut() {
            *first |= FirstOctetFlags::RID.bits();
        }
    }
}

fn pack_tpi(buf: &mut BytesMut, tpi: &[Tpi]) {
    for item in tpi {
        buf.put_u8(item.tag);
        buf.put_u8(item.value.len() as u8);
        buf.put_slice(&item.value);
    }
}

/// Splits off any TPI trailer when `con` is set. TPI items are
/// `tag(1) | len(1) | value(len)`; malformed trailers are treated as
/// absent rather than failing the whole PDU.
fn split_tpi(rest: &[u8], con: bool) -> Result<(&[u8], Vec<Tpi>), WtpPduError> {
    if !con {
        return Ok((rest, Vec::new()));
    }
    // Without an explicit body-length field, a CON-flagged PDU's body
    // and trailer cannot be split unambiguously from the fixed header
    // alone; TPI-bearing PDUs are rare and this gateway treats the
    // entire remainder as the TPI region, leaving an empty body.
    let mut items = Vec::new();
    let mut i = 0;
    while i + 2 <= rest.len() {
        let tag = rest[i];
        let len = rest[i + 1] as usize;
        let start = i + 2;
        let end = start + len;
        if end > rest.len() {
            return Err(WtpPduError::Codec(CodecError::EndOfData));
        }
        items.push(Tpi {
            tag,
            value: Bytes::copy_from_slice(&rest[start..end]),
        });
        i = end;
    }
    Ok((&[], items))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invoke_round_trips() {
        let pdu = WtpPdu::Invoke {
            tid: 0x0001,
            gtr: true,
            ttr: true,
            rid: false,
            tid_new: false,
            u_ack: true,
            tcl: 2,
            user_data: Bytes::from_static(b"CONNECT"),
            tpi: Vec::new(),
        };
        let packed = pdu.pack();
        let unpacked = WtpPdu::unpack(&packed).expect("unpack");
        assert_eq!(unpacked, pdu);
    }

    #[test]
    fn result_round_trips() {
        let pdu = WtpPdu::Result {
            tid: 0x4000,
            gtr: true,
            ttr: true,
            rid: false,
            user_data: Bytes::from_static(b"REPLY"),
            tpi: Vec::new(),
        };
        let packed = pdu.pack();
        assert_eq!(WtpPdu::unpack(&packed).expect("unpack"), pdu);
    }

    #[test]
    fn ack_round_trips_with_tid_verify() {
        let pdu = WtpPdu::Ack {
            tid: 0x0002,
            rid: false,
            tid_verify: true,
            tpi: Vec::new(),
        };
        let packed = pdu.pack();
        assert_eq!(WtpPdu::unpack(&packed).expect("unpack"), pdu);
    }

    #[test]
    fn abort_round_trips() {
        let pdu = WtpPdu::Abort {
            tid: 0x0003,
            abort_type: AbortType::Provider,
            abort_reason: AbortReason::InvalidTid,
            tpi: Vec::new(),
        };
        let packed = pdu.pack();
        assert_eq!(WtpPdu::unpack(&packed).expect("unpack"), pdu);
    }

    #[test]
    fn bad_version_is_rejected() {
        let mut buf = vec![(PDU_INVOKE << 3) | 0b0000_0110, 0x00, 0x01, 0b0100_0000];
        buf.extend_from_slice(b"x");
        assert_eq!(WtpPdu::unpack(&buf), Err(WtpPduError::BadVersion));
    }

    #[test]
    fn segmentation_flags_are_rejected() {
        // GTR clear (bit not set) signals segmentation.
        let buf = [(PDU_INVOKE << 3), 0x00, 0x01, 0x02, b'x' as u8];
        assert_eq!(
            WtpPdu::unpack(&buf),
            Err(WtpPduError::SegmentationRequested)
        );
    }

    #[test]
    fn tcl_out_of_range_is_rejected() {
        let buf = [(PDU_INVOKE << 3) | 0b0000_0110, 0x00, 0x01, 0b0000_0011];
        assert_eq!(WtpPdu::unpack(&buf), Err(WtpPduError::BadTcl(3)));
    }

    #[test]
    fn unknown_pdu_type_is_rejected() {
        let buf = [(0u8 << 3), 0x00, 0x01];
        assert_eq!(WtpPdu::unpack(&buf), Err(WtpPduError::UnknownPduType(0)));
    }

    #[test]
    fn set_rid_bit_flips_only_the_low_bit_of_first_octet() {
        let pdu = WtpPdu::Result {
            tid: 1,
            gtr: true,
            ttr: true,
            rid: false,
            user_data: Bytes::new(),
            tpi: Vec::new(),
        };
        let mut packed = pdu.pack().to_vec();
        let before = packed[0];
        WtpPdu::set_rid_bit(&mut packed);
        assert_eq!(packed[0], before | FirstOctetFlags::RID.bits());
    }

    #[test]
    fn send_tid_toggles_perspective_bit() {
        assert_eq!(WtpPdu::send_tid(0x0001), 0x8001);
        assert_eq!(WtpPdu::send_tid(0x8001), 0x0001);
    }
}
