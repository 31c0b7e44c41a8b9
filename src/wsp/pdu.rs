// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! WSP PDU types, grounded on the tag set in
//! `examples/original_source/gw/wsp_pdu.h` / `wap/wsp.h`. Not every
//! variant is FSM-driven: the full tag set is
//! carried so the dispatcher can reject unsupported PDUs cleanly by name
//! instead of falling through to a generic parse error.

use bytes::Bytes;

use crate::{codec::ParseContext, error::HeaderCodecError, wsp::headers::HeaderList};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PduType {
    Connect,
    ConnectReply,
    Redirect,
    Reply,
    Disconnect,
    Get,
    Post,
    Suspend,
    Resume,
}

impl PduType {
    pub fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            0x01 => Self::Connect,
            0x02 => Self::ConnectReply,
            0x06 => Self::Redirect,
            0x04 => Self::Reply,
            0x05 => Self::Disconnect,
            0x40 => Self::Get,
            0x60 => Self::Post,
            0x09 => Self::Suspend,
            0x0a => Self::Resume,
            _ => return None,
        })
    }

    pub fn tag(self) -> u8 {
        match self {
            Self::Connect => 0x01,
            Self::ConnectReply => 0x02,
            Self::Redirect => 0x06,
            Self::Reply => 0x04,
            Self::Disconnect => 0x05,
            Self::Get => 0x40,
            Self::Post => 0x60,
            Self::Suspend => 0x09,
            Self::Resume => 0x0a,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WspPdu {
    Connect {
        version: (u8, u8),
        caps: Vec<u8>,
        headers: HeaderList,
    },
    ConnectReply {
        session_id: u32,
        caps: Vec<u8>,
        headers: HeaderList,
    },
    Get {
        uri: String,
        headers: HeaderList,
    },
    Post {
        uri: String,
        headers: HeaderList,
        body: Bytes,
    },
    Reply {
        status: u8,
        headers: HeaderList,
        body: Bytes,
    },
    Disconnect {
        session_id: u32,
    },
    Redirect,
    Suspend {
        session_id: u32,
    },
    Resume {
        session_id: u32,
    },
}

impl WspPdu {
    pub fn pdu_type(&self) -> PduType {
        match self {
            WspPdu::Connect { .. } => PduType::Connect,
            WspPdu::ConnectReply { .. } => PduType::ConnectReply,
            WspPdu::Get { .. } => PduType::Get,
            WspPdu::Post { .. } => PduType::Post,
            WspPdu::Reply { .. } => PduType::Reply,
            WspPdu::Disconnect { .. } => PduType::Disconnect,
            WspPdu::Redirect => PduType::Redirect,
            WspPdu::Suspend { .. } => PduType::Suspend,
            WspPdu::Resume { .. } => PduType::Resume,
        }
    }

    pub fn pack(&self) -> Bytes {
        let mut out = Vec::new();
        out.push(self.pdu_type().tag());
        match self {
            WspPdu::Connect {
                version,
                caps,
                headers,
            } => {
                out.push((version.0 << 4) | (version.1 & 0x0f));
                push_len_prefixed(&mut out, caps);
                out.extend(headers.pack());
            },
            WspPdu::ConnectReply {
                session_id,
                caps,
                headers,
            } => {
                out.extend(crate::codec::encode_uintvar(*session_id));
                push_len_prefixed(&mut out, caps);
                out.extend(headers.pack());
            },
            WspPdu::Get { uri, headers } => {
                let uri_bytes = uri.as_bytes();
                out.extend(crate::codec::encode_uintvar(uri_bytes.len() as u32));
                out.extend_from_slice(uri_bytes);
                out.extend(headers.pack());
            },
            WspPdu::Post { uri, headers, body } => {
                let header_bytes = headers.pack();
                out.extend(crate::codec::encode_uintvar(
                    (uri.len() + header_bytes.len()) as u32,
                ));
                out.extend(crate::codec::encode_uintvar(uri.len() as u32));
                out.extend_from_slice(uri.as_bytes());
                out.extend(&header_bytes);
                out.extend_from_slice(body);
            },
            WspPdu::Reply {
                status,
                headers,
                body,
            } => {
                let header_bytes = headers.pack();
                out.extend(crate::codec::encode_uintvar(header_bytes.len() as u32));
                out.push(*status);
                out.extend(&header_bytes);
                out.extend_from_slice(body);
            },
            WspPdu::Disconnect { session_id }
            | WspPdu::Suspend { session_id }
            | WspPdu::Resume { session_id } => {
                out.extend(crate::codec::encode_uintvar(*session_id));
            },
            WspPdu::Redirect => {},
        }
        Bytes::from(out)
    }

    pub fn unpack(buf: &[u8]) -> Result<Self, HeaderCodecError> {
        let mut ctx = ParseContext::new(buf);
        let tag = ctx.read_u8().map_err(HeaderCodecError::Codec)?;
        let pdu_type =
            PduType::from_tag(tag).ok_or(HeaderCodecError::UnknownField(tag, 0))?;
        match pdu_type {
            PduType::Connect => {
                let version_byte = ctx.read_u8().map_err(HeaderCodecError::Codec)?;
                let version = (version_byte >> 4, version_byte & 0x0f);
                let caps = read_len_prefixed(&mut ctx)?;
                let headers = HeaderList::unpack_rest(&mut ctx)?;
                Ok(WspPdu::Connect {
                    version,
                    caps,
                    headers,
                })
            },
            PduType::ConnectReply => {
                let session_id = ctx.read_uintvar().map_err(HeaderCodecError::Codec)?;
                let caps = read_len_prefixed(&mut ctx)?;
                let headers = HeaderList::unpack_rest(&mut ctx)?;
                Ok(WspPdu::ConnectReply {
                    session_id,
                    caps,
                    headers,
                })
            },
            PduType::Get => {
                let uri_len = ctx.read_uintvar().map_err(HeaderCodecError::Codec)?;
                let uri_bytes = ctx
                    .read_bytes(uri_len as usize)
                    .map_err(HeaderCodecError::Codec)?;
                let uri = String::from_utf8_lossy(uri_bytes).into_owned();
                let headers = HeaderList::unpack_rest(&mut ctx)?;
                Ok(WspPdu::Get { uri, headers })
            },
            PduType::Post => {
                let _total_len = ctx.read_uintvar().map_err(HeaderCodecError::Codec)?;
                let uri_len = ctx.read_uintvar().map_err(HeaderCodecError::Codec)?;
                let uri_bytes = ctx
                    .read_bytes(uri_len as usize)
                    .map_err(HeaderCodecError::Codec)?;
                let uri = String::from_utf8_lossy(uri_bytes).into_owned();
                let headers = HeaderList::unpack_rest(&mut ctx)?;
                let body = Bytes::copy_from_slice(ctx.read_rest());
                Ok(WspPdu::Post { uri, headers, body })
            },
            PduType::Reply => {
                let header_len = ctx.read_uintvar().map_err(HeaderCodecError::Codec)?;
                let status = ctx.read_u8().map_err(HeaderCodecError::Codec)?;
                ctx.push_limit(header_len as usize)
                    .map_err(HeaderCodecError::Codec)?;
                let headers = HeaderList::unpack_rest(&mut ctx)?;
                ctx.pop_limit().map_err(HeaderCodecError::Codec)?;
                let body = Bytes::copy_from_slice(ctx.read_rest());
                Ok(WspPdu::Reply {
                    status,
                    headers,
                    body,
                })
            },
            PduType::Disconnect => Ok(WspPdu::Disconnect {
                session_id: ctx.read_uintvar().map_err(HeaderCodecError::Codec)?,
            }),
            PduType::Suspend => Ok(WspPdu::Suspend {
                session_id: ctx.read_uintvar().map_err(HeaderCodecError::Codec)?,
            }),
            PduType::Resume => Ok(WspPdu::Resume {
                session_id: ctx.read_uintvar().map_err(HeaderCodecError::Codec)?,
            }),
            PduType::Redirect => Ok(WspPdu::Redirect),
        }
    }
}

fn push_len_prefixed(out: &mut Vec<u8>, data: &[u8]) {
    out.extend(crate::codec::encode_uintvar(data.len() as u32));
    out.extend_from_slice(data);
}

fn read_len_prefixed(ctx: &mut ParseContext<'_>) -> Result<Vec<u8>, HeaderCodecError> {
    let len = ctx.read_uintvar().map_err(HeaderCodecError::Codec)?;
    Ok(ctx
        .read_bytes(len as usize)
        .map_err(HeaderCodecError::Codec)?
        .to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_round_trips() {
        let pdu = WspPdu::Get {
            uri: "kannel:alive".to_string(),
            headers: HeaderList::new(),
        };
        let packed = pdu.pack();
        assert_eq!(WspPdu::unpack(&packed).expect("unpack"), pdu);
    }

    #[test]
    fn disconnect_round_trips() {
        let pdu = WspPdu::Disconnect { session_id: 7 };
        let packed = pdu.pack();
        assert_eq!(WspPdu::unpack(&packed).expect("unpack"), pdu);
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let buf = [0xff];
        assert!(WspPdu::unpack(&buf).is_err());
    }
}
