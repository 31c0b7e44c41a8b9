// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Error types shared across the codec, WTP and WSP layers.
//!
//! Wire-protocol violations are modeled as typed [`AbortReason`] values so
//! that state machines can match on them directly; everything else funnels
//! through `anyhow` at the task boundary, splitting `thiserror` (leaf
//! types) from `anyhow::Result` (call sites).

use thiserror::Error;

/// WTP/WSP abort reason codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AbortReason {
    ProtoErr = 0x00,
    Disconnect = 0x02,
    Suspend = 0x03,
    Resume = 0x04,
    Congestion = 0x05,
    ConnectErr = 0x06,
    MruExceeded = 0x07,
    MorExceeded = 0x08,
    PeerReq = 0x09,
    NetErr = 0x0a,
    UserReq = 0x0b,
    NoResponse = 0x0c,
    InvalidTid = 0x0d,
    NotImplementedSar = 0x0e,
    WtpVersionZero = 0x0f,
}

impl AbortReason {
    pub const fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0x00 => Self::ProtoErr,
            0x02 => Self::Disconnect,
            0x03 => Self::Suspend,
            0x04 => Self::Resume,
            0x05 => Self::Congestion,
            0x06 => Self::ConnectErr,
            0x07 => Self::MruExceeded,
            0x08 => Self::MorExceeded,
            0x09 => Self::PeerReq,
            0x0a => Self::NetErr,
            0x0b => Self::UserReq,
            0x0c => Self::NoResponse,
            0x0d => Self::InvalidTid,
            0x0e => Self::NotImplementedSar,
            0x0f => Self::WtpVersionZero,
            _ => return None,
        })
    }
}

/// Errors raised by the codec primitives.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("end of data while decoding")]
    EndOfData,
    #[error("uintvar continues past the 5-octet limit")]
    UintvarTooLong,
    #[error("parse limit stack underflow")]
    LimitStackUnderflow,
    #[error("parse limit {requested} exceeds remaining {remaining} bytes")]
    LimitExceedsBuffer { requested: usize, remaining: usize },
}

/// Errors raised while decoding a WTP PDU off the wire.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WtpPduError {
    #[error("buffer shorter than the 3-octet WTP header")]
    Truncated,
    #[error("unsupported WTP version (expected 0)")]
    BadVersion,
    #[error("segmentation requested (GTR/TTR clear), SAR is not implemented")]
    SegmentationRequested,
    #[error("transmission class {0} out of range")]
    BadTcl(u8),
    #[error("unknown PDU type {0}")]
    UnknownPduType(u8),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl WtpPduError {
    /// The abort reason a Responder/Initiator must send for this decode
    /// failure,(a).
    pub fn abort_reason(&self) -> AbortReason {
        match self {
            WtpPduError::BadVersion => AbortReason::WtpVersionZero,
            WtpPduError::SegmentationRequested => AbortReason::NotImplementedSar,
            WtpPduError::BadTcl(_) | WtpPduError::UnknownPduType(_) => {
                AbortReason::ProtoErr
            },
            WtpPduError::Truncated | WtpPduError::Codec(_) => AbortReason::ProtoErr,
        }
    }
}

/// Errors raised while decoding a binary WSP header list.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HeaderCodecError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("unknown well-known field number {0} in code page {1}")]
    UnknownField(u8, u8),
    #[error("malformed value for field {0}")]
    MalformedValue(&'static str),
    #[error("code page {0} is not recognized")]
    UnknownCodePage(u8),
}

/// Configuration load/validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required option {0}")]
    MissingOption(&'static str),
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },
    #[error("map-url-{0} referenced by map-url-max but not present")]
    MissingMapUrlEntry(u32),
}
