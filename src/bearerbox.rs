// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The bearerbox framing channel: cancellable, timed socket I/O driving
//! the length-prefixed `Msg` framing Kannel's `gw/bb_msg.c`-style boxc
//! protocol uses.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::{
    io::{self, AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf},
    net::TcpStream,
    time::timeout,
};
use tokio_util::sync::CancellationToken;

use crate::{addr::AddrTuple, dispatcher::WdpDatagram};

const LENGTH_PREFIX_BYTES: usize = 4;
/// Guards against a corrupt length prefix turning into an unbounded
/// allocation.
const MAX_MSG_BYTES: u32 = 16 * 1024 * 1024;

/// A `wdp_datagram`-typed message, or the periodic heartbeat.
#[derive(Debug, Clone)]
pub enum Msg {
    Datagram(WdpDatagram),
    Heartbeat { load: f32 },
}

async fn io_with_timeout<F, T>(
    label: &'static str,
    fut: F,
    io_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<T>
where
    F: std::future::Future<Output = std::io::Result<T>>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(anyhow!("{label} cancelled")),
        res = timeout(io_timeout, fut) => {
            match res {
                Ok(Ok(v)) => Ok(v),
                Ok(Err(e)) => Err(e.into()),
                Err(_) => Err(anyhow!("{label} timeout")),
            }
        }
    }
}

pub struct BearerboxChannel {
    stream: TcpStream,
    io_timeout: Duration,
    cancel: CancellationToken,
}

const TAG_DATAGRAM: u8 = 0;
const TAG_HEARTBEAT: u8 = 1;

impl BearerboxChannel {
    pub async fn connect(
        host: &str,
        port: u16,
        io_timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let stream = TcpStream::connect((host, port))
            .await
            .with_context(|| format!("connecting to bearerbox at {host}:{port}"))?;
        Ok(Self {
            stream,
            io_timeout,
            cancel,
        })
    }

    /// Wraps an already-established connection in the same framing this
    /// channel uses to dial out. The production wapbox always dials
    /// (`connect`); this is the accept-side counterpart, useful for
    /// anything speaking the boxc protocol from the listening end (test
    /// harnesses standing in for a bearerbox).
    pub fn from_stream(stream: TcpStream, io_timeout: Duration, cancel: CancellationToken) -> Self {
        Self {
            stream,
            io_timeout,
            cancel,
        }
    }

    pub async fn read_msg(&mut self) -> Result<Msg> {
        read_msg_from(&mut self.stream, self.io_timeout, &self.cancel).await
    }

    pub async fn write_msg(&mut self, msg: &Msg) -> Result<()> {
        write_msg_to(&mut self.stream, msg, self.io_timeout, &self.cancel).await
    }

    /// Splits the connection into independent read/write halves so the
    /// reader and the outbound-queue drain can run as separate tasks.
    pub fn split(self) -> (BearerboxReader, BearerboxWriter) {
        let (rh, wh) = io::split(self.stream);
        (
            BearerboxReader {
                half: rh,
                io_timeout: self.io_timeout,
                cancel: self.cancel.clone(),
            },
            BearerboxWriter {
                half: wh,
                io_timeout: self.io_timeout,
                cancel: self.cancel,
            },
        )
    }
}

pub struct BearerboxReader {
    half: ReadHalf<TcpStream>,
    io_timeout: Duration,
    cancel: CancellationToken,
}

impl BearerboxReader {
    pub async fn read_msg(&mut self) -> Result<Msg> {
        read_msg_from(&mut self.half, self.io_timeout, &self.cancel).await
    }
}

pub struct BearerboxWriter {
    half: WriteHalf<TcpStream>,
    io_timeout: Duration,
    cancel: CancellationToken,
}

impl BearerboxWriter {
    pub async fn write_msg(&mut self, msg: &Msg) -> Result<()> {
        write_msg_to(&mut self.half, msg, self.io_timeout, &self.cancel).await
    }
}

async fn read_msg_from<R>(r: &mut R, io_timeout: Duration, cancel: &CancellationToken) -> Result<Msg>
where R: AsyncReadExt + Unpin {
    let len = io_with_timeout("bearerbox read length prefix", r.read_u32(), io_timeout, cancel).await?;
    if len > MAX_MSG_BYTES {
        return Err(anyhow!("bearerbox message length {len} exceeds limit"));
    }
    let mut body = vec![0u8; len as usize];
    io_with_timeout("bearerbox read body", r.read_exact(&mut body), io_timeout, cancel).await?;
    decode_msg(&body)
}

async fn write_msg_to<W>(
    w: &mut W,
    msg: &Msg,
    io_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<()>
where W: AsyncWriteExt + Unpin {
    let body = encode_msg(msg);
    let mut framed = BytesMut::with_capacity(LENGTH_PREFIX_BYTES + body.len());
    framed.put_u32(body.len() as u32);
    framed.extend_from_slice(&body);
    io_with_timeout("bearerbox write", w.write_all(&framed), io_timeout, cancel).await?;
    Ok(())
}

fn encode_msg(msg: &Msg) -> Bytes {
    let mut out = BytesMut::new();
    match msg {
        Msg::Datagram(dgram) => {
            out.put_u8(TAG_DATAGRAM);
            put_addr(&mut out, &dgram.addr);
            out.put_u16(dgram.dst_port);
            out.put_u32(dgram.user_data.len() as u32);
            out.extend_from_slice(&dgram.user_data);
        },
        Msg::Heartbeat { load } => {
            out.put_u8(TAG_HEARTBEAT);
            out.put_f32(*load);
        },
    }
    out.freeze()
}

fn decode_msg(buf: &[u8]) -> Result<Msg> {
    let mut cur = Bytes::copy_from_slice(buf);
    if cur.is_empty() {
        return Err(anyhow!("empty bearerbox message"));
    }
    let tag = cur.get_u8();
    match tag {
        TAG_DATAGRAM => {
            let addr = get_addr(&mut cur)?;
            if cur.remaining() < 6 {
                return Err(anyhow!("truncated datagram message"));
            }
            let dst_port = cur.get_u16();
            let len = cur.get_u32() as usize;
            if cur.remaining() < len {
                return Err(anyhow!("truncated datagram payload"));
            }
            let user_data = cur.copy_to_bytes(len);
            Ok(Msg::Datagram(WdpDatagram {
                addr,
                dst_port,
                user_data,
            }))
        },
        TAG_HEARTBEAT => {
            if cur.remaining() < 4 {
                return Err(anyhow!("truncated heartbeat message"));
            }
            Ok(Msg::Heartbeat { load: cur.get_f32() })
        },
        other => Err(anyhow!("unknown bearerbox message tag {other}")),
    }
}

fn put_addr(out: &mut BytesMut, addr: &AddrTuple) {
    put_ip(out, addr.remote_addr);
    out.put_u16(addr.remote_port);
    put_ip(out, addr.local_addr);
    out.put_u16(addr.local_port);
}

fn put_ip(out: &mut BytesMut, ip: std::net::IpAddr) {
    match ip {
        std::net::IpAddr::V4(v4) => {
            out.put_u8(4);
            out.extend_from_slice(&v4.octets());
        },
        std::net::IpAddr::V6(v6) => {
            out.put_u8(6);
            out.extend_from_slice(&v6.octets());
        },
    }
}

fn get_addr(cur: &mut Bytes) -> Result<AddrTuple> {
    let remote_addr = get_ip(cur)?;
    if cur.remaining() < 2 {
        return Err(anyhow!("truncated address tuple"));
    }
    let remote_port = cur.get_u16();
    let local_addr = get_ip(cur)?;
    if cur.remaining() < 2 {
        return Err(anyhow!("truncated address tuple"));
    }
    let local_port = cur.get_u16();
    Ok(AddrTuple::new(remote_addr, remote_port, local_addr, local_port))
}

fn get_ip(cur: &mut Bytes) -> Result<std::net::IpAddr> {
    if cur.is_empty() {
        return Err(anyhow!("truncated IP family tag"));
    }
    match cur.get_u8() {
        4 => {
            if cur.remaining() < 4 {
                return Err(anyhow!("truncated IPv4 address"));
            }
            let mut octets = [0u8; 4];
            cur.copy_to_slice(&mut octets);
            Ok(std::net::IpAddr::V4(std::net::Ipv4Addr::from(octets)))
        },
        6 => {
            if cur.remaining() < 16 {
                return Err(anyhow!("truncated IPv6 address"));
            }
            let mut octets = [0u8; 16];
            cur.copy_to_slice(&mut octets);
            Ok(std::net::IpAddr::V6(std::net::Ipv6Addr::from(octets)))
        },
        other => Err(anyhow!("unknown IP family tag {other}")),
    }
}

/// Exponentially-weighted moving average of per-interval queue depth,
/// used as a documented substitute for the one-minute OS load average
/// the original `heartbeat` message reports: this gateway has no
/// portable way to read `getloadavg()`-equivalent state, so it
/// approximates load with how backed up its own inbound queue is.
pub struct QueueDepthEwma {
    alpha: f32,
    value: f32,
}

impl QueueDepthEwma {
    pub fn new(alpha: f32) -> Self {
        Self { alpha, value: 0.0 }
    }

    pub fn observe(&mut self, depth: usize) -> f32 {
        self.value = self.alpha * depth as f32 + (1.0 - self.alpha) * self.value;
        self.value
    }
}
