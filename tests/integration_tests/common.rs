// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Shared harness for end-to-end tests that drive a [`Gateway`] over a
//! real loopback socket standing in for the bearerbox, with a fake HTTP
//! origin underneath it.

use std::{
    net::{IpAddr, Ipv4Addr},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use bytes::Bytes;
use tokio::{
    net::TcpListener,
    sync::{mpsc, Mutex},
};
use tokio_util::sync::CancellationToken;
use wapbox_core::{
    addr::AddrTuple,
    bearerbox::{BearerboxChannel, Msg},
    cfg::config::Config,
    compile::PassthroughCompiler,
    dispatcher::WdpDatagram,
    gateway::Gateway,
    http::{HttpClient, HttpCompletion, RequestId},
    wsp::headers::HeaderList,
};

/// An [`HttpClient`] whose requests are observed and answered from the
/// test side instead of hitting a real origin.
pub struct FakeHttpClient {
    next_id: AtomicU64,
    started_tx: mpsc::UnboundedSender<StartedRequest>,
    done_rx: Mutex<mpsc::UnboundedReceiver<HttpCompletion>>,
}

pub struct StartedRequest {
    pub id: RequestId,
    pub url: String,
}

impl FakeHttpClient {
    /// Returns the client plus the channel ends the test drives it with:
    /// a receiver for every started request, and a sender to push the
    /// completion that `receive_result` should hand back.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<StartedRequest>, mpsc::UnboundedSender<HttpCompletion>) {
        let (started_tx, started_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let client = Arc::new(Self {
            next_id: AtomicU64::new(1),
            started_tx,
            done_rx: Mutex::new(done_rx),
        });
        (client, started_rx, done_tx)
    }
}

#[async_trait::async_trait]
impl HttpClient for FakeHttpClient {
    async fn start_request(&self, url: &str, _headers: HeaderList, _body: Bytes) -> RequestId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let _ = self.started_tx.send(StartedRequest {
            id,
            url: url.to_string(),
        });
        id
    }

    async fn receive_result(&self) -> HttpCompletion {
        self.done_rx.lock().await.recv().await.expect("test keeps the completion sender alive")
    }
}

/// The device side of the `(remote, local)` tuple every WTP/WSP machine
/// in this crate is keyed by; `gateway_port` is the port the fake
/// bearerbox reports as the gateway's local port in each datagram.
pub fn device_addr(gateway_port: u16) -> AddrTuple {
    AddrTuple::new(
        IpAddr::V4(Ipv4Addr::new(10, 1, 1, 1)),
        5555,
        IpAddr::V4(Ipv4Addr::new(10, 1, 1, 2)),
        gateway_port,
    )
}

fn minimal_config_yaml(bearerbox_port: u16) -> String {
    format!(
        r#"
wapbox-port: 9201
bearerbox-host: "127.0.0.1"
bearerbox-port: {bearerbox_port}
heartbeat-freq: 3600
timer-freq: 1
map-url-max: 0
"#
    )
}

/// Binds a loopback listener to stand in for the bearerbox, starts a
/// [`Gateway`] dialing into it with the given HTTP collaborator, and
/// accepts the resulting connection, wrapping it the same way the
/// gateway itself would (`BearerboxChannel::from_stream`).
pub async fn spawn_gateway_with_fake_bearerbox(http_client: Arc<dyn HttpClient>) -> (BearerboxChannel, CancellationToken) {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.expect("bind fake bearerbox");
    let port = listener.local_addr().expect("local addr").port();

    let cfg: Config = serde_yaml::from_str(&minimal_config_yaml(port)).expect("parse test config");
    let cancel = CancellationToken::new();
    let gateway_cancel = cancel.clone();
    let compiler = Arc::new(PassthroughCompiler);

    tokio::spawn(async move {
        let _ = Gateway::new(cfg, http_client, compiler, gateway_cancel).run().await;
    });

    let (stream, _peer) = tokio::time::timeout(Duration::from_secs(5), listener.accept())
        .await
        .expect("gateway dialed in time")
        .expect("accept");
    let channel = BearerboxChannel::from_stream(stream, Duration::from_secs(5), cancel.clone());
    (channel, cancel)
}

pub async fn send_datagram(channel: &mut BearerboxChannel, addr: AddrTuple, dst_port: u16, user_data: Bytes) {
    channel
        .write_msg(&Msg::Datagram(WdpDatagram {
            addr,
            dst_port,
            user_data,
        }))
        .await
        .expect("write datagram to gateway");
}

/// Reads messages until the next non-heartbeat datagram arrives.
pub async fn recv_datagram(channel: &mut BearerboxChannel) -> WdpDatagram {
    loop {
        match tokio::time::timeout(Duration::from_secs(5), channel.read_msg())
            .await
            .expect("gateway responded in time")
            .expect("read datagram from gateway")
        {
            Msg::Datagram(dgram) => return dgram,
            Msg::Heartbeat { .. } => continue,
        }
    }
}
