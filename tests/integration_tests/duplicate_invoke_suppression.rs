// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! A duplicate Invoke (same tid, RID clear) arriving while the first is
//! still being processed produces no second reply; only a
//! retransmission (RID set) gets one.

use wapbox_core::{wsp::{headers::HeaderList, pdu::WspPdu}, wtp::pdu::WtpPdu};

use crate::integration_tests::common::{device_addr, recv_datagram, send_datagram, spawn_gateway_with_fake_bearerbox, FakeHttpClient};

const WTP_PORT: u16 = 9201;

fn connect_invoke(rid: bool) -> WtpPdu {
    let body = WspPdu::Connect {
        version: (1, 3),
        caps: Vec::new(),
        headers: HeaderList::new(),
    }
    .pack();
    WtpPdu::Invoke {
        tid: 1,
        gtr: true,
        ttr: true,
        rid,
        tid_new: false,
        u_ack: true,
        tcl: 2,
        user_data: body,
        tpi: Vec::new(),
    }
}

#[tokio::test]
async fn duplicate_invoke_is_dropped_silently() {
    let (client, _started, _completions) = FakeHttpClient::new();
    let (mut channel, cancel) = spawn_gateway_with_fake_bearerbox(client).await;
    let addr = device_addr(WTP_PORT);

    send_datagram(&mut channel, addr, WTP_PORT, connect_invoke(false).pack()).await;
    // A duplicate of the same Invoke, not yet a retransmission (RID
    // clear): the Responder machine already exists for (addr, tid) and
    // silently drops it rather than starting a second reply.
    send_datagram(&mut channel, addr, WTP_PORT, connect_invoke(false).pack()).await;

    let first = recv_datagram(&mut channel).await;
    let reply = WtpPdu::unpack(&first.user_data).expect("decode reply");
    assert!(matches!(reply, WtpPdu::Result { .. }), "the one reply is the ConnectReply Result");

    // Nothing else should be queued: a further read must time out, not
    // hand back a second copy of the same reply.
    let second = tokio::time::timeout(std::time::Duration::from_millis(300), channel.read_msg()).await;
    assert!(second.is_err(), "duplicate invoke must not produce a second reply");

    cancel.cancel();
}
