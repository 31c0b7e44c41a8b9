// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! End-to-end scenario 1: Connect, a single Get fetched
//! through a fake HTTP origin, then Disconnect, driven entirely over the
//! wire against a running [`Gateway`] with a real loopback bearerbox
//! stand-in.

use bytes::Bytes;
use wapbox_core::{
    http::HttpCompletion,
    wsp::{headers::HeaderList, pdu::WspPdu},
    wtp::pdu::WtpPdu,
};

use crate::integration_tests::common::{
    device_addr, recv_datagram, send_datagram, spawn_gateway_with_fake_bearerbox, FakeHttpClient,
};

const WTP_PORT: u16 = 9201;

fn invoke(tid: u16, tcl: u8, u_ack: bool, user_data: Bytes) -> WtpPdu {
    WtpPdu::Invoke {
        tid,
        gtr: true,
        ttr: true,
        rid: false,
        tid_new: false,
        u_ack,
        tcl,
        user_data,
        tpi: Vec::new(),
    }
}

fn ack_for(result: &WtpPdu) -> WtpPdu {
    let WtpPdu::Result { tid, .. } = result else { panic!("expected a Result PDU") };
    WtpPdu::Ack {
        tid: *tid,
        rid: false,
        tid_verify: false,
        tpi: Vec::new(),
    }
}

fn unpack_result(dgram_user_data: &[u8]) -> WtpPdu {
    WtpPdu::unpack(dgram_user_data).expect("gateway reply is a well-formed WTP PDU")
}

#[tokio::test]
async fn connect_get_and_disconnect_round_trip() {
    let (client, mut started, completions) = FakeHttpClient::new();
    let (mut channel, cancel) = spawn_gateway_with_fake_bearerbox(client).await;
    let addr = device_addr(WTP_PORT);

    // --- Connect ---
    let connect = WspPdu::Connect {
        version: (1, 3),
        caps: Vec::new(),
        headers: HeaderList::new(),
    };
    send_datagram(&mut channel, addr, WTP_PORT, invoke(1, 2, true, connect.pack()).pack()).await;

    let reply = unpack_result(&recv_datagram(&mut channel).await.user_data);
    let WtpPdu::Result { user_data, .. } = &reply else { panic!("expected Result for Connect") };
    let WspPdu::ConnectReply { session_id, .. } = WspPdu::unpack(user_data).expect("decode ConnectReply") else {
        panic!("expected ConnectReply")
    };
    assert_eq!(session_id, 1);
    send_datagram(&mut channel, addr, WTP_PORT, ack_for(&reply).pack()).await;

    // --- Get ---
    let get = WspPdu::Get {
        uri: "http://origin.example/index.wml".to_string(),
        headers: HeaderList::new(),
    };
    send_datagram(&mut channel, addr, WTP_PORT, invoke(2, 2, true, get.pack()).pack()).await;

    let started_req = started.recv().await.expect("Get triggers an HTTP fetch");
    assert_eq!(started_req.url, "http://origin.example/index.wml");
    completions
        .send(HttpCompletion {
            id: started_req.id,
            status: 200,
            final_url: started_req.url,
            headers: HeaderList::new(),
            body: Bytes::from_static(b"hello wap"),
        })
        .expect("deliver fake completion");

    let reply = unpack_result(&recv_datagram(&mut channel).await.user_data);
    let WtpPdu::Result { user_data, .. } = &reply else { panic!("expected Result for Get") };
    let WspPdu::Reply { status, body, .. } = WspPdu::unpack(user_data).expect("decode Reply") else {
        panic!("expected Reply")
    };
    assert_eq!(status, 0x20);
    assert_eq!(&body[..], b"hello wap");
    send_datagram(&mut channel, addr, WTP_PORT, ack_for(&reply).pack()).await;

    // --- Disconnect (class 0: unconfirmed, no reply expected) ---
    let disconnect = WspPdu::Disconnect { session_id: 1 };
    send_datagram(&mut channel, addr, WTP_PORT, invoke(3, 0, false, disconnect.pack()).pack()).await;

    cancel.cancel();
}
