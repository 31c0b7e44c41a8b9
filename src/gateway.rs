// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Top-level task wiring:
//! one dispatcher task, one WTP Responder task, one WTP Initiator task,
//! one WSP Session task (running method machines inline), one WSP
//! connectionless task, one timer-watcher task per WTP layer, one
//! outbound-queue task draining toward bearerbox, and N HTTP worker
//! tasks. Every task's inbox is an unbounded channel; a machine's state
//! is touched only by the task that owns it.
//!
//! Each of the Responder and Initiator tasks owns its own `TimerWheel`
//! rather than sharing one behind a handle-to-layer routing table.
//! Their timers are touched only by their own task either way, so a
//! shared instance would add routing indirection with no concurrency
//! benefit.

use std::{collections::HashMap, sync::Arc};

use anyhow::{Context, Result};
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    addr::AddrTuple,
    bearerbox::{BearerboxChannel, Msg, QueueDepthEwma},
    cfg::config::Config,
    compile::{self, Compiler},
    dispatcher::{self, DispatcherChannels, WdpDatagram},
    event::{MachineId, WapEvent},
    http::{HttpClient, HttpCompletion, InFlightContext, InFlightKind, InFlightMap},
    timer::TimerWheel,
    urlmap::UrlMap,
    wsp::{
        connectionless,
        headers::HeaderList,
        method::{self, MethodMachine},
        pdu::WspPdu,
        session::{self, SessionMachine},
    },
    wtp::{
        pdu::{Tpi, WtpPdu},
        responder::{self, ResponderMachine},
        tid_cache::{TidCache, Verdict},
    },
};

/// A WDP datagram queued for delivery back through the bearerbox.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub addr: AddrTuple,
    pub dst_port: u16,
    pub user_data: Bytes,
}

/// A TPI tag this gateway recognizes for "peer does not support TID
/// caching"; not part of the fixed WTP header, so it
/// travels as an optional trailer item like any other TPI.
const TPI_NO_CACHE: u8 = 0x01;

fn no_cache_supported(tpi: &[Tpi]) -> bool {
    tpi.iter().any(|t| t.tag == TPI_NO_CACHE)
}

/// Messages the session task consumes: protocol events from the
/// Responder task, plus HTTP completions, which the `WapEvent` union
/// doesn't model (HTTP is an external-interface concern, not a
/// protocol event).
enum SessionInbox {
    Wap(WapEvent),
    HttpDone(InFlightContext, HttpCompletion),
}

/// Everything the running gateway needs to keep looping until shutdown.
pub struct Gateway {
    cfg: Config,
    http_client: Arc<dyn HttpClient>,
    compiler: Arc<dyn Compiler>,
    cancel: CancellationToken,
}

impl Gateway {
    pub fn new(
        cfg: Config,
        http_client: Arc<dyn HttpClient>,
        compiler: Arc<dyn Compiler>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            cfg,
            http_client,
            compiler,
            cancel,
        }
    }

    /// Connects to the bearerbox and runs every task until `cancel` is
    /// signalled or the bearerbox connection drops.
    pub async fn run(self) -> Result<()> {
        let url_map = Arc::new(UrlMap::new(
            self.cfg.url_map_rules().context("expanding map-url entries")?,
            self.cfg.device_home.clone(),
        ));

        let bearerbox = BearerboxChannel::connect(
            &self.cfg.bearerbox_host,
            self.cfg.bearerbox_port,
            self.cfg.runtime.bearerbox_io_timeout,
            self.cancel.clone(),
        )
        .await
        .context("connecting to bearerbox")?;
        let (mut reader, mut writer) = bearerbox.split();

        let (responder_tx, responder_rx) = mpsc::unbounded_channel();
        let (connectionless_tx, connectionless_rx) = mpsc::unbounded_channel();
        let (session_tx, session_rx) = mpsc::unbounded_channel::<SessionInbox>();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Outbound>();
        let in_flight = Arc::new(InFlightMap::new());

        let dispatcher_channels = DispatcherChannels {
            connectionless: connectionless_tx.clone(),
            wtp_responder: responder_tx.clone(),
            // This gateway never originates a WTP transaction of its own
            // (push and segmentation/reassembly are out of scope), so
            // initiator-side datagrams are logged and dropped rather
            // than fed into a standing task.
            wtp_initiator: {
                let (tx, mut rx) = mpsc::unbounded_channel();
                tokio::spawn(async move {
                    while let Some(ev) = rx.recv().await {
                        tracing::debug!(?ev, "dropping datagram routed to the unused initiator role");
                    }
                });
                tx
            },
        };

        tokio::spawn(run_wtp_responder_task(responder_rx, session_tx.clone(), outbound_tx.clone()));
        tokio::spawn(run_connectionless_task(
            connectionless_rx,
            url_map.clone(),
            self.http_client.clone(),
            in_flight.clone(),
        ));
        tokio::spawn(run_wsp_session_task(
            session_rx,
            responder_tx.clone(),
            url_map.clone(),
            self.http_client.clone(),
            self.compiler.clone(),
            in_flight.clone(),
        ));
        tokio::spawn(run_http_receive_task(
            self.http_client.clone(),
            session_tx.clone(),
            outbound_tx.clone(),
            in_flight.clone(),
        ));

        let heartbeat_freq = self.cfg.heartbeat_freq;
        let outbound_cancel = self.cancel.clone();
        tokio::spawn(async move {
            let mut ewma = QueueDepthEwma::new(0.3);
            let mut ticker = tokio::time::interval(heartbeat_freq);
            loop {
                tokio::select! {
                    _ = outbound_cancel.cancelled() => break,
                    Some(out) = outbound_rx.recv() => {
                        let datagram = WdpDatagram {
                            addr: out.addr,
                            dst_port: out.dst_port,
                            user_data: out.user_data,
                        };
                        if let Err(err) = writer.write_msg(&Msg::Datagram(datagram)).await {
                            tracing::error!(?err, "bearerbox write failed");
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        let load = ewma.observe(0);
                        if let Err(err) = writer.write_msg(&Msg::Heartbeat { load }).await {
                            tracing::error!(?err, "bearerbox heartbeat write failed");
                            break;
                        }
                    }
                }
            }
        });

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                msg = reader.read_msg() => {
                    match msg {
                        Ok(Msg::Datagram(dgram)) => dispatcher::route(dgram, &dispatcher_channels),
                        Ok(Msg::Heartbeat { .. }) => {},
                        Err(err) => {
                            tracing::error!(?err, "bearerbox read failed, shutting down");
                            return Err(err);
                        },
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------
// WTP Responder task

async fn run_wtp_responder_task(
    mut inbox: mpsc::UnboundedReceiver<WapEvent>,
    to_session: mpsc::UnboundedSender<SessionInbox>,
    outbound: mpsc::UnboundedSender<Outbound>,
) {
    let (timer, mut fired) = TimerWheel::new();
    tokio::spawn(timer.clone().run());

    let mut machines: HashMap<MachineId, ResponderMachine> = HashMap::new();
    let mut by_addr_tid: HashMap<(AddrTuple, u16), MachineId> = HashMap::new();
    let mut next_id: u64 = 1;
    let tid_cache = TidCache::new();

    loop {
        let ev = tokio::select! {
            Some(ev) = inbox.recv() => ev,
            Some((_, ev)) = fired.recv() => ev,
            else => break,
        };
        handle_responder_event(
            ev,
            &mut machines,
            &mut by_addr_tid,
            &mut next_id,
            &tid_cache,
            &timer,
            &to_session,
            &outbound,
        )
        .await;
    }
}

async fn handle_responder_event(
    ev: WapEvent,
    machines: &mut HashMap<MachineId, ResponderMachine>,
    by_addr_tid: &mut HashMap<(AddrTuple, u16), MachineId>,
    next_id: &mut u64,
    tid_cache: &TidCache,
    timer: &Arc<TimerWheel>,
    to_session: &mpsc::UnboundedSender<SessionInbox>,
    outbound: &mpsc::UnboundedSender<Outbound>,
) {
    let mut effects = Vec::new();
    let mut touched: Option<MachineId> = None;
    let mut reply_addr: Option<AddrTuple> = None;

    match ev {
        WapEvent::RcvInvoke { addr, pdu } => {
            let WtpPdu::Invoke {
                tid,
                rid,
                tid_new,
                u_ack,
                tcl,
                user_data,
                tpi,
                ..
            } = pdu
            else {
                return;
            };
            if let Some(&id) = by_addr_tid.get(&(addr, tid)) {
                touched = Some(id);
                if let Some(m) = machines.get_mut(&id) {
                    effects = if rid {
                        m.on_retransmitted_invoke()
                    } else {
                        Vec::new() // duplicate, silently dropped (invariant 2)
                    };
                }
            } else if tid_new {
                tid_cache.reset_for_verification(addr);
                let id = *next_id;
                *next_id += 1;
                let handle = timer.new_handle().await;
                let mut m = ResponderMachine::new(id, addr, tid, handle);
                let deferred = WapEvent::TrInvokeInd { handle: id, addr, tcl, user_data };
                effects = m.on_needs_tid_verification(deferred);
                machines.insert(id, m);
                by_addr_tid.insert((addr, tid), id);
                touched = Some(id);
            } else {
                match tid_cache.validate(addr, tid, no_cache_supported(&tpi)) {
                    Verdict::AcceptedNew | Verdict::AcceptedInWindow => {
                        let id = *next_id;
                        *next_id += 1;
                        let handle = timer.new_handle().await;
                        let mut m = ResponderMachine::new(id, addr, tid, handle);
                        effects = m.on_accepted_invoke(tcl, u_ack, user_data);
                        machines.insert(id, m);
                        by_addr_tid.insert((addr, tid), id);
                        touched = Some(id);
                    },
                    Verdict::OutOfWindow => {},
                    Verdict::NoCacheSupported => {
                        let id = *next_id;
                        *next_id += 1;
                        let handle = timer.new_handle().await;
                        let mut m = ResponderMachine::new(id, addr, tid, handle);
                        let deferred = WapEvent::TrInvokeInd { handle: id, addr, tcl, user_data };
                        effects = m.on_needs_tid_verification(deferred);
                        machines.insert(id, m);
                        by_addr_tid.insert((addr, tid), id);
                        touched = Some(id);
                    },
                }
            }
        },
        WapEvent::RcvAck { addr, pdu } => {
            let WtpPdu::Ack { tid, tid_verify, .. } = pdu else { return };
            let rcv_tid = tid ^ 0x8000;
            if let Some(&id) = by_addr_tid.get(&(addr, rcv_tid)) {
                touched = Some(id);
                if tid_verify {
                    tid_cache.confirm(addr, rcv_tid);
                }
                if let Some(m) = machines.get_mut(&id) {
                    effects = m.on_rcv_ack(tid_verify);
                }
            }
        },
        WapEvent::RcvAbort { addr, pdu } => {
            let WtpPdu::Abort { tid, .. } = pdu else { return };
            let rcv_tid = tid ^ 0x8000;
            if let Some(&id) = by_addr_tid.get(&(addr, rcv_tid)) {
                touched = Some(id);
                if let Some(m) = machines.get_mut(&id) {
                    effects = m.on_rcv_abort();
                }
            }
        },
        WapEvent::RcvErrorPdu { addr, tid, reason } => {
            reply_addr = Some(addr);
            effects = vec![responder::Effect::SendPdu(responder::abort_pdu_for(tid, reason))];
        },
        WapEvent::TrInvokeRes { handle } => {
            touched = Some(handle);
            if let Some(m) = machines.get_mut(&handle) {
                effects = m.on_tr_invoke_res();
            }
        },
        WapEvent::TrResultReq { handle, user_data } => {
            touched = Some(handle);
            if let Some(m) = machines.get_mut(&handle) {
                effects = m.on_tr_result_req(user_data);
            }
        },
        WapEvent::TrAbortReq { handle, reason, .. } => {
            touched = Some(handle);
            if let Some(m) = machines.get_mut(&handle) {
                effects = m.on_tr_abort_req(reason);
            }
        },
        WapEvent::TimerToA { handle } => {
            touched = Some(handle);
            if let Some(m) = machines.get_mut(&handle) {
                effects = m.on_timer_a();
            }
        },
        WapEvent::TimerToR { handle } => {
            touched = Some(handle);
            if let Some(m) = machines.get_mut(&handle) {
                effects = m.on_timer_r();
            }
        },
        _ => {},
    }

    let addr = touched
        .and_then(|id| machines.get(&id))
        .map(|m| m.addr)
        .or(reply_addr);
    let mut destroy = false;
    for effect in effects {
        match effect {
            responder::Effect::SendPdu(pdu) => {
                if let Some(addr) = addr {
                    let _ = outbound.send(Outbound {
                        addr,
                        dst_port: addr.remote_port,
                        user_data: pdu.pack(),
                    });
                }
            },
            responder::Effect::Publish(WapEvent::TDUnitdataReq { addr, user_data }) => {
                let _ = outbound.send(Outbound { addr, dst_port: addr.remote_port, user_data });
            },
            responder::Effect::Publish(ev) => {
                let _ = to_session.send(SessionInbox::Wap(ev));
            },
            responder::Effect::StartTimerA => {
                if let (Some(id), Some(m)) = (touched, touched.and_then(|id| machines.get(&id))) {
                    let after = if m.u_ack {
                        crate::wtp::constants::L_A_WITH_USER_ACK
                    } else {
                        crate::wtp::constants::L_A_WITHOUT_USER_ACK
                    };
                    timer.start(m.timer, after, WapEvent::TimerToA { handle: id }).await;
                }
            },
            responder::Effect::StartTimerR => {
                if let (Some(id), Some(m)) = (touched, touched.and_then(|id| machines.get(&id))) {
                    let after = if m.u_ack {
                        crate::wtp::constants::L_R_WITH_USER_ACK
                    } else {
                        crate::wtp::constants::L_R_WITHOUT_USER_ACK
                    };
                    timer.start(m.timer, after, WapEvent::TimerToR { handle: id }).await;
                }
            },
            responder::Effect::StopTimer => {
                if let Some(m) = touched.and_then(|id| machines.get(&id)) {
                    timer.stop(m.timer).await;
                }
            },
            responder::Effect::Destroy => destroy = true,
        }
    }

    if destroy && let Some(id) = touched {
        if let Some(m) = machines.remove(&id) {
            by_addr_tid.remove(&(m.addr, m.tid));
            timer.remove(m.timer).await;
        }
    }
}

// ---------------------------------------------------------------------
// WSP connectionless task

async fn run_connectionless_task(
    mut inbox: mpsc::UnboundedReceiver<WapEvent>,
    url_map: Arc<UrlMap>,
    http_client: Arc<dyn HttpClient>,
    in_flight: Arc<InFlightMap>,
) {
    while let Some(ev) = inbox.recv().await {
        let WapEvent::SUnitMethodInvokeInd { addr, tid, uri, headers, body } = ev else { continue };
        let mapped_url = url_map.map(&uri);
        let request_id = http_client.start_request(&mapped_url, headers, body).await;
        in_flight.insert(request_id, InFlightKind::Connectionless { addr, tid });
    }
}

// ---------------------------------------------------------------------
// WSP Session task (runs method machines inline "Multiplexing")

struct SessionState {
    sessions: HashMap<AddrTuple, SessionMachine>,
    connect_handle_to_addr: HashMap<MachineId, AddrTuple>,
    method_transaction_to_addr: HashMap<MachineId, AddrTuple>,
    method_addr: HashMap<MachineId, AddrTuple>,
    next_session_id: u32,
    next_method_id: u64,
}

async fn run_wsp_session_task(
    mut inbox: mpsc::UnboundedReceiver<SessionInbox>,
    to_responder: mpsc::UnboundedSender<WapEvent>,
    url_map: Arc<UrlMap>,
    http_client: Arc<dyn HttpClient>,
    compiler: Arc<dyn Compiler>,
    in_flight: Arc<InFlightMap>,
) {
    let mut st = SessionState {
        sessions: HashMap::new(),
        connect_handle_to_addr: HashMap::new(),
        method_transaction_to_addr: HashMap::new(),
        method_addr: HashMap::new(),
        next_session_id: 1,
        next_method_id: 1,
    };

    while let Some(msg) = inbox.recv().await {
        match msg {
            SessionInbox::Wap(ev) => {
                handle_session_wap_event(ev, &mut st, &to_responder, &url_map, &http_client, &in_flight).await;
            },
            SessionInbox::HttpDone(ctx, completion) => {
                handle_http_done(ctx, completion, &mut st, &to_responder, &compiler).await;
            },
        }
    }
}

async fn handle_session_wap_event(
    ev: WapEvent,
    st: &mut SessionState,
    to_responder: &mpsc::UnboundedSender<WapEvent>,
    url_map: &Arc<UrlMap>,
    http_client: &Arc<dyn HttpClient>,
    in_flight: &Arc<InFlightMap>,
) {
    match ev {
        WapEvent::TrInvokeInd { handle, addr, user_data, .. } => {
            let Ok(pdu) = WspPdu::unpack(&user_data) else {
                tracing::warn!(%addr, "dropping undecodable WSP invoke body");
                return;
            };
            match pdu {
                WspPdu::Connect { caps, headers, .. } => {
                    let session = st.sessions.entry(addr).or_insert_with(|| SessionMachine::new(handle, addr));
                    st.connect_handle_to_addr.insert(handle, addr);
                    let effects = session.on_connect_invoke(headers);
                    for effect in effects {
                        if let session::Effect::DispatchConnectInd = effect {
                            let proposed = session::decode_caps(&caps);
                            let session_id = st.next_session_id;
                            st.next_session_id += 1;
                            let session = st.sessions.get_mut(&addr).expect("just inserted");
                            // Moves the underlying WTP transaction from
                            // INVOKE_RESP_WAIT to RESULT_WAIT so the
                            // Result PDU the ConnectReply effect below
                            // queues actually reaches RESULT_WAIT's
                            // `on_tr_result_req` instead of being dropped.
                            let _ = to_responder.send(WapEvent::TrInvokeRes { handle });
                            apply_session_effects(
                                session.on_connect_res(session_id, &proposed, &proposed),
                                session,
                                addr,
                                handle,
                                to_responder,
                            );
                        }
                    }
                },
                WspPdu::Get { uri, headers } => {
                    start_method(st, addr, handle, uri, headers, Bytes::new(), to_responder, url_map, http_client, in_flight).await;
                },
                WspPdu::Post { uri, headers, body } => {
                    start_method(st, addr, handle, uri, headers, body, to_responder, url_map, http_client, in_flight).await;
                },
                WspPdu::Disconnect { .. } => {
                    if let Some(session) = st.sessions.get_mut(&addr) {
                        apply_session_effects(session.on_disconnect_invoke(), session, addr, handle, to_responder);
                    }
                },
                _ => tracing::debug!("ignoring unsupported WSP PDU on an existing transaction"),
            }
        },
        WapEvent::TrResultCnf { handle } => {
            if let Some(&addr) = st.connect_handle_to_addr.get(&handle) {
                if let Some(session) = st.sessions.get_mut(&addr) {
                    session.on_tr_result_cnf(handle);
                }
                return;
            }
            if let Some(&addr) = st.method_transaction_to_addr.get(&handle) {
                if let Some(session) = st.sessions.get_mut(&addr) {
                    if let Some(method) = session.method_machines.iter_mut().find(|m| m.transaction_id == handle) {
                        let method_id = method.id;
                        let effects = method.on_tr_result_cnf();
                        if effects.iter().any(|e| matches!(e, method::Effect::Destroy)) {
                            session.method_machines.retain(|m| m.id != method_id);
                            st.method_transaction_to_addr.remove(&handle);
                            st.method_addr.remove(&method_id);
                        }
                    }
                }
            }
        },
        WapEvent::TrAbortInd { handle, reason } => {
            if let Some(addr) = st.connect_handle_to_addr.remove(&handle) {
                if let Some(session) = st.sessions.get_mut(&addr) {
                    apply_session_effects(
                        session.on_rcv_abort_on_connect_handle(reason),
                        session,
                        addr,
                        handle,
                        to_responder,
                    );
                }
                return;
            }
            if let Some(&addr) = st.method_transaction_to_addr.get(&handle) {
                if let Some(session) = st.sessions.get_mut(&addr) {
                    if let Some(method) = session.method_machines.iter_mut().find(|m| m.transaction_id == handle) {
                        let method_id = method.id;
                        method.on_abort_event(reason);
                        session.method_machines.retain(|m| m.id != method_id);
                        st.method_transaction_to_addr.remove(&handle);
                        st.method_addr.remove(&method_id);
                    }
                }
            }
        },
        _ => {},
    }
}

fn apply_session_effects(
    effects: Vec<session::Effect>,
    session: &mut SessionMachine,
    addr: AddrTuple,
    connect_handle: MachineId,
    to_responder: &mpsc::UnboundedSender<WapEvent>,
) {
    for effect in effects {
        match effect {
            session::Effect::PackAndSendConnectReply { session_id, caps, refusals } => {
                let mut cap_records = session::render_caps(&caps);
                cap_records.extend(refusals);
                let pdu = WspPdu::ConnectReply {
                    session_id,
                    caps: session::encode_caps(&cap_records),
                    headers: HeaderList::new(),
                };
                let _ = to_responder.send(WapEvent::TrResultReq {
                    handle: connect_handle,
                    user_data: pdu.pack(),
                });
            },
            session::Effect::TrResultReq => {
                // Folded into PackAndSendConnectReply above: both fire
                // together on a successful negotiation.
            },
            session::Effect::AbortAllChildren(reason) => {
                for method in &mut session.method_machines {
                    method.on_abort_event(reason);
                }
                session.method_machines.clear();
            },
            session::Effect::DispatchConnectInd
            | session::Effect::KillOtherSessionsForTuple
            | session::Effect::ReleaseHeldMethods
            | session::Effect::DispatchDisconnectInd(_)
            | session::Effect::CreateMethodMachine => {},
        }
    }
    let _ = addr;
}

#[allow(clippy::too_many_arguments)]
async fn start_method(
    st: &mut SessionState,
    addr: AddrTuple,
    transaction_id: MachineId,
    uri: String,
    headers: HeaderList,
    body: Bytes,
    to_responder: &mpsc::UnboundedSender<WapEvent>,
    url_map: &Arc<UrlMap>,
    http_client: &Arc<dyn HttpClient>,
    in_flight: &Arc<InFlightMap>,
) {
    let Some(session) = st.sessions.get_mut(&addr) else {
        tracing::warn!(%addr, "Get/Post on a session that does not exist");
        return;
    };
    if session.on_get_or_post_invoke().is_empty() {
        return; // not Connected; dropped
    }

    let method_id = st.next_method_id;
    st.next_method_id += 1;
    let session_id = session.session_id;
    let client_sdu_size = session.caps.client_sdu_size;
    let mut method = MethodMachine::new(method_id, transaction_id, session_id, addr, uri, headers);

    let release_effects = method.on_release_event();
    for effect in &release_effects {
        if let method::Effect::DispatchMethodInvokeInd = effect {
            for invoke_effect in method.on_method_invoke_res() {
                if let method::Effect::SendTrInvokeRes = invoke_effect {
                    let _ = to_responder.send(WapEvent::TrInvokeRes { handle: transaction_id });
                }
            }
        }
    }

    let mapped_url = url_map.map(&method.uri);
    let request_headers = method.request_headers.clone();
    let request_id = http_client.start_request(&mapped_url, request_headers, body).await;
    in_flight.insert(
        request_id,
        InFlightKind::Method(InFlightContext {
            method: method_id,
            session_id,
            client_sdu_size,
            original_url: mapped_url,
            x_wap_tod: false,
        }),
    );
    st.method_transaction_to_addr.insert(transaction_id, addr);
    st.method_addr.insert(method_id, addr);

    session.method_machines.push(method);
}

async fn run_http_receive_task(
    http_client: Arc<dyn HttpClient>,
    to_session: mpsc::UnboundedSender<SessionInbox>,
    outbound: mpsc::UnboundedSender<Outbound>,
    in_flight: Arc<InFlightMap>,
) {
    loop {
        let completion = http_client.receive_result().await;
        let Some(kind) = in_flight.take(completion.id) else {
            tracing::warn!(id = completion.id, "HTTP completion for an unregistered request");
            continue;
        };
        match kind {
            InFlightKind::Method(ctx) => {
                if to_session.send(SessionInbox::HttpDone(ctx, completion)).is_err() {
                    break;
                }
            },
            InFlightKind::Connectionless { addr, tid } => {
                let reply = connectionless::encode_reply(
                    tid,
                    method::encode_status(completion.status),
                    completion.headers,
                    completion.body,
                );
                let _ = outbound.send(Outbound {
                    addr,
                    dst_port: addr.remote_port,
                    user_data: reply,
                });
            },
        }
    }
}

async fn handle_http_done(
    ctx: InFlightContext,
    completion: HttpCompletion,
    st: &mut SessionState,
    to_responder: &mpsc::UnboundedSender<WapEvent>,
    compiler: &Arc<dyn Compiler>,
) {
    let method_id = ctx.method;
    let Some(&addr) = st.method_addr.get(&method_id) else {
        tracing::warn!(id = completion.id, "HTTP completion for an unknown method");
        return;
    };
    let Some(session) = st.sessions.get_mut(&addr) else { return };
    let Some(method) = session.method_machines.iter_mut().find(|m| m.id == method_id) else { return };

    let content_type = completion
        .headers
        .get("Content-Type")
        .map(str::to_string)
        .unwrap_or_default();
    let (content_type, body) = compile::transform_response(compiler.as_ref(), &content_type, None, completion.body);
    let mut headers = completion.headers;
    headers.push("Content-Type", &content_type);

    let client_sdu_size = session.caps.client_sdu_size;
    let reply_pdu = method::build_reply(method::encode_status(completion.status), headers, body, client_sdu_size);
    let (status, headers, body) = match reply_pdu {
        WspPdu::Reply { status, headers, body } => (status, headers, body),
        _ => unreachable!("build_reply always returns Reply"),
    };

    let transaction_id = method.transaction_id;
    for effect in method.on_method_result_req(status, headers, body) {
        if let method::Effect::PackAndSendReply { status, headers, body } = effect {
            let pdu = WspPdu::Reply { status, headers, body };
            let _ = to_responder.send(WapEvent::TrResultReq {
                handle: transaction_id,
                user_data: pdu.pack(),
            });
        }
    }
}
