// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The HTTP client pool collaborator: in-flight fetches are tracked in a
//! `DashMap` keyed by request id rather than behind a single global
//! mutex, so an entry is per-key locked only for the duration of an
//! insert/remove, eliminating that race by construction.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex};

use crate::{addr::AddrTuple, event::MachineId, wsp::headers::HeaderList};

pub type RequestId = u64;

/// Context kept alongside an in-flight request so the response can be
/// routed back to its owning method machine and re-encoded within its
/// session's negotiated SDU size.
#[derive(Debug, Clone)]
pub struct InFlightContext {
    pub method: MachineId,
    pub session_id: u32,
    pub client_sdu_size: u32,
    pub original_url: String,
    pub x_wap_tod: bool,
}

/// Routes a completed fetch back to whichever side started it: a
/// connection-oriented method machine awaiting its reply through the
/// session task, or a connectionless peer with no session state at all,
/// answered directly on its `(addr, tid)`.
#[derive(Debug, Clone)]
pub enum InFlightKind {
    Method(InFlightContext),
    Connectionless { addr: AddrTuple, tid: u8 },
}

pub struct HttpCompletion {
    pub id: RequestId,
    pub status: u16,
    pub final_url: String,
    pub headers: HeaderList,
    pub body: Bytes,
}

/// The subset of an HTTP client the core depends on: start
/// a fetch, and drain completions. A real implementation would wrap a
/// connection-pooled client; tests substitute a fake.
#[async_trait::async_trait]
pub trait HttpClient: Send + Sync {
    async fn start_request(&self, url: &str, headers: HeaderList, body: Bytes) -> RequestId;
    async fn receive_result(&self) -> HttpCompletion;
}

/// Maps in-flight request ids to whoever is awaiting their completion.
pub struct InFlightMap {
    next_id: AtomicU64,
    entries: DashMap<RequestId, InFlightKind>,
}

impl InFlightMap {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: DashMap::new(),
        }
    }

    pub fn reserve(&self, ctx: InFlightKind) -> RequestId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(id, ctx);
        id
    }

    /// Registers a context under an id the caller already obtained
    /// elsewhere (the id `start_request` handed back), rather than
    /// minting a fresh one.
    pub fn insert(&self, id: RequestId, ctx: InFlightKind) {
        self.entries.insert(id, ctx);
    }

    pub fn take(&self, id: RequestId) -> Option<InFlightKind> {
        self.entries.remove(&id).map(|(_, ctx)| ctx)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for InFlightMap {
    fn default() -> Self {
        Self::new()
    }
}

/// Production [`HttpClient`]: one `reqwest::Client` shared across every
/// request, each fetch spawned as its own task so a slow origin never
/// blocks another in-flight request. `receive_result` pulls completions off an internal
/// queue rather than being driven by callback, matching how the rest of
/// this crate's tasks only ever communicate by channel.
pub struct ReqwestHttpClient {
    client: reqwest::Client,
    next_id: AtomicU64,
    done_tx: mpsc::UnboundedSender<HttpCompletion>,
    done_rx: Mutex<mpsc::UnboundedReceiver<HttpCompletion>>,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        Self {
            client: reqwest::Client::new(),
            next_id: AtomicU64::new(1),
            done_tx,
            done_rx: Mutex::new(done_rx),
        }
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn start_request(&self, url: &str, headers: HeaderList, body: Bytes) -> RequestId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let client = self.client.clone();
        let url = url.to_string();
        let done_tx = self.done_tx.clone();

        tokio::spawn(async move {
            let mut req = if body.is_empty() {
                client.get(&url)
            } else {
                client.post(&url).body(body)
            };
            for header in &headers.0 {
                req = req.header(header.name.as_str(), header.value.as_str());
            }

            let completion = match req.send().await {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    let final_url = resp.url().to_string();
                    let mut out_headers = HeaderList::new();
                    for (name, value) in resp.headers() {
                        if let Ok(value) = value.to_str() {
                            out_headers.push(name.as_str(), value);
                        }
                    }
                    let body = resp.bytes().await.unwrap_or_default();
                    HttpCompletion {
                        id,
                        status,
                        final_url,
                        headers: out_headers,
                        body,
                    }
                },
                Err(err) => {
                    tracing::warn!(%err, url, "HTTP fetch failed");
                    HttpCompletion {
                        id,
                        status: 0,
                        final_url: url,
                        headers: HeaderList::new(),
                        body: Bytes::new(),
                    }
                },
            };
            let _ = done_tx.send(completion);
        });

        id
    }

    async fn receive_result(&self) -> HttpCompletion {
        self.done_rx
            .lock()
            .await
            .recv()
            .await
            .expect("done_tx kept alive by self")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(method: MachineId) -> InFlightKind {
        InFlightKind::Method(InFlightContext {
            method,
            session_id: 1,
            client_sdu_size: 1400,
            original_url: "http://origin.example/".to_string(),
            x_wap_tod: false,
        })
    }

    #[test]
    fn reserve_then_take_round_trips_and_removes() {
        let map = InFlightMap::new();
        let id = map.reserve(ctx(7));
        assert_eq!(map.len(), 1);
        let recovered = map.take(id).expect("present");
        let InFlightKind::Method(recovered) = recovered else { panic!("expected Method") };
        assert_eq!(recovered.method, 7);
        assert!(map.is_empty());
    }

    #[test]
    fn taking_an_unknown_id_is_none() {
        let map = InFlightMap::new();
        assert!(map.take(999).is_none());
    }

    #[test]
    fn ids_are_assigned_uniquely() {
        let map = InFlightMap::new();
        let a = map.reserve(ctx(1));
        let b = map.reserve(ctx(2));
        assert_ne!(a, b);
    }

    #[test]
    fn connectionless_completions_are_routed_by_addr_and_tid() {
        use std::net::{IpAddr, Ipv4Addr};

        let addr = AddrTuple::new(
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            9200,
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
            9200,
        );
        let map = InFlightMap::new();
        let id = map.reserve(InFlightKind::Connectionless { addr, tid: 7 });
        let recovered = map.take(id).expect("present");
        assert!(matches!(recovered, InFlightKind::Connectionless { tid: 7, .. }));
    }
}
