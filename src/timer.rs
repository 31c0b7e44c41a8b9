// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Shared min-heap timer wheel, grounded on
//! `examples/original_source/gw/timers.c` / `gw/wtp_timer.c`: a single
//! mutex-protected binary heap of absolute deadlines, each slot holding
//! the event to publish on fire and a back-pointer so restart/stop can
//! sift the existing slot in place instead of delete-and-reinsert.

use std::{
    cmp::Ordering,
    collections::HashMap,
    sync::Arc,
    time::Duration,
};

use tokio::sync::{mpsc, Mutex, Notify};
use tokio::time::Instant;

use crate::event::WapEvent;

/// Opaque handle to a slot in the wheel. Stable across restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

impl TimerHandle {
    /// A handle not registered in any wheel, for state-machine unit
    /// tests that exercise transitions without a running timer task.
    #[cfg(test)]
    pub fn default_for_test() -> Self {
        Self(u64::MAX)
    }
}

struct Slot {
    deadline: Instant,
    /// `None` once fired, stopped, or extracted by `abort_elapsed`.
    pending: Option<WapEvent>,
    active: bool,
}

struct HeapEntry {
    deadline: Instant,
    handle: TimerHandle,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline
    }
}
impl Eq for HeapEntry {}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse so `BinaryHeap` (a max-heap) behaves as a min-heap.
        other.deadline.cmp(&self.deadline)
    }
}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct Inner {
    slots: HashMap<TimerHandle, Slot>,
    heap: std::collections::BinaryHeap<HeapEntry>,
    next_id: u64,
}

impl Inner {
    /// `BinaryHeap` has no decrease-key; a stopped/superseded heap entry
    /// is left in place and filtered out lazily when popped (its slot
    /// will either be gone or have a newer deadline that no longer
    /// matches this entry).
    fn peek_next_deadline(&mut self) -> Option<Instant> {
        loop {
            let top = self.heap.peek()?;
            match self.slots.get(&top.handle) {
                Some(slot) if slot.active && slot.deadline == top.deadline => {
                    return Some(top.deadline);
                },
                _ => {
                    self.heap.pop();
                },
            }
        }
    }

    fn pop_due(&mut self, now: Instant) -> Vec<(TimerHandle, WapEvent)> {
        let mut fired = Vec::new();
        while let Some(top) = self.heap.peek() {
            if top.deadline > now {
                break;
            }
            let entry = self.heap.pop().expect("peeked");
            let Some(slot) = self.slots.get_mut(&entry.handle) else {
                continue;
            };
            if !slot.active || slot.deadline != entry.deadline {
                continue;
            }
            slot.active = false;
            if let Some(ev) = slot.pending.take() {
                fired.push((entry.handle, ev));
            }
        }
        fired
    }
}

/// The wheel plus the outbound channel its watcher task publishes fired
/// events onto, keyed by which machine owns the timer.
pub struct TimerWheel {
    inner: Mutex<Inner>,
    wake: Notify,
    out: mpsc::UnboundedSender<(TimerHandle, WapEvent)>,
}

impl TimerWheel {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<(TimerHandle, WapEvent)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let wheel = Arc::new(Self {
            inner: Mutex::new(Inner {
                slots: HashMap::new(),
                heap: std::collections::BinaryHeap::new(),
                next_id: 0,
            }),
            wake: Notify::new(),
            out: tx,
        });
        (wheel, rx)
    }

    pub async fn new_handle(&self) -> TimerHandle {
        let mut inner = self.inner.lock().await;
        let id = inner.next_id;
        inner.next_id += 1;
        let handle = TimerHandle(id);
        inner.slots.insert(
            handle,
            Slot {
                deadline: Instant::now(),
                pending: None,
                active: false,
            },
        );
        handle
    }

    /// Starts (or restarts) `handle` to fire `after` from now with event
    /// `event`. A previously owned, undelivered event is dropped.
    pub async fn start(&self, handle: TimerHandle, after: Duration, event: WapEvent) {
        let deadline = Instant::now() + after;
        {
            let mut inner = self.inner.lock().await;
            if let Some(slot) = inner.slots.get_mut(&handle) {
                slot.deadline = deadline;
                slot.pending = Some(event);
                slot.active = true;
            }
            inner.heap.push(HeapEntry { deadline, handle });
        }
        self.wake.notify_one();
    }

    /// Marks `handle` inactive and drops its owned event, if any.
    pub async fn stop(&self, handle: TimerHandle) {
        let mut inner = self.inner.lock().await;
        if let Some(slot) = inner.slots.get_mut(&handle) {
            slot.active = false;
            slot.pending = None;
        }
    }

    /// Closes the race between a timer firing and the owning state
    /// machine having already consumed an event that makes the timeout
    /// moot. Best-effort: if the
    /// event already left the wheel for the output channel, this is a
    /// no-op and the consumer must treat the stale event idempotently.
    pub async fn abort_elapsed(&self, handle: TimerHandle) {
        let mut inner = self.inner.lock().await;
        if let Some(slot) = inner.slots.get_mut(&handle) {
            slot.pending = None;
        }
    }

    pub async fn remove(&self, handle: TimerHandle) {
        let mut inner = self.inner.lock().await;
        inner.slots.remove(&handle);
    }

    /// Runs until the wheel is dropped. Sleeps until the next deadline
    /// (or forever if empty), wakes early on `start`/`stop`, and
    /// publishes every due event onto the output channel.
    pub async fn run(self: Arc<Self>) {
        loop {
            let next = {
                let mut inner = self.inner.lock().await;
                inner.peek_next_deadline()
            };
            let woke_early = match next {
                Some(deadline) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(deadline) => false,
                        _ = self.wake.notified() => true,
                    }
                },
                None => {
                    self.wake.notified().await;
                    true
                },
            };
            if woke_early {
                continue;
            }
            let fired = {
                let mut inner = self.inner.lock().await;
                inner.pop_due(Instant::now())
            };
            for item in fired {
                if self.out.send(item).is_err() {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fires_in_deadline_order() {
        let (wheel, mut rx) = TimerWheel::new();
        let runner = Arc::clone(&wheel);
        tokio::spawn(runner.run());

        let late = wheel.new_handle().await;
        let early = wheel.new_handle().await;
        wheel
            .start(late, Duration::from_millis(40), WapEvent::TimerToA { handle: 2 })
            .await;
        wheel
            .start(early, Duration::from_millis(5), WapEvent::TimerToA { handle: 1 })
            .await;

        let (h1, _) = rx.recv().await.expect("first fire");
        assert_eq!(h1, early);
        let (h2, _) = rx.recv().await.expect("second fire");
        assert_eq!(h2, late);
    }

    #[tokio::test]
    async fn restart_replaces_owned_event() {
        let (wheel, mut rx) = TimerWheel::new();
        let runner = Arc::clone(&wheel);
        tokio::spawn(runner.run());

        let h = wheel.new_handle().await;
        wheel
            .start(h, Duration::from_millis(200), WapEvent::TimerToA { handle: 1 })
            .await;
        wheel
            .start(h, Duration::from_millis(5), WapEvent::TimerToR { handle: 1 })
            .await;

        let (fired, ev) = rx.recv().await.expect("fire");
        assert_eq!(fired, h);
        assert_eq!(ev.name(), "TimerTO-R");
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_suppresses_fire() {
        let (wheel, mut rx) = TimerWheel::new();
        let runner = Arc::clone(&wheel);
        tokio::spawn(runner.run());

        let h = wheel.new_handle().await;
        wheel.stop(h).await;
        wheel.stop(h).await;
        wheel
            .start(h, Duration::from_millis(5), WapEvent::TimerToA { handle: 1 })
            .await;
        wheel.stop(h).await;

        let other = wheel.new_handle().await;
        wheel
            .start(other, Duration::from_millis(10), WapEvent::TimerToR { handle: 2 })
            .await;
        let (fired, _) = rx.recv().await.expect("only the second timer fires");
        assert_eq!(fired, other);
    }
}
