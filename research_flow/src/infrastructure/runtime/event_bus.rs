// /////////////////////////////////////////////////////////////////////////////
// Research Flow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Event Bus
//!
//! In-process publish/subscribe for lifecycle events.
//!
//! ## Delivery semantics
//!
//! [`EventBus::publish`] delivers synchronously to every subscriber of the
//! event's kind, in subscription order, at most once per subscriber per
//! publish call. A panicking subscriber is logged and skipped; it never
//! affects the publisher or later subscribers. Delivery is best-effort:
//! there is no queueing and no replay.
//!
//! Publishers must not hold scheduler or registry locks while publishing;
//! subscribers run inline on the publisher's thread.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{error, trace};

use research_flow_domain::{Event, EventKind};

/// Callback invoked for each delivered event.
pub type Subscriber = Arc<dyn Fn(&Event) + Send + Sync>;

/// In-process synchronous pub/sub bus.
#[derive(Default)]
pub struct EventBus {
    by_kind: RwLock<HashMap<EventKind, Vec<Subscriber>>>,
    all: RwLock<Vec<Subscriber>>,
}

impl EventBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to one event kind.
    pub fn subscribe(&self, kind: EventKind, subscriber: Subscriber) {
        self.by_kind.write().entry(kind).or_default().push(subscriber);
    }

    /// Subscribes to every event kind (metrics, audit sinks).
    pub fn subscribe_all(&self, subscriber: Subscriber) {
        self.all.write().push(subscriber);
    }

    /// Publishes `event` to matching subscribers.
    ///
    /// Subscriber lists are snapshotted before delivery, so a subscriber may
    /// itself (un)subscribe without deadlocking the bus.
    pub fn publish(&self, event: &Event) {
        trace!(kind = %event.kind, "publishing event");

        let mut targets: Vec<Subscriber> = Vec::new();
        {
            let by_kind = self.by_kind.read();
            if let Some(list) = by_kind.get(&event.kind) {
                targets.extend(list.iter().cloned());
            }
        }
        {
            let all = self.all.read();
            targets.extend(all.iter().cloned());
        }

        for subscriber in targets {
            if catch_unwind(AssertUnwindSafe(|| subscriber(event))).is_err() {
                error!(kind = %event.kind, "event subscriber panicked; continuing delivery");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use research_flow_domain::TaskId;

    /// Subscribers receive events of their kind, in subscription order.
    #[test]
    fn test_delivery_order() {
        let bus = EventBus::new();
        let seen: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3u32 {
            let seen = Arc::clone(&seen);
            bus.subscribe(
                EventKind::TaskCompleted,
                Arc::new(move |_| seen.lock().push(i)),
            );
        }

        bus.publish(&Event::task(EventKind::TaskCompleted, TaskId::new(), "t"));
        assert_eq!(*seen.lock(), vec![0, 1, 2]);
    }

    /// Events only reach subscribers of the matching kind (plus wildcard
    /// subscribers).
    #[test]
    fn test_kind_filtering() {
        let bus = EventBus::new();
        let kind_hits = Arc::new(Mutex::new(0u32));
        let all_hits = Arc::new(Mutex::new(0u32));

        {
            let kind_hits = Arc::clone(&kind_hits);
            bus.subscribe(EventKind::TaskFailed, Arc::new(move |_| *kind_hits.lock() += 1));
        }
        {
            let all_hits = Arc::clone(&all_hits);
            bus.subscribe_all(Arc::new(move |_| *all_hits.lock() += 1));
        }

        bus.publish(&Event::task(EventKind::TaskCompleted, TaskId::new(), "t"));
        bus.publish(&Event::task(EventKind::TaskFailed, TaskId::new(), "t"));

        assert_eq!(*kind_hits.lock(), 1);
        assert_eq!(*all_hits.lock(), 2);
    }

    /// A panicking subscriber does not break the publisher or peers.
    #[test]
    fn test_panicking_subscriber_is_isolated() {
        let bus = EventBus::new();
        let delivered = Arc::new(Mutex::new(false));

        bus.subscribe(EventKind::TaskStarted, Arc::new(|_| panic!("boom")));
        {
            let delivered = Arc::clone(&delivered);
            bus.subscribe(EventKind::TaskStarted, Arc::new(move |_| *delivered.lock() = true));
        }

        bus.publish(&Event::task(EventKind::TaskStarted, TaskId::new(), "t"));
        assert!(*delivered.lock());
    }
}
