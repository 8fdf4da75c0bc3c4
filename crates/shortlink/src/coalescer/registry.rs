//! In-flight lookup registry.
//!
//! At most one lookup per identifier is in flight at a time. The first
//! request for an identifier becomes the *leader* and performs the lookup;
//! requests arriving while it runs become *followers* and only park their
//! completion on the leader's entry.
//!
//! Followers append under the map's shard lock, and the leader removes the
//! entry under that same lock before draining the waiter list. A follower
//! that managed to register is therefore always drained, and one that comes
//! after removal starts a fresh lookup.

use super::request::{LookupOutcome, Waiter};
use crate::Error;
use dashmap::{DashMap, mapref::entry::Entry};
use parking_lot::Mutex;
use std::sync::Arc;

/// Waiters parked on one in-flight lookup, the leader's own included.
#[derive(Debug, Default)]
pub(crate) struct InFlightLookup {
    waiters: Mutex<Vec<Waiter>>,
}

/// What a request should do after registering.
#[derive(Debug)]
pub(crate) enum Role {
    /// Perform the lookup under a [`LeaderGuard`] and finish it with the
    /// outcome.
    Leader(Arc<InFlightLookup>),
    /// A lookup for this identifier is already running.
    Follower,
}

/// Leadership of one in-flight lookup.
///
/// Dropping the guard without calling [`finish`](Self::finish), because the
/// leader panicked or its task was aborted, retires the entry and fails every
/// waiter with [`Error::ChannelError`], so the identifier stays resolvable.
#[derive(Debug)]
pub(crate) struct LeaderGuard<'a> {
    registry: &'a LookupRegistry,
    id: &'a str,
    lookup: Option<Arc<InFlightLookup>>,
}

impl<'a> LeaderGuard<'a> {
    pub(crate) fn new(
        registry: &'a LookupRegistry,
        id: &'a str,
        lookup: Arc<InFlightLookup>,
    ) -> Self {
        Self {
            registry,
            id,
            lookup: Some(lookup),
        }
    }

    /// Delivers `outcome` to every waiter. Returns how many were notified.
    pub(crate) fn finish(mut self, outcome: &LookupOutcome) -> usize {
        match self.lookup.take() {
            Some(lookup) => self.registry.complete(self.id, &lookup, outcome),
            None => 0,
        }
    }
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        if let Some(lookup) = self.lookup.take() {
            let outcome = Err(Error::ChannelError {
                context: format!("lookup for {:?} was abandoned by its worker", self.id),
            });
            self.registry.complete(self.id, &lookup, &outcome);
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct LookupRegistry {
    inflight: DashMap<String, Arc<InFlightLookup>>,
}

impl LookupRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers `waiter` for `id`, joining a running lookup when there is
    /// one.
    pub(crate) fn join_or_lead(&self, id: &str, waiter: Waiter) -> Role {
        match self.inflight.entry(id.to_owned()) {
            Entry::Occupied(entry) => {
                entry.get().waiters.lock().push(waiter);
                Role::Follower
            }
            Entry::Vacant(entry) => {
                let lookup = Arc::new(InFlightLookup {
                    waiters: Mutex::new(vec![waiter]),
                });
                entry.insert(Arc::clone(&lookup));
                Role::Leader(lookup)
            }
        }
    }

    /// Retires the lookup for `id` and delivers `outcome` to each of its
    /// waiters. Returns how many waiters were notified.
    ///
    /// Callers that stopped waiting are skipped silently.
    pub(crate) fn complete(
        &self,
        id: &str,
        lookup: &Arc<InFlightLookup>,
        outcome: &LookupOutcome,
    ) -> usize {
        self.inflight
            .remove_if(id, |_, current| Arc::ptr_eq(current, lookup));

        let waiters = std::mem::take(&mut *lookup.waiters.lock());
        let notified = waiters.len();
        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
        notified
    }

    /// Drops every registered lookup. Their waiters observe a closed
    /// completion channel.
    pub(crate) fn abandon_all(&self) -> usize {
        let abandoned = self.inflight.len();
        self.inflight.clear();
        abandoned
    }

    /// Lookups currently in flight.
    pub(crate) fn len(&self) -> usize {
        self.inflight.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[test]
    fn first_request_leads_and_later_ones_follow() {
        let registry = LookupRegistry::new();
        let (leader_tx, mut leader_rx) = oneshot::channel();
        let (follower_tx, mut follower_rx) = oneshot::channel();

        let Role::Leader(lookup) = registry.join_or_lead("abc123", leader_tx) else {
            panic!("first request should lead");
        };
        assert!(matches!(
            registry.join_or_lead("abc123", follower_tx),
            Role::Follower
        ));
        assert_eq!(registry.len(), 1);

        let outcome = Ok(Some("https://example.com".to_string()));
        assert_eq!(registry.complete("abc123", &lookup, &outcome), 2);
        assert_eq!(registry.len(), 0);
        assert_eq!(
            leader_rx.try_recv().unwrap().unwrap().as_deref(),
            Some("https://example.com")
        );
        assert_eq!(
            follower_rx.try_recv().unwrap().unwrap().as_deref(),
            Some("https://example.com")
        );
    }

    #[test]
    fn distinct_ids_each_get_a_leader() {
        let registry = LookupRegistry::new();
        let (a, _a_rx) = oneshot::channel();
        let (b, _b_rx) = oneshot::channel();

        assert!(matches!(registry.join_or_lead("aaaaaa", a), Role::Leader(_)));
        assert!(matches!(registry.join_or_lead("bbbbbb", b), Role::Leader(_)));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn request_after_completion_starts_a_new_lookup() {
        let registry = LookupRegistry::new();
        let (first, _first_rx) = oneshot::channel();
        let Role::Leader(lookup) = registry.join_or_lead("abc123", first) else {
            panic!("first request should lead");
        };
        registry.complete("abc123", &lookup, &Ok(None));

        let (second, _second_rx) = oneshot::channel();
        assert!(matches!(
            registry.join_or_lead("abc123", second),
            Role::Leader(_)
        ));
    }

    #[test]
    fn errors_reach_every_waiter() {
        let registry = LookupRegistry::new();
        let mut receivers = Vec::new();
        let mut leader = None;
        for _ in 0..5 {
            let (tx, rx) = oneshot::channel();
            receivers.push(rx);
            if let Role::Leader(lookup) = registry.join_or_lead("abc123", tx) {
                leader = Some(lookup);
            }
        }

        let outcome = Err(Error::ChannelError {
            context: "boom".to_string(),
        });
        assert_eq!(registry.complete("abc123", &leader.unwrap(), &outcome), 5);
        for mut rx in receivers {
            assert!(matches!(
                rx.try_recv().unwrap(),
                Err(Error::ChannelError { .. })
            ));
        }
    }

    #[test]
    fn dropped_waiters_are_skipped() {
        let registry = LookupRegistry::new();
        let (leader_tx, mut leader_rx) = oneshot::channel();
        let (follower_tx, follower_rx) = oneshot::channel();
        let Role::Leader(lookup) = registry.join_or_lead("abc123", leader_tx) else {
            panic!("first request should lead");
        };
        registry.join_or_lead("abc123", follower_tx);
        drop(follower_rx);

        assert_eq!(registry.complete("abc123", &lookup, &Ok(None)), 2);
        assert_eq!(leader_rx.try_recv().unwrap().unwrap(), None);
    }

    #[test]
    fn abandoned_waiters_see_a_closed_channel() {
        let registry = LookupRegistry::new();
        let (tx, mut rx) = oneshot::channel();
        let role = registry.join_or_lead("abc123", tx);
        drop(role);

        assert_eq!(registry.abandon_all(), 1);
        assert_eq!(registry.len(), 0);
        assert!(matches!(
            rx.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));
    }

    #[test]
    fn finished_guard_delivers_the_outcome() {
        let registry = LookupRegistry::new();
        let (tx, mut rx) = oneshot::channel();
        let Role::Leader(lookup) = registry.join_or_lead("abc123", tx) else {
            panic!("first request should lead");
        };

        let guard = LeaderGuard::new(&registry, "abc123", lookup);
        assert_eq!(guard.finish(&Ok(Some("https://example.com".to_string()))), 1);
        assert_eq!(registry.len(), 0);
        assert_eq!(
            rx.try_recv().unwrap().unwrap().as_deref(),
            Some("https://example.com")
        );
    }

    #[test]
    fn dropped_guard_fails_waiters_and_retires_the_entry() {
        let registry = LookupRegistry::new();
        let (leader_tx, mut leader_rx) = oneshot::channel();
        let (follower_tx, mut follower_rx) = oneshot::channel();
        let Role::Leader(lookup) = registry.join_or_lead("abc123", leader_tx) else {
            panic!("first request should lead");
        };
        registry.join_or_lead("abc123", follower_tx);

        drop(LeaderGuard::new(&registry, "abc123", lookup));

        assert_eq!(registry.len(), 0);
        for rx in [&mut leader_rx, &mut follower_rx] {
            assert!(matches!(
                rx.try_recv().unwrap(),
                Err(Error::ChannelError { .. })
            ));
        }
        let (tx, _rx) = oneshot::channel();
        assert!(matches!(registry.join_or_lead("abc123", tx), Role::Leader(_)));
    }

    #[test]
    fn guard_retires_the_entry_when_the_leader_unwinds() {
        let registry = LookupRegistry::new();
        let (tx, mut rx) = oneshot::channel();
        let Role::Leader(lookup) = registry.join_or_lead("abc123", tx) else {
            panic!("first request should lead");
        };

        let unwound = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = LeaderGuard::new(&registry, "abc123", lookup);
            panic!("store client panicked");
        }));

        assert!(unwound.is_err());
        assert_eq!(registry.len(), 0);
        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(Error::ChannelError { .. })
        ));
    }

    #[test]
    fn no_waiter_is_lost_under_contention() {
        const THREADS: usize = 8;
        const REQUESTS: usize = 2_000;

        let registry = Arc::new(LookupRegistry::new());
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    let mut receivers = Vec::with_capacity(REQUESTS);
                    for i in 0..REQUESTS {
                        let id = format!("id{}", i % 4);
                        let (tx, rx) = oneshot::channel();
                        receivers.push(rx);
                        if let Role::Leader(lookup) = registry.join_or_lead(&id, tx) {
                            registry.complete(&id, &lookup, &Ok(Some(id.clone())));
                        }
                    }
                    receivers
                })
            })
            .collect();

        for handle in handles {
            for mut rx in handle.join().unwrap() {
                assert!(rx.try_recv().unwrap().unwrap().is_some());
            }
        }
        assert_eq!(registry.len(), 0);
    }
}
