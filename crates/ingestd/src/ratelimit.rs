//! Sliding-window per-client rate limiting, built over the striped
//! mutex pool and SPSC decision ring from `metricring`.

use crate::data_model::{ClientId, DecisionEvent};
use metricring::{EventRing, StripePool};
use std::cell::UnsafeCell;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(1);

/// Per-client state: the sliding window of recent decision timestamps and
/// the decision ring the metrics flusher drains.
///
/// `window` is an `UnsafeCell` rather than its own `Mutex` on purpose: the
/// only caller that may touch it is `RateLimiter::allow`, which already
/// holds the client's stripe mutex for the duration. Taking a second lock
/// here would mean holding two locks at once, which the stripe pool design
/// exists to avoid.
pub struct ClientState {
    window: UnsafeCell<Vec<Instant>>,
    ring: EventRing<DecisionEvent>,
}

unsafe impl Send for ClientState {}
unsafe impl Sync for ClientState {}

impl ClientState {
    fn new(limit: usize, ring_capacity: usize) -> Self {
        Self {
            window: UnsafeCell::new(Vec::with_capacity(limit)),
            ring: EventRing::new(ring_capacity),
        }
    }

    /// The per-client decision ring. Safe to read without any stripe lock:
    /// only the flusher ever drains it, and only `allow` ever pushes.
    pub fn ring(&self) -> &EventRing<DecisionEvent> {
        &self.ring
    }
}

/// Sliding-window limiter: at most `limit` allowed decisions per client per
/// one-second window, backed by a hash-striped mutex pool so the number of
/// live locks is bounded regardless of client cardinality.
pub struct RateLimiter {
    limit: usize,
    ring_capacity: usize,
    stripes: StripePool,
    clients: Mutex<HashMap<ClientId, Arc<ClientState>>>,
}

impl RateLimiter {
    pub fn new(limit: u32, stripe_count: usize, ring_capacity: usize) -> Self {
        Self {
            limit: limit as usize,
            ring_capacity,
            stripes: StripePool::new(stripe_count),
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Evicts stale samples, decides allow/deny, records the decision, and
    /// pushes it to the client's ring. Infallible.
    ///
    /// The coarse client map is only ever locked long enough to fetch or
    /// insert an `Arc<ClientState>`; that guard is dropped before the
    /// stripe mutex is taken, so the two are never held together.
    pub fn allow(&self, client: &ClientId) -> bool {
        let state = self.get_or_insert(client);

        let stripe = self.stripes.mutex_for(client.as_bytes());
        let _guard = stripe.lock().unwrap();

        let now = Instant::now();
        // Safety: protected by `_guard`, held for the rest of this scope.
        let window = unsafe { &mut *state.window.get() };
        window.retain(|sample| now.duration_since(*sample) < WINDOW);

        let decision = window.len() < self.limit;
        if decision {
            window.push(now);
        }

        state.ring.push(DecisionEvent {
            at: now,
            allowed: decision,
        });

        decision
    }

    fn get_or_insert(&self, client: &ClientId) -> Arc<ClientState> {
        let mut clients = self.clients.lock().unwrap();
        clients
            .entry(client.clone())
            .or_insert_with(|| Arc::new(ClientState::new(self.limit, self.ring_capacity)))
            .clone()
    }

    /// Snapshot of known client ids, for the flusher's tick. One brief
    /// acquisition of the coarse map guard, held only long enough to clone
    /// the key set.
    pub fn known_clients(&self) -> Vec<ClientId> {
        self.clients.lock().unwrap().keys().cloned().collect()
    }

    /// Looks up a client's state without taking any stripe lock. Used by
    /// the flusher, which never acquires a stripe mutex.
    pub fn state_for(&self, client: &ClientId) -> Option<Arc<ClientState>> {
        self.clients.lock().unwrap().get(client).cloned()
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_limit_then_denies() {
        let limiter = RateLimiter::new(3, 16, 8);
        let client = ClientId::from_header(Some(b"c1"));
        assert!(limiter.allow(&client));
        assert!(limiter.allow(&client));
        assert!(limiter.allow(&client));
        assert!(!limiter.allow(&client));
        assert!(!limiter.allow(&client));
    }

    #[test]
    fn distinct_clients_have_independent_budgets() {
        let limiter = RateLimiter::new(1, 16, 8);
        let c1 = ClientId::from_header(Some(b"c1"));
        let c2 = ClientId::from_header(Some(b"c2"));
        assert!(limiter.allow(&c1));
        assert!(limiter.allow(&c2));
        assert!(!limiter.allow(&c1));
        assert!(!limiter.allow(&c2));
    }

    #[test]
    fn denied_decisions_still_reach_the_ring() {
        let limiter = RateLimiter::new(1, 16, 8);
        let client = ClientId::from_header(Some(b"c1"));
        limiter.allow(&client);
        limiter.allow(&client);

        let state = limiter.state_for(&client).unwrap();
        let mut seen = Vec::new();
        state.ring().drain(|event| seen.push(event.allowed));
        assert_eq!(seen, vec![true, false]);
    }

    #[test]
    fn client_count_reflects_distinct_clients_seen() {
        let limiter = RateLimiter::new(10, 16, 8);
        limiter.allow(&ClientId::from_header(Some(b"a")));
        limiter.allow(&ClientId::from_header(Some(b"b")));
        limiter.allow(&ClientId::from_header(Some(b"a")));
        assert_eq!(limiter.client_count(), 2);
    }

    #[test]
    fn window_evicts_samples_older_than_one_second() {
        let limiter = RateLimiter::new(1, 16, 8);
        let client = ClientId::from_header(Some(b"c1"));
        assert!(limiter.allow(&client));
        assert!(!limiter.allow(&client));
        std::thread::sleep(Duration::from_millis(1100));
        assert!(limiter.allow(&client));
    }
}
