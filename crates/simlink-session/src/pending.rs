use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Outstanding requests, keyed by request id, with their send instant.
///
/// Shared between the sending side and the receiver loop. Every method takes
/// the lock for one short operation, so registration and resolution are
/// atomic with respect to each other.
#[derive(Debug, Default)]
pub struct PendingTable {
    entries: Mutex<HashMap<u32, Instant>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u32, Instant>> {
        // The map is always left consistent, so a poisoned lock is still usable.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `request_id` as sent at `sent_at`.
    ///
    /// Returns `false` if the id was already outstanding; the older entry is
    /// replaced.
    pub fn register(&self, request_id: u32, sent_at: Instant) -> bool {
        self.lock().insert(request_id, sent_at).is_none()
    }

    /// Remove `request_id` and return the time elapsed since it was sent.
    ///
    /// `None` for an id that was never registered or is already resolved.
    pub fn resolve(&self, request_id: u32, received_at: Instant) -> Option<Duration> {
        self.lock()
            .remove(&request_id)
            .map(|sent_at| received_at.saturating_duration_since(sent_at))
    }

    /// Drop `request_id` without reporting it, after its send failed.
    pub fn forget(&self, request_id: u32) {
        self.lock().remove(&request_id);
    }

    /// Remove every entry, returning `(request_id, age)` ordered by id.
    pub fn drain(&self, now: Instant) -> Vec<(u32, Duration)> {
        let mut drained: Vec<_> = self
            .lock()
            .drain()
            .map(|(id, sent_at)| (id, now.saturating_duration_since(sent_at)))
            .collect();
        drained.sort_unstable_by_key(|(id, _)| *id);
        drained
    }

    pub fn contains(&self, request_id: u32) -> bool {
        self.lock().contains_key(&request_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Request id allocator. Ids start at 1, wrap at `u32::MAX` and never yield 0.
#[derive(Debug)]
pub struct RequestIds {
    next: AtomicU32,
}

impl Default for RequestIds {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestIds {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: u32) -> Self {
        Self {
            next: AtomicU32::new(first),
        }
    }

    pub fn next_id(&self) -> u32 {
        loop {
            let id = self.next.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn resolve_returns_elapsed_once() {
        let table = PendingTable::new();
        let sent = Instant::now();
        assert!(table.register(7, sent));
        assert!(table.contains(7));

        let rtt = table.resolve(7, sent + Duration::from_millis(12));
        assert_eq!(rtt, Some(Duration::from_millis(12)));
        assert_eq!(table.resolve(7, Instant::now()), None);
        assert!(table.is_empty());
    }

    #[test]
    fn resolve_unknown_id_is_none() {
        let table = PendingTable::new();
        table.register(1, Instant::now());
        assert_eq!(table.resolve(2, Instant::now()), None);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn reregister_replaces_entry() {
        let table = PendingTable::new();
        let first = Instant::now();
        assert!(table.register(3, first));
        assert!(!table.register(3, first + Duration::from_millis(5)));
        assert_eq!(table.len(), 1);
        assert_eq!(
            table.resolve(3, first + Duration::from_millis(6)),
            Some(Duration::from_millis(1))
        );
    }

    #[test]
    fn clock_skew_saturates_to_zero() {
        let table = PendingTable::new();
        let sent = Instant::now() + Duration::from_secs(1);
        table.register(1, sent);
        assert_eq!(table.resolve(1, Instant::now()), Some(Duration::ZERO));
    }

    #[test]
    fn forget_drops_silently() {
        let table = PendingTable::new();
        table.register(9, Instant::now());
        table.forget(9);
        table.forget(9);
        assert!(table.is_empty());
    }

    #[test]
    fn drain_orders_by_id_and_empties() {
        let table = PendingTable::new();
        let now = Instant::now();
        for id in [5, 1, 3] {
            table.register(id, now);
        }
        let drained = table.drain(now + Duration::from_secs(2));
        let ids: Vec<u32> = drained.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![1, 3, 5]);
        assert!(drained.iter().all(|(_, age)| *age == Duration::from_secs(2)));
        assert!(table.is_empty());
    }

    #[test]
    fn concurrent_register_and_resolve() {
        let table = Arc::new(PendingTable::new());
        let ids = Arc::new(RequestIds::new());

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let table = table.clone();
                let ids = ids.clone();
                thread::spawn(move || {
                    for _ in 0..250 {
                        let id = ids.next_id();
                        assert!(table.register(id, Instant::now()));
                        assert!(table.resolve(id, Instant::now()).is_some());
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert!(table.is_empty());
    }

    #[test]
    fn ids_start_at_one() {
        let ids = RequestIds::new();
        assert_eq!(ids.next_id(), 1);
        assert_eq!(ids.next_id(), 2);
    }

    #[test]
    fn ids_wrap_past_zero() {
        let ids = RequestIds::starting_at(u32::MAX);
        assert_eq!(ids.next_id(), u32::MAX);
        assert_eq!(ids.next_id(), 1);
    }
}
