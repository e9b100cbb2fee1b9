//! In-flight archive work, keyed by archive entry id.
//!
//! Claims are advisory: a claim keeps the poller from queuing the same
//! archive entry twice, and one that outlives its timeout is handed back to
//! the poller for reclaiming.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};

use docsync_core::{Clock, EntryId};

/// Claimed archive entries and when they were claimed.
pub struct WorkQueue {
    claims: Mutex<HashMap<EntryId, DateTime<Utc>>>,
    clock: Arc<dyn Clock>,
}

impl WorkQueue {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            claims: Mutex::new(HashMap::new()),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<EntryId, DateTime<Utc>>> {
        self.claims.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claim an entry. Returns `false` if it is already claimed.
    pub fn claim(&self, entry_id: EntryId) -> bool {
        let now = self.clock.now();
        let mut claims = self.lock();
        if claims.contains_key(&entry_id) {
            return false;
        }
        claims.insert(entry_id, now);
        true
    }

    /// Release a finished entry. Returns `false` if it was not claimed.
    pub fn release(&self, entry_id: EntryId) -> bool {
        self.lock().remove(&entry_id).is_some()
    }

    pub fn is_claimed(&self, entry_id: EntryId) -> bool {
        self.lock().contains_key(&entry_id)
    }

    /// When an entry was claimed.
    pub fn claimed_at(&self, entry_id: EntryId) -> Option<DateTime<Utc>> {
        self.lock().get(&entry_id).copied()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Remove and return every claim older than `timeout`, oldest first.
    pub fn take_expired(&self, timeout: Duration) -> Vec<EntryId> {
        let now = self.clock.now();
        let mut claims = self.lock();
        let mut expired: Vec<(EntryId, DateTime<Utc>)> = claims
            .iter()
            .filter(|(_, claimed_at)| now - **claimed_at > timeout)
            .map(|(id, at)| (*id, *at))
            .collect();
        expired.sort_by_key(|(id, at)| (*at, *id));
        for (id, _) in &expired {
            claims.remove(id);
        }
        expired.into_iter().map(|(id, _)| id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docsync_core::ManualClock;

    fn queue() -> (Arc<ManualClock>, WorkQueue) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let queue = WorkQueue::new(clock.clone());
        (clock, queue)
    }

    #[test]
    fn test_claim_is_exclusive() {
        let (_clock, queue) = queue();
        assert!(queue.claim(EntryId(1)));
        assert!(!queue.claim(EntryId(1)));
        assert!(queue.is_claimed(EntryId(1)));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_release_frees_slot() {
        let (_clock, queue) = queue();
        queue.claim(EntryId(1));
        assert!(queue.release(EntryId(1)));
        assert!(!queue.release(EntryId(1)));
        assert!(queue.claim(EntryId(1)));
    }

    #[test]
    fn test_expiry_is_strictly_after_timeout() {
        let (clock, queue) = queue();
        queue.claim(EntryId(1));
        let timeout = Duration::seconds(100);

        clock.advance(Duration::seconds(100));
        assert!(queue.take_expired(timeout).is_empty());

        clock.advance(Duration::milliseconds(1));
        assert_eq!(queue.take_expired(timeout), vec![EntryId(1)]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_expired_oldest_first_and_fresh_kept() {
        let (clock, queue) = queue();
        queue.claim(EntryId(9));
        clock.advance(Duration::seconds(10));
        queue.claim(EntryId(3));
        clock.advance(Duration::seconds(10));
        queue.claim(EntryId(5));
        clock.advance(Duration::seconds(95));

        let expired = queue.take_expired(Duration::seconds(100));
        assert_eq!(expired, vec![EntryId(9), EntryId(3)]);
        assert!(queue.is_claimed(EntryId(5)));
    }
}
