use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

use crate::*;

/// In-memory view of known polls, shared between a session's coordinator
/// and aggregator.
///
/// Best-effort only: entries are overwritten wholesale on refresh
/// (last-write-wins, refreshes are idempotent reads) and the whole thing
/// is rebuilt from ledger reads after a restart. The optimistic vote
/// marks bridge the gap between vote submission and the next refresh so a
/// UI can render "you voted" without another round trip.
#[derive(Default)]
pub struct PollCache {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    polls: HashMap<PollKey, Poll>,
    voted: HashSet<PollKey>,
}

impl PollCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last fetched copy of a poll, if any.
    pub fn poll(&self, key: &PollKey) -> Option<Poll> {
        self.inner.lock().polls.get(key).cloned()
    }

    /// Whether this session cast a vote on the poll (optimistic, survives
    /// refreshes; votes are never retracted on the ledger).
    pub fn voted(&self, key: &PollKey) -> bool {
        self.inner.lock().voted.contains(key)
    }

    pub fn store(&self, poll: Poll) {
        self.inner.lock().polls.insert(poll.key(), poll);
    }

    pub fn note_vote(&self, key: &PollKey) {
        self.inner.lock().voted.insert(key.clone());
    }

    /// Drop a single entry, forcing the next read to hit the ledger.
    pub fn invalidate(&self, key: &PollKey) {
        self.inner.lock().polls.remove(key);
    }

    /// Replace every entry belonging to `owner` with the given listing.
    /// Polls the listing omits are dropped; they may have failed to fetch
    /// and keeping a stale copy would mask that.
    pub fn refresh_owner(&self, owner: &Address, polls: &[PollSummary]) {
        let mut inner = self.inner.lock();
        inner.polls.retain(|key, _| key.owner != *owner);
        for summary in polls {
            inner.polls.insert(summary.key(), summary.poll.clone());
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.polls.clear();
        inner.voted.clear();
    }
}
