use std::collections::{HashMap, HashSet};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use log::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::heap_page::{HeapPageId, Permission};
use crate::transaction::TransactionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Shared,
    Exclusive,
}

#[derive(Default)]
struct LockState {
    /// Currently granted mode for a page, plus its holders.
    page_mode: HashMap<HeapPageId, Mode>,
    page_holders: HashMap<HeapPageId, HashSet<TransactionId>>,
    /// Pages held by a transaction, in any mode.
    txn_pages: HashMap<TransactionId, HashSet<HeapPageId>>,
    /// Edges in the waits-for graph: requester -> holders it is blocked on.
    waits_for: HashMap<TransactionId, HashSet<TransactionId>>,
}

/// Page-level shared/exclusive lock table with waits-for-graph deadlock
/// detection. A transaction that discovers a cycle while waiting aborts
/// itself rather than picking another victim.
pub const DEFAULT_BACKOFF_MS: u64 = 10;

pub struct LockManager {
    state: Mutex<LockState>,
    backoff: Condvar,
    backoff_ms: u64,
}

impl LockManager {
    pub fn new() -> Self {
        LockManager::with_backoff(DEFAULT_BACKOFF_MS)
    }

    pub fn with_backoff(backoff_ms: u64) -> Self {
        LockManager {
            state: Mutex::new(LockState::default()),
            backoff: Condvar::new(),
            backoff_ms,
        }
    }

    /// Blocks (with periodic deadlock checks) until `tid` holds at least
    /// `perm` on `pid`, or returns `Error::Deadlock` if a wait cycle is
    /// detected with `tid` as a participant.
    pub fn acquire_lock(&self, tid: TransactionId, pid: HeapPageId, perm: Permission) -> Result<()> {
        let wanted = if perm == Permission::Write {
            Mode::Exclusive
        } else {
            Mode::Shared
        };
        let mut state = self.state.lock().unwrap();
        loop {
            match Self::try_grant(&mut state, tid, pid, wanted) {
                Granted::Yes => {
                    trace!("tid {:?} granted {:?} on {:?}", tid, wanted, pid);
                    return Ok(());
                }
                Granted::No(holders) => {
                    let edges = state.waits_for.entry(tid).or_default();
                    edges.clear();
                    edges.extend(holders.iter().filter(|h| **h != tid));

                    if Self::has_cycle(&state.waits_for, tid) {
                        state.waits_for.remove(&tid);
                        warn!("tid {:?} detected deadlock waiting on {:?}", tid, pid);
                        return Err(Error::Deadlock(tid));
                    }

                    debug!("tid {:?} blocked on {:?} ({:?})", tid, pid, wanted);
                    let (guard, timeout) = self
                        .backoff
                        .wait_timeout(state, Duration::from_millis(self.backoff_ms))
                        .unwrap();
                    state = guard;
                    let _ = timeout;
                }
            }
        }
    }

    /// Tries to grant `wanted` on `pid` to `tid` under the held monitor lock.
    /// Returns the blocking holders on failure.
    fn try_grant(
        state: &mut LockState,
        tid: TransactionId,
        pid: HeapPageId,
        wanted: Mode,
    ) -> Granted {
        let holders = state.page_holders.entry(pid).or_default();
        let already_sole_holder = holders.len() == 1 && holders.contains(&tid);
        let unheld = holders.is_empty();
        let held_shared_only = state.page_mode.get(&pid) == Some(&Mode::Shared);

        let can_grant = match wanted {
            Mode::Shared => holders.contains(&tid) || unheld || held_shared_only,
            Mode::Exclusive => unheld || already_sole_holder,
        };

        if !can_grant {
            return Granted::No(holders.clone());
        }

        let holders = state.page_holders.entry(pid).or_default();
        holders.insert(tid);
        // Only ever strengthen the recorded mode. A holder re-requesting Shared
        // while it already holds Exclusive must not downgrade the page's mode,
        // or a concurrent Shared request would then see `held_shared_only` and
        // be granted alongside an exclusive holder's uncommitted writes.
        let current = state.page_mode.get(&pid).copied();
        if wanted == Mode::Exclusive || current.is_none() {
            state.page_mode.insert(pid, wanted);
        }
        state.txn_pages.entry(tid).or_default().insert(pid);
        state.waits_for.remove(&tid);
        Granted::Yes
    }

    /// DFS from `start` over the waits-for graph; true if it can reach
    /// itself again.
    fn has_cycle(waits_for: &HashMap<TransactionId, HashSet<TransactionId>>, start: TransactionId) -> bool {
        let mut stack = vec![start];
        let mut visited = HashSet::new();
        while let Some(node) = stack.pop() {
            if let Some(neighbors) = waits_for.get(&node) {
                for &next in neighbors {
                    if next == start {
                        return true;
                    }
                    if visited.insert(next) {
                        stack.push(next);
                    }
                }
            }
        }
        false
    }

    pub fn release_lock(&self, tid: TransactionId, pid: HeapPageId) {
        let mut state = self.state.lock().unwrap();
        if let Some(holders) = state.page_holders.get_mut(&pid) {
            holders.remove(&tid);
            if holders.is_empty() {
                state.page_holders.remove(&pid);
                state.page_mode.remove(&pid);
            }
        }
        if let Some(pages) = state.txn_pages.get_mut(&tid) {
            pages.remove(&pid);
        }
        drop(state);
        self.backoff.notify_all();
    }

    pub fn release_all_locks(&self, tid: TransactionId) {
        let mut state = self.state.lock().unwrap();
        if let Some(pages) = state.txn_pages.remove(&tid) {
            for pid in pages {
                if let Some(holders) = state.page_holders.get_mut(&pid) {
                    holders.remove(&tid);
                    if holders.is_empty() {
                        state.page_holders.remove(&pid);
                        state.page_mode.remove(&pid);
                    }
                }
            }
        }
        state.waits_for.remove(&tid);
        for edges in state.waits_for.values_mut() {
            edges.remove(&tid);
        }
        drop(state);
        self.backoff.notify_all();
    }

    pub fn holds_lock(&self, tid: TransactionId, pid: HeapPageId) -> Option<Permission> {
        let state = self.state.lock().unwrap();
        if state.page_holders.get(&pid).is_some_and(|h| h.contains(&tid)) {
            Some(match state.page_mode.get(&pid) {
                Some(Mode::Exclusive) => Permission::Write,
                _ => Permission::Read,
            })
        } else {
            None
        }
    }

    pub fn get_locked_pages(&self, tid: TransactionId) -> HashSet<HeapPageId> {
        let state = self.state.lock().unwrap();
        state.txn_pages.get(&tid).cloned().unwrap_or_default()
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

enum Granted {
    Yes,
    No(HashSet<TransactionId>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn pid(n: usize) -> HeapPageId {
        HeapPageId::new(1, n)
    }

    #[test]
    fn shared_locks_do_not_conflict() {
        let lm = LockManager::new();
        let t1 = TransactionId::new();
        let t2 = TransactionId::new();
        lm.acquire_lock(t1, pid(0), Permission::Read).unwrap();
        lm.acquire_lock(t2, pid(0), Permission::Read).unwrap();
        assert!(lm.holds_lock(t1, pid(0)).is_some());
        assert!(lm.holds_lock(t2, pid(0)).is_some());
    }

    #[test]
    fn exclusive_excludes_others() {
        let lm = Arc::new(LockManager::new());
        let t1 = TransactionId::new();
        let t2 = TransactionId::new();
        lm.acquire_lock(t1, pid(0), Permission::Write).unwrap();

        let lm2 = Arc::clone(&lm);
        let handle = thread::spawn(move || lm2.acquire_lock(t2, pid(0), Permission::Read));

        thread::sleep(Duration::from_millis(50));
        lm.release_all_locks(t1);
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn upgrade_from_shared_to_exclusive_when_sole_holder() {
        let lm = LockManager::new();
        let t1 = TransactionId::new();
        lm.acquire_lock(t1, pid(0), Permission::Read).unwrap();
        lm.acquire_lock(t1, pid(0), Permission::Write).unwrap();
        assert_eq!(lm.holds_lock(t1, pid(0)), Some(Permission::Write));
    }

    #[test]
    fn cyclic_wait_aborts_one_side() {
        let lm = Arc::new(LockManager::with_backoff(5));
        let t1 = TransactionId::new();
        let t2 = TransactionId::new();
        lm.acquire_lock(t1, pid(0), Permission::Write).unwrap();
        lm.acquire_lock(t2, pid(1), Permission::Write).unwrap();

        let lm2 = Arc::clone(&lm);
        let h1 = thread::spawn(move || lm2.acquire_lock(t1, pid(1), Permission::Write));
        let result2 = lm.acquire_lock(t2, pid(0), Permission::Write);

        lm.release_all_locks(t2);
        let result1 = h1.join().unwrap();

        let one_aborted = result1.is_err() || result2.is_err();
        assert!(one_aborted);
    }
}
