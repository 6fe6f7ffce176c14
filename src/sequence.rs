//! Ordering discipline for rebuilds.
//!
//! Two pieces:
//! - [`TableLocks`] serializes statements per table name, so two rebuilds of
//!   the same root never interleave their drop/load/union steps while rebuilds
//!   of different roots still run concurrently.
//! - [`LatestWins`] numbers requests monotonically. Rebuilds ask
//!   [`LatestWins::is_current`] while holding the table lock, so a request
//!   overtaken by a newer one never replaces the table; a committed value is
//!   never replaced by an older one.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio::sync::OwnedMutexGuard;

use crate::query::TableName;

/// One async mutex per table name, created on first use.
#[derive(Default)]
pub struct TableLocks {
    locks: Mutex<HashMap<TableName, Arc<tokio::sync::Mutex<()>>>>,
}

impl TableLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive use of `table`. Waiters are served in FIFO order.
    pub async fn acquire(&self, table: &TableName) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            map.entry(table.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

/// Sequence number captured when a request starts.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct Ticket(u64);

impl Ticket {
    pub fn seq(self) -> u64 {
        self.0
    }
}

#[derive(Debug)]
struct Committed<T> {
    seq: u64,
    value: Arc<T>,
}

/// Commit slot where only the most recently started request may publish.
#[derive(Debug)]
pub struct LatestWins<T> {
    requested: AtomicU64,
    committed: RwLock<Option<Committed<T>>>,
}

impl<T> Default for LatestWins<T> {
    fn default() -> Self {
        LatestWins { requested: AtomicU64::new(0), committed: RwLock::new(None) }
    }
}

impl<T> LatestWins<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a request; every earlier ticket becomes stale.
    pub fn begin(&self) -> Ticket {
        Ticket(self.requested.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn is_current(&self, ticket: Ticket) -> bool {
        self.requested.load(Ordering::SeqCst) == ticket.0
    }

    /// Publish `value` unless an equal or newer ticket already committed.
    ///
    /// Staleness is checked by the caller under the table lock; a request
    /// that passed that check may still be overtaken before it gets here, and
    /// its value must then stay visible until the newer one commits.
    pub fn commit(&self, ticket: Ticket, value: T) -> bool {
        let mut slot = self.committed.write().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().map_or(false, |c| c.seq >= ticket.0) {
            return false;
        }
        *slot = Some(Committed { seq: ticket.0, value: Arc::new(value) });
        true
    }

    /// The last committed value, if any.
    pub fn current(&self) -> Option<Arc<T>> {
        let slot = self.committed.read().unwrap_or_else(PoisonError::into_inner);
        slot.as_ref().map(|c| Arc::clone(&c.value))
    }

    pub fn committed_seq(&self) -> Option<u64> {
        let slot = self.committed.read().unwrap_or_else(PoisonError::into_inner);
        slot.as_ref().map(|c| c.seq)
    }
}
