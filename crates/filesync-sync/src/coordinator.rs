//! Source path coordinator
//!
//! Two configurations reading the same source at once would double the
//! I/O on that volume and could each capture a different partial snapshot.
//! [`SourceCopyCoordinator`] hands out one [`SourceLease`] per normalized
//! source path at a time; unrelated sources proceed independently.
//!
//! Waiters queue in arrival order. A waiter is granted the lease only when
//! nobody holds it and its ticket is at the front of the queue, so a busy
//! source cannot starve a configuration that has been waiting longest.
//!
//! ```text
//!   acquire(A) ──► queue [A] ──► holder A
//!   acquire(B) ──► queue [B]          (waits)
//!   release(A) ──► notify ──► holder B
//! ```

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use filesync_core::domain::ConfigId;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Default backstop between re-checks while waiting
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug)]
struct LockEntry {
    holder: Option<ConfigId>,
    queue: VecDeque<(u64, ConfigId)>,
    notify: Arc<Notify>,
}

impl LockEntry {
    fn new() -> Self {
        Self {
            holder: None,
            queue: VecDeque::new(),
            notify: Arc::new(Notify::new()),
        }
    }

    fn is_unused(&self) -> bool {
        self.holder.is_none() && self.queue.is_empty()
    }
}

/// Process-wide mutual exclusion keyed by source path
#[derive(Debug)]
pub struct SourceCopyCoordinator {
    entries: Mutex<HashMap<String, LockEntry>>,
    next_ticket: AtomicU64,
    poll_interval: Duration,
}

impl Default for SourceCopyCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl SourceCopyCoordinator {
    /// Creates a coordinator that re-checks waiters every `poll_interval`
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next_ticket: AtomicU64::new(0),
            poll_interval,
        }
    }

    /// Waits for exclusive ownership of `source` on behalf of `owner`
    ///
    /// Returns `None` without granting anything if `cancel` fires first.
    /// Dropping the returned lease releases the source. Dropping the
    /// future while it waits withdraws the owner from the queue.
    pub async fn acquire(
        self: &Arc<Self>,
        source: &Path,
        owner: ConfigId,
        cancel: &CancellationToken,
    ) -> Option<SourceLease> {
        let key = normalize(source);
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);

        let notify = {
            let mut entries = self.lock();
            let entry = entries.entry(key.clone()).or_insert_with(LockEntry::new);
            entry.queue.push_back((ticket, owner));
            trace!(source = %key, %owner, waiters = entry.queue.len(), "Queued for source");
            Arc::clone(&entry.notify)
        };
        let mut pending = PendingTicket {
            coordinator: self,
            key: &key,
            ticket,
            granted: false,
        };

        loop {
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.try_grant(&key, ticket, owner) {
                pending.granted = true;
                drop(pending);
                debug!(source = %key, %owner, "Source lock acquired");
                return Some(SourceLease {
                    coordinator: Arc::clone(self),
                    source: source.to_path_buf(),
                    key,
                    owner,
                });
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = cancel.cancelled() => {
                    debug!(source = %key, %owner, "Gave up waiting for source lock");
                    return None;
                }
            }
        }
    }

    /// Relinquishes `source` if `owner` holds it
    ///
    /// Does nothing when `owner` is not the current holder, so it is safe
    /// to call from any error path.
    pub fn release(&self, source: &Path, owner: ConfigId) {
        self.release_key(&normalize(source), owner);
    }

    /// Current holder of `source`, if any
    pub fn holder(&self, source: &Path) -> Option<ConfigId> {
        self.lock()
            .get(&normalize(source))
            .and_then(|entry| entry.holder)
    }

    /// Number of owners queued behind the holder of `source`
    pub fn waiters(&self, source: &Path) -> usize {
        self.lock()
            .get(&normalize(source))
            .map_or(0, |entry| entry.queue.len())
    }

    /// True while any holder or waiter exists for `source`
    pub fn is_tracked(&self, source: &Path) -> bool {
        self.lock().contains_key(&normalize(source))
    }

    fn try_grant(&self, key: &str, ticket: u64, owner: ConfigId) -> bool {
        let mut entries = self.lock();
        let Some(entry) = entries.get_mut(key) else {
            return false;
        };
        let at_front = entry.queue.front().map(|(t, _)| *t) == Some(ticket);
        if entry.holder.is_none() && at_front {
            entry.queue.pop_front();
            entry.holder = Some(owner);
            true
        } else {
            false
        }
    }

    fn abandon(&self, key: &str, ticket: u64) {
        let mut entries = self.lock();
        if let Some(entry) = entries.get_mut(key) {
            entry.queue.retain(|(t, _)| *t != ticket);
            if entry.is_unused() {
                entries.remove(key);
            } else {
                // The head of the queue may have changed.
                entry.notify.notify_waiters();
            }
        }
    }

    fn release_key(&self, key: &str, owner: ConfigId) {
        let mut entries = self.lock();
        let Some(entry) = entries.get_mut(key) else {
            return;
        };
        if entry.holder != Some(owner) {
            trace!(source = %key, %owner, "Ignoring release from non-holder");
            return;
        }

        entry.holder = None;
        debug!(source = %key, %owner, waiters = entry.queue.len(), "Source lock released");
        if entry.is_unused() {
            entries.remove(key);
        } else {
            entry.notify.notify_waiters();
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, LockEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A queued ticket that is withdrawn unless it was granted
struct PendingTicket<'a> {
    coordinator: &'a SourceCopyCoordinator,
    key: &'a str,
    ticket: u64,
    granted: bool,
}

impl Drop for PendingTicket<'_> {
    fn drop(&mut self) {
        if !self.granted {
            self.coordinator.abandon(self.key, self.ticket);
        }
    }
}

/// Exclusive ownership of one source path
///
/// Released on drop.
#[derive(Debug)]
pub struct SourceLease {
    coordinator: Arc<SourceCopyCoordinator>,
    source: PathBuf,
    key: String,
    owner: ConfigId,
}

impl SourceLease {
    /// The source path as passed to `acquire`
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// The configuration holding the lease
    pub fn owner(&self) -> ConfigId {
        self.owner
    }
}

impl Drop for SourceLease {
    fn drop(&mut self) {
        self.coordinator.release_key(&self.key, self.owner);
    }
}

/// Lock key for a source path
///
/// Case, separator style and trailing separators do not matter:
/// `C:\Data\` and `c:/data` share a key.
pub fn normalize(path: &Path) -> String {
    let lowered = path.to_string_lossy().replace('\\', "/").to_lowercase();

    let mut key = String::with_capacity(lowered.len());
    let mut previous_slash = false;
    for ch in lowered.chars() {
        if ch == '/' {
            if previous_slash {
                continue;
            }
            previous_slash = true;
        } else {
            previous_slash = false;
        }
        key.push(ch);
    }

    while key.len() > 1 && key.ends_with('/') {
        key.pop();
    }
    key
}
