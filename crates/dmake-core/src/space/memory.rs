//! In-memory Space implementation.
//!
//! One mutex serializes every write, take and expiry, so concurrent takes
//! with overlapping templates are strictly linearized. Blocking callers wait
//! on a `Notify` that every insertion wakes; a background reaper removes
//! entries whose lease has run out.

use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::notify::{EventKind, SubscriberSlot, Subscription};
use super::{LeaseId, Space, SpaceError, Wait};
use crate::domain::{Entry, Kind, Template};

/// Stand-in deadline for leases too long to represent.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

fn deadline_after(now: Instant, lease: Duration) -> Instant {
    now.checked_add(lease).unwrap_or_else(|| now + FAR_FUTURE)
}

/// Pending lease expiry for the reaper's priority queue.
///
/// Reverse ordering makes `BinaryHeap` a min-heap (earliest first). Items are
/// never removed eagerly: a renewal pushes a new item and the stale one is
/// skipped when it surfaces.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Expiry {
    at: Instant,
    id: u64,
}

impl PartialOrd for Expiry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Expiry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other.at.cmp(&self.at).then_with(|| other.id.cmp(&self.id))
    }
}

#[derive(Debug)]
struct Stored {
    entry: Entry,
    expires_at: Option<Instant>,
}

struct SpaceState {
    /// All entries by id; ids grow monotonically so iteration is oldest first.
    entries: BTreeMap<u64, Stored>,

    /// kind -> key -> ids, for templates that fix both.
    by_key: HashMap<Kind, HashMap<String, BTreeSet<u64>>>,

    expiries: BinaryHeap<Expiry>,

    subscribers: Vec<Arc<SubscriberSlot>>,

    next_id: u64,

    closed: bool,
}

impl SpaceState {
    fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            by_key: HashMap::new(),
            expiries: BinaryHeap::new(),
            subscribers: Vec::new(),
            next_id: 1,
            closed: false,
        }
    }

    fn insert(&mut self, entry: Entry, lease: Option<Duration>, now: Instant) -> u64 {
        let id = self.next_id;
        self.next_id += 1;

        let expires_at = lease.map(|lease| deadline_after(now, lease));
        if let Some(at) = expires_at {
            self.expiries.push(Expiry { at, id });
        }
        self.by_key
            .entry(entry.kind)
            .or_default()
            .entry(entry.key.clone())
            .or_default()
            .insert(id);
        self.publish(EventKind::Write, &entry);
        self.entries.insert(id, Stored { entry, expires_at });
        id
    }

    fn remove(&mut self, id: u64) -> Option<Entry> {
        let stored = self.entries.remove(&id)?;
        if let Some(keys) = self.by_key.get_mut(&stored.entry.kind)
            && let Some(ids) = keys.get_mut(&stored.entry.key)
        {
            ids.remove(&id);
            if ids.is_empty() {
                keys.remove(&stored.entry.key);
            }
        }
        Some(stored.entry)
    }

    fn find(&self, template: &Template) -> Option<u64> {
        if let (Some(kind), Some(key)) = (&template.kind, &template.key) {
            return self
                .by_key
                .get(kind)?
                .get(key)?
                .iter()
                .copied()
                .find(|id| template.matches(&self.entries[id].entry));
        }
        self.entries
            .iter()
            .find(|(_, stored)| template.matches(&stored.entry))
            .map(|(&id, _)| id)
    }

    /// Drop every entry whose lease ran out by `now`.
    fn reap_expired(&mut self, now: Instant) {
        while let Some(top) = self.expiries.peek() {
            if top.at > now {
                break; // Heap is sorted, so we can stop
            }
            let Some(item) = self.expiries.pop() else {
                break;
            };
            let current = self.entries.get(&item.id).and_then(|s| s.expires_at);
            if current != Some(item.at) {
                continue; // renewed or already removed
            }
            if let Some(entry) = self.remove(item.id) {
                tracing::debug!(%entry, "lease expired");
                self.publish(EventKind::Expire, &entry);
            }
        }
    }

    fn next_expiry(&self) -> Option<Instant> {
        self.expiries.peek().map(|e| e.at)
    }

    fn publish(&mut self, kind: EventKind, entry: &Entry) {
        self.subscribers.retain(|slot| slot.deliver(kind, entry));
    }

    fn lease_deadline(&self, lease: LeaseId) -> Option<Instant> {
        self.entries.get(&lease.0)?.expires_at
    }
}

struct Inner {
    state: Mutex<SpaceState>,
    changed: Notify,
}

/// Space hosted in this process.
pub struct InMemorySpace {
    inner: Arc<Inner>,
    reaper: JoinHandle<()>,
}

impl InMemorySpace {
    /// Create the store and start its lease reaper on the current runtime.
    pub fn new() -> Self {
        let inner = Arc::new(Inner {
            state: Mutex::new(SpaceState::new()),
            changed: Notify::new(),
        });
        let reaper = tokio::spawn(reaper_loop(Arc::clone(&inner)));
        Self { inner, reaper }
    }

    /// Subscribe to future events of the given kinds on entries matching
    /// `template`. Events arrive in the order the store applied them.
    pub async fn notify(&self, kinds: &[EventKind], template: Template) -> Subscription {
        let (subscription, slot) = Subscription::new(kinds, template);
        let mut state = self.inner.state.lock().await;
        if state.closed {
            slot.close();
        } else {
            state.subscribers.push(slot);
        }
        subscription
    }

    /// Shut the store down: blocked callers fail with `Closed` and every
    /// subscription receives `Close`.
    pub async fn close(&self) {
        {
            let mut state = self.inner.state.lock().await;
            state.closed = true;
            for slot in state.subscribers.drain(..) {
                slot.close();
            }
        }
        self.inner.changed.notify_waiters();
    }

    pub async fn len(&self) -> usize {
        self.inner.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn lookup(&self, template: &Template, wait: Wait, consume: bool) -> Result<Entry, SpaceError> {
        let deadline = match wait {
            Wait::Forever => None,
            // A timeout past the representable range waits forever.
            Wait::For(timeout) => Instant::now().checked_add(timeout),
        };

        loop {
            // Register for wake-ups before looking, so a write landing
            // between the check and the wait is not missed.
            let notified = self.inner.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.inner.state.lock().await;
                if state.closed {
                    return Err(SpaceError::Closed);
                }
                state.reap_expired(Instant::now());
                if let Some(id) = state.find(template) {
                    if !consume {
                        return Ok(state.entries[&id].entry.clone());
                    }
                    if let Some(entry) = state.remove(id) {
                        tracing::debug!(%entry, "take");
                        state.publish(EventKind::Take, &entry);
                        return Ok(entry);
                    }
                }
            }

            match deadline {
                None => notified.await,
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        return Err(SpaceError::NoMatch(template.clone()));
                    }
                    tokio::select! {
                        _ = &mut notified => {},
                        _ = tokio::time::sleep_until(deadline) => {},
                    }
                }
            }
        }
    }
}

impl Default for InMemorySpace {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InMemorySpace {
    fn drop(&mut self) {
        self.reaper.abort();
    }
}

#[async_trait]
impl Space for InMemorySpace {
    async fn write(&self, entry: Entry, lease: Option<Duration>) -> Result<LeaseId, SpaceError> {
        let id = {
            let mut state = self.inner.state.lock().await;
            if state.closed {
                return Err(SpaceError::Closed);
            }
            let now = Instant::now();
            state.reap_expired(now);
            tracing::debug!(%entry, lease_ms = lease.map(|l| l.as_millis() as u64), "write");
            state.insert(entry, lease, now)
        };
        // Wake blocked takers and the reaper outside the lock.
        self.inner.changed.notify_waiters();
        Ok(LeaseId(id))
    }

    async fn take(&self, template: &Template, wait: Wait) -> Result<Entry, SpaceError> {
        self.lookup(template, wait, true).await
    }

    async fn read(&self, template: &Template, wait: Wait) -> Result<Entry, SpaceError> {
        self.lookup(template, wait, false).await
    }

    async fn read_all(&self, template: &Template) -> Result<Vec<Entry>, SpaceError> {
        let mut state = self.inner.state.lock().await;
        if state.closed {
            return Err(SpaceError::Closed);
        }
        state.reap_expired(Instant::now());
        Ok(state
            .entries
            .values()
            .filter(|stored| template.matches(&stored.entry))
            .map(|stored| stored.entry.clone())
            .collect())
    }

    async fn renew(&self, lease: LeaseId, period: Duration) -> Result<(), SpaceError> {
        {
            let mut state = self.inner.state.lock().await;
            if state.closed {
                return Err(SpaceError::Closed);
            }
            let now = Instant::now();
            state.reap_expired(now);
            if state.lease_deadline(lease).is_none() {
                return Err(SpaceError::LeaseNotFound(lease));
            }
            let at = deadline_after(now, period);
            if let Some(stored) = state.entries.get_mut(&lease.0) {
                stored.expires_at = Some(at);
            }
            state.expiries.push(Expiry { at, id: lease.0 });
        }
        // The reaper may be sleeping toward a later deadline.
        self.inner.changed.notify_waiters();
        Ok(())
    }

    async fn cancel(&self, lease: LeaseId) -> Result<Entry, SpaceError> {
        let mut state = self.inner.state.lock().await;
        if state.closed {
            return Err(SpaceError::Closed);
        }
        state.reap_expired(Instant::now());
        let entry = state
            .remove(lease.0)
            .ok_or(SpaceError::LeaseNotFound(lease))?;
        tracing::debug!(%entry, "cancel");
        state.publish(EventKind::Take, &entry);
        Ok(entry)
    }
}

async fn reaper_loop(inner: Arc<Inner>) {
    loop {
        let notified = inner.changed.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let next = {
            let mut state = inner.state.lock().await;
            if state.closed {
                return;
            }
            state.reap_expired(Instant::now());
            state.next_expiry()
        };

        match next {
            Some(at) => {
                tokio::select! {
                    _ = &mut notified => {},
                    _ = tokio::time::sleep_until(at) => {},
                }
            }
            None => notified.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskState;

    fn todo(rule: &str) -> Entry {
        Entry::task(rule, TaskState::Todo)
    }

    #[tokio::test]
    async fn write_then_take_round_trip() {
        let space = InMemorySpace::new();
        let entry = todo("a");
        let template = Template::task(Some("a"), None);

        space.write(entry.clone(), None).await.unwrap();
        let taken = space.take(&template, Wait::Forever).await.unwrap();

        assert_eq!(taken, entry);
        assert!(space.read_all(&template).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn read_does_not_consume() {
        let space = InMemorySpace::new();
        space.write(todo("a"), None).await.unwrap();

        let template = Template::task(None, Some(TaskState::Todo));
        space.read(&template, Wait::NOW).await.unwrap();

        assert_eq!(space.read_all(&template).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn zero_wait_fails_fast_without_match() {
        let space = InMemorySpace::new();
        let err = space
            .take(&Template::task(None, Some(TaskState::Todo)), Wait::NOW)
            .await
            .unwrap_err();
        assert!(matches!(err, SpaceError::NoMatch(_)));
    }

    #[tokio::test]
    async fn oldest_match_is_taken_first() {
        let space = InMemorySpace::new();
        space.write(todo("first"), None).await.unwrap();
        space.write(todo("second"), None).await.unwrap();

        let template = Template::task(None, Some(TaskState::Todo));
        assert_eq!(space.take(&template, Wait::NOW).await.unwrap().key, "first");
        assert_eq!(space.take(&template, Wait::NOW).await.unwrap().key, "second");
    }

    #[tokio::test(start_paused = true)]
    async fn blocked_take_wakes_on_write() {
        let space = Arc::new(InMemorySpace::new());
        let waiter = tokio::spawn({
            let space = Arc::clone(&space);
            async move {
                space
                    .take(&Template::task(Some("late"), None), Wait::Forever)
                    .await
            }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        space.write(todo("late"), None).await.unwrap();

        assert_eq!(waiter.await.unwrap().unwrap().key, "late");
    }

    #[tokio::test(start_paused = true)]
    async fn timed_take_gives_up() {
        let space = InMemorySpace::new();
        let start = Instant::now();

        let err = space
            .take(&Template::kind(Kind::Task), Wait::For(Duration::from_secs(3)))
            .await
            .unwrap_err();

        assert!(matches!(err, SpaceError::NoMatch(_)));
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_takes_never_share_an_entry() {
        let space = Arc::new(InMemorySpace::new());
        for i in 0..50 {
            space.write(todo(&format!("t{i}")), None).await.unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..8 {
            let space = Arc::clone(&space);
            handles.push(tokio::spawn(async move {
                let mut taken = Vec::new();
                let template = Template::task(None, Some(TaskState::Todo));
                while let Ok(entry) = space.take(&template, Wait::NOW).await {
                    taken.push(entry.key);
                }
                taken
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 50);
    }

    #[tokio::test(start_paused = true)]
    async fn unrenewed_lease_expires() {
        let space = InMemorySpace::new();
        let lease = Duration::from_secs(2);
        space
            .write(Entry::task("a", TaskState::Working), Some(lease))
            .await
            .unwrap();

        tokio::time::sleep(lease + Duration::from_millis(10)).await;

        assert!(space.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn renewed_lease_survives() {
        let space = InMemorySpace::new();
        let lease = Duration::from_secs(2);
        let id = space
            .write(Entry::task("a", TaskState::Working), Some(lease))
            .await
            .unwrap();

        for _ in 0..20 {
            tokio::time::sleep(lease / 2).await;
            space.renew(id, lease).await.unwrap();
        }

        assert_eq!(space.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_and_take_publish_distinct_events() {
        let space = InMemorySpace::new();
        let mut sub = space
            .notify(
                &[EventKind::Write, EventKind::Take, EventKind::Expire],
                Template::kind(Kind::Task),
            )
            .await;

        space.write(todo("a"), None).await.unwrap();
        space
            .write(Entry::task("b", TaskState::Working), Some(Duration::from_secs(1)))
            .await
            .unwrap();
        space.take(&Template::task(Some("a"), None), Wait::NOW).await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;

        let kinds: Vec<(EventKind, String)> = {
            let mut out = Vec::new();
            for _ in 0..4 {
                let event = sub.recv().await.unwrap();
                out.push((event.kind, event.entry.unwrap().key));
            }
            out
        };
        assert_eq!(
            kinds,
            vec![
                (EventKind::Write, "a".to_string()),
                (EventKind::Write, "b".to_string()),
                (EventKind::Take, "a".to_string()),
                (EventKind::Expire, "b".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn cancel_removes_leased_entry_as_take() {
        let space = InMemorySpace::new();
        let mut sub = space.notify(&[EventKind::Take], Template::any()).await;
        let id = space
            .write(Entry::task("a", TaskState::Working), Some(Duration::from_secs(60)))
            .await
            .unwrap();

        space.cancel(id).await.unwrap();

        assert_eq!(sub.recv().await.unwrap().kind, EventKind::Take);
        assert!(matches!(
            space.renew(id, Duration::from_secs(1)).await,
            Err(SpaceError::LeaseNotFound(_))
        ));
    }

    #[tokio::test]
    async fn huge_durations_do_not_overflow() {
        let space = InMemorySpace::new();
        let id = space
            .write(Entry::task("a", TaskState::Working), Some(Duration::MAX))
            .await
            .unwrap();
        space.renew(id, Duration::MAX).await.unwrap();

        let template = Template::task(Some("a"), None);
        let taken = space.take(&template, Wait::For(Duration::MAX)).await.unwrap();
        assert_eq!(taken.key, "a");
    }

    #[tokio::test]
    async fn renew_requires_a_lease() {
        let space = InMemorySpace::new();
        let id = space.write(todo("a"), None).await.unwrap();

        assert!(matches!(
            space.renew(id, Duration::from_secs(1)).await,
            Err(SpaceError::LeaseNotFound(_))
        ));
    }

    #[tokio::test]
    async fn close_fails_waiters_and_ends_subscriptions() {
        let space = Arc::new(InMemorySpace::new());
        let mut sub = space.notify(&[EventKind::Write], Template::any()).await;
        let waiter = tokio::spawn({
            let space = Arc::clone(&space);
            async move { space.take(&Template::any(), Wait::Forever).await }
        });
        tokio::task::yield_now().await;

        space.close().await;

        assert!(matches!(waiter.await.unwrap(), Err(SpaceError::Closed)));
        assert_eq!(sub.recv().await.unwrap().kind, EventKind::Close);
        assert!(matches!(space.write(todo("x"), None).await, Err(SpaceError::Closed)));
    }
}
