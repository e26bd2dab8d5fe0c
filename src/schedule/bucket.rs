//! Delay-keyed schedule bucket
//!
//! A bucket maps a delay (seconds) to the set of elements that have at least
//! one check due at that delay. The map never holds an empty set: the first
//! element added under a delay fires `on_schedule_start`, removing the last one
//! fires `on_schedule_cancel` before the key is erased.
//!
//! Events are delivered while the bucket lock is held, so start/cancel for one
//! delay are observed by the listener in the same order as the mutations that
//! caused them. Listeners only ever call *upward* (into a parent bucket or the
//! timer table), which keeps the lock order acyclic.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;

use parking_lot::Mutex;
use tracing::trace;

/// Receives the two lifecycle events of a delay inside a bucket
pub trait ScheduleListener: Send + Sync {
    /// First element was added under `delay`
    fn on_schedule_start(&self, delay: u64);

    /// Last element was removed from `delay`
    fn on_schedule_cancel(&self, delay: u64);
}

impl<L: ScheduleListener + ?Sized> ScheduleListener for std::sync::Arc<L> {
    fn on_schedule_start(&self, delay: u64) {
        (**self).on_schedule_start(delay);
    }

    fn on_schedule_cancel(&self, delay: u64) {
        (**self).on_schedule_cancel(delay);
    }
}

pub struct ScheduleBucket<T> {
    name: String,
    entries: Mutex<BTreeMap<u64, BTreeSet<T>>>,
    listener: Box<dyn ScheduleListener>,
}

impl<T> ScheduleBucket<T>
where
    T: Ord + Clone + Debug + Send,
{
    pub fn new(name: impl Into<String>, listener: Box<dyn ScheduleListener>) -> Self {
        Self {
            name: name.into(),
            entries: Mutex::new(BTreeMap::new()),
            listener,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add `item` under `delay`. Returns `false` if it was already there.
    pub fn add_item(&self, delay: u64, item: T) -> bool {
        let mut entries = self.entries.lock();
        let set = entries.entry(delay).or_default();
        let first = set.is_empty();

        if !set.insert(item) {
            return false;
        }

        if first {
            trace!(bucket = %self.name, delay, "schedule start");
            self.listener.on_schedule_start(delay);
        }
        true
    }

    /// Remove `item` from `delay`. Returns whether anything was removed.
    pub fn remove_item(&self, delay: u64, item: &T) -> bool {
        let mut entries = self.entries.lock();
        Self::remove_locked(&self.name, self.listener.as_ref(), &mut entries, delay, item)
    }

    /// Remove `item` from every delay it participates in
    ///
    /// Returns the delays that were affected.
    pub fn remove_everywhere(&self, item: &T) -> BTreeSet<u64> {
        let mut entries = self.entries.lock();
        let delays: Vec<u64> = entries
            .iter()
            .filter(|(_, set)| set.contains(item))
            .map(|(delay, _)| *delay)
            .collect();

        delays
            .into_iter()
            .filter(|delay| {
                Self::remove_locked(&self.name, self.listener.as_ref(), &mut entries, *delay, item)
            })
            .collect()
    }

    /// Move `item` from one delay to another in a single critical section
    pub fn move_item(&self, from: u64, to: u64, item: T) {
        if from == to {
            self.add_item(to, item);
            return;
        }

        let mut entries = self.entries.lock();
        Self::remove_locked(&self.name, self.listener.as_ref(), &mut entries, from, &item);

        let set = entries.entry(to).or_default();
        let first = set.is_empty();
        if set.insert(item) && first {
            trace!(bucket = %self.name, delay = to, "schedule start");
            self.listener.on_schedule_start(to);
        }
    }

    fn remove_locked(
        name: &str,
        listener: &dyn ScheduleListener,
        entries: &mut BTreeMap<u64, BTreeSet<T>>,
        delay: u64,
        item: &T,
    ) -> bool {
        let Some(set) = entries.get_mut(&delay) else {
            return false;
        };

        if !set.remove(item) {
            return false;
        }

        if set.is_empty() {
            trace!(bucket = %name, delay, "schedule cancel");
            listener.on_schedule_cancel(delay);
            entries.remove(&delay);
        }
        true
    }

    /// Snapshot of the elements registered under `delay`
    pub fn get(&self, delay: u64) -> Vec<T> {
        self.entries
            .lock()
            .get(&delay)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, delay: u64, item: &T) -> bool {
        self.entries
            .lock()
            .get(&delay)
            .is_some_and(|set| set.contains(item))
    }

    /// Snapshot of the whole bucket
    pub fn entries(&self) -> BTreeMap<u64, BTreeSet<T>> {
        self.entries.lock().clone()
    }

    /// Delays that currently have at least one element
    pub fn keys(&self) -> Vec<u64> {
        self.entries.lock().keys().copied().collect()
    }

    /// Number of active delays
    pub fn size(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl<T: Debug> Debug for ScheduleBucket<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduleBucket")
            .field("name", &self.name)
            .field("entries", &*self.entries.lock())
            .finish()
    }
}
