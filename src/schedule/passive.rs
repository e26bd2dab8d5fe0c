use std::fmt::Debug;
use std::sync::Arc;

use super::bucket::{ScheduleBucket, ScheduleListener};

/// Relays a bucket's lifecycle events into a parent bucket
///
/// A host's bucket is keyed by check key; its passive scheduler reports the
/// host (by name) into the server bucket whenever one of its delays starts or
/// is cancelled. Many checks sharing a delay therefore produce a single
/// upward signal per (host, delay).
pub struct PassiveScheduler<P> {
    parent: Arc<ScheduleBucket<P>>,
    scoped: P,
}

impl<P> PassiveScheduler<P> {
    pub fn new(parent: Arc<ScheduleBucket<P>>, scoped: P) -> Self {
        Self { parent, scoped }
    }
}

impl<P> ScheduleListener for PassiveScheduler<P>
where
    P: Ord + Clone + Debug + Send + Sync,
{
    fn on_schedule_start(&self, delay: u64) {
        self.parent.add_item(delay, self.scoped.clone());
    }

    fn on_schedule_cancel(&self, delay: u64) {
        self.parent.remove_item(delay, &self.scoped);
    }
}
