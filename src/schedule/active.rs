use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, trace};

use super::bucket::ScheduleListener;
use crate::actors::messages::DelayTick;

/// Owns the real recurring timers, one per armed delay
///
/// Each timer is a task on the injected scheduler runtime that emits a
/// [`DelayTick`] every `delay` seconds. Ticks are delivered to the agent actor
/// over a channel; the timer itself never executes checks.
pub struct ActiveScheduler {
    runtime: Handle,
    tick_tx: mpsc::UnboundedSender<DelayTick>,
    timers: Mutex<HashMap<u64, JoinHandle<()>>>,
}

impl ActiveScheduler {
    pub fn new(runtime: Handle, tick_tx: mpsc::UnboundedSender<DelayTick>) -> Self {
        Self {
            runtime,
            tick_tx,
            timers: Mutex::new(HashMap::new()),
        }
    }

    /// Delays that currently own a timer
    pub fn armed_delays(&self) -> Vec<u64> {
        let mut delays: Vec<u64> = self.timers.lock().keys().copied().collect();
        delays.sort_unstable();
        delays
    }
}

impl ScheduleListener for ActiveScheduler {
    fn on_schedule_start(&self, delay: u64) {
        let period = Duration::from_secs(delay.max(1));
        let tick_tx = self.tick_tx.clone();

        let timer = self.runtime.spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                trace!(delay, "delay timer fired");
                if tick_tx.send(DelayTick { delay }).is_err() {
                    debug!(delay, "tick receiver gone, stopping timer");
                    break;
                }
            }
        });

        debug!(delay, "armed delay timer");
        if let Some(previous) = self.timers.lock().insert(delay, timer) {
            previous.abort();
        }
    }

    fn on_schedule_cancel(&self, delay: u64) {
        if let Some(timer) = self.timers.lock().remove(&delay) {
            timer.abort();
            debug!(delay, "cancelled delay timer");
        }
    }
}

impl Drop for ActiveScheduler {
    fn drop(&mut self) {
        for (_, timer) in self.timers.lock().drain() {
            timer.abort();
        }
    }
}
