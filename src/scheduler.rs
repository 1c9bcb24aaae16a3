//! Poll and countdown timers for the signed-in session.
//!
//! Two independent tokio tasks are owned here: the poll timer emits a
//! [`SchedulerEvent`] every refresh interval, and the countdown timer pushes
//! the time remaining until `next_refresh_at_ms` to a [`CountdownSink`] every
//! 250 ms. Each `start` opens a new epoch; `stop` closes it and aborts both
//! tasks, so a tick already queued from an older epoch is recognizably stale.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::clock::Clock;

pub const COUNTDOWN_TICK: Duration = Duration::from_millis(250);

const NO_DEADLINE: i64 = i64::MIN;

/// Receives the countdown display value.
pub trait CountdownSink: Send + Sync {
    fn show_countdown(&self, remaining_ms: i64);
}

/// A poll tick from the scheduler generation `epoch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerEvent {
    pub epoch: u64,
}

struct Timers {
    poll: JoinHandle<()>,
    countdown: JoinHandle<()>,
}

impl Timers {
    fn abort(self) {
        self.poll.abort();
        self.countdown.abort();
    }
}

pub struct RefreshScheduler {
    clock: Arc<dyn Clock>,
    next_refresh_at_ms: Arc<AtomicI64>,
    epoch: Arc<AtomicU64>,
    timers: Mutex<Option<Timers>>,
    ticks: mpsc::UnboundedSender<SchedulerEvent>,
    sink: Arc<dyn CountdownSink>,
}

impl RefreshScheduler {
    pub fn new(
        clock: Arc<dyn Clock>,
        ticks: mpsc::UnboundedSender<SchedulerEvent>,
        sink: Arc<dyn CountdownSink>,
    ) -> Self {
        Self {
            clock,
            next_refresh_at_ms: Arc::new(AtomicI64::new(NO_DEADLINE)),
            epoch: Arc::new(AtomicU64::new(0)),
            timers: Mutex::new(None),
            ticks,
            sink,
        }
    }

    /// Starts (or restarts) both timers with a fresh deadline.
    pub fn start(&self, interval: Duration) {
        let mut timers = self.timers.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(old) = timers.take() {
            old.abort();
        }
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.reset_countdown(interval);

        let poll = {
            let ticks = self.ticks.clone();
            let current = self.epoch.clone();
            tokio::spawn(async move {
                let start = tokio::time::Instant::now() + interval;
                let mut ticker = tokio::time::interval_at(start, interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    if current.load(Ordering::SeqCst) != epoch {
                        break;
                    }
                    tracing::debug!(epoch, "Poll tick");
                    if ticks.send(SchedulerEvent { epoch }).is_err() {
                        break;
                    }
                }
            })
        };

        let countdown = {
            let clock = self.clock.clone();
            let deadline = self.next_refresh_at_ms.clone();
            let current = self.epoch.clone();
            let sink = self.sink.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(COUNTDOWN_TICK);
                loop {
                    ticker.tick().await;
                    if current.load(Ordering::SeqCst) != epoch {
                        break;
                    }
                    if let Some(remaining) =
                        remaining_from(deadline.load(Ordering::SeqCst), clock.now_ms())
                    {
                        sink.show_countdown(remaining);
                    }
                }
            })
        };

        *timers = Some(Timers { poll, countdown });
        tracing::info!(epoch, interval_secs = interval.as_secs(), "Refresh timers started");
    }

    /// Halts both timers before returning. Queued ticks become stale.
    pub fn stop(&self) {
        let mut timers = self.timers.lock().unwrap_or_else(|e| e.into_inner());
        self.epoch.fetch_add(1, Ordering::SeqCst);
        if let Some(old) = timers.take() {
            old.abort();
            tracing::info!("Refresh timers stopped");
        }
        self.next_refresh_at_ms.store(NO_DEADLINE, Ordering::SeqCst);
    }

    /// Sets the next refresh to exactly one interval from now and returns it.
    pub fn reset_countdown(&self, interval: Duration) -> i64 {
        let interval_ms = i64::try_from(interval.as_millis()).unwrap_or(i64::MAX);
        let next = self.clock.now_ms().saturating_add(interval_ms);
        self.next_refresh_at_ms.store(next, Ordering::SeqCst);
        next
    }

    pub fn next_refresh_at_ms(&self) -> Option<i64> {
        let next = self.next_refresh_at_ms.load(Ordering::SeqCst);
        (next != NO_DEADLINE).then_some(next)
    }

    /// Time until the next refresh, clamped at zero.
    pub fn remaining_ms(&self) -> Option<i64> {
        remaining_from(self.next_refresh_at_ms.load(Ordering::SeqCst), self.clock.now_ms())
    }

    pub fn is_current(&self, epoch: u64) -> bool {
        self.is_running() && self.epoch.load(Ordering::SeqCst) == epoch
    }

    pub fn is_running(&self) -> bool {
        self.timers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        if let Some(timers) = self.timers.get_mut().unwrap_or_else(|e| e.into_inner()).take() {
            timers.abort();
        }
    }
}

fn remaining_from(deadline: i64, now_ms: i64) -> Option<i64> {
    (deadline != NO_DEADLINE).then(|| deadline.saturating_sub(now_ms).max(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[derive(Default)]
    struct RecordingSink {
        shown: Mutex<Vec<i64>>,
    }

    impl CountdownSink for RecordingSink {
        fn show_countdown(&self, remaining_ms: i64) {
            self.shown.lock().unwrap().push(remaining_ms);
        }
    }

    fn scheduler() -> (
        RefreshScheduler,
        mpsc::UnboundedReceiver<SchedulerEvent>,
        Arc<ManualClock>,
        Arc<RecordingSink>,
    ) {
        let clock = Arc::new(ManualClock::new(0));
        let sink = Arc::new(RecordingSink::default());
        let (tx, rx) = mpsc::unbounded_channel();
        (RefreshScheduler::new(clock.clone(), tx, sink.clone()), rx, clock, sink)
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_ticks_every_interval() {
        let (scheduler, mut rx, _clock, _sink) = scheduler();
        scheduler.start(Duration::from_secs(30));

        let started = tokio::time::Instant::now();
        let first = rx.recv().await.unwrap();
        assert!(scheduler.is_current(first.epoch));
        assert_eq!(started.elapsed(), Duration::from_secs(30));

        rx.recv().await.unwrap();
        assert_eq!(started.elapsed(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_tick_after_stop() {
        let (scheduler, mut rx, _clock, sink) = scheduler();
        scheduler.start(Duration::from_secs(10));

        tokio::time::sleep(Duration::from_millis(9_900)).await;
        scheduler.stop();
        let shown_at_stop = sink.shown.lock().unwrap().len();

        tokio::time::sleep(Duration::from_secs(30)).await;

        assert!(rx.try_recv().is_err());
        assert!(!scheduler.is_running());
        assert_eq!(scheduler.next_refresh_at_ms(), None);
        assert_eq!(sink.shown.lock().unwrap().len(), shown_at_stop);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_epoch_is_not_current() {
        let (scheduler, mut rx, _clock, _sink) = scheduler();
        scheduler.start(Duration::from_secs(10));
        let tick = rx.recv().await.unwrap();

        scheduler.start(Duration::from_secs(10));
        assert!(!scheduler.is_current(tick.epoch));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_is_one_interval_from_completion() {
        let (scheduler, _rx, clock, _sink) = scheduler();
        scheduler.start(Duration::from_secs(30));
        assert_eq!(scheduler.next_refresh_at_ms(), Some(30_000));

        clock.advance_ms(2_000);
        let next = scheduler.reset_countdown(Duration::from_secs(30));
        assert_eq!(next, 32_000);
        assert_eq!(scheduler.remaining_ms(), Some(30_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_is_clamped_at_zero() {
        let (scheduler, _rx, clock, sink) = scheduler();
        scheduler.start(Duration::from_secs(10));

        clock.advance_ms(15_000);
        tokio::time::sleep(Duration::from_millis(600)).await;

        assert_eq!(scheduler.remaining_ms(), Some(0));
        let shown = sink.shown.lock().unwrap().clone();
        assert!(!shown.is_empty());
        assert!(shown.iter().all(|ms| *ms >= 0));
        assert_eq!(shown.last(), Some(&0));
    }
}
