//! Heartbeat scheduling and stall detection
//!
//! The scheduler owns the timer but never spawns anything: the engine polls
//! [`HeartbeatScheduler::next_event`] from its `select!` loop, so `stop()`
//! takes effect before the engine can observe another tick.

use std::future::pending;
use std::time::Duration;
use tokio::time::{interval_at, sleep_until, Instant, Interval, MissedTickBehavior};
use tracing::{debug, trace};

/// What the scheduler wants the engine to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// Send a `/meta/connect`
    Tick,
    /// Nothing arrived within the grace period after a tick
    Stalled,
}

#[derive(Debug)]
pub struct HeartbeatScheduler {
    interval: Duration,
    grace: Duration,
    timer: Option<Interval>,
    stall_deadline: Option<Instant>,
    last_activity: Option<Instant>,
}

impl HeartbeatScheduler {
    pub fn new(interval: Duration, grace: Duration) -> Self {
        Self {
            interval,
            grace,
            timer: None,
            stall_deadline: None,
            last_activity: None,
        }
    }

    /// Start ticking; the first tick fires one interval from now
    pub fn start(&mut self) {
        let now = Instant::now();
        let mut timer = interval_at(now + self.interval, self.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.timer = Some(timer);
        self.stall_deadline = None;
        self.last_activity = Some(now);
        debug!(interval = ?self.interval, grace = ?self.grace, "Heartbeat started");
    }

    /// Stop ticking. No event is produced after this returns.
    pub fn stop(&mut self) {
        if self.timer.take().is_some() {
            debug!("Heartbeat stopped");
        }
        self.stall_deadline = None;
    }

    pub fn is_running(&self) -> bool {
        self.timer.is_some()
    }

    /// Any inbound message counts as proof of life
    pub fn record_activity(&mut self) {
        if self.timer.is_some() {
            self.last_activity = Some(Instant::now());
            self.stall_deadline = None;
        }
    }

    pub fn last_activity(&self) -> Option<Instant> {
        self.last_activity
    }

    /// Wait for the next tick or stall. Pending forever while stopped.
    pub async fn next_event(&mut self) -> HeartbeatEvent {
        let deadline = self.stall_deadline;
        let Some(timer) = self.timer.as_mut() else {
            return pending().await;
        };

        let stalled = async {
            match deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = stalled => {
                self.stall_deadline = None;
                HeartbeatEvent::Stalled
            }
            _ = timer.tick() => {
                if self.stall_deadline.is_none() {
                    self.stall_deadline = Some(Instant::now() + self.grace);
                }
                trace!("Heartbeat tick");
                HeartbeatEvent::Tick
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;
    use tokio_test::{assert_pending, assert_ready_eq, task};

    fn scheduler() -> HeartbeatScheduler {
        HeartbeatScheduler::new(Duration::from_secs(30), Duration::from_secs(10))
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_after_one_interval() {
        let mut heartbeat = scheduler();
        let started = Instant::now();
        heartbeat.start();

        assert_eq!(heartbeat.next_event().await, HeartbeatEvent::Tick);
        assert_eq!(started.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stall_after_grace_without_activity() {
        let mut heartbeat = scheduler();
        let started = Instant::now();
        heartbeat.start();

        assert_eq!(heartbeat.next_event().await, HeartbeatEvent::Tick);
        assert_eq!(heartbeat.next_event().await, HeartbeatEvent::Stalled);
        assert_eq!(started.elapsed(), Duration::from_secs(40));
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_clears_stall_deadline() {
        let mut heartbeat = scheduler();
        let started = Instant::now();
        heartbeat.start();

        assert_eq!(heartbeat.next_event().await, HeartbeatEvent::Tick);
        heartbeat.record_activity();

        assert_eq!(heartbeat.next_event().await, HeartbeatEvent::Tick);
        assert_eq!(started.elapsed(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_scheduler_never_fires() {
        let mut heartbeat = scheduler();
        heartbeat.start();
        heartbeat.stop();

        assert!(!heartbeat.is_running());
        assert!(timeout(Duration::from_secs(300), heartbeat.next_event())
            .await
            .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_is_pending_until_interval_elapses() {
        let mut heartbeat = scheduler();
        heartbeat.start();

        let mut next = task::spawn(heartbeat.next_event());
        assert_pending!(next.poll());

        tokio::time::advance(Duration::from_secs(29)).await;
        assert_pending!(next.poll());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(next.is_woken());
        assert_ready_eq!(next.poll(), HeartbeatEvent::Tick);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_after_tick_cancels_pending_stall() {
        let mut heartbeat = scheduler();
        heartbeat.start();
        assert_eq!(heartbeat.next_event().await, HeartbeatEvent::Tick);

        heartbeat.stop();
        heartbeat.start();

        let started = Instant::now();
        assert_eq!(heartbeat.next_event().await, HeartbeatEvent::Tick);
        assert_eq!(started.elapsed(), Duration::from_secs(30));
    }

    #[test]
    fn test_activity_ignored_while_stopped() {
        let mut heartbeat = scheduler();
        heartbeat.record_activity();
        assert!(heartbeat.last_activity().is_none());
    }
}
