//! Lock liveness and state-change monitoring
//!
//! Every notification or advertisement counts as activity. A periodic check
//! marks the lock stale after a silence window and recovered on the next
//! activity. Advertised state counters are compared with the last value seen
//! to tell callers when to re-read the lock state.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::protocol::parse_state_counter;

/// Events a lock reports outside of command responses
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorEvent {
    /// The advertised state counter moved
    StateChanged { counter: u8 },
    /// Nothing heard from the lock for the silence window
    Stale,
    /// Activity resumed after the lock went stale
    Recovered,
    Disconnected,
    /// Reconnected to finish an unfinished command
    Reconnected,
    /// Data arrived while no command was waiting for it
    UnexpectedData { bytes: usize },
}

// ----------------------------------------------------------------------------
// Liveness
// ----------------------------------------------------------------------------

/// Tracks the last time a lock was heard from
#[derive(Debug)]
pub struct LivenessTracker {
    timeout: Duration,
    last_activity: Instant,
    stale: bool,
}

pub type SharedLiveness = Arc<Mutex<LivenessTracker>>;

impl LivenessTracker {
    pub fn new(timeout: Duration, now: Instant) -> Self {
        Self {
            timeout,
            last_activity: now,
            stale: false,
        }
    }

    pub fn shared(timeout: Duration) -> SharedLiveness {
        Arc::new(Mutex::new(Self::new(timeout, Instant::now())))
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Note activity; yields `Recovered` if the lock was stale
    pub fn record_activity(&mut self, now: Instant) -> Option<MonitorEvent> {
        self.last_activity = now;
        if self.stale {
            self.stale = false;
            Some(MonitorEvent::Recovered)
        } else {
            None
        }
    }

    /// Yields `Stale` once when the silence window has passed
    pub fn check(&mut self, now: Instant) -> Option<MonitorEvent> {
        if !self.stale && now.saturating_duration_since(self.last_activity) >= self.timeout {
            self.stale = true;
            Some(MonitorEvent::Stale)
        } else {
            None
        }
    }
}

/// Run the periodic liveness check until the event receiver is dropped
pub fn spawn_liveness_monitor(
    lock_id: String,
    liveness: SharedLiveness,
    interval: Duration,
    events: mpsc::UnboundedSender<MonitorEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let event = liveness.lock().await.check(Instant::now());
            if let Some(event) = event {
                info!(lock = %lock_id, "Lock went silent");
                if events.send(event).is_err() {
                    break;
                }
            }
        }
        debug!(lock = %lock_id, "Liveness monitor stopped");
    })
}

// ----------------------------------------------------------------------------
// State Counter
// ----------------------------------------------------------------------------

/// Last advertised state counter of a lock
#[derive(Debug, Default)]
pub struct StateCounter {
    last: Option<u8>,
}

impl StateCounter {
    /// Feed manufacturer data; yields `StateChanged` when the counter moved
    pub fn update(&mut self, manufacturer_data: &[u8]) -> Option<MonitorEvent> {
        let counter = parse_state_counter(manufacturer_data)?;
        let previous = self.last.replace(counter);
        match previous {
            Some(previous) if previous != counter => Some(MonitorEvent::StateChanged { counter }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{manufacturer_data, MANUFACTURER_DATA_SIZE, STATE_COUNTER_OFFSET};

    fn advert(counter: u8) -> Vec<u8> {
        let mut payload = vec![0u8; MANUFACTURER_DATA_SIZE - 2];
        payload[STATE_COUNTER_OFFSET - 2] = counter;
        manufacturer_data(0x0000, &payload)
    }

    #[test]
    fn test_stale_then_recovered() {
        let start = Instant::now();
        let mut tracker = LivenessTracker::new(Duration::from_secs(30), start);

        assert_eq!(tracker.check(start + Duration::from_secs(29)), None);
        assert_eq!(
            tracker.check(start + Duration::from_secs(30)),
            Some(MonitorEvent::Stale)
        );
        // Reported once
        assert_eq!(tracker.check(start + Duration::from_secs(90)), None);
        assert!(tracker.is_stale());

        assert_eq!(
            tracker.record_activity(start + Duration::from_secs(91)),
            Some(MonitorEvent::Recovered)
        );
        assert_eq!(tracker.record_activity(start + Duration::from_secs(92)), None);
        assert_eq!(tracker.check(start + Duration::from_secs(100)), None);
    }

    #[test]
    fn test_state_counter_changes() {
        let mut counter = StateCounter::default();
        assert_eq!(counter.update(&advert(3)), None);
        assert_eq!(counter.update(&advert(3)), None);
        assert_eq!(
            counter.update(&advert(4)),
            Some(MonitorEvent::StateChanged { counter: 4 })
        );
        assert_eq!(counter.update(&[1, 2, 3]), None);
    }

    #[tokio::test]
    async fn test_monitor_reports_silence() {
        let liveness = LivenessTracker::shared(Duration::from_millis(20));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = spawn_liveness_monitor(
            "lock".to_string(),
            Arc::clone(&liveness),
            Duration::from_millis(5),
            tx,
        );

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("monitor should report");
        assert_eq!(event, Some(MonitorEvent::Stale));
        assert!(liveness.lock().await.is_stale());

        drop(rx);
        handle.abort();
    }
}
