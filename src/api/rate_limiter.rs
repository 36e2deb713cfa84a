use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Shortest sleep between admission checks.
const MIN_WAIT: Duration = Duration::from_millis(100);

/// Sliding-window quota: at most `max_calls` admissions in any trailing `period`.
pub struct RateWindow {
    max_calls: usize,
    period: Duration,
    min_wait: Duration,
    timestamps: Mutex<VecDeque<Instant>>,
}

impl RateWindow {
    pub fn new(max_calls: usize, period: Duration) -> Self {
        Self {
            max_calls: max_calls.max(1),
            period,
            min_wait: MIN_WAIT,
            timestamps: Mutex::new(VecDeque::with_capacity(max_calls)),
        }
    }

    pub fn max_calls(&self) -> usize {
        self.max_calls
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Wait until the window admits another call, then reserve its slot.
    ///
    /// The check and the reservation happen under one lock, so two callers
    /// can never both claim the last free slot.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut timestamps = self.timestamps.lock().await;
                let now = Instant::now();
                evict(&mut timestamps, now, self.period);

                if timestamps.len() < self.max_calls {
                    timestamps.push_back(now);
                    return;
                }

                match timestamps.front() {
                    Some(oldest) => self
                        .period
                        .saturating_sub(now.saturating_duration_since(*oldest)),
                    None => Duration::ZERO,
                }
            };

            let wait = wait.max(self.min_wait);
            tracing::debug!("Rate window full, waiting {:?}", wait);
            tokio::time::sleep(wait).await;
        }
    }

    /// Number of admissions still inside the trailing window.
    pub async fn in_window(&self) -> usize {
        let mut timestamps = self.timestamps.lock().await;
        evict(&mut timestamps, Instant::now(), self.period);
        timestamps.len()
    }
}

fn evict(timestamps: &mut VecDeque<Instant>, now: Instant, period: Duration) {
    while let Some(oldest) = timestamps.front() {
        if now.saturating_duration_since(*oldest) >= period {
            timestamps.pop_front();
        } else {
            break;
        }
    }
}
