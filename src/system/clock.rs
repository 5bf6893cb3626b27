//! Wall-clock source

/// Source of epoch milliseconds, swapped for a manual clock in tests
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
}

/// Clock backed by the system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        chrono::Utc::now().timestamp_millis().max(0) as u64
    }
}
