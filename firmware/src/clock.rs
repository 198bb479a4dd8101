//! `embassy-time` clock handed to the shared protocol engine.

use core::ops::Add;
use core::time::Duration;

use embassy_time::{Duration as TickDuration, Instant, Timer};
use pool_core::bus::BusTimer;

/// Embassy instant that advances by `core::time::Duration`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct BusInstant(pub Instant);

impl From<Instant> for BusInstant {
    fn from(instant: Instant) -> Self {
        Self(instant)
    }
}

impl Add<Duration> for BusInstant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        let micros = u64::try_from(rhs.as_micros()).unwrap_or(u64::MAX);
        Self(
            self.0
                .checked_add(TickDuration::from_micros(micros))
                .unwrap_or(Instant::MAX),
        )
    }
}

/// Sleeps on the embassy timer queue.
#[derive(Copy, Clone, Debug, Default)]
pub struct EmbassyTimer;

impl BusTimer for EmbassyTimer {
    type Instant = BusInstant;

    fn now(&self) -> Self::Instant {
        BusInstant(Instant::now())
    }

    async fn wait_until(&mut self, deadline: Self::Instant) {
        Timer::at(deadline.0).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adds_processing_windows() {
        let start = BusInstant::from(Instant::from_millis(10));
        assert_eq!(
            start + Duration::from_millis(300),
            BusInstant(Instant::from_millis(310))
        );
    }

    #[test]
    fn saturates_at_the_end_of_time() {
        let late = BusInstant(Instant::MAX);
        assert_eq!(late + Duration::from_secs(1), BusInstant(Instant::MAX));
    }
}
