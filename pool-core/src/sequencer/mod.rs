//! Cooperative step sequencer.
//!
//! A [`StepSequencer`] walks a fixed, cyclic list of steps. Each step fires once
//! the configured threshold has elapsed since the previous firing; the caller
//! polls [`StepSequencer::advance`] from its own loop and runs whatever action
//! comes back. The sequencer never sleeps and never blocks, so the same value
//! can be driven by an embassy task or a host thread.

pub mod poll;

use core::fmt;
use core::ops::Add;
use core::time::Duration;

pub use poll::{DEFAULT_POLL_INTERVAL, PollCycle, PollStep, PollTick};

/// One timed action in the cycle.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SequencerStep<A> {
    pub action: A,
    /// Elapsed time since the previous firing before this step may fire.
    pub threshold: Duration,
    /// Smallest threshold accepted by [`StepSequencer::set_threshold`].
    pub min_threshold: Duration,
}

impl<A> SequencerStep<A> {
    /// Step whose threshold may later be lowered to zero.
    pub const fn new(action: A, threshold: Duration) -> Self {
        Self {
            action,
            threshold,
            min_threshold: Duration::ZERO,
        }
    }

    /// Step that must always wait at least `min_threshold`.
    pub const fn with_minimum(action: A, threshold: Duration, min_threshold: Duration) -> Self {
        Self {
            action,
            threshold,
            min_threshold,
        }
    }
}

/// Errors reported while building or retuning a sequencer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SequencerError {
    /// A sequencer needs at least one step.
    Empty,
    /// Step index outside the configured list.
    IndexOutOfRange { index: usize },
    /// Threshold below the step's minimum.
    BelowMinimum { index: usize, minimum: Duration },
    /// Requested cycle time shorter than the sum of the step minimums.
    CycleTooShort { minimum: Duration },
}

impl fmt::Display for SequencerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SequencerError::Empty => write!(f, "sequencer has no steps"),
            SequencerError::IndexOutOfRange { index } => write!(f, "no step at index {index}"),
            SequencerError::BelowMinimum { index, minimum } => write!(
                f,
                "step {index} threshold must be at least {} ms",
                minimum.as_millis()
            ),
            SequencerError::CycleTooShort { minimum } => write!(
                f,
                "cycle must be at least {} ms",
                minimum.as_millis()
            ),
        }
    }
}

/// Non-blocking cyclic timer over `K` steps.
#[derive(Clone, Debug)]
pub struct StepSequencer<A, TInstant, const K: usize> {
    steps: [SequencerStep<A>; K],
    index: usize,
    last_fired: TInstant,
}

impl<A, TInstant, const K: usize> StepSequencer<A, TInstant, K>
where
    A: Copy,
    TInstant: Copy + Ord + Add<Duration, Output = TInstant>,
{
    /// Creates a sequencer positioned at step 0, timing from `now`.
    ///
    /// # Errors
    ///
    /// Returns [`SequencerError::Empty`] when `K` is zero and
    /// [`SequencerError::BelowMinimum`] when a step starts below its minimum.
    pub fn new(steps: [SequencerStep<A>; K], now: TInstant) -> Result<Self, SequencerError> {
        if K == 0 {
            return Err(SequencerError::Empty);
        }
        if let Some((index, step)) = steps
            .iter()
            .enumerate()
            .find(|(_, step)| step.threshold < step.min_threshold)
        {
            return Err(SequencerError::BelowMinimum {
                index,
                minimum: step.min_threshold,
            });
        }

        Ok(Self {
            steps,
            index: 0,
            last_fired: now,
        })
    }

    /// Fires the current step if its threshold has elapsed.
    ///
    /// Returns the fired step's action. When the threshold has not elapsed the
    /// call has no effect.
    pub fn advance(&mut self, now: TInstant) -> Option<A> {
        let step = &self.steps[self.index];
        if now < self.last_fired + step.threshold {
            return None;
        }

        let action = step.action;
        self.index = (self.index + 1) % K;
        self.last_fired = now;
        Some(action)
    }

    /// Changes the threshold of one step.
    ///
    /// # Errors
    ///
    /// Rejects unknown indices and thresholds below the step's minimum.
    pub fn set_threshold(&mut self, index: usize, threshold: Duration) -> Result<(), SequencerError> {
        let step = self
            .steps
            .get_mut(index)
            .ok_or(SequencerError::IndexOutOfRange { index })?;
        if threshold < step.min_threshold {
            return Err(SequencerError::BelowMinimum {
                index,
                minimum: step.min_threshold,
            });
        }
        step.threshold = threshold;
        Ok(())
    }

    /// Restarts the cycle at step 0, timing from `now`.
    pub fn reset(&mut self, now: TInstant) {
        self.index = 0;
        self.last_fired = now;
    }

    /// Sum of all step thresholds.
    pub fn cycle_time(&self) -> Duration {
        self.steps.iter().map(|step| step.threshold).sum()
    }

    /// Sum of all step minimums; no cycle can be shorter.
    pub fn minimum_cycle_time(&self) -> Duration {
        self.steps.iter().map(|step| step.min_threshold).sum()
    }

    /// Index of the step that fires next.
    pub const fn current_index(&self) -> usize {
        self.index
    }

    /// Instant at which the current step becomes due.
    pub fn next_deadline(&self) -> TInstant {
        self.last_fired + self.steps[self.index].threshold
    }

    pub fn steps(&self) -> &[SequencerStep<A>] {
        &self.steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ezo::test_support::MockInstant;

    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    enum Action {
        A,
        B,
        C,
    }

    fn sequencer() -> StepSequencer<Action, MockInstant, 3> {
        StepSequencer::new(
            [
                SequencerStep::new(Action::A, Duration::from_millis(100)),
                SequencerStep::with_minimum(
                    Action::B,
                    Duration::from_millis(200),
                    Duration::from_millis(150),
                ),
                SequencerStep::new(Action::C, Duration::from_millis(50)),
            ],
            MockInstant::ms(0),
        )
        .expect("sequencer")
    }

    #[test]
    fn early_advance_is_a_no_op() {
        let mut seq = sequencer();
        assert_eq!(seq.advance(MockInstant::ms(99)), None);
        assert_eq!(seq.current_index(), 0);
        assert_eq!(seq.next_deadline(), MockInstant::ms(100));
    }

    #[test]
    fn full_cycle_fires_each_step_once_in_order() {
        let mut seq = sequencer();
        let mut fired: heapless::Vec<Action, 3> = heapless::Vec::new();
        let mut now = 0;

        for _ in 0..3 {
            let threshold = seq.steps()[seq.current_index()].threshold;
            now += u64::try_from(threshold.as_millis()).expect("threshold fits");
            let action = seq.advance(MockInstant::ms(now)).expect("step due");
            fired.push(action).expect("capacity");
        }

        assert_eq!(fired.as_slice(), &[Action::A, Action::B, Action::C]);
        assert_eq!(seq.current_index(), 0);
        assert_eq!(now, 350);
        assert_eq!(seq.cycle_time(), Duration::from_millis(350));
    }

    #[test]
    fn thresholds_are_measured_from_last_firing() {
        let mut seq = sequencer();
        assert_eq!(seq.advance(MockInstant::ms(500)), Some(Action::A));
        assert_eq!(seq.advance(MockInstant::ms(650)), None);
        assert_eq!(seq.advance(MockInstant::ms(700)), Some(Action::B));
    }

    #[test]
    fn set_threshold_respects_minimums() {
        let mut seq = sequencer();
        assert_eq!(
            seq.set_threshold(1, Duration::from_millis(100)),
            Err(SequencerError::BelowMinimum {
                index: 1,
                minimum: Duration::from_millis(150)
            })
        );
        assert_eq!(
            seq.set_threshold(3, Duration::from_millis(100)),
            Err(SequencerError::IndexOutOfRange { index: 3 })
        );
        seq.set_threshold(0, Duration::ZERO).expect("zero allowed");
        assert_eq!(seq.advance(MockInstant::ms(0)), Some(Action::A));
        assert_eq!(seq.minimum_cycle_time(), Duration::from_millis(150));
    }

    #[test]
    fn reset_returns_to_first_step() {
        let mut seq = sequencer();
        seq.advance(MockInstant::ms(100));
        assert_eq!(seq.current_index(), 1);
        seq.reset(MockInstant::ms(120));
        assert_eq!(seq.current_index(), 0);
        assert_eq!(seq.advance(MockInstant::ms(200)), None);
        assert_eq!(seq.advance(MockInstant::ms(220)), Some(Action::A));
    }

    #[test]
    fn empty_sequencer_is_rejected() {
        let result = StepSequencer::<Action, MockInstant, 0>::new([], MockInstant::ms(0));
        assert!(matches!(result, Err(SequencerError::Empty)));
    }
}
