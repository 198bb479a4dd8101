//! Unattended read pipeline built on the step sequencer.
//!
//! One pass reads the RTD, pushes the temperature to the pH circuit, then
//! reads pH and every remaining peripheral. Each step only sends or only
//! collects, so no call ever blocks for a processing window; the windows are
//! enforced by the step thresholds instead.

use core::ops::Add;
use core::time::Duration;

use crate::bus::CommandBus;
use crate::config::PollTiming;
use crate::coordination::ReentrancyGuard;
use crate::ezo::{
    COMPENSATION_WINDOW, Classification, CompensationRoles, READ_WINDOW, compensation_command,
    compensation_value,
};
use crate::registry::PeripheralRegistry;

use super::{SequencerError, SequencerStep, StepSequencer};

/// Time between the start of two consecutive passes.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Shortest pass the processing windows allow.
pub const MIN_POLL_INTERVAL: Duration = READ_WINDOW
    .saturating_add(COMPENSATION_WINDOW)
    .saturating_add(READ_WINDOW);

const DEFAULT_IDLE_GAP: Duration = DEFAULT_POLL_INTERVAL.saturating_sub(MIN_POLL_INTERVAL);

/// Actions of the poll cycle, in firing order.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PollStep {
    RequestTemperature,
    Compensate,
    RequestReadings,
    CollectReadings,
}

/// Step table of the default poll cycle.
pub const POLL_STEPS: [SequencerStep<PollStep>; 4] = [
    // Idle until the next pass, then ask the RTD for a reading.
    SequencerStep::new(PollStep::RequestTemperature, DEFAULT_IDLE_GAP),
    // Collect the RTD reading and forward it as compensation.
    SequencerStep::with_minimum(PollStep::Compensate, READ_WINDOW, READ_WINDOW),
    // Confirm the compensation, then request every other reading.
    SequencerStep::with_minimum(
        PollStep::RequestReadings,
        COMPENSATION_WINDOW,
        COMPENSATION_WINDOW,
    ),
    // Collect pH and the remaining readings.
    SequencerStep::with_minimum(PollStep::CollectReadings, READ_WINDOW, READ_WINDOW),
];

/// Result of one guarded tick.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PollTick {
    /// Nothing was due.
    Idle,
    /// An explicit command holds the bus.
    Skipped,
    /// The given step ran.
    Fired(PollStep),
}

/// Poll cycle state: the sequencer plus the compensation wiring.
#[derive(Clone, Debug)]
pub struct PollCycle<TInstant> {
    sequencer: StepSequencer<PollStep, TInstant, 4>,
    roles: CompensationRoles,
    default_compensation: f32,
    last_compensation: Option<f32>,
    /// Restart requested; held until every exchange in flight is classified.
    settling: bool,
}

impl<TInstant> PollCycle<TInstant>
where
    TInstant: Copy + Ord + Add<Duration, Output = TInstant>,
{
    /// Creates a cycle that starts its first pass one idle gap after `now`.
    ///
    /// # Errors
    ///
    /// Returns [`SequencerError::CycleTooShort`] when the configured interval
    /// cannot fit the processing windows.
    pub fn new(
        timing: PollTiming,
        roles: CompensationRoles,
        now: TInstant,
    ) -> Result<Self, SequencerError> {
        let mut cycle = Self {
            sequencer: StepSequencer::new(POLL_STEPS, now)?,
            roles,
            default_compensation: timing.default_compensation,
            last_compensation: None,
            settling: false,
        };
        cycle.set_interval(timing.interval)?;
        Ok(cycle)
    }

    /// Changes the time between passes; the idle step absorbs the difference.
    ///
    /// # Errors
    ///
    /// Returns [`SequencerError::CycleTooShort`] when `interval` is shorter
    /// than the sum of the processing windows.
    pub fn set_interval(&mut self, interval: Duration) -> Result<(), SequencerError> {
        let busy: Duration = self.sequencer.steps()[1..]
            .iter()
            .map(|step| step.threshold)
            .sum();
        let minimum = busy + self.sequencer.steps()[0].min_threshold;
        let gap = interval
            .checked_sub(busy)
            .filter(|_| interval >= minimum)
            .ok_or(SequencerError::CycleTooShort { minimum })?;
        self.sequencer.set_threshold(0, gap)
    }

    /// Current time between passes.
    pub fn interval(&self) -> Duration {
        self.sequencer.cycle_time()
    }

    /// Shortest interval [`PollCycle::set_interval`] accepts.
    pub fn minimum_interval(&self) -> Duration {
        self.sequencer.minimum_cycle_time()
    }

    /// Starts over from the idle step, timing from `now`.
    pub fn restart(&mut self, now: TInstant) {
        self.sequencer.reset(now);
    }

    /// Compensation value sent during the latest pass.
    pub const fn last_compensation(&self) -> Option<f32> {
        self.last_compensation
    }

    pub const fn roles(&self) -> CompensationRoles {
        self.roles
    }

    /// Instant at which the next step becomes due.
    pub fn next_deadline(&self) -> TInstant {
        self.sequencer.next_deadline()
    }

    /// Runs the current step if it is due and reports which step ran.
    pub fn tick<B, const N: usize>(
        &mut self,
        registry: &mut PeripheralRegistry<TInstant, N>,
        bus: &mut B,
        now: TInstant,
    ) -> Option<PollStep>
    where
        B: CommandBus + ?Sized,
    {
        let step = self.sequencer.advance(now)?;
        let CompensationRoles { primary, secondary } = self.roles;

        match step {
            PollStep::RequestTemperature => {
                if let Some(rtd) = registry.get_mut(secondary) {
                    rtd.send_read(bus, now);
                }
            }
            PollStep::Compensate => {
                if let Some((ph, rtd)) = registry.pair_mut(primary, secondary) {
                    let outcome = rtd.receive(bus, now);
                    let value =
                        compensation_value(outcome, rtd.last_reading(), self.default_compensation);
                    ph.send_command(bus, &compensation_command(value), now);
                    self.last_compensation = Some(value);
                }
            }
            PollStep::RequestReadings => {
                if let Some(ph) = registry.get_mut(primary) {
                    ph.receive(bus, now);
                }
                for (index, peripheral) in registry.iter_mut().enumerate() {
                    if index != secondary {
                        peripheral.send_read(bus, now);
                    }
                }
            }
            PollStep::CollectReadings => {
                for (index, peripheral) in registry.iter_mut().enumerate() {
                    if index != secondary {
                        peripheral.receive(bus, now);
                    }
                }
            }
        }

        Some(step)
    }

    /// Applies pending coordination requests, then ticks unless an explicit
    /// command holds the bus.
    pub fn tick_guarded<B, const N: usize>(
        &mut self,
        guard: &ReentrancyGuard,
        registry: &mut PeripheralRegistry<TInstant, N>,
        bus: &mut B,
        now: TInstant,
    ) -> PollTick
    where
        B: CommandBus + ?Sized,
    {
        if let Some(interval) = guard.take_cadence() {
            // Requests are validated against `minimum_interval` before they are queued.
            let _ = self.set_interval(interval);
        }
        if !guard.polling_allowed() {
            return PollTick::Skipped;
        }
        if guard.take_restart() {
            self.settling = true;
        }
        if self.settling {
            if !settle(registry, bus, now) {
                return PollTick::Idle;
            }
            self.settling = false;
            self.restart(now);
        }

        match self.tick(registry, bus, now) {
            Some(step) => PollTick::Fired(step),
            None => PollTick::Idle,
        }
    }

    /// Classification the primary returned for the last collected read.
    pub fn primary_outcome<const N: usize>(
        &self,
        registry: &PeripheralRegistry<TInstant, N>,
    ) -> Option<Classification> {
        registry
            .get(self.roles.primary)
            .and_then(|peripheral| peripheral.last_classification())
    }
}

/// Classifies every response still in flight whose window has elapsed.
///
/// Returns `true` once no peripheral has a pending exchange.
fn settle<TInstant, B, const N: usize>(
    registry: &mut PeripheralRegistry<TInstant, N>,
    bus: &mut B,
    now: TInstant,
) -> bool
where
    TInstant: Copy + Ord + Add<Duration, Output = TInstant>,
    B: CommandBus + ?Sized,
{
    let mut settled = true;
    for peripheral in registry.iter_mut() {
        if peripheral.pending().is_some() {
            peripheral.receive(bus, now);
        }
        settled &= peripheral.pending().is_none();
    }
    settled
}
