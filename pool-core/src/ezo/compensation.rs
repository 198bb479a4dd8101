//! Temperature compensation of the pH reading.
//!
//! The pH circuit corrects its measurement for solution temperature. Before
//! every pH read the latest RTD value, or a fixed fallback, is pushed to the
//! circuit with a `T,<value>` command.

use crate::bus::{BusTimer, CommandBus};
use crate::registry::PeripheralRegistry;

use super::{Classification, Peripheral, compensation_command};

/// Compensation temperature used when no valid RTD reading is available.
pub const DEFAULT_COMPENSATION_C: f32 = 25.0;

/// RTD readings at or below this value mean the probe is disconnected.
pub const INVALID_READING_FLOOR: f32 = -1000.0;

/// Picks the compensation value from a secondary read outcome.
#[must_use]
pub fn compensation_value(
    classification: Classification,
    reading: Option<f32>,
    default: f32,
) -> f32 {
    match reading {
        Some(value)
            if classification.is_success() && value.is_finite() && value > INVALID_READING_FLOOR =>
        {
            value
        }
        _ => default,
    }
}

/// Registry positions of the peripherals taking part in compensation.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CompensationRoles {
    /// Peripheral receiving the compensation value (pH).
    pub primary: usize,
    /// Peripheral supplying the compensation value (RTD).
    pub secondary: usize,
}

/// Result of one compensated read pass.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CompensatedReading {
    /// Classification of the secondary read.
    pub secondary: Classification,
    /// Value sent in the compensation command.
    pub compensation: f32,
    /// Classification of the compensation command itself.
    pub compensation_ack: Classification,
    /// Classification of the primary read.
    pub primary: Classification,
}

/// Reads `secondary`, compensates `primary` with the result, then reads `primary`.
///
/// The compensation command is always sent, and its acknowledgement is
/// awaited before the primary read is issued.
pub async fn read_with_compensation<I, B, T>(
    primary: &mut Peripheral<I>,
    secondary: &mut Peripheral<I>,
    bus: &mut B,
    timer: &mut T,
    default: f32,
) -> CompensatedReading
where
    I: Copy + Ord + core::ops::Add<core::time::Duration, Output = I>,
    B: CommandBus + ?Sized,
    T: BusTimer<Instant = I>,
{
    secondary.settle(bus, timer).await;
    primary.settle(bus, timer).await;
    let (secondary_outcome, compensation, compensation_ack) =
        compensate(primary, secondary, bus, timer, default).await;

    primary.send_read(bus, timer.now());
    let primary_outcome = primary.await_and_classify(bus, timer).await;

    CompensatedReading {
        secondary: secondary_outcome,
        compensation,
        compensation_ack,
        primary: primary_outcome,
    }
}

/// Runs a compensated pass over the whole registry.
///
/// Peripherals other than the two compensation roles get their read command
/// right after the primary's, and are classified after it. Returns `None`
/// when either role points outside the registry or both name the same slot.
pub async fn refresh_registry<I, B, T, const N: usize>(
    registry: &mut PeripheralRegistry<I, N>,
    roles: CompensationRoles,
    bus: &mut B,
    timer: &mut T,
    default: f32,
) -> Option<CompensatedReading>
where
    I: Copy + Ord + core::ops::Add<core::time::Duration, Output = I>,
    B: CommandBus + ?Sized,
    T: BusTimer<Instant = I>,
{
    for peripheral in registry.iter_mut() {
        peripheral.settle(bus, timer).await;
    }
    let (secondary_outcome, compensation, compensation_ack) = {
        let (primary, secondary) = registry.pair_mut(roles.primary, roles.secondary)?;
        compensate(primary, secondary, bus, timer, default).await
    };

    let now = timer.now();
    for (index, peripheral) in registry.iter_mut().enumerate() {
        if index != roles.secondary {
            peripheral.send_read(bus, now);
        }
    }

    let mut primary_outcome = Classification::NoData;
    for index in core::iter::once(roles.primary)
        .chain((0..N).filter(|&index| index != roles.primary && index != roles.secondary))
    {
        if let Some(peripheral) = registry.get_mut(index) {
            let outcome = peripheral.await_and_classify(bus, timer).await;
            if index == roles.primary {
                primary_outcome = outcome;
            }
        }
    }

    Some(CompensatedReading {
        secondary: secondary_outcome,
        compensation,
        compensation_ack,
        primary: primary_outcome,
    })
}

async fn compensate<I, B, T>(
    primary: &mut Peripheral<I>,
    secondary: &mut Peripheral<I>,
    bus: &mut B,
    timer: &mut T,
    default: f32,
) -> (Classification, f32, Classification)
where
    I: Copy + Ord + core::ops::Add<core::time::Duration, Output = I>,
    B: CommandBus + ?Sized,
    T: BusTimer<Instant = I>,
{
    secondary.send_read(bus, timer.now());
    let secondary_outcome = secondary.await_and_classify(bus, timer).await;
    let value = compensation_value(secondary_outcome, secondary.last_reading(), default);

    primary.send_command(bus, &compensation_command(value), timer.now());
    let ack = primary.await_and_classify(bus, timer).await;
    (secondary_outcome, value, ack)
}
