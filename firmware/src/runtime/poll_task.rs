use defmt::Debug2Format;
use embassy_time::{Duration, Ticker};
use pool_core::sequencer::{PollCycle, PollStep, PollTick};

use super::{FirmwareStation, GUARD, StationLock};
use crate::clock::BusInstant;

/// Resolution of the poll schedule.
const TICK: Duration = Duration::from_millis(50);

#[embassy_executor::task]
pub async fn run(station: &'static StationLock, mut cycle: PollCycle<BusInstant>) -> ! {
    let mut ticker = Ticker::every(TICK);
    loop {
        ticker.next().await;

        // An explicit command is mid-flight; the guard restarts us afterwards.
        let Ok(mut station) = station.try_lock() else {
            continue;
        };

        match station.poll(&mut cycle, &GUARD) {
            PollTick::Fired(PollStep::CollectReadings) => log_readings(&station, &cycle),
            PollTick::Fired(step) => defmt::trace!("poll: {}", Debug2Format(&step)),
            PollTick::Skipped => defmt::debug!("poll: bus claimed, skipping"),
            PollTick::Idle => {}
        }
    }
}

fn log_readings(station: &FirmwareStation, cycle: &PollCycle<BusInstant>) {
    for peripheral in station.registry.iter() {
        defmt::info!(
            "poll: {=str} {} ({})",
            peripheral.name(),
            Debug2Format(&peripheral.last_reading()),
            Debug2Format(&peripheral.last_classification()),
        );
    }
    if let Some(temperature) = cycle.last_compensation() {
        defmt::debug!("poll: compensated at {=f32} C", temperature);
    }
}
