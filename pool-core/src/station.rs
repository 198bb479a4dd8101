//! The bus-side state both execution contexts share.

use crate::bus::{BusTimer, CommandBus};
use crate::coordination::ReentrancyGuard;
use crate::registry::PeripheralRegistry;
use crate::sequencer::{PollCycle, PollTick};

/// Registry, bus and clock kept together behind one lock.
///
/// Firmware stores this in an `embassy_sync` mutex and the emulator in a
/// `std::sync::Mutex`; whoever holds the lock may drive the bus.
pub struct Station<B, T: BusTimer, const N: usize> {
    pub registry: PeripheralRegistry<T::Instant, N>,
    pub bus: B,
    pub timer: T,
}

impl<B, T, const N: usize> Station<B, T, N>
where
    B: CommandBus,
    T: BusTimer,
{
    pub const fn new(registry: PeripheralRegistry<T::Instant, N>, bus: B, timer: T) -> Self {
        Self {
            registry,
            bus,
            timer,
        }
    }

    /// Advances the poll cycle by one guarded tick at the current time.
    pub fn poll(&mut self, cycle: &mut PollCycle<T::Instant>, guard: &ReentrancyGuard) -> PollTick {
        let now = self.timer.now();
        cycle.tick_guarded(guard, &mut self.registry, &mut self.bus, now)
    }
}
