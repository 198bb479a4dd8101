use cortex_m::interrupt;
use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_stm32 as hal;
use embassy_stm32::i2c::{self, I2c};
use embassy_stm32::time::Hertz;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::mutex::Mutex;
use heapless::Vec;
use pool_core::bus::BusTimer;
use pool_core::config::{KIT_SIZE, StationConfig};
use pool_core::coordination::ReentrancyGuard;
use pool_core::sequencer::PollCycle;
use pool_core::station::Station;
use static_cell::StaticCell;

use crate::clock::EmbassyTimer;
use crate::hw::{BUS_FREQUENCY_HZ, I2cBus};
use crate::link::RequestFrame;
use crate::usb::{MAX_PACKET_SIZE, UsbDeviceStorage};

mod dispatch_task;
mod poll_task;
mod usb_task;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

/// Requests buffered between the USB task and the dispatcher.
const REQUEST_QUEUE_DEPTH: usize = 2;
/// Response packets buffered between the dispatcher and the USB task.
const RESPONSE_QUEUE_DEPTH: usize = 4;

pub(super) type FirmwareStation = Station<I2cBus, EmbassyTimer, KIT_SIZE>;
/// Whoever holds this lock owns the sensor bus.
pub(super) type StationLock = Mutex<CriticalSectionRawMutex, FirmwareStation>;
pub(super) type ResponsePacket = Vec<u8, { MAX_PACKET_SIZE as usize }>;

pub(super) static GUARD: ReentrancyGuard = ReentrancyGuard::new();
pub(super) static REQUESTS: Channel<CriticalSectionRawMutex, RequestFrame, REQUEST_QUEUE_DEPTH> =
    Channel::new();
pub(super) static RESPONSES: Channel<
    CriticalSectionRawMutex,
    ResponsePacket,
    RESPONSE_QUEUE_DEPTH,
> = Channel::new();

static STATION: StaticCell<StationLock> = StaticCell::new();
pub(super) static USB_STORAGE: StaticCell<UsbDeviceStorage> = StaticCell::new();

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let config = hal::Config::default();
    let hal::Peripherals {
        I2C1,
        PB8,
        PB9,
        USB,
        PA11,
        PA12,
        ..
    } = hal::init(config);

    let mut i2c_config = i2c::Config::default();
    i2c_config.frequency = Hertz(BUS_FREQUENCY_HZ);
    let bus = I2cBus::new(I2c::new_blocking(I2C1, PB8, PB9, i2c_config));

    let station_config = StationConfig::pool_kit();
    let registry = station_config.registry().expect("pool kit registry");
    let roles = station_config
        .roles(&registry)
        .expect("pool kit compensation roles");

    let timer = EmbassyTimer;
    let cycle = PollCycle::new(station_config.poll, roles, timer.now())
        .expect("pool kit poll interval");
    let station: &'static StationLock =
        STATION.init(Mutex::new(Station::new(registry, bus, timer)));

    defmt::info!(
        "station: {=usize} peripherals, polling every {=u64} ms",
        KIT_SIZE,
        u64::try_from(cycle.interval().as_millis()).unwrap_or(u64::MAX)
    );

    spawner
        .spawn(poll_task::run(station, cycle))
        .expect("failed to spawn poll task");

    spawner
        .spawn(dispatch_task::run(station, roles, station_config.poll))
        .expect("failed to spawn dispatch task");

    spawner
        .spawn(usb_task::run(USB, PA12, PA11))
        .expect("failed to spawn USB task");

    core::future::pending::<()>().await;
}
