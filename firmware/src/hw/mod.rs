//! I2C transport for the sensor circuits.
//!
//! The EZO circuits sit on I2C1 (PB8 SCL, PB9 SDA) at 100 kHz. Transfers are
//! short and bounded, so the blocking driver is used from inside the station
//! lock rather than an interrupt-driven one.

use embassy_stm32::i2c::{self, I2c};
use embassy_stm32::mode::Blocking;
use pool_core::bus::CommandBus;

/// Bus frequency used by the sensor circuits.
pub const BUS_FREQUENCY_HZ: u32 = 100_000;

/// Blocking I2C master wrapped as a [`CommandBus`].
pub struct I2cBus {
    i2c: I2c<'static, Blocking>,
}

impl I2cBus {
    pub fn new(i2c: I2c<'static, Blocking>) -> Self {
        Self { i2c }
    }
}

impl CommandBus for I2cBus {
    type Error = i2c::Error;

    fn send(&mut self, address: u8, command: &[u8]) -> Result<(), Self::Error> {
        self.i2c.blocking_write(address, command).inspect_err(|err| {
            defmt::warn!("i2c: write to {=u8} failed: {}", address, defmt::Debug2Format(err));
        })
    }

    fn receive(&mut self, address: u8, frame: &mut [u8]) -> Result<usize, Self::Error> {
        self.i2c.blocking_read(address, frame).inspect_err(|err| {
            defmt::warn!("i2c: read from {=u8} failed: {}", address, defmt::Debug2Format(err));
        })?;
        Ok(frame.len())
    }
}
