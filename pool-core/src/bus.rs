//! Transport seam between the protocol engine and the shared sensor bus.
//!
//! The core never touches bus registers. Firmware and host targets provide a
//! [`CommandBus`] that moves raw command/response frames and a [`BusTimer`]
//! that knows how to wait, and the protocol code in [`crate::ezo`] drives both.

use core::ops::Add;
use core::str;
use core::time::Duration;

/// Largest response frame a peripheral returns: status byte, payload, NUL.
pub const MAX_RESPONSE_FRAME: usize = 42;

/// Status byte reported once the peripheral has a valid response.
pub const STATUS_SUCCESS: u8 = 1;
/// Status byte reported when the peripheral rejected the command.
pub const STATUS_FAIL: u8 = 2;
/// Status byte reported while the peripheral is still computing.
pub const STATUS_NOT_READY: u8 = 254;
/// Status byte reported when the peripheral has nothing to return.
pub const STATUS_NO_DATA: u8 = 255;

/// Raw command/response transport for addressable peripherals.
pub trait CommandBus {
    /// Transport-specific failure.
    type Error;

    /// Transmits a command frame to the peripheral at `address`.
    fn send(&mut self, address: u8, command: &[u8]) -> Result<(), Self::Error>;

    /// Reads the pending response frame into `frame`, returning its length.
    fn receive(&mut self, address: u8, frame: &mut [u8]) -> Result<usize, Self::Error>;
}

impl<B> CommandBus for &mut B
where
    B: CommandBus + ?Sized,
{
    type Error = B::Error;

    fn send(&mut self, address: u8, command: &[u8]) -> Result<(), Self::Error> {
        (**self).send(address, command)
    }

    fn receive(&mut self, address: u8, frame: &mut [u8]) -> Result<usize, Self::Error> {
        (**self).receive(address, frame)
    }
}

/// Monotonic clock plus the ability to suspend until a deadline.
///
/// Firmware backs this with `embassy-time`; host tests use a mock clock that
/// jumps forward instead of sleeping.
#[allow(async_fn_in_trait)]
pub trait BusTimer {
    /// Monotonic timestamp type.
    type Instant: Copy + Ord + Add<Duration, Output = Self::Instant>;

    /// Returns the current instant.
    fn now(&self) -> Self::Instant;

    /// Suspends the caller until `deadline` has passed.
    async fn wait_until(&mut self, deadline: Self::Instant);
}

/// Response frame split into its status byte and text payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResponseFrame<'a> {
    pub status: u8,
    pub payload: &'a str,
}

/// Splits a raw frame into status and payload.
///
/// Returns `None` for an empty frame. The payload ends at the first NUL byte;
/// a payload that is not valid UTF-8 is reported as empty.
#[must_use]
pub fn decode_frame(frame: &[u8]) -> Option<ResponseFrame<'_>> {
    let (&status, rest) = frame.split_first()?;
    let end = rest.iter().position(|&byte| byte == 0).unwrap_or(rest.len());
    let payload = str::from_utf8(&rest[..end]).unwrap_or("").trim();
    Some(ResponseFrame { status, payload })
}
