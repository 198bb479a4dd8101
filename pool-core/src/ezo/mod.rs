//! Peripheral command protocol for EZO-class sensor circuits.
//!
//! Each peripheral accepts a short ASCII command, spends a kind-specific
//! processing window computing the answer, and then returns a status byte
//! followed by a text payload. [`Peripheral`] tracks the one command in flight
//! and refuses to read the bus before that window has elapsed, so the bus is
//! never polled for a response the circuit has not produced yet.

pub mod command;
pub mod compensation;

use core::fmt;
use core::str::FromStr;

use heapless::String;
use serde::Serialize;

use crate::bus::{
    BusTimer, CommandBus, MAX_RESPONSE_FRAME, STATUS_NO_DATA, STATUS_NOT_READY, STATUS_SUCCESS,
    decode_frame,
};

pub use command::{
    CALIBRATION_WINDOW, COMMAND_WINDOW, COMPENSATED_READ_PREFIX, COMPENSATION_WINDOW, Command, CommandError, CommandKind,
    CommandTarget, CommandText, MAX_COMMAND_LEN, READ_COMMAND, READ_WINDOW, compensation_command,
    normalize,
};
pub use compensation::{
    CompensatedReading, CompensationRoles, DEFAULT_COMPENSATION_C, INVALID_READING_FLOOR,
    compensation_value, read_with_compensation, refresh_registry,
};

/// Longest response payload retained per peripheral.
pub const MAX_RESPONSE_TEXT: usize = MAX_RESPONSE_FRAME - 2;

/// Outcome of retrieving a response from a peripheral.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Success,
    Fail,
    NotReady,
    NoData,
}

impl Classification {
    /// Maps a response status byte onto the classification taxonomy.
    #[must_use]
    pub const fn from_status(status: u8) -> Self {
        match status {
            STATUS_SUCCESS => Self::Success,
            STATUS_NOT_READY => Self::NotReady,
            STATUS_NO_DATA => Self::NoData,
            // STATUS_FAIL and any byte outside the protocol.
            _ => Self::Fail,
        }
    }

    /// Returns `true` for [`Classification::Success`].
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }

    /// Human-readable explanation used in structured responses.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Fail => "command failed",
            Self::NotReady => "response not ready",
            Self::NoData => "no data",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Command awaiting its response.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PendingCommand<TInstant> {
    pub kind: CommandKind,
    pub ready_at: TInstant,
}

/// Static description of a peripheral on the bus.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PeripheralConfig {
    pub name: &'static str,
    pub address: u8,
}

impl PeripheralConfig {
    /// Creates a configuration entry.
    pub const fn new(name: &'static str, address: u8) -> Self {
        Self { name, address }
    }
}

/// One addressable sensor circuit and the state observed from it.
#[derive(Clone, Debug)]
pub struct Peripheral<TInstant> {
    name: &'static str,
    address: u8,
    last_reading: Option<f32>,
    last_classification: Option<Classification>,
    last_response: String<MAX_RESPONSE_TEXT>,
    pending: Option<PendingCommand<TInstant>>,
}

impl<TInstant> Peripheral<TInstant>
where
    TInstant: Copy + Ord + core::ops::Add<core::time::Duration, Output = TInstant>,
{
    /// Creates a peripheral with no reading and nothing in flight.
    pub const fn new(config: PeripheralConfig) -> Self {
        Self {
            name: config.name,
            address: config.address,
            last_reading: None,
            last_classification: None,
            last_response: String::new(),
            pending: None,
        }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }

    pub const fn address(&self) -> u8 {
        self.address
    }

    /// Most recent value from a successful read, if any.
    pub const fn last_reading(&self) -> Option<f32> {
        self.last_reading
    }

    /// Classification of the most recent retrieval attempt that reached the bus.
    pub const fn last_classification(&self) -> Option<Classification> {
        self.last_classification
    }

    /// Payload text of the most recent successful response.
    pub fn last_response(&self) -> &str {
        self.last_response.as_str()
    }

    pub const fn pending(&self) -> Option<PendingCommand<TInstant>> {
        self.pending
    }

    /// Sends `text` to the peripheral and returns the instant its response is due.
    ///
    /// Transport errors are dropped: the follow-up retrieval reports them as
    /// [`Classification::NoData`] or [`Classification::Fail`].
    pub fn send_command<B>(&mut self, bus: &mut B, text: &str, now: TInstant) -> TInstant
    where
        B: CommandBus + ?Sized,
    {
        let kind = CommandKind::classify(text);
        let ready_at = now + kind.processing_window();
        let _ = bus.send(self.address, text.as_bytes());
        self.pending = Some(PendingCommand { kind, ready_at });
        ready_at
    }

    /// Sends the read command.
    pub fn send_read<B>(&mut self, bus: &mut B, now: TInstant) -> TInstant
    where
        B: CommandBus + ?Sized,
    {
        self.send_command(bus, READ_COMMAND, now)
    }

    /// Retrieves and classifies the pending response without waiting.
    ///
    /// Returns [`Classification::NoData`] when nothing was sent and
    /// [`Classification::NotReady`] before the processing window has elapsed;
    /// neither case touches the bus or changes the stored state.
    pub fn receive<B>(&mut self, bus: &mut B, now: TInstant) -> Classification
    where
        B: CommandBus + ?Sized,
    {
        let Some(pending) = self.pending else {
            return Classification::NoData;
        };
        if now < pending.ready_at {
            return Classification::NotReady;
        }
        self.pending = None;

        let mut frame = [0_u8; MAX_RESPONSE_FRAME];
        let classification = match bus.receive(self.address, &mut frame) {
            Ok(len) => match decode_frame(&frame[..len.min(frame.len())]) {
                Some(response) => self.absorb(pending.kind, response.status, response.payload),
                None => Classification::NoData,
            },
            Err(_) => Classification::NoData,
        };

        self.last_classification = Some(classification);
        classification
    }

    /// Waits out the processing window of the pending command, then classifies it.
    pub async fn await_and_classify<B, T>(&mut self, bus: &mut B, timer: &mut T) -> Classification
    where
        B: CommandBus + ?Sized,
        T: BusTimer<Instant = TInstant>,
    {
        if let Some(pending) = self.pending {
            timer.wait_until(pending.ready_at).await;
        }
        let now = timer.now();
        self.receive(bus, now)
    }

    /// Classifies an exchange still in flight so a new command does not replace it unread.
    ///
    /// Returns `None` when nothing was pending.
    pub async fn settle<B, T>(&mut self, bus: &mut B, timer: &mut T) -> Option<Classification>
    where
        B: CommandBus + ?Sized,
        T: BusTimer<Instant = TInstant>,
    {
        if self.pending.is_none() {
            return None;
        }
        Some(self.await_and_classify(bus, timer).await)
    }

    fn absorb(&mut self, kind: CommandKind, status: u8, payload: &str) -> Classification {
        let classification = Classification::from_status(status);
        if !classification.is_success() {
            return classification;
        }

        self.last_response.clear();
        for ch in payload.chars() {
            if self.last_response.push(ch).is_err() {
                break;
            }
        }

        if kind != CommandKind::Read {
            return classification;
        }

        let field = payload.split(',').next().unwrap_or("").trim();
        match f32::from_str(field) {
            Ok(value) => {
                self.last_reading = Some(value);
                Classification::Success
            }
            Err(_) => Classification::Fail,
        }
    }
}
