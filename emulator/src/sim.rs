//! Simulated EZO circuits behind a [`CommandBus`].
//!
//! Each circuit keeps the last command it accepted together with the instant
//! its answer becomes available. Reading early yields the not-ready status,
//! reading with nothing queued yields no-data, and unknown commands fail, the
//! way the real circuits behave on the wire.

use std::fmt;
use std::time::{Duration, Instant};

use pool_core::bus::{
    CommandBus, STATUS_FAIL, STATUS_NO_DATA, STATUS_NOT_READY, STATUS_SUCCESS,
};
use pool_core::config::{ORP_ADDRESS, PH_ADDRESS, RTD_ADDRESS};

/// Time a circuit spends on a reading or a calibration point.
pub const SIM_READ_TIME: Duration = Duration::from_millis(900);
/// Time a circuit spends on any other command.
pub const SIM_COMMAND_TIME: Duration = Duration::from_millis(250);

const FIRMWARE_VERSION: &str = "2.16";
const SUPPLY_VOLTAGE: f32 = 3.3;
const MAX_CALIBRATION_POINTS: u8 = 3;
/// pH drift per degree away from the 25 C reference.
const PH_TEMPERATURE_SLOPE: f32 = 0.003;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CircuitKind {
    Ph,
    Orp,
    Rtd,
}

impl CircuitKind {
    fn device_code(self) -> &'static str {
        match self {
            CircuitKind::Ph => "pH",
            CircuitKind::Orp => "OR",
            CircuitKind::Rtd => "RTD",
        }
    }
}

/// Nothing acknowledged the address.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Nack {
    pub address: u8,
}

impl fmt::Display for Nack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no circuit at address {}", self.address)
    }
}

impl std::error::Error for Nack {}

#[derive(Clone, Debug)]
enum Reply {
    Success(String),
    Fail,
}

#[derive(Clone, Debug)]
struct Pending {
    reply: Reply,
    ready_at: Instant,
}

/// Simulated water the circuits are dipped in.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Water {
    pub ph: f32,
    pub orp_mv: f32,
    pub temperature_c: f32,
}

impl Default for Water {
    fn default() -> Self {
        Self {
            ph: 7.4,
            orp_mv: 650.0,
            temperature_c: 26.4,
        }
    }
}

#[derive(Clone, Debug)]
struct Circuit {
    kind: CircuitKind,
    address: u8,
    /// Temperature the circuit compensates for; only the pH circuit uses it.
    compensation_c: f32,
    calibration_points: u8,
    pending: Option<Pending>,
}

impl Circuit {
    fn new(kind: CircuitKind, address: u8) -> Self {
        Self {
            kind,
            address,
            compensation_c: 25.0,
            calibration_points: 0,
            pending: None,
        }
    }

    fn accept(&mut self, command: &str, water: &Water, now: Instant) {
        let command = command.trim().to_ascii_uppercase();
        let (reply, busy) = self.evaluate(&command, water);
        self.pending = Some(Pending {
            reply,
            ready_at: now + busy,
        });
    }

    fn evaluate(&mut self, command: &str, water: &Water) -> (Reply, Duration) {
        if command == "R" {
            return (Reply::Success(self.reading(water)), SIM_READ_TIME);
        }
        if let Some(value) = command.strip_prefix("RT,")
            && self.kind == CircuitKind::Ph
        {
            return match value.parse::<f32>() {
                Ok(celsius) => {
                    self.compensation_c = celsius;
                    (Reply::Success(self.reading(water)), SIM_READ_TIME)
                }
                Err(_) => (Reply::Fail, SIM_COMMAND_TIME),
            };
        }
        if let Some(argument) = command.strip_prefix("CAL,") {
            return (self.calibrate(argument), SIM_READ_TIME);
        }

        let reply = match command {
            "I" => Reply::Success(format!("?I,{},{FIRMWARE_VERSION}", self.kind.device_code())),
            "STATUS" => Reply::Success(format!("?STATUS,P,{SUPPLY_VOLTAGE:.2}")),
            "T,?" if self.kind == CircuitKind::Ph => {
                Reply::Success(format!("?T,{:.2}", self.compensation_c))
            }
            _ => match command.strip_prefix("T,") {
                Some(value) if self.kind == CircuitKind::Ph => match value.parse::<f32>() {
                    Ok(celsius) => {
                        self.compensation_c = celsius;
                        Reply::Success(String::new())
                    }
                    Err(_) => Reply::Fail,
                },
                _ => Reply::Fail,
            },
        };
        (reply, SIM_COMMAND_TIME)
    }

    fn reading(&self, water: &Water) -> String {
        match self.kind {
            CircuitKind::Ph => {
                let skew = PH_TEMPERATURE_SLOPE * (water.temperature_c - self.compensation_c);
                format!("{:.2}", water.ph + skew)
            }
            CircuitKind::Orp => format!("{:.1}", water.orp_mv),
            CircuitKind::Rtd => format!("{:.3}", water.temperature_c),
        }
    }

    fn calibrate(&mut self, argument: &str) -> Reply {
        match argument {
            "?" => Reply::Success(format!("?CAL,{}", self.calibration_points)),
            "CLEAR" => {
                self.calibration_points = 0;
                Reply::Success(String::new())
            }
            _ => {
                self.calibration_points = (self.calibration_points + 1).min(MAX_CALIBRATION_POINTS);
                Reply::Success(String::new())
            }
        }
    }

    fn respond(&mut self, frame: &mut [u8], now: Instant) -> usize {
        let Some(pending) = self.pending.as_ref() else {
            return write_frame(frame, STATUS_NO_DATA, "");
        };
        if now < pending.ready_at {
            return write_frame(frame, STATUS_NOT_READY, "");
        }

        match self.pending.take().map(|pending| pending.reply) {
            Some(Reply::Success(payload)) => write_frame(frame, STATUS_SUCCESS, &payload),
            Some(Reply::Fail) => write_frame(frame, STATUS_FAIL, ""),
            None => write_frame(frame, STATUS_NO_DATA, ""),
        }
    }
}

fn write_frame(frame: &mut [u8], status: u8, payload: &str) -> usize {
    let Some((first, rest)) = frame.split_first_mut() else {
        return 0;
    };
    *first = status;
    let len = payload.len().min(rest.len().saturating_sub(1));
    rest[..len].copy_from_slice(&payload.as_bytes()[..len]);
    if let Some(terminator) = rest.get_mut(len) {
        *terminator = 0;
    }
    (len + 2).min(frame.len())
}

/// The pool kit's three circuits on one simulated bus.
#[derive(Clone, Debug)]
pub struct SimulatedKit {
    circuits: Vec<Circuit>,
    water: Water,
}

impl SimulatedKit {
    pub fn pool() -> Self {
        Self {
            circuits: vec![
                Circuit::new(CircuitKind::Ph, PH_ADDRESS),
                Circuit::new(CircuitKind::Orp, ORP_ADDRESS),
                Circuit::new(CircuitKind::Rtd, RTD_ADDRESS),
            ],
            water: Water::default(),
        }
    }

    /// Temperature the circuit at `address` currently compensates for.
    #[cfg(test)]
    pub fn compensation(&self, address: u8) -> Option<f32> {
        self.circuits
            .iter()
            .find(|circuit| circuit.address == address && circuit.kind == CircuitKind::Ph)
            .map(|circuit| circuit.compensation_c)
    }

    fn circuit_mut(&mut self, address: u8) -> Result<&mut Circuit, Nack> {
        self.circuits
            .iter_mut()
            .find(|circuit| circuit.address == address)
            .ok_or(Nack { address })
    }
}

impl Default for SimulatedKit {
    fn default() -> Self {
        Self::pool()
    }
}

impl CommandBus for SimulatedKit {
    type Error = Nack;

    fn send(&mut self, address: u8, command: &[u8]) -> Result<(), Self::Error> {
        let water = self.water;
        let circuit = self.circuit_mut(address)?;
        circuit.accept(&String::from_utf8_lossy(command), &water, Instant::now());
        Ok(())
    }

    fn receive(&mut self, address: u8, frame: &mut [u8]) -> Result<usize, Self::Error> {
        let circuit = self.circuit_mut(address)?;
        Ok(circuit.respond(frame, Instant::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pool_core::bus::decode_frame;

    fn answer(circuit: &mut Circuit, now: Instant) -> (u8, String) {
        let mut frame = [0_u8; 42];
        let len = circuit.respond(&mut frame, now);
        let decoded = decode_frame(&frame[..len]).expect("frame");
        (decoded.status, decoded.payload.to_owned())
    }

    #[test]
    fn idle_circuit_reports_no_data() {
        let mut circuit = Circuit::new(CircuitKind::Orp, ORP_ADDRESS);
        assert_eq!(answer(&mut circuit, Instant::now()).0, STATUS_NO_DATA);
    }

    #[test]
    fn reading_is_not_ready_inside_the_processing_time() {
        let mut circuit = Circuit::new(CircuitKind::Orp, ORP_ADDRESS);
        let start = Instant::now();
        circuit.accept("r", &Water::default(), start);

        assert_eq!(
            answer(&mut circuit, start + Duration::from_millis(100)).0,
            STATUS_NOT_READY
        );
        assert_eq!(
            answer(&mut circuit, start + SIM_READ_TIME),
            (STATUS_SUCCESS, "650.0".to_owned())
        );
        // The answer is consumed by the read that delivered it.
        assert_eq!(answer(&mut circuit, start + SIM_READ_TIME).0, STATUS_NO_DATA);
    }

    #[test]
    fn temperature_setting_moves_the_ph_reading() {
        let mut circuit = Circuit::new(CircuitKind::Ph, PH_ADDRESS);
        let water = Water {
            ph: 7.0,
            orp_mv: 0.0,
            temperature_c: 35.0,
        };
        let start = Instant::now();

        circuit.accept("R", &water, start);
        assert_eq!(answer(&mut circuit, start + SIM_READ_TIME).1, "7.03");

        circuit.accept("T,35.000", &water, start);
        assert_eq!(answer(&mut circuit, start + SIM_COMMAND_TIME).0, STATUS_SUCCESS);
        circuit.accept("R", &water, start);
        assert_eq!(answer(&mut circuit, start + SIM_READ_TIME).1, "7.00");
    }

    #[test]
    fn compensated_read_applies_the_temperature_first() {
        let mut circuit = Circuit::new(CircuitKind::Ph, PH_ADDRESS);
        let water = Water {
            ph: 7.0,
            orp_mv: 0.0,
            temperature_c: 35.0,
        };
        let start = Instant::now();

        circuit.accept("rt,35.0", &water, start);
        assert_eq!(
            answer(&mut circuit, start + SIM_COMMAND_TIME).0,
            STATUS_NOT_READY
        );
        assert_eq!(answer(&mut circuit, start + SIM_READ_TIME).1, "7.00");
    }

    #[test]
    fn unsupported_commands_fail() {
        let mut circuit = Circuit::new(CircuitKind::Rtd, RTD_ADDRESS);
        let start = Instant::now();
        circuit.accept("T,25.000", &Water::default(), start);
        assert_eq!(answer(&mut circuit, start + SIM_COMMAND_TIME).0, STATUS_FAIL);
    }

    #[test]
    fn calibration_points_accumulate() {
        let mut circuit = Circuit::new(CircuitKind::Ph, PH_ADDRESS);
        let start = Instant::now();
        for command in ["cal,mid,7.00", "cal,low,4.00", "Cal,?"] {
            circuit.accept(command, &Water::default(), start);
        }
        assert_eq!(answer(&mut circuit, start + SIM_READ_TIME).1, "?CAL,2");
    }

    #[test]
    fn unknown_addresses_are_not_acknowledged() {
        let mut kit = SimulatedKit::pool();
        assert_eq!(kit.send(0x10, b"R"), Err(Nack { address: 0x10 }));
    }
}
