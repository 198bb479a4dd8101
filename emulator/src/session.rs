use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use embassy_futures::block_on;
use pool_core::bus::BusTimer;
use pool_core::config::{KIT_SIZE, StationConfig};
use pool_core::coordination::ReentrancyGuard;
use pool_core::dispatch::{
    DispatchOutcome, Dispatcher, Response, ResponseStatus, StationHandler, parse_request,
    station_dispatcher,
};
use pool_core::ezo::CompensationRoles;
use pool_core::registry::RegistryError;
use pool_core::sequencer::{PollCycle, PollStep, PollTick, SequencerError};
use pool_core::station::Station;

use crate::sim::SimulatedKit;

/// Resolution of the background poll loop.
const POLL_TICK: Duration = Duration::from_millis(50);

/// Host clock; waiting blocks the calling thread.
#[derive(Copy, Clone, Debug, Default)]
pub struct HostTimer;

impl BusTimer for HostTimer {
    type Instant = Instant;

    fn now(&self) -> Self::Instant {
        Instant::now()
    }

    async fn wait_until(&mut self, deadline: Self::Instant) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if !remaining.is_zero() {
            thread::sleep(remaining);
        }
    }
}

pub type HostStation = Station<SimulatedKit, HostTimer, KIT_SIZE>;
pub type SharedStation = Arc<Mutex<HostStation>>;

#[derive(Debug)]
pub enum SetupError {
    Registry(RegistryError),
    Sequencer(SequencerError),
}

impl fmt::Display for SetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetupError::Registry(err) => write!(f, "registry: {err}"),
            SetupError::Sequencer(err) => write!(f, "poll cycle: {err}"),
        }
    }
}

impl std::error::Error for SetupError {}

/// Request handling against one simulated station.
pub struct Session<'g> {
    station: SharedStation,
    guard: &'g ReentrancyGuard,
    config: StationConfig<KIT_SIZE>,
    roles: CompensationRoles,
    dispatcher: Dispatcher<StationHandler<'g>, 2>,
    transcript: Option<Transcript>,
    started_at: Instant,
}

impl<'g> Session<'g> {
    pub fn new(kit: SimulatedKit, guard: &'g ReentrancyGuard) -> Result<Self, SetupError> {
        let config = StationConfig::pool_kit();
        let registry = config.registry().map_err(SetupError::Registry)?;
        let roles = config.roles(&registry).map_err(SetupError::Registry)?;
        let station = Station::new(registry, kit, HostTimer);

        Ok(Self {
            station: Arc::new(Mutex::new(station)),
            guard,
            config,
            roles,
            dispatcher: station_dispatcher(guard, roles, config.poll),
            transcript: None,
            started_at: Instant::now(),
        })
    }

    #[must_use]
    pub fn with_transcript(mut self, transcript: Transcript) -> Self {
        self.transcript = Some(transcript);
        self
    }

    pub fn station(&self) -> SharedStation {
        Arc::clone(&self.station)
    }

    /// Poll cycle starting now, wired the same way as the dispatcher.
    pub fn poll_cycle(&self) -> Result<PollCycle<Instant>, SetupError> {
        PollCycle::new(self.config.poll, self.roles, Instant::now()).map_err(SetupError::Sequencer)
    }

    /// Routes one request and renders the HTTP response text.
    ///
    /// Requests nobody claims, and text that is not a request at all, are
    /// closed with an empty 404.
    pub fn handle_request(&mut self, text: &str) -> io::Result<String> {
        let elapsed = self.started_at.elapsed();
        self.record(elapsed, TranscriptRole::Host, text.trim())?;

        let response = match parse_request(text) {
            Ok(request) => {
                let mut station = lock(&self.station);
                match block_on(self.dispatcher.dispatch(&request, &mut *station)) {
                    DispatchOutcome::Handled(response) => response,
                    DispatchOutcome::Unhandled => Response::empty(ResponseStatus::NotFound),
                }
            }
            Err(err) => {
                self.record(elapsed, TranscriptRole::Note, &format!("rejected: {err}"))?;
                Response::empty(ResponseStatus::NotFound)
            }
        };

        let mut rendered = String::new();
        response.write_http(&mut rendered).map_err(io::Error::other)?;
        let elapsed = self.started_at.elapsed();
        self.record(elapsed, TranscriptRole::Device, response.body_str())?;
        Ok(rendered)
    }

    /// Starts the unattended poll loop on its own thread.
    pub fn spawn_poller(&self) -> Result<Poller, SetupError>
    where
        'g: 'static,
    {
        let cycle = self.poll_cycle()?;
        Ok(Poller::spawn(self.station(), self.guard, cycle))
    }

    fn record(&mut self, elapsed: Duration, role: TranscriptRole, line: &str) -> io::Result<()> {
        match self.transcript.as_mut() {
            Some(transcript) => transcript.append(elapsed, role, line),
            None => Ok(()),
        }
    }
}

fn lock(station: &Mutex<HostStation>) -> MutexGuard<'_, HostStation> {
    station.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Background thread driving the poll cycle until stopped or dropped.
pub struct Poller {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Poller {
    fn spawn(
        station: SharedStation,
        guard: &'static ReentrancyGuard,
        mut cycle: PollCycle<Instant>,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let handle = thread::spawn(move || {
            while !stop_flag.load(Ordering::Relaxed) {
                thread::sleep(POLL_TICK);
                // Held by an explicit command; the guard restarts the cycle later.
                let Ok(mut station) = station.try_lock() else {
                    continue;
                };
                if station.poll(&mut cycle, guard) == PollTick::Fired(PollStep::CollectReadings) {
                    eprintln!("poll: {}", summarize(&station, cycle.last_compensation()));
                }
            }
        });

        Self {
            stop,
            handle: Some(handle),
        }
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.stop();
    }
}

fn summarize(station: &HostStation, compensation: Option<f32>) -> String {
    let mut line = station
        .registry
        .iter()
        .map(|peripheral| match peripheral.last_reading() {
            Some(value) => format!("{}={value}", peripheral.name()),
            None => format!("{}=-", peripheral.name()),
        })
        .collect::<Vec<_>>()
        .join(" ");
    if let Some(celsius) = compensation {
        line.push_str(&format!(" (compensated at {celsius:.3} C)"));
    }
    line
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum TranscriptRole {
    Host,
    Device,
    Note,
}

impl TranscriptRole {
    fn prefix(self) -> &'static str {
        match self {
            TranscriptRole::Host => ">",
            TranscriptRole::Device => "<",
            TranscriptRole::Note => "#",
        }
    }
}

/// Timestamped log of every request and response body.
pub struct Transcript {
    writer: Box<dyn Write + Send>,
}

impl Transcript {
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self::new(BufWriter::new(file)))
    }

    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Box::new(writer),
        }
    }

    fn append(&mut self, elapsed: Duration, role: TranscriptRole, line: &str) -> io::Result<()> {
        for text in line.lines() {
            writeln!(self.writer, "{}", entry(elapsed, role, text))?;
        }
        self.writer.flush()
    }
}

fn entry(elapsed: Duration, role: TranscriptRole, text: &str) -> String {
    format!("[{:>9.3}] {} {text}", elapsed.as_secs_f64(), role.prefix())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(rendered: &str) -> &str {
        rendered
            .split_once("\r\n\r\n")
            .map(|(_, body)| body)
            .expect("header terminator")
    }

    #[test]
    fn lists_the_kit() {
        let guard = ReentrancyGuard::new();
        let mut session = Session::new(SimulatedKit::pool(), &guard).expect("session");

        let rendered = session.handle_request("GET /DEVICES").expect("rendered");

        assert!(rendered.starts_with("HTTP/1.1 200 OK\r\n"));
        assert_eq!(
            body(&rendered),
            r#"[{"name":"PH","address":99},{"name":"ORP","address":98},{"name":"RTD","address":102}]"#
        );
    }

    #[test]
    fn unclaimed_paths_close_with_empty_not_found() {
        let guard = ReentrancyGuard::new();
        let mut session = Session::new(SimulatedKit::pool(), &guard).expect("session");

        for text in ["GET /favicon.ico", "BREW /pot", ""] {
            let rendered = session.handle_request(text).expect("rendered");
            assert!(rendered.starts_with("HTTP/1.1 404 Not Found\r\n"), "{text}");
            assert_eq!(body(&rendered), "");
        }
    }

    #[test]
    fn explicit_command_reaches_the_simulated_circuit() {
        let guard = ReentrancyGuard::new();
        let mut session = Session::new(SimulatedKit::pool(), &guard).expect("session");

        let rendered = session
            .handle_request(r#"POST /CMD {"device":"PH","command":"i"}"#)
            .expect("rendered");

        assert_eq!(
            body(&rendered),
            r#"{"success":true,"device":"PH","command":"I","status":"success","response":"?I,pH,2.16"}"#
        );
        assert!(guard.polling_allowed());
        assert!(guard.take_restart());
    }

    #[test]
    fn temperature_command_updates_the_circuit() {
        let guard = ReentrancyGuard::new();
        let mut session = Session::new(SimulatedKit::pool(), &guard).expect("session");

        let rendered = session
            .handle_request(r#"POST /CMD "ph:t,30""#)
            .expect("rendered");

        assert!(body(&rendered).starts_with(r#"{"success":true,"device":"PH","command":"T,30""#));
        let station = session.station();
        let station = lock(&station);
        assert_eq!(station.bus.compensation(99), Some(30.0));
    }

    #[test]
    fn transcript_entries_are_timestamped() {
        assert_eq!(
            entry(Duration::from_millis(1500), TranscriptRole::Host, "GET /data"),
            "[    1.500] > GET /data"
        );
    }
}
