#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::ops::Add;
use std::time::Duration;

use pool_core::bus::{BusTimer, CommandBus};

#[derive(Copy, Clone, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
pub struct MockInstant(pub u64);

impl MockInstant {
    pub const fn ms(ms: u64) -> Self {
        Self(ms)
    }
}

impl Add<Duration> for MockInstant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        let millis = u64::try_from(rhs.as_millis()).unwrap_or(u64::MAX);
        MockInstant(self.0.saturating_add(millis))
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Traffic {
    Sent { address: u8, command: String },
    Received { address: u8 },
}

/// Bus that logs every transfer and replays scripted response frames.
#[derive(Default)]
pub struct RecordingBus {
    pub traffic: Vec<Traffic>,
    responses: HashMap<u8, VecDeque<Vec<u8>>>,
}

impl RecordingBus {
    pub fn respond(&mut self, address: u8, status: u8, payload: &str) {
        let mut frame = vec![status];
        frame.extend_from_slice(payload.as_bytes());
        frame.push(0);
        self.responses.entry(address).or_default().push_back(frame);
    }

    pub fn sent(&self) -> Vec<(u8, &str)> {
        self.traffic
            .iter()
            .filter_map(|event| match event {
                Traffic::Sent { address, command } => Some((*address, command.as_str())),
                Traffic::Received { .. } => None,
            })
            .collect()
    }

    pub fn sent_to(&self, address: u8) -> Vec<&str> {
        self.sent()
            .into_iter()
            .filter(|(to, _)| *to == address)
            .map(|(_, command)| command)
            .collect()
    }
}

impl CommandBus for RecordingBus {
    type Error = ();

    fn send(&mut self, address: u8, command: &[u8]) -> Result<(), ()> {
        self.traffic.push(Traffic::Sent {
            address,
            command: String::from_utf8_lossy(command).into_owned(),
        });
        Ok(())
    }

    fn receive(&mut self, address: u8, frame: &mut [u8]) -> Result<usize, ()> {
        self.traffic.push(Traffic::Received { address });
        let Some(bytes) = self
            .responses
            .get_mut(&address)
            .and_then(VecDeque::pop_front)
        else {
            return Ok(0);
        };
        let len = bytes.len().min(frame.len());
        frame[..len].copy_from_slice(&bytes[..len]);
        Ok(len)
    }
}

/// Clock that jumps to each deadline instead of sleeping.
#[derive(Default)]
pub struct JumpTimer {
    pub now: MockInstant,
    pub waited: Vec<MockInstant>,
}

impl BusTimer for JumpTimer {
    type Instant = MockInstant;

    fn now(&self) -> MockInstant {
        self.now
    }

    async fn wait_until(&mut self, deadline: MockInstant) {
        self.waited.push(deadline);
        self.now = self.now.max(deadline);
    }
}
