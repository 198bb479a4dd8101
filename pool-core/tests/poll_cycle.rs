mod common;

use std::time::Duration;

use common::{JumpTimer, MockInstant, RecordingBus, Traffic};
use embassy_futures::block_on;
use pool_core::bus::STATUS_SUCCESS;
use pool_core::config::{ORP_ADDRESS, PH_ADDRESS, RTD_ADDRESS, StationConfig};
use pool_core::coordination::ReentrancyGuard;
use pool_core::dispatch::{DispatchOutcome, parse_request, station_dispatcher};
use pool_core::sequencer::{
    DEFAULT_POLL_INTERVAL, PollCycle, PollStep, PollTick, SequencerStep, StepSequencer,
};
use pool_core::station::Station;

type TestStation = Station<RecordingBus, JumpTimer, 3>;

fn setup() -> (TestStation, PollCycle<MockInstant>) {
    let config = StationConfig::pool_kit();
    let registry = config.registry::<MockInstant>().expect("registry");
    let roles = config.roles(&registry).expect("roles");
    let cycle = PollCycle::new(config.poll, roles, MockInstant::ms(0)).expect("cycle");
    (
        Station::new(registry, RecordingBus::default(), JumpTimer::default()),
        cycle,
    )
}

fn script_pass(bus: &mut RecordingBus, temperature: &str, ph: &str) {
    bus.respond(RTD_ADDRESS, STATUS_SUCCESS, temperature);
    bus.respond(PH_ADDRESS, STATUS_SUCCESS, "");
    bus.respond(PH_ADDRESS, STATUS_SUCCESS, ph);
    bus.respond(ORP_ADDRESS, STATUS_SUCCESS, "701");
}

#[test]
fn k_advances_fire_each_step_once_and_wrap() {
    let steps = [
        SequencerStep::new('a', Duration::from_millis(10)),
        SequencerStep::new('b', Duration::from_millis(20)),
        SequencerStep::new('c', Duration::from_millis(30)),
        SequencerStep::new('d', Duration::from_millis(40)),
    ];
    let mut sequencer = StepSequencer::new(steps, MockInstant::ms(0)).expect("sequencer");
    let mut fired = Vec::new();
    let mut now = 0;

    for step in steps {
        assert_eq!(sequencer.advance(MockInstant::ms(now)), None);
        now += u64::try_from(step.threshold.as_millis()).expect("millis");
        fired.extend(sequencer.advance(MockInstant::ms(now)));
    }

    assert_eq!(fired, vec!['a', 'b', 'c', 'd']);
    assert_eq!(sequencer.current_index(), 0);
    assert_eq!(Duration::from_millis(now), sequencer.cycle_time());
}

#[test]
fn default_cadence_completes_a_pass_every_ten_seconds() {
    let (mut station, mut cycle) = setup();
    let guard = ReentrancyGuard::new();
    script_pass(&mut station.bus, "25.5", "7.10");
    script_pass(&mut station.bus, "25.7", "7.15");

    let mut fired = Vec::new();
    for ms in (0..=20_000).step_by(100) {
        station.timer.now = MockInstant::ms(ms);
        if let PollTick::Fired(step) = station.poll(&mut cycle, &guard) {
            fired.push((ms, step));
        }
    }

    assert_eq!(
        fired,
        vec![
            (7_700, PollStep::RequestTemperature),
            (8_700, PollStep::Compensate),
            (9_000, PollStep::RequestReadings),
            (10_000, PollStep::CollectReadings),
            (17_700, PollStep::RequestTemperature),
            (18_700, PollStep::Compensate),
            (19_000, PollStep::RequestReadings),
            (20_000, PollStep::CollectReadings),
        ]
    );
    assert_eq!(cycle.interval(), DEFAULT_POLL_INTERVAL);
    assert_eq!(cycle.last_compensation(), Some(25.7));
    assert_eq!(
        station.bus.sent_to(PH_ADDRESS),
        vec!["T,25.500", "R", "T,25.700", "R"]
    );
    let ph = station.registry.get(0).expect("ph");
    assert_eq!(ph.last_reading(), Some(7.15));
}

#[test]
fn explicit_command_pauses_and_restarts_polling() {
    let (mut station, mut cycle) = setup();
    let guard = ReentrancyGuard::new();
    let config = StationConfig::pool_kit();
    let roles = cycle.roles();

    station.timer.now = MockInstant::ms(7_700);
    assert_eq!(
        station.poll(&mut cycle, &guard),
        PollTick::Fired(PollStep::RequestTemperature)
    );

    // An explicit command holds the bus; the poll loop must stay off it.
    let claim = guard.try_acquire().expect("claim");
    station.timer.now = MockInstant::ms(8_700);
    let traffic = station.bus.traffic.len();
    assert_eq!(station.poll(&mut cycle, &guard), PollTick::Skipped);
    assert_eq!(station.bus.traffic.len(), traffic);
    drop(claim);

    station.bus.respond(ORP_ADDRESS, STATUS_SUCCESS, "");
    let mut dispatcher = station_dispatcher(&guard, roles, config.poll);
    let request =
        parse_request(r#"POST /CMD {"device":"ORP","command":"cal,225"}"#).expect("request");
    let outcome = block_on(dispatcher.dispatch(&request, &mut station));
    assert!(matches!(outcome, DispatchOutcome::Handled(_)));
    assert_eq!(station.timer.now, MockInstant::ms(9_700));

    // The cycle restarts from the idle step once the command completes,
    // after classifying the RTD read it sent before the claim.
    assert_eq!(station.poll(&mut cycle, &guard), PollTick::Idle);
    assert_eq!(cycle.next_deadline(), MockInstant::ms(17_400));
    assert_eq!(
        station.bus.traffic.last(),
        Some(&Traffic::Received {
            address: RTD_ADDRESS
        })
    );
}

fn rtd_traffic(bus: &RecordingBus) -> Vec<Traffic> {
    bus.traffic
        .iter()
        .filter(|event| match event {
            Traffic::Sent { address, .. } | Traffic::Received { address } => {
                *address == RTD_ADDRESS
            }
        })
        .cloned()
        .collect()
}

fn sent_r() -> Traffic {
    Traffic::Sent {
        address: RTD_ADDRESS,
        command: "R".to_owned(),
    }
}

#[test]
fn every_poll_read_is_classified_across_an_explicit_command() {
    let (mut station, mut cycle) = setup();
    let guard = ReentrancyGuard::new();
    let config = StationConfig::pool_kit();
    let mut dispatcher = station_dispatcher(&guard, cycle.roles(), config.poll);
    station.bus.respond(RTD_ADDRESS, STATUS_SUCCESS, "24.9");
    station.bus.respond(ORP_ADDRESS, STATUS_SUCCESS, "?I,OR,2.16");
    script_pass(&mut station.bus, "25.3", "7.30");

    station.timer.now = MockInstant::ms(7_700);
    assert_eq!(
        station.poll(&mut cycle, &guard),
        PollTick::Fired(PollStep::RequestTemperature)
    );

    let request = parse_request(r#"POST /CMD {"device":"ORP","command":"i"}"#).expect("request");
    let outcome = block_on(dispatcher.dispatch(&request, &mut station));
    assert!(matches!(outcome, DispatchOutcome::Handled(_)));

    for ms in (8_000..=25_000).step_by(100) {
        station.timer.now = MockInstant::ms(ms);
        station.poll(&mut cycle, &guard);
    }

    let received = Traffic::Received {
        address: RTD_ADDRESS,
    };
    assert_eq!(
        rtd_traffic(&station.bus),
        vec![sent_r(), received.clone(), sent_r(), received]
    );
    assert_eq!(cycle.last_compensation(), Some(25.3));
}

#[test]
fn explicit_command_collects_a_poll_read_on_the_same_peripheral_first() {
    let (mut station, mut cycle) = setup();
    let guard = ReentrancyGuard::new();
    let config = StationConfig::pool_kit();
    let mut dispatcher = station_dispatcher(&guard, cycle.roles(), config.poll);
    station.bus.respond(RTD_ADDRESS, STATUS_SUCCESS, "26.0");
    station.bus.respond(RTD_ADDRESS, STATUS_SUCCESS, "?I,RTD,2.01");

    station.timer.now = MockInstant::ms(7_700);
    assert_eq!(
        station.poll(&mut cycle, &guard),
        PollTick::Fired(PollStep::RequestTemperature)
    );

    let request = parse_request(r#"POST /CMD {"device":"RTD","command":"i"}"#).expect("request");
    let outcome = block_on(dispatcher.dispatch(&request, &mut station));
    assert!(matches!(outcome, DispatchOutcome::Handled(_)));

    let received = Traffic::Received {
        address: RTD_ADDRESS,
    };
    let sent_i = Traffic::Sent {
        address: RTD_ADDRESS,
        command: "I".to_owned(),
    };
    assert_eq!(
        rtd_traffic(&station.bus),
        vec![sent_r(), received.clone(), sent_i, received]
    );
    assert_eq!(station.timer.waited, vec![MockInstant::ms(8_700), MockInstant::ms(9_000)]);
    let rtd = station.registry.get(2).expect("rtd");
    assert_eq!(rtd.last_reading(), Some(26.0));
    assert_eq!(rtd.last_response(), "?I,RTD,2.01");
}

#[test]
fn cadence_requests_reach_the_poll_loop() {
    let (mut station, mut cycle) = setup();
    let guard = ReentrancyGuard::new();

    guard.request_cadence(Duration::from_secs(5));
    assert_eq!(station.poll(&mut cycle, &guard), PollTick::Idle);

    assert_eq!(cycle.interval(), Duration::from_secs(5));
    assert_eq!(cycle.next_deadline(), MockInstant::ms(2_700));
}
