use std::ops::Deref;
use std::time::Duration;

use approx::assert_relative_eq;
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::channel::Channel;
use embedded_hal_async::delay::DelayNs;
#[cfg(feature = "log")]
use log::LevelFilter;

use crate::config::GRAVITY;
use crate::pressure::PressureAltitudeTable;
use crate::sample::{ImuReading, SenseReadings};
use crate::*;

pub fn init_logger() {
    #[cfg(feature = "log")]
    let _ = env_logger::builder()
        .filter_level(LevelFilter::Warn)
        .filter(Some("flight_core"), LevelFilter::Trace)
        .is_test(true)
        .try_init();
}

/// Records every published event.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct EventLog(Vec<FlightEvent>);

impl EventLog {
    pub fn transitions(&self) -> Vec<(FlightState, FlightState)> {
        self.0
            .iter()
            .filter_map(|event| match *event {
                FlightEvent::StateChanged { from, to, .. } => Some((from, to)),
                _ => None,
            })
            .collect()
    }

    pub fn transition_tick(&self, state: FlightState) -> Option<Tick> {
        self.0.iter().find_map(|event| match *event {
            FlightEvent::StateChanged { to, tick, .. } if to == state => Some(tick),
            _ => None,
        })
    }

    /// Tick at which pyro channel `index` fired.
    pub fn pyro_tick(&self, index: u8) -> Option<Tick> {
        self.0.iter().find_map(|event| match *event {
            FlightEvent::PyroFired { mask, tick } if mask & (1 << index) != 0 => Some(tick),
            _ => None,
        })
    }
}

impl Deref for EventLog {
    type Target = Vec<FlightEvent>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl FlightEventPublisher for EventLog {
    fn publish(&mut self, event: FlightEvent) {
        self.0.push(event);
    }
}

#[derive(Debug, Default)]
pub struct RecordingActuator(pub Vec<(OutputChannel, bool)>);

impl RecordingActuator {
    /// How many high edges the channel saw.
    pub fn pulses(&self, channel: OutputChannel) -> usize {
        self.0.iter().filter(|(c, active)| *c == channel && *active).count()
    }
}

impl PyroActuator for RecordingActuator {
    fn fire_channel(&mut self, channel: OutputChannel, active: bool) {
        self.0.push((channel, active));
    }
}

pub struct TokioDelay;

impl DelayNs for TokioDelay {
    async fn delay_ns(&mut self, ns: u32) {
        tokio::time::sleep(Duration::from_nanos(ns as u64)).await;
    }
}

/// Feeds a fixed list of samples, then closes.
pub struct Replay<I>(pub I);

impl<I: Iterator<Item = SensorSample>> SampleSource for Replay<I> {
    async fn next_sample(&mut self) -> Option<SensorSample> {
        self.0.next()
    }
}

pub const GROUND_ALTITUDE_M: f32 = 100.0;
const PAD_TICKS: usize = 700;
const BOOST_ACCEL_MSS: f32 = 50.0;
const BURN_S: f32 = 2.6;
const DESCENT_RATE_MS: f32 = -30.0;
const LANDED_TICKS: usize = 1500;

/// Height above the pad and acceleration along the airframe, one pair per
/// tick: 7 s on the pad, a 2.6 s burn at 50 m/s², ballistic coast to about
/// 1030 m, then a steady 30 m/s descent and 15 s on the ground.
pub fn flight_profile() -> Vec<(f32, f32)> {
    let mut profile = vec![(0.0, 0.0); PAD_TICKS];
    let dt = 1.0 / TICKS_PER_SECOND as f32;
    let burnout_speed = BOOST_ACCEL_MSS * BURN_S;
    let burnout_height = BOOST_ACCEL_MSS * BURN_S * BURN_S / 2.0;

    let mut n = 0;
    let mut descending = false;
    let mut height = 0.0;
    loop {
        let t = n as f32 * dt;
        let accel;
        if t <= BURN_S {
            height = BOOST_ACCEL_MSS * t * t / 2.0;
            accel = BOOST_ACCEL_MSS;
        } else if !descending {
            let tc = t - BURN_S;
            let speed = burnout_speed - GRAVITY * tc;
            height = burnout_height + burnout_speed * tc - GRAVITY * tc * tc / 2.0;
            accel = -GRAVITY;
            descending = speed <= DESCENT_RATE_MS;
        } else {
            height += DESCENT_RATE_MS * dt;
            accel = 0.0;
        }
        if descending && height <= 0.0 {
            break;
        }
        profile.push((height, accel));
        n += 1;
    }
    profile.extend(std::iter::repeat_n((0.0, 0.0), LANDED_TICKS));
    profile
}

pub fn barometric_flight() -> Vec<f32> {
    flight_profile().into_iter().map(|(height, _)| height).collect()
}

pub fn peak_index(heights: &[f32]) -> usize {
    heights
        .iter()
        .enumerate()
        .fold(0, |best, (i, h)| if *h > heights[best] { i } else { best })
}

pub fn sense_all_ready() -> SenseReadings {
    let mut sense = SenseReadings {
        drogue: Some(2000),
        main: Some(2000),
        pyro: heapless::Vec::new(),
    };
    sense.pyro.extend_from_slice(&[2000; 4]).unwrap();
    sense
}

/// Barometer-only samples for a height trace, starting at tick `first`.
pub fn baro_samples(config: &FlightConfig, heights: &[f32], first: u16) -> Vec<SensorSample> {
    let table = PressureAltitudeTable::new(config.baro_calibration);
    heights
        .iter()
        .enumerate()
        .map(|(i, height)| {
            SensorSample::new(Tick(first.wrapping_add(i as u16)))
                .with_pressure(table.counts_for_altitude(GROUND_ALTITUDE_M + height))
                .with_sense(sense_all_ready())
        })
        .collect()
}

/// Apogee on channel 0, main altitude on channel 1.
pub fn dual_deploy_config() -> FlightConfig {
    let mut config = FlightConfig::default();
    config.apply_pyro_line("0 f>= 5 D").unwrap();
    config.apply_pyro_line("1 f>= 6 h< 250").unwrap();
    config
}

/// Barometer and accelerometer samples; the accelerometer reads +1 g at
/// rest, calibrated 1000 counts at +1 g and 3000 at -1 g.
pub fn fused_samples(config: &FlightConfig, profile: &[(f32, f32)]) -> Vec<SensorSample> {
    let heights: Vec<f32> = profile.iter().map(|(height, _)| *height).collect();
    let cal = config.accel_calibration.unwrap();
    baro_samples(config, &heights, 0)
        .into_iter()
        .zip(profile)
        .map(|(sample, (_, accel))| {
            let raw = cal.plus_g as f32 - accel / cal.scale();
            sample.with_accel(raw.round() as i16)
        })
        .collect()
}

pub fn fused_config() -> FlightConfig {
    let mut config = dual_deploy_config();
    config.sensors.accelerometer = true;
    config.accel_calibration = Some(config::AccelCalibration {
        plus_g: 1000,
        minus_g: 3000,
    });
    config
}

fn replay(config: &FlightConfig, samples: &[SensorSample]) -> (EventLog, FlightStatus) {
    let mut events = EventLog::default();
    let mut computer = FlightComputer::new(config.clone(), &mut events).unwrap();
    for sample in samples {
        computer.tick(sample);
        if computer.state().is_terminal() {
            break;
        }
    }
    let status = computer.status();
    drop(computer);
    (events, status)
}

#[test]
fn apogee_channel_fires_at_the_peak() {
    init_logger();
    let config = dual_deploy_config();
    let heights = barometric_flight();
    let peak = peak_index(&heights);
    let (events, status) = replay(&config, &baro_samples(&config, &heights, 0));

    let fired = events.pyro_tick(0).unwrap();
    assert!(
        (fired.0 as i32 - peak as i32).abs() <= 1,
        "apogee fired at {} but the peak was at {}",
        fired.0,
        peak
    );
    assert_eq!(events.transition_tick(FlightState::Drogue), Some(fired));
    assert!(events.contains(&FlightEvent::IgniterFired(Igniter::Drogue)));

    let main = events.pyro_tick(1).unwrap();
    assert!(main.0 as usize > peak);
    assert!(heights[main.0 as usize] < 251.0);

    assert_eq!(status.phase, FlightState::Landed);
    assert_eq!(status.fired, 0b11);
    assert_eq!(status.inhibited, 0);
    assert_eq!(status.motor_number, 1);
    assert_relative_eq!(status.max_height, heights[peak], epsilon = 3.0);
}

#[test]
fn fused_flight_deploys_at_the_peak() {
    init_logger();
    let config = fused_config();
    let profile = flight_profile();
    let heights = barometric_flight();
    let peak = peak_index(&heights);
    let (events, status) = replay(&config, &fused_samples(&config, &profile));

    assert_eq!(
        events.transitions(),
        [
            (FlightState::Startup, FlightState::Pad),
            (FlightState::Pad, FlightState::Boost),
            (FlightState::Boost, FlightState::Fast),
            (FlightState::Fast, FlightState::Coast),
            (FlightState::Coast, FlightState::Drogue),
            (FlightState::Drogue, FlightState::Main),
            (FlightState::Main, FlightState::Landed),
        ]
    );
    let drogue = events.transition_tick(FlightState::Drogue).unwrap();
    assert!(
        (drogue.0 as i32 - peak as i32).abs() <= 1,
        "drogue at {} but the peak was at {}",
        drogue.0,
        peak
    );
    // the accelerometer sees the motor light before the barometer moves
    let launch = events.transition_tick(FlightState::Boost).unwrap();
    assert!((launch.0 as usize) < PAD_TICKS + 20);

    assert_eq!(status.fired, 0b11);
    assert_relative_eq!(status.max_height, heights[peak], epsilon = 3.0);
    assert!(status.error_h_sq_avg < 1.0);
}

#[test]
fn apogee_lockout_holds_the_drogue() {
    let mut config = dual_deploy_config();
    config.apogee_lockout_s = 20;
    let heights = barometric_flight();
    let (events, status) = replay(&config, &baro_samples(&config, &heights, 0));

    let launch = events.transition_tick(FlightState::Boost).unwrap();
    let drogue = events.transition_tick(FlightState::Drogue).unwrap();
    assert!((drogue.0 as usize) > peak_index(&heights));
    assert_eq!(drogue.since(launch), secs_to_ticks(20) + 1);
    assert!(events.contains(&FlightEvent::IgniterFired(Igniter::Drogue)));
    assert_eq!(status.phase, FlightState::Landed);
}

#[test]
fn unusable_configs_are_refused() {
    let mut config = FlightConfig::default();
    config.apogee_lockout_s = 400;
    assert_eq!(
        FlightComputer::new(config, ()).err(),
        Some(ConfigError::ApogeeLockoutTooLong(400))
    );

    let mut config = FlightConfig::default();
    config.sensors.accelerometer = true;
    config.accel_calibration = Some(config::AccelCalibration {
        plus_g: 2000,
        minus_g: 2000,
    });
    assert_eq!(
        FlightComputer::new(config, ()).err(),
        Some(ConfigError::InvalidAccelCalibration)
    );

    let mut config = FlightConfig::default();
    config.sensors.orientation = true;
    config.apply_pyro_line("2 o< 10").unwrap();
    config.sensors.orientation = false;
    assert_eq!(
        FlightComputer::new(config, ()).err(),
        Some(ConfigError::OrientationWithoutImu(2))
    );
}

#[test]
fn phases_only_move_forward() {
    let config = dual_deploy_config();
    let heights = barometric_flight();
    let (events, _) = replay(&config, &baro_samples(&config, &heights, 0));

    assert_eq!(
        events.transitions(),
        [
            (FlightState::Startup, FlightState::Pad),
            (FlightState::Pad, FlightState::Boost),
            (FlightState::Boost, FlightState::Fast),
            (FlightState::Fast, FlightState::Coast),
            (FlightState::Coast, FlightState::Drogue),
            (FlightState::Drogue, FlightState::Main),
            (FlightState::Main, FlightState::Landed),
        ]
    );
    let ticks: Vec<u16> = events
        .iter()
        .filter_map(|event| match event {
            FlightEvent::StateChanged { tick, .. } => Some(tick.0),
            _ => None,
        })
        .collect();
    assert!(ticks.windows(2).all(|w| w[0] <= w[1]));

    // the ground stays flat for 15 s, landing needs 10 of them
    let landed = events.transition_tick(FlightState::Landed).unwrap();
    let touchdown = heights.len() - LANDED_TICKS;
    assert!((landed.0 as usize) > touchdown + 1000);
    assert!((landed.0 as usize) < heights.len());
}

#[test]
fn replay_is_deterministic() {
    let config = dual_deploy_config();
    let samples = baro_samples(&config, &barometric_flight(), 0);
    let (first, first_status) = replay(&config, &samples);
    let (second, second_status) = replay(&config, &samples);
    assert_eq!(first, second);
    assert_eq!(first_status, second_status);
}

#[test]
fn flight_across_tick_wrap() {
    let config = dual_deploy_config();
    let heights = barometric_flight();
    let (plain, _) = replay(&config, &baro_samples(&config, &heights, 0));
    // the tick counter wraps shortly before launch
    let (wrapped, status) = replay(&config, &baro_samples(&config, &heights, 64_800));

    assert_eq!(wrapped.transitions(), plain.transitions());
    assert_eq!(status.phase, FlightState::Landed);
    let offset = |tick: Tick| tick.0.wrapping_sub(64_800);
    assert_eq!(
        wrapped.pyro_tick(0).map(offset),
        plain.pyro_tick(0).map(|t| t.0)
    );
}

#[tokio::test]
async fn run_pulses_each_output_once() {
    init_logger();
    let config = dual_deploy_config();
    let heights = barometric_flight();
    let samples = baro_samples(&config, &heights, 0);

    let mut events = EventLog::default();
    let mut actuator = RecordingActuator::default();
    let mut computer = FlightComputer::new(config, &mut events).unwrap();
    let end = computer
        .run(Replay(samples.into_iter()), &mut actuator, TokioDelay)
        .await;
    assert_eq!(end, FlightState::Landed);
    drop(computer);

    for channel in [
        OutputChannel::Pyro(0),
        OutputChannel::Pyro(1),
        OutputChannel::Igniter(Igniter::Drogue),
        OutputChannel::Igniter(Igniter::Main),
    ] {
        assert_eq!(actuator.pulses(channel), 1, "{:?}", channel);
    }
    assert_eq!(actuator.pulses(OutputChannel::Pyro(2)), 0);
    // every high is followed by its low before anything else happens
    for pair in actuator.0.chunks(2) {
        assert_eq!(pair[0].0, pair[1].0);
        assert!(pair[0].1 && !pair[1].1);
    }
    assert!(events.contains(&FlightEvent::SamplingHalted));
}

#[tokio::test]
async fn run_stops_when_the_channel_closes() {
    let config = FlightConfig::default();
    let samples = baro_samples(&config, &[0.0; 20], 0);
    let channel = Channel::<NoopRawMutex, Option<SensorSample>, 32>::new();
    for sample in samples {
        channel.try_send(Some(sample)).unwrap();
    }
    channel.try_send(None).unwrap();

    let mut computer = FlightComputer::new(config, ()).unwrap();
    let end = computer
        .run(channel.receiver(), RecordingActuator::default(), TokioDelay)
        .await;
    // too few samples to calibrate
    assert_eq!(end, FlightState::Startup);
    assert!(computer.reference().is_none());
}

#[tokio::test]
async fn manual_firing_rules() {
    let config = dual_deploy_config();
    let mut computer = FlightComputer::new(config.clone(), EventLog::default()).unwrap();
    let mut actuator = RecordingActuator::default();
    let mut delay = TokioDelay;

    let mut pad = baro_samples(&config, &[0.0; 600], 0);
    pad[599].sense.main = Some(100);
    for sample in &pad {
        computer.tick(sample);
    }
    assert_eq!(computer.state(), FlightState::Pad);

    let pyro0 = OutputChannel::Pyro(0);
    assert_eq!(computer.fire_manual(pyro0, &mut actuator, &mut delay).await, Ok(()));
    assert_eq!(actuator.0, [(pyro0, true), (pyro0, false)]);
    assert_eq!(
        computer.fire_manual(pyro0, &mut actuator, &mut delay).await,
        Err(ManualFireError::AlreadyFired)
    );
    assert_eq!(
        computer
            .fire_manual(OutputChannel::Pyro(6), &mut actuator, &mut delay)
            .await,
        Err(ManualFireError::NoSuchChannel)
    );
    let main = OutputChannel::Igniter(Igniter::Main);
    assert_eq!(
        computer.fire_manual(main, &mut actuator, &mut delay).await,
        Err(ManualFireError::NotReady(IgniterStatus::Open))
    );
    assert_eq!(computer.igniter_status(main), IgniterStatus::Open);
    assert_eq!(actuator.0.len(), 2);
    assert_eq!(computer.status().fired, 0b1);

    let heights = barometric_flight();
    for sample in &baro_samples(&config, &heights[600..1000], 600) {
        computer.tick(sample);
        if computer.state() != FlightState::Pad {
            break;
        }
    }
    assert_eq!(computer.state(), FlightState::Boost);
    assert_eq!(
        computer
            .fire_manual(OutputChannel::Igniter(Igniter::Drogue), &mut actuator, &mut delay)
            .await,
        Err(ManualFireError::NotOnPad(FlightState::Boost))
    );
}

#[test]
fn calibration_failure_is_invalid() {
    let mut config = FlightConfig::default();
    config.sensors.accelerometer = true;
    config.accel_calibration = Some(config::AccelCalibration {
        plus_g: 1000,
        minus_g: 3000,
    });
    let table = PressureAltitudeTable::new(config.baro_calibration);
    let mut events = EventLog::default();
    let mut computer = FlightComputer::new(config, &mut events).unwrap();
    for tick in 0..600u16 {
        // lying flat: halfway between +1 g and -1 g, outside the tolerance
        let sample = SensorSample::new(Tick(tick))
            .with_pressure(table.counts_for_altitude(GROUND_ALTITUDE_M))
            .with_accel(3600);
        assert!(computer.tick(&sample).is_empty());
    }
    assert_eq!(computer.state(), FlightState::Invalid);
    assert_eq!(
        computer.invalid_reason(),
        Some(flight::InvalidReason::GroundAccel(3600))
    );
    drop(computer);
    assert!(matches!(events.first(), Some(FlightEvent::Calibrated { .. })));
    assert_eq!(
        events.last(),
        Some(&FlightEvent::Invalid(flight::InvalidReason::GroundAccel(3600)))
    );
}

#[test]
fn orientation_predicates_use_the_sample_tilt() {
    let mut config = dual_deploy_config();
    config.sensors.orientation = true;
    config.apply_pyro_line("2 o< 10 f>= 3").unwrap();
    config.apply_pyro_line("3 o> 20 f>= 3").unwrap();
    let imu = ImuReading {
        accel: [0, 0, 2048],
        gyro: [0; 3],
        mag: None,
    };
    let samples: Vec<SensorSample> = baro_samples(&config, &barometric_flight(), 0)
        .into_iter()
        .map(|sample| sample.with_imu(imu.clone()).with_orientation(30))
        .collect();

    let (events, status) = replay(&config, &samples);
    assert_eq!(status.fired, 0b1011);
    assert_eq!(events.pyro_tick(3), events.transition_tick(FlightState::Boost));
}

#[test]
fn sensor_errors_accumulate() {
    let mut computer = FlightComputer::new(FlightConfig::default(), ()).unwrap();
    computer.report_sensor_errors(0b010);
    computer.report_sensor_errors(0b001);
    computer.report_sensor_errors(0b010);
    assert_eq!(computer.status().sensor_errors, 0b011);
}
