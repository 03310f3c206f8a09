//! Flight phase state machine.

mod landing;

use serde::{Deserialize, Serialize};

use crate::calibrator::CalibrationReference;
use crate::config::{AccelCalibration, FlightConfig, GRAVITY, ReboostTuning, SensorSuite};
use crate::event::{FlightEvent, FlightEventPublisher, TelemetryRate};
use crate::flight_state::FlightState;
use crate::kalman::KalmanState;
use crate::tick::{Tick, secs_to_ticks};

pub use landing::LandingDetector;

const GROUND_HEIGHT_MIN_M: f32 = -1000.0;
const GROUND_HEIGHT_MAX_M: f32 = 7000.0;
const LAUNCH_HEIGHT_M: f32 = 20.0;
const LAUNCH_ACCEL_MSS: f32 = 2.0 * GRAVITY;
const LAUNCH_SPEED_MS: f32 = 5.0;
const BURNOUT_ACCEL_MSS: f32 = -2.5;
const BOOST_MAX_TICKS: i16 = secs_to_ticks(15);

/// Why the flight computer refused to arm.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    MissingAccelCalibration,
    /// Ground accelerometer reading, outside ±1.5 g of the calibration
    GroundAccel(i16),
    /// Ground altitude in m
    GroundHeight(i32),
    /// Aggregated sensor self-test bits
    SensorErrors(u16),
}

pub struct FlightStateMachine {
    state: FlightState,
    sensors: SensorSuite,
    accel_calibration: Option<AccelCalibration>,
    main_deploy_m: f32,
    apogee_lockout: i16,
    max_baro_speed: f32,
    reboost: ReboostTuning,
    launch_tick: Option<Tick>,
    boost_tick: Option<Tick>,
    motor_number: u8,
    coast_avg_accel: f32,
    landing: LandingDetector,
    invalid_reason: Option<InvalidReason>,
}

impl FlightStateMachine {
    pub fn new(config: &FlightConfig) -> Self {
        Self {
            state: FlightState::Startup,
            sensors: config.sensors,
            accel_calibration: config.accel_calibration,
            main_deploy_m: config.main_deploy_m as f32,
            apogee_lockout: secs_to_ticks(config.apogee_lockout_s),
            max_baro_speed: config.max_baro_speed_ms,
            reboost: config.reboost,
            launch_tick: None,
            boost_tick: None,
            motor_number: 0,
            coast_avg_accel: 0.0,
            landing: LandingDetector::new(),
            invalid_reason: None,
        }
    }

    pub fn state(&self) -> FlightState {
        self.state
    }

    /// First entry into boost.
    pub fn launch_tick(&self) -> Option<Tick> {
        self.launch_tick
    }

    /// Latest entry into boost.
    pub fn boost_tick(&self) -> Option<Tick> {
        self.boost_tick
    }

    pub fn motor_number(&self) -> u8 {
        self.motor_number
    }

    pub fn invalid_reason(&self) -> Option<InvalidReason> {
        self.invalid_reason
    }

    fn has_accel(&self) -> bool {
        self.sensors.accelerometer
    }

    /// Decides the first real phase once the ground reference exists.
    pub fn startup<P: FlightEventPublisher>(
        &mut self,
        tick: Tick,
        reference: &CalibrationReference,
        sensor_errors: u16,
        publisher: &mut P,
    ) -> FlightState {
        if self.state != FlightState::Startup {
            return self.state;
        }

        let mut nose_up = true;
        if self.has_accel() {
            let Some(cal) = self.accel_calibration else {
                return self.invalidate(tick, InvalidReason::MissingAccelCalibration, publisher);
            };
            let ground = reference.ground_accel.unwrap_or(0) as i32;
            let tolerance = cal.nose_up_tolerance();
            if ground < cal.plus_g as i32 - tolerance || ground > cal.minus_g as i32 + tolerance {
                return self.invalidate(tick, InvalidReason::GroundAccel(ground as i16), publisher);
            }
            nose_up = ground < cal.plus_g as i32 + tolerance;
        }
        if self.sensors.barometer
            && !(GROUND_HEIGHT_MIN_M..=GROUND_HEIGHT_MAX_M).contains(&reference.ground_altitude)
        {
            return self.invalidate(
                tick,
                InvalidReason::GroundHeight(reference.ground_altitude as i32),
                publisher,
            );
        }

        if nose_up {
            self.transition(FlightState::Pad, tick, publisher);
        } else {
            self.transition(FlightState::Idle, tick, publisher);
            if sensor_errors != 0 {
                self.invalidate(tick, InvalidReason::SensorErrors(sensor_errors), publisher);
            }
        }
        self.state
    }

    /// Evaluates the transition table for one tick. Returns the new phase
    /// when it changed.
    pub fn update<P: FlightEventPublisher>(
        &mut self,
        tick: Tick,
        estimate: &KalmanState,
        sensor_errors: u16,
        publisher: &mut P,
    ) -> Option<FlightState> {
        let from = self.state;
        match self.state {
            FlightState::Startup => {}
            FlightState::Pad => {
                if self.launch_detected(estimate) {
                    self.enter_boost(tick, publisher);
                }
            }
            FlightState::Idle => {
                if sensor_errors != 0 {
                    self.invalidate(tick, InvalidReason::SensorErrors(sensor_errors), publisher);
                }
            }
            FlightState::Boost => {
                let burning_too_long = self
                    .boost_tick
                    .is_some_and(|boost| tick.since(boost) > BOOST_MAX_TICKS);
                if estimate.accel < BURNOUT_ACCEL_MSS || burning_too_long {
                    if self.sensors.barometer {
                        self.transition(FlightState::Fast, tick, publisher);
                        publisher.publish(FlightEvent::TelemetryRate(TelemetryRate::Flight));
                        publisher.publish(FlightEvent::RdfBeacon(false));
                    } else {
                        self.enter_coast(tick, estimate, publisher);
                    }
                }
            }
            FlightState::Fast => {
                if estimate.speed < self.max_baro_speed {
                    self.enter_coast(tick, estimate, publisher);
                }
            }
            FlightState::Coast => {
                let locked_out = self.apogee_lockout > 0
                    && self
                        .launch_tick
                        .is_some_and(|launch| tick.since(launch) <= self.apogee_lockout);
                if estimate.speed < 0.0 && !locked_out {
                    self.landing.reset();
                    self.transition(FlightState::Drogue, tick, publisher);
                    publisher.publish(FlightEvent::TelemetryRate(TelemetryRate::Recovery));
                    publisher.publish(FlightEvent::RdfBeacon(true));
                    publisher.publish(FlightEvent::Apogee {
                        height: estimate.max_height,
                    });
                } else if !self.sensors.barometer && self.reboost_detected(estimate) {
                    log_info!("re-boost, motor {}", self.motor_number + 1);
                    self.enter_boost(tick, publisher);
                }
            }
            FlightState::Drogue | FlightState::Main => {
                if self.landing.update(tick, estimate.avg_height) {
                    self.transition(FlightState::Landed, tick, publisher);
                    publisher.publish(FlightEvent::SamplingHalted);
                } else if self.state == FlightState::Drogue
                    && estimate.height <= self.main_deploy_m
                {
                    self.transition(FlightState::Main, tick, publisher);
                }
            }
            FlightState::Landed | FlightState::Invalid => {}
            #[cfg(debug_assertions)]
            FlightState::Test => {}
        }

        (self.state != from).then_some(self.state)
    }

    fn launch_detected(&self, estimate: &KalmanState) -> bool {
        (self.sensors.barometer && estimate.height > LAUNCH_HEIGHT_M)
            || (self.has_accel()
                && estimate.accel > LAUNCH_ACCEL_MSS
                && estimate.speed > LAUNCH_SPEED_MS)
    }

    fn reboost_detected(&mut self, estimate: &KalmanState) -> bool {
        let divisor = (1u32 << self.reboost.smoothing_shift.min(16)) as f32;
        self.coast_avg_accel += (estimate.accel - self.coast_avg_accel) / divisor;
        self.coast_avg_accel > self.reboost.threshold_mss
    }

    fn enter_boost<P: FlightEventPublisher>(&mut self, tick: Tick, publisher: &mut P) {
        let first = self.launch_tick.is_none();
        if first {
            self.launch_tick = Some(tick);
        }
        self.boost_tick = Some(tick);
        self.motor_number = self.motor_number.saturating_add(1);

        self.transition(FlightState::Boost, tick, publisher);
        if first {
            publisher.publish(FlightEvent::LoggingStarted);
        }
        publisher.publish(FlightEvent::TelemetryRate(TelemetryRate::Flight));
        publisher.publish(FlightEvent::RdfBeacon(false));
        publisher.publish(FlightEvent::MotorIgnition {
            motor: self.motor_number,
        });
    }

    fn enter_coast<P: FlightEventPublisher>(
        &mut self,
        tick: Tick,
        estimate: &KalmanState,
        publisher: &mut P,
    ) {
        self.coast_avg_accel = estimate.accel;
        self.transition(FlightState::Coast, tick, publisher);
    }

    fn invalidate<P: FlightEventPublisher>(
        &mut self,
        tick: Tick,
        reason: InvalidReason,
        publisher: &mut P,
    ) -> FlightState {
        log_error!("flight invalid: {:?}", reason);
        self.invalid_reason = Some(reason);
        self.transition(FlightState::Invalid, tick, publisher);
        publisher.publish(FlightEvent::Invalid(reason));
        self.state
    }

    fn transition<P: FlightEventPublisher>(&mut self, to: FlightState, tick: Tick, publisher: &mut P) {
        let from = self.state;
        let reboost = from == FlightState::Coast && to == FlightState::Boost;
        if to <= from && !reboost {
            log_panic!("illegal flight state transition {:?} -> {:?}", from, to);
        }
        log_info!("flight state {} -> {} at tick {}", from.name(), to.name(), tick.0);
        self.state = to;
        publisher.publish(FlightEvent::StateChanged { from, to, tick });
    }
}
