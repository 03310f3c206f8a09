use embedded_hal_async::delay::DelayNs;
use heapless::Vec;
use serde::{Deserialize, Serialize};

use crate::calibrator::{CalibrationReference, SampleCalibrator};
use crate::config::{ConfigError, FlightConfig};
use crate::event::{FlightEvent, FlightEventPublisher};
use crate::flight::{FlightStateMachine, InvalidReason};
use crate::flight_state::FlightState;
use crate::hardware::{PyroActuator, SampleSource};
use crate::ignite::IgnitionController;
use crate::igniter::{ContinuityReporter, Igniter, IgniterStatus, ManualFireError, OutputChannel};
use crate::kalman::{KalmanFilter, KalmanState};
use crate::pressure::PressureAltitudeTable;
use crate::pyro::{MAX_PYRO_CHANNELS, PyroEngine, PyroInputs};
use crate::sample::SensorSample;
use crate::tick::Tick;

fn pyro_outputs(mask: u8) -> impl Iterator<Item = OutputChannel> {
    (0..MAX_PYRO_CHANNELS as u8)
        .filter(move |i| mask & (1 << i) != 0)
        .map(OutputChannel::Pyro)
}

/// Outputs that became due during one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub pyro: u8,
    pub igniters: Vec<Igniter, 2>,
}

impl TickReport {
    pub fn is_empty(&self) -> bool {
        self.pyro == 0 && self.igniters.is_empty()
    }
}

/// Telemetry snapshot.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct FlightStatus {
    pub tick: Tick,
    pub phase: FlightState,
    /// m above the pad
    pub height: f32,
    pub speed_x16: i16,
    pub accel_x16: i16,
    pub max_height: f32,
    /// m, latest barometric innovation
    pub error_h: f32,
    pub error_h_sq_avg: f32,
    pub motor_number: u8,
    pub sensor_errors: u16,
    pub fired: u8,
    pub inhibited: u8,
}

/// Owns every piece of mutable flight state. Only the sampling task holds
/// it; everyone else learns about changes through the publisher.
pub struct FlightComputer<P: FlightEventPublisher> {
    config: FlightConfig,
    calibrator: SampleCalibrator,
    filter: KalmanFilter,
    machine: FlightStateMachine,
    pyro: PyroEngine,
    ignition: IgnitionController,
    continuity: ContinuityReporter,
    publisher: P,
    sensor_errors: u16,
    tick: Tick,
}

impl<P: FlightEventPublisher> FlightComputer<P> {
    /// Fails on a config that [`FlightConfig::validate`] rejects.
    pub fn new(config: FlightConfig, publisher: P) -> Result<Self, ConfigError> {
        config.validate()?;
        let calibrator = SampleCalibrator::new(
            config.sensors,
            config.accel_calibration,
            config.pad_orientation,
            PressureAltitudeTable::new(config.baro_calibration),
        );
        Ok(Self {
            calibrator,
            filter: KalmanFilter::new(&config),
            machine: FlightStateMachine::new(&config),
            pyro: PyroEngine::new(&config.pyro_channels),
            ignition: IgnitionController::new(&config),
            continuity: ContinuityReporter::new(config.continuity),
            config,
            publisher,
            sensor_errors: 0,
            tick: Tick(0),
        })
    }

    pub fn config(&self) -> &FlightConfig {
        &self.config
    }

    pub fn state(&self) -> FlightState {
        self.machine.state()
    }

    pub fn estimate(&self) -> &KalmanState {
        self.filter.state()
    }

    pub fn reference(&self) -> Option<&CalibrationReference> {
        self.calibrator.reference()
    }

    pub fn invalid_reason(&self) -> Option<InvalidReason> {
        self.machine.invalid_reason()
    }

    pub fn pyro(&self) -> &PyroEngine {
        &self.pyro
    }

    pub fn igniter_status(&self, channel: OutputChannel) -> IgniterStatus {
        self.continuity.status(channel)
    }

    /// Sensor drivers OR their self-test failure bits in here.
    pub fn report_sensor_errors(&mut self, errors: u16) {
        if errors & !self.sensor_errors != 0 {
            log_warn!("sensor errors {:#06x}", errors);
        }
        self.sensor_errors |= errors;
    }

    pub fn status(&self) -> FlightStatus {
        let estimate = self.filter.state();
        FlightStatus {
            tick: self.tick,
            phase: self.machine.state(),
            height: estimate.height,
            speed_x16: estimate.speed_x16(),
            accel_x16: estimate.accel_x16(),
            max_height: estimate.max_height,
            error_h: estimate.error_h,
            error_h_sq_avg: estimate.error_h_sq_avg,
            motor_number: self.machine.motor_number(),
            sensor_errors: self.sensor_errors,
            fired: self.pyro.fired(),
            inhibited: self.pyro.inhibited(),
        }
    }

    /// Runs calibration, estimation, phase logic and output selection for
    /// one sample, in that order. Returned outputs are already recorded as
    /// fired; the caller only has to pulse them.
    pub fn tick(&mut self, sample: &SensorSample) -> TickReport {
        self.tick = sample.tick;
        self.continuity.observe(&sample.sense);

        match self.machine.state() {
            FlightState::Startup => {
                if self.calibrator.add_sample(sample) {
                    self.startup(sample.tick);
                }
                return TickReport::default();
            }
            FlightState::Idle | FlightState::Pad => self.calibrator.update(sample),
            _ => {}
        }

        if let Some(input) = self.calibrator.condition(sample) {
            self.filter.predict_and_correct(&input, self.machine.state());
        }
        self.machine.update(
            sample.tick,
            self.filter.state(),
            self.sensor_errors,
            &mut self.publisher,
        );

        let phase = self.machine.state();
        let mut report = TickReport::default();
        if phase < FlightState::Boost {
            return report;
        }

        report.igniters = self.ignition.check(sample.tick, phase);
        for igniter in report.igniters.iter().copied() {
            log_info!("igniter {:?} firing at tick {}", igniter, sample.tick.0);
            self.publisher.publish(FlightEvent::IgniterFired(igniter));
        }

        let estimate = self.filter.state();
        let inputs = PyroInputs {
            tick: sample.tick,
            phase,
            height: estimate.height,
            speed: estimate.speed,
            accel: estimate.accel,
            orientation: sample.orientation,
            boost_tick: self.machine.boost_tick(),
            motor_number: self.machine.motor_number(),
        };
        let inhibited = self.pyro.inhibited();
        report.pyro = self.pyro.check(&inputs);
        if report.pyro != 0 {
            log_info!("pyro {:#010b} firing at tick {}", report.pyro, sample.tick.0);
            self.publisher.publish(FlightEvent::PyroFired {
                mask: report.pyro,
                tick: sample.tick,
            });
        }
        let newly_inhibited = self.pyro.inhibited() & !inhibited;
        if newly_inhibited != 0 {
            self.publisher.publish(FlightEvent::PyroInhibited {
                mask: newly_inhibited,
            });
        }
        report
    }

    fn startup(&mut self, tick: Tick) {
        let Some(reference) = self.calibrator.reference() else {
            return;
        };
        self.publisher.publish(FlightEvent::Calibrated {
            ground_altitude: reference.ground_altitude,
        });
        self.filter.reset();
        self.machine
            .startup(tick, reference, self.sensor_errors, &mut self.publisher);
    }

    /// Pulses everything in `report`: pyro channels together, then each
    /// igniter. Blocks the caller for the pulse durations.
    pub async fn pulse(
        &mut self,
        actuator: &mut impl PyroActuator,
        delay: &mut impl DelayNs,
        report: &TickReport,
    ) {
        if report.pyro != 0 {
            for channel in pyro_outputs(report.pyro) {
                self.continuity.set_firing(channel, true);
                actuator.fire_channel(channel, true);
            }
            delay.delay_ms(self.config.pyro_fire_ms as u32).await;
            for channel in pyro_outputs(report.pyro) {
                actuator.fire_channel(channel, false);
                self.continuity.set_firing(channel, false);
            }
        }

        for igniter in report.igniters.iter().copied() {
            self.pulse_one(actuator, delay, OutputChannel::Igniter(igniter))
                .await;
        }
    }

    async fn pulse_one(
        &mut self,
        actuator: &mut impl PyroActuator,
        delay: &mut impl DelayNs,
        channel: OutputChannel,
    ) {
        let duration_ms = match channel {
            OutputChannel::Pyro(_) => self.config.pyro_fire_ms,
            OutputChannel::Igniter(_) => self.config.igniter_fire_ms,
        };
        self.continuity.set_firing(channel, true);
        actuator.fire_channel(channel, true);
        delay.delay_ms(duration_ms as u32).await;
        actuator.fire_channel(channel, false);
        self.continuity.set_firing(channel, false);
    }

    /// The sampling task. Returns the final phase once the flight is over or
    /// the source closes.
    pub async fn run(
        &mut self,
        mut source: impl SampleSource,
        mut actuator: impl PyroActuator,
        mut delay: impl DelayNs,
    ) -> FlightState {
        while let Some(sample) = source.next_sample().await {
            let report = self.tick(&sample);
            if !report.is_empty() {
                self.pulse(&mut actuator, &mut delay, &report).await;
            }
            if self.state().is_terminal() {
                break;
            }
        }
        log_info!("sampling task done in {}", self.state().name());
        self.state()
    }

    /// Operator test firing of one output. Allowed once per channel, only
    /// before launch and only with good continuity.
    pub async fn fire_manual(
        &mut self,
        channel: OutputChannel,
        actuator: &mut impl PyroActuator,
        delay: &mut impl DelayNs,
    ) -> Result<(), ManualFireError> {
        let phase = self.machine.state();
        if !phase.is_on_ground_before_launch() {
            return Err(ManualFireError::NotOnPad(phase));
        }
        if let OutputChannel::Pyro(index) = channel {
            if index as usize >= self.pyro.channel_count() {
                return Err(ManualFireError::NoSuchChannel);
            }
        }
        let status = self.continuity.status(channel);
        if status != IgniterStatus::Ready {
            return Err(ManualFireError::NotReady(status));
        }

        match channel {
            OutputChannel::Pyro(index) => self.pyro.manual_fire(index as usize)?,
            OutputChannel::Igniter(igniter) => self.ignition.manual_fire(igniter, self.tick)?,
        }
        self.pulse_one(actuator, delay, channel).await;
        Ok(())
    }
}
