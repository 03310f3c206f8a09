//! Three-state (height, speed, acceleration) steady-state Kalman filter.
//!
//! Gains are computed once from [`KalmanTuning`] and picked per tick by
//! how long it has been since the previous sample.

mod gains;

use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};

use crate::config::{FlightConfig, KalmanTuning};
use crate::flight_state::FlightState;
use crate::tick::Tick;

pub use gains::{FilterGains, TickBucket};

const HEIGHT_LIMIT: f32 = 100_000.0;
/// Keeps speed and accel ×16 inside an i16
const RATE_LIMIT: f32 = 2047.0;
const AVG_HEIGHT_DIVISOR: f32 = 32.0;
const ERROR_AVG_DIVISOR: f32 = 16.0;

/// One calibrated sample, ready for the filter.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EstimatorInput {
    pub tick: Tick,
    /// m above the pad, barometric
    pub height: Option<f32>,
    /// m above sea level, barometric
    pub altitude: Option<f32>,
    /// m/s² along the airframe, gravity removed
    pub accel: Option<f32>,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct KalmanState {
    /// m above the pad
    pub height: f32,
    /// m/s
    pub speed: f32,
    /// m/s²
    pub accel: f32,
    /// low-passed height used by landing detection
    pub avg_height: f32,
    pub max_height: f32,
    /// m, barometric height minus prediction after distrust scaling, 0 on
    /// ticks without a barometric correction
    pub error_h: f32,
    /// m², low-passed square of `error_h`
    pub error_h_sq_avg: f32,
}

impl KalmanState {
    pub fn speed_x16(&self) -> i16 {
        to_x16(self.speed)
    }

    pub fn accel_x16(&self) -> i16 {
        to_x16(self.accel)
    }
}

fn to_x16(value: f32) -> i16 {
    (value * 16.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

pub struct KalmanFilter {
    gains: FilterGains,
    tuning: KalmanTuning,
    max_baro_speed: f32,
    state: KalmanState,
    last_tick: Option<Tick>,
}

impl KalmanFilter {
    pub fn new(config: &FlightConfig) -> Self {
        let has_accel = config.sensors.accelerometer && config.accel_calibration.is_some();
        Self {
            gains: FilterGains::new(&config.kalman, config.sensors.barometer, has_accel),
            tuning: config.kalman,
            max_baro_speed: config.max_baro_speed_ms,
            state: KalmanState::default(),
            last_tick: None,
        }
    }

    /// Back to rest on the pad.
    pub fn reset(&mut self) {
        self.state = KalmanState::default();
        self.last_tick = None;
    }

    pub fn state(&self) -> &KalmanState {
        &self.state
    }

    pub fn gains(&self) -> &FilterGains {
        &self.gains
    }

    /// One predict/correct cycle. Both sensors are fused while ascending
    /// (phase ≤ coast); afterwards, or when only one sensor is present, that
    /// sensor alone corrects the prediction.
    pub fn predict_and_correct(&mut self, input: &EstimatorInput, phase: FlightState) -> &KalmanState {
        let elapsed = self
            .last_tick
            .map(|last| input.tick.since(last))
            .unwrap_or(1);
        self.last_tick = Some(input.tick);
        let bucket = TickBucket::from_elapsed(elapsed);
        let dt = bucket.dt();

        let s = &self.state;
        let mut x = Vector3::new(
            s.height + s.speed * dt + s.accel * dt * dt / 2.0,
            s.speed + s.accel * dt,
            s.accel,
        );

        let ascent = phase <= FlightState::Coast;
        let baro_error = input.height.map(|height| height - x[0]);
        let accel_error = input.accel.map(|accel| accel - x[2]);
        let k = bucket as usize;
        let mut error_h = 0.0;

        if let (Some(e_h), Some(e_a), Some(both), true) =
            (baro_error, accel_error, &self.gains.both, ascent)
        {
            error_h = self.distrust(e_h, input.altitude, x[1], true);
            x += both[k] * Vector2::new(error_h, e_a);
        } else if let (Some(e_h), Some(baro)) = (baro_error, &self.gains.baro) {
            error_h = if ascent {
                self.distrust(e_h, input.altitude, x[1], false)
            } else {
                e_h
            };
            x += baro[k] * error_h;
        } else if let (Some(e_a), Some(accel)) = (accel_error, &self.gains.accel) {
            x += accel[k] * e_a;
        }

        let height = x[0].clamp(-HEIGHT_LIMIT, HEIGHT_LIMIT);
        let avg_source = match input.height {
            Some(sampled) if phase < FlightState::Boost => sampled,
            _ => height,
        };

        let state = &mut self.state;
        state.height = height;
        state.speed = x[1].clamp(-RATE_LIMIT, RATE_LIMIT);
        state.accel = x[2].clamp(-RATE_LIMIT, RATE_LIMIT);
        state.avg_height += (avg_source - state.avg_height) / AVG_HEIGHT_DIVISOR;
        state.max_height = state.max_height.max(height);
        state.error_h = error_h;
        state.error_h_sq_avg += (error_h * error_h - state.error_h_sq_avg) / ERROR_AVG_DIVISOR;
        state
    }

    /// Fades the barometric correction out above the altitude ceiling and,
    /// with an accelerometer to fall back on, above the speed ceiling.
    fn distrust(&self, error: f32, altitude: Option<f32>, speed: f32, with_accel: bool) -> f32 {
        let max = self.tuning.max_distrust;
        let mut distrust = altitude
            .map(|altitude| altitude - self.tuning.max_baro_height_m)
            .unwrap_or(0.0);
        if with_accel {
            let speed_distrust = ((speed - self.max_baro_speed) * 2.0).min(max);
            distrust = distrust.max(speed_distrust);
        }
        if distrust > 0.0 {
            let distrust = distrust.min(max);
            error * (max - distrust) / max
        } else {
            error
        }
    }
}
