//! Persisted flight configuration.

use heapless::Vec;
use serde::{Deserialize, Serialize};

use crate::pressure::BaroCalibration;
use crate::pyro::{MAX_PYRO_CHANNELS, PyroChannel, PyroParseError, parse_pyro_line};
use crate::tick::TICKS_PER_SECOND;

/// Standard gravity, m/s²
pub const GRAVITY: f32 = 9.80665;

/// Longest apogee lockout the wrapping 16-bit tick can still measure from
/// launch.
pub const MAX_APOGEE_LOCKOUT_S: u16 = (i16::MAX as u16 - 1) / TICKS_PER_SECOND;

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    Encode,
    Decode,
    /// plus_g must read lower than minus_g
    InvalidAccelCalibration,
    /// Seconds, above [`MAX_APOGEE_LOCKOUT_S`]
    ApogeeLockoutTooLong(u16),
    ChannelOutOfRange(usize),
    /// Channel uses an orientation predicate but the board has no IMU
    OrientationWithoutImu(usize),
    Pyro(PyroParseError),
}

impl From<PyroParseError> for ConfigError {
    fn from(e: PyroParseError) -> Self {
        ConfigError::Pyro(e)
    }
}

/// Which flight sensors this board carries.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct SensorSuite {
    pub barometer: bool,
    /// Single-axis accelerometer along the airframe
    pub accelerometer: bool,
    /// IMU plus orientation tracker
    pub orientation: bool,
}

impl Default for SensorSuite {
    fn default() -> Self {
        Self {
            barometer: true,
            accelerometer: false,
            orientation: false,
        }
    }
}

/// Raw accelerometer readings with the airframe pointing up (+1 g) and
/// down (-1 g). The sensor reads lower as acceleration towards the nose
/// increases, so `plus_g < minus_g`.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct AccelCalibration {
    pub plus_g: i16,
    pub minus_g: i16,
}

impl AccelCalibration {
    pub fn two_g(&self) -> i32 {
        self.minus_g as i32 - self.plus_g as i32
    }

    /// How far from `plus_g` the ground reading may be while still
    /// considered nose up.
    pub fn nose_up_tolerance(&self) -> i32 {
        self.two_g() >> 2
    }

    /// m/s² per count
    pub fn scale(&self) -> f32 {
        2.0 * GRAVITY / self.two_g() as f32
    }

    /// Reading as if the board were mounted antenna up.
    pub fn oriented(&self, raw: i16, pad: PadOrientation) -> i16 {
        match pad {
            PadOrientation::AntennaUp => raw,
            PadOrientation::AntennaDown => {
                (self.plus_g as i32 + self.minus_g as i32 - raw as i32)
                    .clamp(i16::MIN as i32, i16::MAX as i32) as i16
            }
        }
    }
}

/// What the legacy drogue/main igniters are used for.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IgniteMode {
    /// drogue at apogee, main at the deploy altitude
    #[default]
    Dual,
    /// both at apogee, main 2 s after drogue
    Apogee,
    /// both at the deploy altitude, 2 s apart
    Main,
    /// main output separates at burnout, drogue at apogee
    Booster,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PadOrientation {
    #[default]
    AntennaUp,
    AntennaDown,
}

/// Noise model the steady-state filter gains are derived from.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct KalmanTuning {
    /// barometric height measurement noise, m
    pub baro_sd_m: f32,
    /// accelerometer measurement noise, m/s²
    pub accel_sd_mss: f32,
    /// model noise, m/s³
    pub jerk_sd: f32,
    /// above this altitude (ASL) the barometer is progressively ignored
    pub max_baro_height_m: f32,
    /// distrust at which the barometer correction is fully suppressed
    pub max_distrust: f32,
}

impl Default for KalmanTuning {
    fn default() -> Self {
        Self {
            baro_sd_m: 2.0,
            accel_sd_mss: 1.0,
            jerk_sd: 20.0,
            max_baro_height_m: 30000.0,
            max_distrust: 160.0,
        }
    }
}

/// Coast to boost detection for boards without a barometer.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct ReboostTuning {
    /// average += (accel - average) >> smoothing_shift, per tick
    pub smoothing_shift: u8,
    pub threshold_mss: f32,
}

impl Default for ReboostTuning {
    fn default() -> Self {
        Self {
            smoothing_shift: 5,
            threshold_mss: 20.0,
        }
    }
}

/// Sense-line ADC thresholds.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct ContinuityThresholds {
    /// below: open circuit
    pub open: u16,
    /// above: igniter connected
    pub closed: u16,
}

impl Default for ContinuityThresholds {
    fn default() -> Self {
        Self {
            open: 409,
            closed: 1433,
        }
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FlightConfig {
    pub sensors: SensorSuite,
    pub accel_calibration: Option<AccelCalibration>,
    pub baro_calibration: BaroCalibration,
    /// m above the pad
    pub main_deploy_m: u16,
    /// s after apogee before the drogue charge
    pub apogee_delay_s: u8,
    /// s after launch during which apogee is not detected
    pub apogee_lockout_s: u16,
    pub ignite_mode: IgniteMode,
    pub pad_orientation: PadOrientation,
    pub pyro_fire_ms: u16,
    pub igniter_fire_ms: u16,
    /// m/s, fast to coast threshold and start of barometer speed distrust
    pub max_baro_speed_ms: f32,
    pub kalman: KalmanTuning,
    pub reboost: ReboostTuning,
    pub continuity: ContinuityThresholds,
    pub pyro_channels: Vec<PyroChannel, MAX_PYRO_CHANNELS>,
}

impl Default for FlightConfig {
    fn default() -> Self {
        let mut pyro_channels = Vec::new();
        for _ in 0..4 {
            pyro_channels.push(PyroChannel::new()).ok();
        }
        Self {
            sensors: SensorSuite::default(),
            accel_calibration: None,
            baro_calibration: BaroCalibration::default(),
            main_deploy_m: 250,
            apogee_delay_s: 0,
            apogee_lockout_s: 0,
            ignite_mode: IgniteMode::Dual,
            pad_orientation: PadOrientation::AntennaUp,
            pyro_fire_ms: 50,
            igniter_fire_ms: 50,
            max_baro_speed_ms: 248.0,
            kalman: KalmanTuning::default(),
            reboost: ReboostTuning::default(),
            continuity: ContinuityThresholds::default(),
            pyro_channels,
        }
    }
}

impl FlightConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(cal) = &self.accel_calibration {
            if cal.plus_g >= cal.minus_g {
                return Err(ConfigError::InvalidAccelCalibration);
            }
        }
        if self.apogee_lockout_s > MAX_APOGEE_LOCKOUT_S {
            return Err(ConfigError::ApogeeLockoutTooLong(self.apogee_lockout_s));
        }
        if !self.sensors.orientation {
            for (i, channel) in self.pyro_channels.iter().enumerate() {
                if channel.predicates().iter().any(|p| p.needs_orientation()) {
                    return Err(ConfigError::OrientationWithoutImu(i));
                }
            }
        }
        Ok(())
    }

    pub fn to_bytes<'a>(&self, buffer: &'a mut [u8]) -> Result<&'a mut [u8], ConfigError> {
        postcard::to_slice(self, buffer).map_err(|_| ConfigError::Encode)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ConfigError> {
        let config: Self = postcard::from_bytes(bytes).map_err(|_| ConfigError::Decode)?;
        config.validate()?;
        Ok(config)
    }

    /// Replaces one pyro channel from its text form, growing the channel list
    /// when needed. Returns the channel ordinal.
    pub fn apply_pyro_line(&mut self, line: &str) -> Result<usize, ConfigError> {
        let (ordinal, channel) = match parse_pyro_line(line, self.sensors.orientation) {
            Ok(parsed) => parsed,
            Err(e) => {
                log_warn!("bad pyro line {:?}: {:?}", line, e);
                return Err(e.into());
            }
        };
        if ordinal >= MAX_PYRO_CHANNELS {
            log_warn!("pyro channel {} out of range", ordinal);
            return Err(ConfigError::ChannelOutOfRange(ordinal));
        }
        while self.pyro_channels.len() <= ordinal {
            self.pyro_channels.push(PyroChannel::new()).ok();
        }
        self.pyro_channels[ordinal] = channel;
        Ok(ordinal)
    }
}
