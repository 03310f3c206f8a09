use heapless::Vec;
use serde::{Deserialize, Serialize};

use crate::pyro::MAX_PYRO_CHANNELS;
use crate::tick::Tick;

/// Raw readings of a 3-axis IMU, in device units.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ImuReading {
    pub accel: [i16; 3],
    pub gyro: [i16; 3],
    pub mag: Option<[i16; 3]>,
}

/// Igniter sense-line ADC readings taken alongside the flight sensors.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct SenseReadings {
    pub drogue: Option<u16>,
    pub main: Option<u16>,
    pub pyro: Vec<u16, MAX_PYRO_CHANNELS>,
}

/// One tick worth of sensor data as delivered by the driver layer.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SensorSample {
    pub tick: Tick,
    /// Barometer, device counts (see `BaroCalibration`)
    pub pressure: Option<u32>,
    /// centi-degrees C
    pub temperature: Option<i16>,
    /// Single-axis (along the airframe) accelerometer, device counts
    pub accel: Option<i16>,
    pub imu: Option<ImuReading>,
    /// Tilt from vertical in degrees, produced by an external orientation tracker
    pub orientation: Option<i16>,
    pub sense: SenseReadings,
}

impl SensorSample {
    pub fn new(tick: Tick) -> Self {
        Self {
            tick,
            pressure: None,
            temperature: None,
            accel: None,
            imu: None,
            orientation: None,
            sense: SenseReadings::default(),
        }
    }

    pub fn with_pressure(mut self, pressure: u32) -> Self {
        self.pressure = Some(pressure);
        self
    }

    pub fn with_accel(mut self, accel: i16) -> Self {
        self.accel = Some(accel);
        self
    }

    pub fn with_imu(mut self, imu: ImuReading) -> Self {
        self.imu = Some(imu);
        self
    }

    pub fn with_orientation(mut self, degrees: i16) -> Self {
        self.orientation = Some(degrees);
        self
    }

    pub fn with_sense(mut self, sense: SenseReadings) -> Self {
        self.sense = sense;
        self
    }
}
