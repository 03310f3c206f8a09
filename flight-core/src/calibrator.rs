use nalgebra::{UnitQuaternion, Vector3};

use crate::config::{AccelCalibration, PadOrientation, SensorSuite};
use crate::kalman::EstimatorInput;
use crate::pressure::PressureAltitudeTable;
use crate::sample::SensorSample;

/// Samples averaged for one ground reference.
pub const CALIBRATION_SAMPLES: u32 = 512;
const CALIBRATION_SHIFT: u32 = 9;
const _: () = assert!(1 << CALIBRATION_SHIFT == CALIBRATION_SAMPLES);

const UP: Vector3<f32> = Vector3::new(0.0, 0.0, 1.0);

/// Sensor baseline captured while the vehicle sits still on the pad.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationReference {
    /// barometer counts
    pub ground_pressure: u32,
    /// m above sea level
    pub ground_altitude: f32,
    /// single-axis accelerometer counts, antenna-up equivalent
    pub ground_accel: Option<i16>,
    /// IMU accelerometer counts
    pub ground_imu_accel: Option<[i16; 3]>,
    /// IMU gyro counts at rest
    pub gyro_bias: Option<[i16; 3]>,
    /// Rotates the pad "up" vector onto the measured gravity vector.
    pub orientation: UnitQuaternion<f32>,
}

impl CalibrationReference {
    /// Tilt of the airframe from vertical on the pad, degrees.
    pub fn pad_tilt_degrees(&self) -> f32 {
        self.orientation.angle().to_degrees()
    }
}

#[derive(Debug, Clone, Default)]
struct Accumulator {
    count: u32,
    pressure: u64,
    accel: i64,
    imu_accel: [i64; 3],
    gyro: [i64; 3],
}

impl Accumulator {
    fn add(&mut self, sample: &SensorSample, accel: Option<i16>) {
        self.count += 1;
        if let Some(pressure) = sample.pressure {
            self.pressure += pressure as u64;
        }
        if let Some(accel) = accel {
            self.accel += accel as i64;
        }
        if let Some(imu) = &sample.imu {
            for axis in 0..3 {
                self.imu_accel[axis] += imu.accel[axis] as i64;
                self.gyro[axis] += imu.gyro[axis] as i64;
            }
        }
    }
}

/// Averages quiescent samples into a [`CalibrationReference`] and keeps it
/// tracking slow drift while the vehicle waits on the pad.
pub struct SampleCalibrator {
    sensors: SensorSuite,
    accel_calibration: Option<AccelCalibration>,
    pad_orientation: PadOrientation,
    table: PressureAltitudeTable,
    accumulator: Accumulator,
    /// Rolling update position, 0..=2 * CALIBRATION_SAMPLES
    rolling: u32,
    reference: Option<CalibrationReference>,
}

impl SampleCalibrator {
    pub fn new(
        sensors: SensorSuite,
        accel_calibration: Option<AccelCalibration>,
        pad_orientation: PadOrientation,
        table: PressureAltitudeTable,
    ) -> Self {
        Self {
            sensors,
            accel_calibration,
            pad_orientation,
            table,
            accumulator: Accumulator::default(),
            rolling: 0,
            reference: None,
        }
    }

    /// Drops any previous reference and starts a fresh preflight average.
    pub fn begin(&mut self) {
        self.accumulator = Accumulator::default();
        self.rolling = 0;
        self.reference = None;
    }

    pub fn is_valid(&self) -> bool {
        self.reference.is_some()
    }

    pub fn reference(&self) -> Option<&CalibrationReference> {
        self.reference.as_ref()
    }

    pub fn table(&self) -> &PressureAltitudeTable {
        &self.table
    }

    /// Adds one preflight sample. Returns true on the sample that completes
    /// the first reference. Samples missing a configured sensor are skipped.
    pub fn add_sample(&mut self, sample: &SensorSample) -> bool {
        if self.reference.is_some() {
            return false;
        }
        if !self.is_complete(sample) {
            log_debug!("calibration: skipping incomplete sample at tick {}", sample.tick.0);
            return false;
        }

        self.accumulator.add(sample, self.oriented_accel(sample));
        if self.accumulator.count < CALIBRATION_SAMPLES {
            return false;
        }

        let reference = self.compute_reference();
        log_info!(
            "calibrated: ground pressure {} ground altitude {}m ground accel {:?}",
            reference.ground_pressure,
            reference.ground_altitude,
            reference.ground_accel,
        );
        self.reference = Some(reference);
        self.accumulator = Accumulator::default();
        self.rolling = 0;
        true
    }

    /// Rolling re-average while on the pad: accumulate 512 samples, let the
    /// next 512 pass, then replace the reference and start over. Callers must
    /// stop calling this once the vehicle leaves pad/idle.
    pub fn update(&mut self, sample: &SensorSample) {
        if self.reference.is_none() || !self.is_complete(sample) {
            return;
        }

        if self.rolling < CALIBRATION_SAMPLES {
            self.accumulator.add(sample, self.oriented_accel(sample));
            self.rolling += 1;
        } else if self.rolling < 2 * CALIBRATION_SAMPLES {
            self.rolling += 1;
        } else {
            let reference = self.compute_reference();
            log_debug!(
                "ground reference refreshed: pressure {} altitude {}m",
                reference.ground_pressure,
                reference.ground_altitude
            );
            self.reference = Some(reference);
            self.accumulator = Accumulator::default();
            self.rolling = 0;
        }
    }

    /// Converts a raw sample into estimator units relative to the ground
    /// reference. `None` until calibrated.
    pub fn condition(&self, sample: &SensorSample) -> Option<EstimatorInput> {
        let reference = self.reference.as_ref()?;

        let altitude = sample
            .pressure
            .filter(|_| self.sensors.barometer)
            .map(|counts| self.table.altitude(counts));
        let accel = match (self.oriented_accel(sample), reference.ground_accel, &self.accel_calibration) {
            (Some(raw), Some(ground), Some(cal)) => Some((ground as i32 - raw as i32) as f32 * cal.scale()),
            _ => None,
        };

        Some(EstimatorInput {
            tick: sample.tick,
            height: altitude.map(|a| a - reference.ground_altitude),
            altitude,
            accel,
        })
    }

    fn is_complete(&self, sample: &SensorSample) -> bool {
        (!self.sensors.barometer || sample.pressure.is_some())
            && (!self.sensors.accelerometer || sample.accel.is_some())
            && (!self.sensors.orientation || sample.imu.is_some())
    }

    fn oriented_accel(&self, sample: &SensorSample) -> Option<i16> {
        if !self.sensors.accelerometer {
            return None;
        }
        let raw = sample.accel?;
        Some(match &self.accel_calibration {
            Some(cal) => cal.oriented(raw, self.pad_orientation),
            None => raw,
        })
    }

    fn compute_reference(&self) -> CalibrationReference {
        let acc = &self.accumulator;
        let ground_pressure = (acc.pressure >> CALIBRATION_SHIFT) as u32;
        let ground_altitude = if self.sensors.barometer {
            self.table.altitude(ground_pressure)
        } else {
            0.0
        };
        let ground_accel = self
            .sensors
            .accelerometer
            .then(|| (acc.accel >> CALIBRATION_SHIFT) as i16);

        let (ground_imu_accel, gyro_bias, orientation) = if self.sensors.orientation {
            let imu_accel = acc.imu_accel.map(|sum| (sum >> CALIBRATION_SHIFT) as i16);
            let gyro = acc.gyro.map(|sum| (sum >> CALIBRATION_SHIFT) as i16);
            let gravity = Vector3::new(imu_accel[0] as f32, imu_accel[1] as f32, imu_accel[2] as f32);
            let up = match self.pad_orientation {
                PadOrientation::AntennaUp => UP,
                PadOrientation::AntennaDown => -UP,
            };
            let orientation = UnitQuaternion::rotation_between(&up, &gravity).unwrap_or_else(|| {
                // gravity exactly opposite to up
                UnitQuaternion::from_axis_angle(&Vector3::x_axis(), core::f32::consts::PI)
            });
            (Some(imu_accel), Some(gyro), orientation)
        } else {
            (None, None, UnitQuaternion::identity())
        };

        CalibrationReference {
            ground_pressure,
            ground_altitude,
            ground_accel,
            ground_imu_accel,
            gyro_bias,
            orientation,
        }
    }
}
