use icao_isa::calculate_isa_altitude;
use icao_units::si::Pascals;
use serde::{Deserialize, Serialize};

const TABLE_LEN: usize = 129;
const TABLE_STEP_PA: f32 = 1024.0;
/// Below this the standard atmosphere is no longer a useful model for a
/// barometer, the table flattens out instead.
const TABLE_MIN_PA: f32 = 1024.0;

/// Linear conversion from barometer device counts to Pa.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct BaroCalibration {
    pub pa_per_count: f32,
    pub offset_pa: f32,
}

impl Default for BaroCalibration {
    fn default() -> Self {
        Self {
            pa_per_count: 1.0,
            offset_pa: 0.0,
        }
    }
}

impl BaroCalibration {
    pub fn to_pa(&self, counts: u32) -> f32 {
        counts as f32 * self.pa_per_count + self.offset_pa
    }

    pub fn to_counts(&self, pa: f32) -> u32 {
        let counts = libm::roundf((pa - self.offset_pa) / self.pa_per_count);
        if counts <= 0.0 { 0 } else { counts as u32 }
    }
}

/// Pressure to altitude (m above sea level) lookup, one entry every
/// `TABLE_STEP_PA` from 0 Pa, generated once from the standard atmosphere and
/// linearly interpolated between entries.
#[derive(Debug, Clone)]
pub struct PressureAltitudeTable {
    calibration: BaroCalibration,
    altitudes: [f32; TABLE_LEN],
}

impl PressureAltitudeTable {
    pub fn new(calibration: BaroCalibration) -> Self {
        let altitudes = core::array::from_fn(|i| {
            let pa = (i as f32 * TABLE_STEP_PA).max(TABLE_MIN_PA);
            calculate_isa_altitude(Pascals(pa as f64)).0 as f32
        });
        Self {
            calibration,
            altitudes,
        }
    }

    pub fn calibration(&self) -> &BaroCalibration {
        &self.calibration
    }

    pub fn altitude_for_pa(&self, pa: f32) -> f32 {
        let max_pa = TABLE_STEP_PA * (TABLE_LEN - 1) as f32;
        let pa = pa.clamp(0.0, max_pa);
        let index = ((pa / TABLE_STEP_PA) as usize).min(TABLE_LEN - 2);
        let frac = (pa - index as f32 * TABLE_STEP_PA) / TABLE_STEP_PA;
        self.altitudes[index] + (self.altitudes[index + 1] - self.altitudes[index]) * frac
    }

    /// Altitude above sea level for a raw barometer reading.
    pub fn altitude(&self, counts: u32) -> f32 {
        self.altitude_for_pa(self.calibration.to_pa(counts))
    }

    /// Inverse of [`Self::altitude_for_pa`] over the interpolated table.
    pub fn pressure_for_altitude(&self, altitude: f32) -> f32 {
        // altitudes decrease with index
        let mut index = TABLE_LEN - 2;
        for i in 1..TABLE_LEN - 1 {
            if altitude >= self.altitudes[i + 1] {
                index = i;
                break;
            }
        }
        let high = self.altitudes[index];
        let low = self.altitudes[index + 1];
        let frac = ((high - altitude) / (high - low)).clamp(0.0, 1.0);
        (index as f32 + frac) * TABLE_STEP_PA
    }

    /// Barometer reading that the table maps back to `altitude`.
    pub fn counts_for_altitude(&self, altitude: f32) -> u32 {
        self.calibration.to_counts(self.pressure_for_altitude(altitude))
    }
}
