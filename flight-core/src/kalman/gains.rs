use nalgebra::{Matrix2, Matrix2x3, Matrix3, Matrix3x2, RowVector3, Vector3};

use crate::config::KalmanTuning;
use crate::tick::TICKS_PER_SECOND;

const MAX_ITERATIONS: usize = 100_000;
const CONVERGED: f64 = 1e-10;

/// Sample interval class. Prediction and gain selection both use the same
/// bucket so a late or missed sample is still integrated over roughly the
/// right time step.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickBucket {
    /// one tick
    Fine = 0,
    /// ten ticks
    Medium = 1,
    /// one second
    Coarse = 2,
}

impl TickBucket {
    pub const ALL: [TickBucket; 3] = [TickBucket::Fine, TickBucket::Medium, TickBucket::Coarse];

    pub fn from_elapsed(ticks: i16) -> Self {
        if ticks > 50 {
            TickBucket::Coarse
        } else if ticks > 5 {
            TickBucket::Medium
        } else {
            TickBucket::Fine
        }
    }

    pub fn dt(self) -> f32 {
        let ticks = match self {
            TickBucket::Fine => 1.0,
            TickBucket::Medium => 10.0,
            TickBucket::Coarse => 100.0,
        };
        ticks / TICKS_PER_SECOND as f32
    }
}

/// Steady-state Kalman gains for the constant-acceleration model, one set
/// per [`TickBucket`] and sensor combination. `None` when the board lacks
/// the sensors for that combination.
#[derive(Debug, Clone)]
pub struct FilterGains {
    pub baro: Option<[Vector3<f32>; 3]>,
    pub accel: Option<[Vector3<f32>; 3]>,
    /// Columns: height error, accel error
    pub both: Option<[Matrix3x2<f32>; 3]>,
}

impl FilterGains {
    pub fn new(tuning: &KalmanTuning, has_baro: bool, has_accel: bool) -> Self {
        let baro_r = tuning.baro_sd_m as f64 * tuning.baro_sd_m as f64;
        let accel_r = tuning.accel_sd_mss as f64 * tuning.accel_sd_mss as f64;
        let baro_h = RowVector3::new(1.0, 0.0, 0.0);
        let accel_h = RowVector3::new(0.0, 0.0, 1.0);

        let baro = has_baro.then(|| single_sensor_gains(tuning, &baro_h, baro_r));
        let accel = has_accel.then(|| single_sensor_gains(tuning, &accel_h, accel_r));
        let both = (has_baro && has_accel).then(|| {
            TickBucket::ALL.map(|bucket| {
                let dt = bucket.dt() as f64;
                let h = Matrix2x3::new(1.0, 0.0, 0.0, 0.0, 0.0, 1.0);
                let r = Matrix2::new(baro_r, 0.0, 0.0, accel_r);
                steady_state_gain_2(
                    &transition(dt),
                    &process_noise(dt, tuning.jerk_sd as f64),
                    &h,
                    &r,
                )
                .cast::<f32>()
            })
        });

        Self { baro, accel, both }
    }
}

fn single_sensor_gains(
    tuning: &KalmanTuning,
    h: &RowVector3<f64>,
    r: f64,
) -> [Vector3<f32>; 3] {
    TickBucket::ALL.map(|bucket| {
        let dt = bucket.dt() as f64;
        steady_state_gain(&transition(dt), &process_noise(dt, tuning.jerk_sd as f64), h, r)
            .cast::<f32>()
    })
}

fn transition(dt: f64) -> Matrix3<f64> {
    Matrix3::new(
        1.0, dt, dt * dt / 2.0, //
        0.0, 1.0, dt, //
        0.0, 0.0, 1.0,
    )
}

/// Piecewise white jerk: jerk held constant over one step.
fn process_noise(dt: f64, jerk_sd: f64) -> Matrix3<f64> {
    let g = Vector3::new(dt * dt * dt / 6.0, dt * dt / 2.0, dt);
    g * g.transpose() * (jerk_sd * jerk_sd)
}

/// Iterates the prior covariance P⁻ to its fixed point and returns
/// K = P⁻ Hᵀ (H P⁻ Hᵀ + R)⁻¹, the gain applied to the predicted state.
fn steady_state_gain(
    f: &Matrix3<f64>,
    q: &Matrix3<f64>,
    h: &RowVector3<f64>,
    r: f64,
) -> Vector3<f64> {
    let mut p = Matrix3::identity();
    let mut k = Vector3::zeros();
    for _ in 0..MAX_ITERATIONS {
        // P₋ = F P Fᵀ + Q
        let prior = f * p * f.transpose() + q;
        let s = (h * prior * h.transpose())[(0, 0)] + r;
        let next_k = prior * h.transpose() / s;
        p = (Matrix3::identity() - next_k * h) * prior;
        p = 0.5 * (p + p.transpose());

        let delta = (next_k - k).amax();
        k = next_k;
        if delta < CONVERGED {
            break;
        }
    }
    k
}

fn steady_state_gain_2(
    f: &Matrix3<f64>,
    q: &Matrix3<f64>,
    h: &Matrix2x3<f64>,
    r: &Matrix2<f64>,
) -> Matrix3x2<f64> {
    let mut p = Matrix3::identity();
    let mut k = Matrix3x2::zeros();
    for _ in 0..MAX_ITERATIONS {
        let prior = f * p * f.transpose() + q;
        let s = h * prior * h.transpose() + r;
        let Some(s_inv) = s.try_inverse() else {
            // R is positive definite, so S can only be singular with a
            // degenerate tuning
            log_error!("kalman: singular innovation covariance");
            break;
        };
        let next_k = prior * h.transpose() * s_inv;
        p = (Matrix3::identity() - next_k * h) * prior;
        p = 0.5 * (p + p.transpose());

        let delta = (next_k - k).amax();
        k = next_k;
        if delta < CONVERGED {
            break;
        }
    }
    k
}
