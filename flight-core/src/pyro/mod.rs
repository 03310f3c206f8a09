//! Data-driven pyro channels.
//!
//! Each channel carries an ordered set of [`Predicate`]s over the flight
//! estimate and phase. A channel fires once every predicate holds at the same
//! time, optionally after a delay during which the predicates must keep
//! holding.

mod engine;
mod parse;

use bitflags::bitflags;
use heapless::Vec;
use serde::{Deserialize, Serialize};

use crate::flight_state::FlightState;

pub use engine::{PyroEngine, PyroInputs};
pub use parse::{PyroParseError, parse_pyro_line};

pub const MAX_PYRO_CHANNELS: usize = 8;
const MAX_PREDICATES: usize = 16;

bitflags! {
    /// Bit order is also the canonical evaluation and display order.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PyroFlags: u16 {
        const ACCEL_LESS = 1 << 0;
        const ACCEL_GREATER = 1 << 1;
        const SPEED_LESS = 1 << 2;
        const SPEED_GREATER = 1 << 3;
        const HEIGHT_LESS = 1 << 4;
        const HEIGHT_GREATER = 1 << 5;
        const ORIENT_LESS = 1 << 6;
        const ORIENT_GREATER = 1 << 7;
        const TIME_LESS = 1 << 8;
        const TIME_GREATER = 1 << 9;
        const STATE_LESS = 1 << 10;
        const STATE_GREATER_OR_EQUAL = 1 << 11;
        const ASCENDING = 1 << 12;
        const DESCENDING = 1 << 13;
        const AFTER_MOTOR = 1 << 14;
        const DELAY = 1 << 15;
    }
}

/// One condition of a pyro channel.
///
/// Units: accel in m/s² × 16, speed in m/s × 16, height in m above the pad,
/// orientation in degrees from vertical, time and delay in ticks since the
/// latest motor ignition.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Predicate {
    AccelLess(i32),
    AccelGreater(i32),
    SpeedLess(i32),
    SpeedGreater(i32),
    HeightLess(i32),
    HeightGreater(i32),
    OrientLess(i32),
    OrientGreater(i32),
    TimeLess(i32),
    TimeGreater(i32),
    StateLess(FlightState),
    StateGreaterOrEqual(FlightState),
    Ascending,
    Descending,
    AfterMotor(i32),
    Delay(i32),
}

impl Predicate {
    pub fn flag(&self) -> PyroFlags {
        match self {
            Self::AccelLess(_) => PyroFlags::ACCEL_LESS,
            Self::AccelGreater(_) => PyroFlags::ACCEL_GREATER,
            Self::SpeedLess(_) => PyroFlags::SPEED_LESS,
            Self::SpeedGreater(_) => PyroFlags::SPEED_GREATER,
            Self::HeightLess(_) => PyroFlags::HEIGHT_LESS,
            Self::HeightGreater(_) => PyroFlags::HEIGHT_GREATER,
            Self::OrientLess(_) => PyroFlags::ORIENT_LESS,
            Self::OrientGreater(_) => PyroFlags::ORIENT_GREATER,
            Self::TimeLess(_) => PyroFlags::TIME_LESS,
            Self::TimeGreater(_) => PyroFlags::TIME_GREATER,
            Self::StateLess(_) => PyroFlags::STATE_LESS,
            Self::StateGreaterOrEqual(_) => PyroFlags::STATE_GREATER_OR_EQUAL,
            Self::Ascending => PyroFlags::ASCENDING,
            Self::Descending => PyroFlags::DESCENDING,
            Self::AfterMotor(_) => PyroFlags::AFTER_MOTOR,
            Self::Delay(_) => PyroFlags::DELAY,
        }
    }

    pub fn value(&self) -> Option<i32> {
        match *self {
            Self::AccelLess(v)
            | Self::AccelGreater(v)
            | Self::SpeedLess(v)
            | Self::SpeedGreater(v)
            | Self::HeightLess(v)
            | Self::HeightGreater(v)
            | Self::OrientLess(v)
            | Self::OrientGreater(v)
            | Self::TimeLess(v)
            | Self::TimeGreater(v)
            | Self::AfterMotor(v)
            | Self::Delay(v) => Some(v),
            Self::StateLess(state) | Self::StateGreaterOrEqual(state) => Some(state as i32),
            Self::Ascending | Self::Descending => None,
        }
    }

    pub fn needs_orientation(&self) -> bool {
        matches!(self, Self::OrientLess(_) | Self::OrientGreater(_))
    }

    /// Whether the condition currently holds. `Delay` is not a condition on
    /// the flight and always holds; the engine handles it separately.
    pub fn holds(&self, inputs: &PyroInputs) -> bool {
        let accel = inputs.accel * 16.0;
        let speed = inputs.speed * 16.0;
        let since_boost = inputs
            .boost_tick
            .map(|boost| inputs.tick.since(boost) as i32)
            .unwrap_or(0);

        match *self {
            Self::AccelLess(v) => accel < v as f32,
            Self::AccelGreater(v) => accel > v as f32,
            Self::SpeedLess(v) => speed < v as f32,
            Self::SpeedGreater(v) => speed > v as f32,
            Self::HeightLess(v) => inputs.height < v as f32,
            Self::HeightGreater(v) => inputs.height > v as f32,
            Self::OrientLess(v) => inputs.orientation.is_some_and(|o| (o as i32) < v),
            Self::OrientGreater(v) => inputs.orientation.is_some_and(|o| (o as i32) > v),
            Self::TimeLess(v) => since_boost < v,
            Self::TimeGreater(v) => since_boost > v,
            Self::StateLess(state) => inputs.phase < state,
            Self::StateGreaterOrEqual(state) => inputs.phase >= state,
            Self::Ascending => inputs.speed > 0.0,
            Self::Descending => inputs.speed < 0.0,
            Self::AfterMotor(motor) => inputs.motor_number as i32 >= motor,
            Self::Delay(_) => true,
        }
    }
}

/// Configuration of one pyro channel. An empty predicate set means the
/// channel is disabled.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct PyroChannel {
    predicates: Vec<Predicate, MAX_PREDICATES>,
}

impl PyroChannel {
    pub const fn new() -> Self {
        Self {
            predicates: Vec::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.predicates.is_empty()
    }

    pub fn flags(&self) -> PyroFlags {
        self.predicates
            .iter()
            .fold(PyroFlags::empty(), |flags, p| flags | p.flag())
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn delay(&self) -> Option<i32> {
        self.predicates.iter().find_map(|p| match p {
            Predicate::Delay(ticks) => Some(*ticks),
            _ => None,
        })
    }

    /// Adds the predicate, replacing any predicate of the same kind.
    pub fn set(&mut self, predicate: Predicate) -> &mut Self {
        let flag = predicate.flag();
        if let Some(existing) = self.predicates.iter_mut().find(|p| p.flag() == flag) {
            *existing = predicate;
            return self;
        }
        let at = self
            .predicates
            .iter()
            .position(|p| p.flag().bits() > flag.bits())
            .unwrap_or(self.predicates.len());
        // one slot per flag bit, so this can't overflow
        self.predicates.insert(at, predicate).ok();
        self
    }

    pub fn remove(&mut self, flag: PyroFlags) -> &mut Self {
        self.predicates.retain(|p| p.flag() != flag);
        self
    }

    /// Adds the predicate if its kind is absent, removes it otherwise.
    pub fn toggle(&mut self, predicate: Predicate) -> &mut Self {
        if self.flags().contains(predicate.flag()) {
            self.remove(predicate.flag())
        } else {
            self.set(predicate)
        }
    }

    /// All predicates hold (AND), evaluated in flag order.
    pub fn conditions_hold(&self, inputs: &PyroInputs) -> bool {
        self.predicates.iter().all(|p| p.holds(inputs))
    }
}
