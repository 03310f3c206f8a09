use core::fmt;

use serde::{Deserialize, Serialize};

use crate::config::ContinuityThresholds;
use crate::flight_state::FlightState;
use crate::pyro::MAX_PYRO_CHANNELS;
use crate::sample::SenseReadings;

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgniterStatus {
    Unknown,
    Ready,
    Active,
    Open,
}

impl IgniterStatus {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Ready => "ready",
            Self::Active => "active",
            Self::Open => "open",
        }
    }
}

impl fmt::Display for IgniterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Why an operator test firing was refused.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManualFireError {
    /// Only allowed before launch
    NotOnPad(FlightState),
    NotReady(IgniterStatus),
    AlreadyFired,
    NoSuchChannel,
}

/// The two fixed recovery outputs.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Igniter {
    Drogue,
    Main,
}

/// A physical output the actuator driver can pulse.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputChannel {
    Igniter(Igniter),
    /// Index into the configured pyro channels
    Pyro(u8),
}

impl OutputChannel {
    fn bit(self) -> Option<u16> {
        match self {
            Self::Pyro(index) if (index as usize) < MAX_PYRO_CHANNELS => Some(1 << index),
            Self::Pyro(_) => None,
            Self::Igniter(Igniter::Drogue) => Some(1 << MAX_PYRO_CHANNELS),
            Self::Igniter(Igniter::Main) => Some(1 << (MAX_PYRO_CHANNELS + 1)),
        }
    }
}

/// Latest sense-line readings plus which outputs are mid-pulse.
pub struct ContinuityReporter {
    thresholds: ContinuityThresholds,
    sense: SenseReadings,
    firing: u16,
}

impl ContinuityReporter {
    pub fn new(thresholds: ContinuityThresholds) -> Self {
        Self {
            thresholds,
            sense: SenseReadings::default(),
            firing: 0,
        }
    }

    pub fn observe(&mut self, sense: &SenseReadings) {
        self.sense.clone_from(sense);
    }

    pub fn set_firing(&mut self, channel: OutputChannel, firing: bool) {
        if let Some(bit) = channel.bit() {
            if firing {
                self.firing |= bit;
            } else {
                self.firing &= !bit;
            }
        }
    }

    pub fn status(&self, channel: OutputChannel) -> IgniterStatus {
        if channel.bit().is_some_and(|bit| self.firing & bit != 0) {
            return IgniterStatus::Active;
        }
        let reading = match channel {
            OutputChannel::Igniter(Igniter::Drogue) => self.sense.drogue,
            OutputChannel::Igniter(Igniter::Main) => self.sense.main,
            OutputChannel::Pyro(index) => self.sense.pyro.get(index as usize).copied(),
        };
        match reading {
            None => IgniterStatus::Unknown,
            Some(adc) if adc < self.thresholds.open => IgniterStatus::Open,
            Some(adc) if adc > self.thresholds.closed => IgniterStatus::Ready,
            Some(_) => IgniterStatus::Unknown,
        }
    }
}
