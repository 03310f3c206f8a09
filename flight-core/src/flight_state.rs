use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

/// Flight phase. The numeric order is significant: phases only ever move
/// forward, except for the explicit coast -> boost re-boost edge, and the pyro
/// `f<` / `f>=` predicates compare against these values.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum FlightState {
    Startup = 0,
    Idle = 1,
    Pad = 2,
    Boost = 3,
    Fast = 4,
    Coast = 5,
    Drogue = 6,
    Main = 7,
    Landed = 8,
    Invalid = 9,
    #[cfg(debug_assertions)]
    Test = 10,
}

impl FlightState {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::Idle => "idle",
            Self::Pad => "pad",
            Self::Boost => "boost",
            Self::Fast => "fast",
            Self::Coast => "coast",
            Self::Drogue => "drogue",
            Self::Main => "main",
            Self::Landed => "landed",
            Self::Invalid => "invalid",
            #[cfg(debug_assertions)]
            Self::Test => "test",
        }
    }

    /// Once reached, nothing but a fresh flight init leaves these phases.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Landed | Self::Invalid)
    }

    /// Boost and everything after it up to (not including) landed.
    pub fn is_in_flight(self) -> bool {
        self >= Self::Boost && self < Self::Landed
    }

    pub(crate) fn is_on_ground_before_launch(self) -> bool {
        self < Self::Boost
    }
}

impl TryFrom<i32> for FlightState {
    type Error = i32;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Startup,
            1 => Self::Idle,
            2 => Self::Pad,
            3 => Self::Boost,
            4 => Self::Fast,
            5 => Self::Coast,
            6 => Self::Drogue,
            7 => Self::Main,
            8 => Self::Landed,
            9 => Self::Invalid,
            #[cfg(debug_assertions)]
            10 => Self::Test,
            other => return Err(other),
        })
    }
}

impl fmt::Display for FlightState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FlightState {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        (0..=10)
            .filter_map(|v| FlightState::try_from(v).ok())
            .find(|state| state.name() == s)
            .ok_or(())
    }
}
