// only use std when feature = "std" is enabled or during testing
#![cfg_attr(not(any(test, feature = "std")), no_std)]

mod fmt;

pub mod calibrator;
pub mod config;
pub mod event;
pub mod flight;
mod flight_computer;
mod flight_state;
pub mod hardware;
pub mod ignite;
pub mod igniter;
pub mod kalman;
pub mod pressure;
pub mod pyro;
pub mod sample;
mod tick;

#[cfg(test)]
mod tests;

pub use config::{ConfigError, FlightConfig};
pub use event::{FlightEvent, FlightEventPublisher};
pub use flight_computer::{FlightComputer, FlightStatus, TickReport};
pub use flight_state::FlightState;
pub use hardware::{PyroActuator, SampleSource};
pub use igniter::{Igniter, IgniterStatus, ManualFireError, OutputChannel};
pub use kalman::KalmanState;
pub use sample::SensorSample;
pub use tick::{TICKS_PER_SECOND, Tick, ms_to_ticks, secs_to_ticks};
