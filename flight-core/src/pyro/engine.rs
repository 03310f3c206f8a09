use heapless::Vec;

use super::{MAX_PYRO_CHANNELS, PyroChannel};
use crate::flight_state::FlightState;
use crate::igniter::ManualFireError;
use crate::tick::Tick;

/// Snapshot of everything a predicate can look at for one tick.
#[derive(Debug, Clone, Copy)]
pub struct PyroInputs {
    pub tick: Tick,
    pub phase: FlightState,
    /// m above the pad
    pub height: f32,
    /// m/s
    pub speed: f32,
    /// m/s²
    pub accel: f32,
    pub orientation: Option<i16>,
    /// Latest motor ignition
    pub boost_tick: Option<Tick>,
    pub motor_number: u8,
}

pub struct PyroEngine {
    channels: Vec<PyroChannel, MAX_PYRO_CHANNELS>,
    delay_deadlines: [Option<Tick>; MAX_PYRO_CHANNELS],
    fired: u8,
    inhibited: u8,
    finished: bool,
}

impl PyroEngine {
    pub fn new(channels: &[PyroChannel]) -> Self {
        let mut owned = Vec::new();
        for channel in channels.iter().take(MAX_PYRO_CHANNELS) {
            owned.push(channel.clone()).ok();
        }
        Self {
            channels: owned,
            delay_deadlines: [None; MAX_PYRO_CHANNELS],
            fired: 0,
            inhibited: 0,
            finished: false,
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn channel(&self, index: usize) -> Option<&PyroChannel> {
        self.channels.get(index)
    }

    pub fn fired(&self) -> u8 {
        self.fired
    }

    pub fn inhibited(&self) -> u8 {
        self.inhibited
    }

    pub fn delay_deadline(&self, index: usize) -> Option<Tick> {
        self.delay_deadlines.get(index).copied().flatten()
    }

    /// No channel can fire any more this flight.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Evaluates every waiting channel and returns the mask of channels due
    /// to fire this tick. The returned channels are already recorded as fired,
    /// before any output is pulsed.
    pub fn check(&mut self, inputs: &PyroInputs) -> u8 {
        if self.finished {
            return 0;
        }
        if inputs.phase >= FlightState::Landed {
            log_info!("pyro: flight over, {} channels never fired", self.waiting_count());
            self.finished = true;
            return 0;
        }

        let mut fire = 0u8;
        let mut any_waiting = false;

        for (index, channel) in self.channels.iter().enumerate() {
            let bit = 1u8 << index;
            if (self.fired | self.inhibited) & bit != 0 || !channel.is_enabled() {
                continue;
            }
            any_waiting = true;

            let deadline = match self.delay_deadlines[index] {
                Some(deadline) => {
                    if !channel.conditions_hold(inputs) {
                        log_warn!("pyro {}: conditions lapsed during delay, inhibited", index);
                        self.inhibited |= bit;
                        continue;
                    }
                    deadline
                }
                None => {
                    if !channel.conditions_hold(inputs) {
                        continue;
                    }
                    match channel.delay() {
                        Some(delay) => {
                            let delay = delay.clamp(0, i16::MAX as i32) as i16;
                            let deadline = inputs.tick.offset(delay);
                            log_debug!("pyro {}: armed, firing at tick {}", index, deadline.0);
                            self.delay_deadlines[index] = Some(deadline);
                            deadline
                        }
                        None => inputs.tick,
                    }
                }
            };

            if inputs.tick.has_reached(deadline) {
                fire |= bit;
            }
        }

        if fire != 0 {
            self.mark_fired(fire);
        }
        if !any_waiting {
            log_debug!("pyro: no channel left waiting");
            self.finished = true;
        }
        fire
    }

    /// Records channels as fired. Firing a channel twice means the at-most-once
    /// guarantee is already broken, so this halts.
    pub(crate) fn mark_fired(&mut self, mask: u8) {
        if self.fired & mask != 0 {
            log_panic!(
                "pyro channels {:#010b} fired twice (already fired {:#010b})",
                mask,
                self.fired
            );
        }
        self.fired |= mask;
    }

    /// Operator test firing. Phase and continuity are checked by the caller;
    /// this only enforces that a channel fires once.
    pub fn manual_fire(&mut self, index: usize) -> Result<(), ManualFireError> {
        if index >= self.channels.len() {
            return Err(ManualFireError::NoSuchChannel);
        }
        let bit = 1u8 << index;
        if (self.fired | self.inhibited) & bit != 0 {
            return Err(ManualFireError::AlreadyFired);
        }
        log_info!("pyro {}: manual fire", index);
        self.fired |= bit;
        Ok(())
    }

    fn waiting_count(&self) -> u32 {
        let enabled = self
            .channels
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_enabled())
            .fold(0u8, |mask, (i, _)| mask | 1 << i);
        (enabled & !(self.fired | self.inhibited)).count_ones()
    }
}
