//! Legacy drogue/main igniters, driven by the configured ignite mode
//! instead of pyro predicates.

use heapless::Vec;

use crate::config::{FlightConfig, IgniteMode};
use crate::flight_state::FlightState;
use crate::igniter::{Igniter, ManualFireError};
use crate::tick::{Tick, secs_to_ticks};

/// Gap between the two charges when both fire on the same event.
const CHARGE_SPACING: i16 = secs_to_ticks(2);

#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    deadline: Option<Tick>,
    fired: Option<Tick>,
}

impl Slot {
    fn arm(&mut self, deadline: Tick) {
        if self.deadline.is_none() && self.fired.is_none() {
            self.deadline = Some(deadline);
        }
    }

    fn due(&self, now: Tick) -> bool {
        self.fired.is_none() && self.deadline.is_some_and(|deadline| now.has_reached(deadline))
    }
}

pub struct IgnitionController {
    mode: IgniteMode,
    apogee_delay: i16,
    drogue: Slot,
    main: Slot,
}

impl IgnitionController {
    pub fn new(config: &FlightConfig) -> Self {
        Self {
            mode: config.ignite_mode,
            apogee_delay: secs_to_ticks(config.apogee_delay_s as u16),
            drogue: Slot::default(),
            main: Slot::default(),
        }
    }

    pub fn has_fired(&self, igniter: Igniter) -> bool {
        self.slot(igniter).fired.is_some()
    }

    pub fn deadline(&self, igniter: Igniter) -> Option<Tick> {
        self.slot(igniter).deadline
    }

    fn slot(&self, igniter: Igniter) -> &Slot {
        match igniter {
            Igniter::Drogue => &self.drogue,
            Igniter::Main => &self.main,
        }
    }

    /// Returns the igniters due this tick, already marked fired. Nothing
    /// fires outside boost..main.
    pub fn check(&mut self, tick: Tick, phase: FlightState) -> Vec<Igniter, 2> {
        let mut due = Vec::new();
        if !phase.is_in_flight() {
            return due;
        }

        match self.mode {
            IgniteMode::Dual => {
                if phase >= FlightState::Drogue {
                    self.drogue.arm(tick.offset(self.apogee_delay));
                }
                if phase >= FlightState::Main {
                    self.main.arm(tick);
                }
            }
            IgniteMode::Apogee => {
                if phase >= FlightState::Drogue {
                    self.drogue.arm(tick.offset(self.apogee_delay));
                }
                if let Some(fired) = self.drogue.fired {
                    self.main.arm(fired.offset(CHARGE_SPACING));
                }
            }
            IgniteMode::Main => {
                if phase >= FlightState::Main {
                    self.drogue.arm(tick);
                }
                if let Some(fired) = self.drogue.fired {
                    self.main.arm(fired.offset(CHARGE_SPACING));
                }
            }
            IgniteMode::Booster => {
                if phase >= FlightState::Fast {
                    self.main.arm(tick);
                }
                if phase >= FlightState::Drogue {
                    self.drogue.arm(tick.offset(self.apogee_delay));
                }
            }
        }

        if self.drogue.due(tick) {
            self.drogue.fired = Some(tick);
            due.push(Igniter::Drogue).ok();
        }
        if self.main.due(tick) {
            self.main.fired = Some(tick);
            due.push(Igniter::Main).ok();
        }
        due
    }

    /// Operator test firing; the caller checks phase and continuity.
    pub fn manual_fire(&mut self, igniter: Igniter, tick: Tick) -> Result<(), ManualFireError> {
        let slot = match igniter {
            Igniter::Drogue => &mut self.drogue,
            Igniter::Main => &mut self.main,
        };
        if slot.fired.is_some() {
            return Err(ManualFireError::AlreadyFired);
        }
        log_info!("igniter {:?}: manual fire", igniter);
        slot.fired = Some(tick);
        Ok(())
    }
}
