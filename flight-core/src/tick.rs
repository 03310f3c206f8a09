use serde::{Deserialize, Serialize};

/// The sampling task runs at a fixed 100 Hz.
pub const TICKS_PER_SECOND: u16 = 100;

/// Converts whole seconds to a tick interval, saturating at the largest
/// interval a wrapping 16-bit counter can still order correctly.
pub const fn secs_to_ticks(secs: u16) -> i16 {
    let ticks = secs as u32 * TICKS_PER_SECOND as u32;
    if ticks > i16::MAX as u32 {
        i16::MAX
    } else {
        ticks as i16
    }
}

pub const fn ms_to_ticks(ms: u32) -> i16 {
    let ticks = ms / (1000 / TICKS_PER_SECOND as u32);
    if ticks > i16::MAX as u32 {
        i16::MAX
    } else {
        ticks as i16
    }
}

/// Monotonic sample counter. Wraps after 65536 ticks (~11 minutes), so ticks
/// must only ever be compared through [`Tick::since`], never with `<`/`>`.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Tick(pub u16);

impl Tick {
    /// Signed distance from `earlier` to `self`, correct across one wrap.
    pub fn since(self, earlier: Tick) -> i16 {
        self.0.wrapping_sub(earlier.0) as i16
    }

    pub fn offset(self, ticks: i16) -> Tick {
        Tick(self.0.wrapping_add(ticks as u16))
    }

    pub fn has_reached(self, deadline: Tick) -> bool {
        self.since(deadline) >= 0
    }

    pub fn next(self) -> Tick {
        Tick(self.0.wrapping_add(1))
    }
}
