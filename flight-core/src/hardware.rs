//! Seams between the flight core and the board drivers.

use core::future::Future;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::Receiver;

use crate::igniter::OutputChannel;
use crate::sample::SensorSample;

/// One sample per tick from the sensor drivers.
pub trait SampleSource {
    /// `None` once the source is closed.
    fn next_sample(&mut self) -> impl Future<Output = Option<SensorSample>>;
}

impl<M: RawMutex, const N: usize> SampleSource for Receiver<'_, M, Option<SensorSample>, N> {
    async fn next_sample(&mut self) -> Option<SensorSample> {
        self.receive().await
    }
}

impl<S: SampleSource> SampleSource for &mut S {
    fn next_sample(&mut self) -> impl Future<Output = Option<SensorSample>> {
        (**self).next_sample()
    }
}

/// Drives the physical firing outputs.
pub trait PyroActuator {
    /// Sets one output high or low. The core always calls this in matched
    /// pairs.
    fn fire_channel(&mut self, channel: OutputChannel, active: bool);
}

impl<A: PyroActuator> PyroActuator for &mut A {
    fn fire_channel(&mut self, channel: OutputChannel, active: bool) {
        (**self).fire_channel(channel, active);
    }
}
