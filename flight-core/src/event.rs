use embassy_sync::{
    blocking_mutex::raw::RawMutex, channel::Sender as ChannelSender,
    pubsub::publisher::Publisher as PubSubPublisher, watch::Sender as WatchSender,
};
use serde::{Deserialize, Serialize};

use crate::flight::InvalidReason;
use crate::flight_state::FlightState;
use crate::igniter::Igniter;
use crate::tick::Tick;

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryRate {
    /// boost and fast
    Flight,
    /// pad and descent
    Recovery,
}

/// Everything the flight core wants the rest of the system (telemetry,
/// logging, beacon, ADC scheduler) to react to.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub enum FlightEvent {
    Calibrated {
        ground_altitude: f32,
    },
    StateChanged {
        from: FlightState,
        to: FlightState,
        tick: Tick,
    },
    LoggingStarted,
    TelemetryRate(TelemetryRate),
    RdfBeacon(bool),
    MotorIgnition {
        motor: u8,
    },
    Apogee {
        height: f32,
    },
    PyroFired {
        mask: u8,
        tick: Tick,
    },
    PyroInhibited {
        mask: u8,
    },
    IgniterFired(Igniter),
    /// Periodic ADC sampling may stop.
    SamplingHalted,
    Invalid(InvalidReason),
}

pub trait FlightEventPublisher {
    fn publish(&mut self, event: FlightEvent);
}

impl FlightEventPublisher for () {
    fn publish(&mut self, _event: FlightEvent) {}
}

impl<P: FlightEventPublisher> FlightEventPublisher for &mut P {
    fn publish(&mut self, event: FlightEvent) {
        (**self).publish(event)
    }
}

impl<A: FlightEventPublisher, B: FlightEventPublisher> FlightEventPublisher for (A, B) {
    fn publish(&mut self, event: FlightEvent) {
        self.0.publish(event);
        self.1.publish(event);
    }
}

impl<'ch, M: RawMutex, const N: usize> FlightEventPublisher
    for ChannelSender<'ch, M, FlightEvent, N>
{
    fn publish(&mut self, event: FlightEvent) {
        if self.try_send(event).is_err() {
            log_warn!("flight event queue full, dropping {:?}", event);
        }
    }
}

impl<'a, M: RawMutex, const CAP: usize, const SUBS: usize, const PUBS: usize>
    FlightEventPublisher for PubSubPublisher<'a, M, FlightEvent, CAP, SUBS, PUBS>
{
    fn publish(&mut self, event: FlightEvent) {
        self.publish_immediate(event)
    }
}

/// Broadcasts only the latest flight state, for tasks that just need to
/// wake on phase changes.
impl<'a, M: RawMutex, const N: usize> FlightEventPublisher for WatchSender<'a, M, FlightState, N> {
    fn publish(&mut self, event: FlightEvent) {
        if let FlightEvent::StateChanged { to, .. } = event {
            self.send(to);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;
    use embassy_sync::channel::Channel;
    use embassy_sync::pubsub::PubSubChannel;
    use embassy_sync::watch::Watch;

    fn state_change(to: FlightState) -> FlightEvent {
        FlightEvent::StateChanged {
            from: FlightState::Pad,
            to,
            tick: Tick(7),
        }
    }

    #[test]
    fn channel_drops_when_full() {
        let channel = Channel::<NoopRawMutex, FlightEvent, 2>::new();
        let mut sender = channel.sender();
        sender.publish(FlightEvent::LoggingStarted);
        sender.publish(FlightEvent::RdfBeacon(false));
        sender.publish(FlightEvent::SamplingHalted);
        assert_eq!(channel.try_receive(), Ok(FlightEvent::LoggingStarted));
        assert_eq!(channel.try_receive(), Ok(FlightEvent::RdfBeacon(false)));
        assert!(channel.try_receive().is_err());
    }

    #[test]
    fn watch_carries_latest_state_only() {
        let watch = Watch::<NoopRawMutex, FlightState, 2>::new();
        let mut receiver = watch.receiver().unwrap();
        let mut sender = watch.sender();

        sender.publish(FlightEvent::LoggingStarted);
        assert_eq!(receiver.try_get(), None);

        sender.publish(state_change(FlightState::Boost));
        sender.publish(state_change(FlightState::Fast));
        assert_eq!(receiver.try_changed(), Some(FlightState::Fast));
    }

    #[test]
    fn tuple_fans_out() {
        let pubsub = PubSubChannel::<NoopRawMutex, FlightEvent, 4, 1, 1>::new();
        let mut subscriber = pubsub.subscriber().unwrap();
        let channel = Channel::<NoopRawMutex, FlightEvent, 4>::new();
        let mut both = (channel.sender(), pubsub.publisher().unwrap());

        both.publish(FlightEvent::MotorIgnition { motor: 1 });
        assert_eq!(channel.try_receive(), Ok(FlightEvent::MotorIgnition { motor: 1 }));
        assert_eq!(
            subscriber.try_next_message_pure(),
            Some(FlightEvent::MotorIgnition { motor: 1 })
        );
    }
}
