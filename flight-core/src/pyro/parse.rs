use core::fmt;

use super::{PyroChannel, Predicate};
use crate::flight_state::FlightState;

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PyroParseError {
    MissingChannel,
    InvalidChannel,
    /// The token at this (0 based) position is not a known predicate name
    UnknownToken(usize),
    MissingValue(usize),
    InvalidValue(usize),
    InvalidState(i32),
    /// Orientation predicates need a gyro-equipped board
    OrientationUnsupported(usize),
}

#[derive(Clone, Copy)]
enum Kind {
    Valued(fn(i32) -> Predicate),
    State(fn(FlightState) -> Predicate),
    Flag(Predicate),
}

const NAMES: [(&str, Kind); 16] = [
    ("a<", Kind::Valued(Predicate::AccelLess)),
    ("a>", Kind::Valued(Predicate::AccelGreater)),
    ("s<", Kind::Valued(Predicate::SpeedLess)),
    ("s>", Kind::Valued(Predicate::SpeedGreater)),
    ("h<", Kind::Valued(Predicate::HeightLess)),
    ("h>", Kind::Valued(Predicate::HeightGreater)),
    ("o<", Kind::Valued(Predicate::OrientLess)),
    ("o>", Kind::Valued(Predicate::OrientGreater)),
    ("t<", Kind::Valued(Predicate::TimeLess)),
    ("t>", Kind::Valued(Predicate::TimeGreater)),
    ("f<", Kind::State(Predicate::StateLess)),
    ("f>=", Kind::State(Predicate::StateGreaterOrEqual)),
    ("A", Kind::Flag(Predicate::Ascending)),
    ("D", Kind::Flag(Predicate::Descending)),
    ("m", Kind::Valued(Predicate::AfterMotor)),
    ("d", Kind::Valued(Predicate::Delay)),
];

// NAMES follows PyroFlags bit order
fn token_name(predicate: &Predicate) -> &'static str {
    NAMES[predicate.flag().bits().trailing_zeros() as usize].0
}

/// Parses one pyro configuration line: the channel ordinal followed by
/// `<name> [<value>]` pairs, e.g. `1 f>= 5 D d 200`.
///
/// The line describes the complete channel, so the result replaces whatever
/// was configured before. Valueless names (`A`, `D`) toggle their flag.
pub fn parse_pyro_line(
    line: &str,
    has_orientation: bool,
) -> Result<(usize, PyroChannel), PyroParseError> {
    let mut tokens = line.split_whitespace().enumerate();

    let (_, ordinal) = tokens.next().ok_or(PyroParseError::MissingChannel)?;
    let ordinal: usize = ordinal
        .parse()
        .map_err(|_| PyroParseError::InvalidChannel)?;

    let mut channel = PyroChannel::new();
    while let Some((position, name)) = tokens.next() {
        let (_, kind) = NAMES
            .iter()
            .find(|(n, _)| *n == name)
            .ok_or(PyroParseError::UnknownToken(position))?;

        let mut value = || -> Result<i32, PyroParseError> {
            let (value_position, value) = tokens
                .next()
                .ok_or(PyroParseError::MissingValue(position))?;
            value
                .parse::<i32>()
                .map_err(|_| PyroParseError::InvalidValue(value_position))
        };

        match *kind {
            Kind::Valued(make) => {
                let predicate = make(value()?);
                if predicate.needs_orientation() && !has_orientation {
                    return Err(PyroParseError::OrientationUnsupported(position));
                }
                channel.set(predicate);
            }
            Kind::State(make) => {
                let raw = value()?;
                let state = FlightState::try_from(raw).map_err(PyroParseError::InvalidState)?;
                channel.set(make(state));
            }
            Kind::Flag(predicate) => {
                channel.toggle(predicate);
            }
        }
    }

    Ok((ordinal, channel))
}

/// Renders the channel back into the text form accepted by
/// [`parse_pyro_line`], without the ordinal.
impl fmt::Display for PyroChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for predicate in self.predicates() {
            if !first {
                f.write_str(" ")?;
            }
            first = false;
            f.write_str(token_name(predicate))?;
            if let Some(value) = predicate.value() {
                write!(f, " {}", value)?;
            }
        }
        Ok(())
    }
}
