use std::fmt;
use std::str::FromStr;

/// Position within a recording, as accepted by
/// [restart](crate::RecordingManipulation::restart).
///
/// The textual form is:
/// - `""`: the last checkpoint,
/// - `"c<id>"`: the checkpoint with the given ID,
/// - `"<n>"`: the event with the given number.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Position {
    /// The most recently created checkpoint.
    LastCheckpoint,

    /// A checkpoint, by ID.
    Checkpoint(u64),

    /// An event number.
    Event(u64),
}

impl Position {
    /// Parses a position.
    pub fn parse(pos: &str) -> crate::Result<Self> {
        if pos.is_empty() {
            return Ok(Self::LastCheckpoint);
        }

        let invalid = || crate::Error::InvalidPosition(pos.to_owned());

        match pos.strip_prefix('c') {
            Some(id) => parse_decimal(id).map(Self::Checkpoint).ok_or_else(invalid),
            None => parse_decimal(pos).map(Self::Event).ok_or_else(invalid),
        }
    }
}

/// Parses an unsigned decimal number, without sign nor whitespace.
fn parse_decimal(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    s.parse().ok()
}

impl FromStr for Position {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LastCheckpoint => Ok(()),
            Self::Checkpoint(id) => write!(f, "c{id}"),
            Self::Event(n) => write!(f, "{n}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Position;
    use crate::ErrorKind;

    #[test]
    fn parse_grammar() {
        assert_eq!(Position::parse("").unwrap(), Position::LastCheckpoint);
        assert_eq!(Position::parse("c3").unwrap(), Position::Checkpoint(3));
        assert_eq!(Position::parse("c0").unwrap(), Position::Checkpoint(0));
        assert_eq!(Position::parse("42").unwrap(), Position::Event(42));
        assert_eq!(Position::parse("007").unwrap(), Position::Event(7));
    }

    #[test]
    fn parse_invalid() {
        for pos in [
            "c", "cx", "c-1", "c+1", "-1", "+1", " 42", "42 ", "4.2", "x42", "checkpoint", "C3",
        ] {
            let err = Position::parse(pos).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidPosition, "{pos:?}");
        }

        // overflow
        let err = Position::parse("18446744073709551616").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidPosition);
    }

    #[test]
    fn display_parses_back() {
        for pos in [Position::LastCheckpoint, Position::Checkpoint(12), Position::Event(99)] {
            assert_eq!(pos.to_string().parse::<Position>().unwrap(), pos);
        }
    }
}
