//! Destination classes for stream routing.
//!
//! The 7-bit field has three assigned values; 0x04 through 0x20 are
//! reserved for future routing classes.

use std::fmt;
use std::str::FromStr;

use crate::stream_id::StreamIdError;

/// Raw wildcard destination, all 7 bits set.
pub const DEST_ANY: u8 = 0x7F;

/// Where a stream's records are forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Destination {
    /// Not forwarded outside the controller.
    #[default]
    None,
    /// Forwarded to a UDP consumer.
    Udp,
    /// Wildcard — matches any destination class.
    Any,
}

impl Destination {
    /// The 7-bit wire value.
    pub const fn raw(self) -> u8 {
        match self {
            Destination::None => 0x01,
            Destination::Udp => 0x02,
            Destination::Any => DEST_ANY,
        }
    }

    pub fn from_raw(raw: u8) -> Result<Self, StreamIdError> {
        match raw {
            0x01 => Ok(Destination::None),
            0x02 => Ok(Destination::Udp),
            DEST_ANY => Ok(Destination::Any),
            other => Err(StreamIdError::UnknownDestination(other)),
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Destination::None => "none",
            Destination::Udp => "udp",
            Destination::Any => "any",
        };
        f.write_str(name)
    }
}

impl FromStr for Destination {
    type Err = StreamIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Destination::None),
            "udp" => Ok(Destination::Udp),
            "any" => Ok(Destination::Any),
            _ => Err(StreamIdError::BadText(s.to_string())),
        }
    }
}
