//! The shared color and the global broadcast mode.
//!
//! A [`Color`] is an opaque byte. The named constants mirror the device
//! palette (one bit per LED channel) but the server never validates against
//! them: whatever byte a device proposes is stored and broadcast unchanged.

use std::fmt;

use crate::connection::Interest;

/// The single value every device in the fleet must agree on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color(u8);

impl Color {
    /// Red channel only.
    pub const RED: Self = Self(1);
    /// Green channel only.
    pub const GREEN: Self = Self(2);
    /// Blue channel only.
    pub const BLUE: Self = Self(4);
    /// Red and green.
    pub const YELLOW: Self = Self(1 | 2);
    /// Green and blue.
    pub const TURQUOISE: Self = Self(2 | 4);
    /// Blue and red.
    pub const PURPLE: Self = Self(4 | 1);

    /// Wrap a raw wire byte.
    pub const fn new(raw: u8) -> Self {
        Self(raw)
    }

    /// The byte sent on the wire.
    pub const fn as_byte(self) -> u8 {
        self.0
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::RED
    }
}

impl From<u8> for Color {
    fn from(raw: u8) -> Self {
        Self(raw)
    }
}

impl From<Color> for u8 {
    fn from(color: Color) -> Self {
        color.0
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Global broadcast mode.
///
/// ```text
///              proposal read / connection accepted
///  ┌───────────┐ ─────────────────────────────────> ┌─────────┐
///  │ Receiving │                                    │ Sending │
///  └───────────┘ <───────────────────────────────── └─────────┘
///              every live connection has sent
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Mode {
    /// Any device may propose a new color.
    #[default]
    Receiving,
    /// The current color is being delivered to every device.
    Sending,
}

impl Mode {
    /// Readiness interest every connection holds while in this mode.
    pub const fn interest(self) -> Interest {
        match self {
            Self::Receiving => Interest::Read,
            Self::Sending => Interest::Write,
        }
    }
}
