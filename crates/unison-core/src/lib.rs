//! Unison protocol core.
//!
//! A fleet of LED devices shares one color. Each device keeps a TCP
//! connection to the server and may propose a new color by sending a single
//! byte; the server then delivers that byte to every device and waits until
//! all of them have it before accepting the next proposal.
//!
//! This crate holds that logic with no dependency on a particular I/O
//! runtime. Sockets are any `Read + Write` type, and readiness subscriptions
//! go through the [`Readiness`] trait, so the same [`Broadcaster`] runs over
//! mio in production and over in-memory sockets in simulation.
//!
//! # Components
//!
//! - [`Connection`]: one device's socket, registration and `sent` flag
//! - [`ConnectionRegistry`]: live connections and the round barrier
//! - [`Broadcaster`]: shared color, global [`Mode`], I/O handlers
//! - [`Readiness`]: seam to the readiness primitive

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod broadcast;
pub mod color;
pub mod connection;
pub mod error;
pub mod readiness;
pub mod registry;

pub use broadcast::{BroadcastConfig, Broadcaster, Outcome};
pub use color::{Color, Mode};
pub use connection::{Connection, ConnectionId, Interest};
pub use error::{BroadcastError, Disposition, classify};
pub use readiness::{Readiness, Ready};
pub use registry::ConnectionRegistry;
