//! Unison production server.
//!
//! Runs [`unison_core`]'s [`Broadcaster`](unison_core::Broadcaster) over real
//! sockets: a non-blocking TCP listener, a single-threaded mio reactor, and a
//! privilege-separation bootstrap that confines the process before it serves
//! any device.
//!
//! # Architecture
//!
//! ```text
//!   require_root → listener::bind → secure (chroot, setresuid, seccomp) → Reactor::run
//! ```
//!
//! The broadcast logic lives entirely in the core crate; this crate maps
//! mio readiness onto [`ConnectionId`](unison_core::ConnectionId)s and
//! translates registration calls through [`MioReadiness`].
//!
//! # Components
//!
//! - [`Server`]: bind + run
//! - [`Reactor`]: the event loop
//! - [`MioReadiness`]: core readiness seam over `mio::Registry`
//! - [`privsep`]: privilege drop and syscall allow-list

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
pub mod listener;
pub mod privsep;
mod reactor;
mod readiness;

use std::{convert::Infallible, net::SocketAddr};

pub use error::ServerError;
pub use privsep::{PrivsepConfig, PrivsepError};
pub use reactor::{DEFAULT_EVENT_CAPACITY, Reactor, ReactorConfig};
pub use readiness::MioReadiness;
use unison_core::{BroadcastConfig, Broadcaster};

/// Server configuration for the production runtime.
#[derive(Debug, Clone)]
pub struct ServerRuntimeConfig {
    /// Address to listen on (e.g., "0.0.0.0:6969")
    pub bind_address: SocketAddr,
    /// Listen backlog
    pub backlog: i32,
    /// Event loop configuration
    pub reactor: ReactorConfig,
    /// Broadcast state machine configuration
    pub broadcast: BroadcastConfig,
    /// Privilege drop configuration
    pub privsep: PrivsepConfig,
    /// Skip privilege separation entirely. Development only.
    pub unprivileged: bool,
}

impl Default for ServerRuntimeConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], listener::DEFAULT_PORT)),
            backlog: listener::DEFAULT_BACKLOG,
            reactor: ReactorConfig::default(),
            broadcast: BroadcastConfig::default(),
            privsep: PrivsepConfig::default(),
            unprivileged: false,
        }
    }
}

/// Production Unison server.
#[derive(Debug)]
pub struct Server {
    reactor: Reactor,
}

impl Server {
    /// Bind the listener and set up the reactor.
    ///
    /// Does not drop privileges; call [`secure`] afterwards.
    pub fn bind(config: &ServerRuntimeConfig) -> Result<Self, ServerError> {
        let listener = listener::bind(config.bind_address, config.backlog)
            .map_err(|source| ServerError::Bind { addr: config.bind_address, source })?;

        let reactor = Reactor::new(listener, &config.reactor, config.broadcast)?;
        Ok(Self { reactor })
    }

    /// Local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.reactor.local_addr()
    }

    /// Broadcast state, for inspection.
    pub fn broadcaster(&self) -> &Broadcaster<mio::net::TcpStream> {
        self.reactor.broadcaster()
    }

    /// Serve devices until a fatal error.
    pub fn run(mut self) -> Result<Infallible, ServerError> {
        tracing::info!(
            addr = %self.local_addr()?,
            color = %self.broadcaster().color(),
            "serving"
        );
        self.reactor.run()
    }
}

/// Drop privileges and install the syscall filter, unless running
/// unprivileged.
pub fn secure(config: &ServerRuntimeConfig) -> Result<(), ServerError> {
    if config.unprivileged {
        tracing::warn!("running without privilege separation; do not use in production");
        return Ok(());
    }

    privsep::drop_privileges(&config.privsep)?;
    privsep::install_seccomp()?;
    Ok(())
}
