//! Unison server binary.
//!
//! # Usage
//!
//! ```bash
//! # Production: start as root, drop to `unison` in /var/empty
//! sudo unison-server --bind 0.0.0.0:6969
//!
//! # Development: no root, no chroot, no seccomp
//! unison-server --bind 127.0.0.1:6969 --unprivileged
//! ```

use std::{net::SocketAddr, path::PathBuf, process::ExitCode};

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use unison_core::{BroadcastConfig, Color};
use unison_server::{
    PrivsepConfig, ReactorConfig, Server, ServerError, ServerRuntimeConfig, privsep, secure,
};

/// Unison color synchronization server
#[derive(Parser, Debug)]
#[command(name = "unison-server")]
#[command(about = "Keeps a fleet of LED devices showing the same color")]
#[command(version)]
struct Args {
    /// Address to listen on
    #[arg(short, long, default_value = "0.0.0.0:6969")]
    bind: SocketAddr,

    /// Listen backlog
    #[arg(long, default_value_t = unison_server::listener::DEFAULT_BACKLOG)]
    backlog: i32,

    /// Account to drop privileges to
    #[arg(short, long, default_value = privsep::DEFAULT_USER)]
    user: String,

    /// Directory to confine the process to
    #[arg(long, default_value = privsep::DEFAULT_CHROOT)]
    chroot: PathBuf,

    /// Color devices receive before anyone proposes one
    #[arg(long, default_value_t = Color::RED.as_byte())]
    initial_color: u8,

    /// Readiness events collected per wait
    #[arg(long, default_value_t = unison_server::DEFAULT_EVENT_CAPACITY)]
    event_capacity: usize,

    /// Skip privilege separation (development only)
    #[arg(long)]
    unprivileged: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn into_config(self) -> Result<ServerRuntimeConfig, ServerError> {
        if self.event_capacity == 0 {
            return Err(ServerError::Config("--event-capacity must be at least 1".to_string()));
        }

        Ok(ServerRuntimeConfig {
            bind_address: self.bind,
            backlog: self.backlog,
            reactor: ReactorConfig { event_capacity: self.event_capacity },
            broadcast: BroadcastConfig { initial_color: Color::new(self.initial_color) },
            privsep: PrivsepConfig { user: self.user, chroot: self.chroot },
            unprivileged: self.unprivileged,
        })
    }
}

fn start(config: &ServerRuntimeConfig) -> Result<(), ServerError> {
    if !config.unprivileged {
        privsep::require_root()?;
    }

    let server = Server::bind(config)?;
    tracing::info!(addr = %server.local_addr()?, backlog = config.backlog, "listening");

    secure(config)?;

    match server.run()? {}
}

fn main() -> ExitCode {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    tracing::info!("Unison server starting");

    let result = args.into_config().and_then(|config| start(&config));
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "fatal");
            ExitCode::FAILURE
        },
    }
}
