use std::time::Duration;

use clap::{Args, Subcommand};
use tfwire_ipcon::{ConnectionConfig, IpConnection};
use tfwire_transport::{DEFAULT_HOST, DEFAULT_PORT};
use tracing::debug;

use crate::exit::{ipcon_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod call;
pub mod identity;
pub mod listen;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show version information.
    Version(VersionArgs),
    /// Read a device's identity record.
    Identity(IdentityArgs),
    /// Call one function on a device and print the response.
    Call(CallArgs),
    /// Print callbacks from a device until interrupted.
    Listen(ListenArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Version(args) => version::run(args),
        Command::Identity(args) => identity::run(args, format),
        Command::Call(args) => call::run(args, format),
        Command::Listen(args) => listen::run(args, format),
    }
}

/// Where brickd listens, shared by every command that connects.
#[derive(Args, Debug, Clone)]
pub struct ConnectArgs {
    /// Daemon host.
    #[arg(long, env = "TFWIRE_HOST", default_value = DEFAULT_HOST)]
    pub host: String,
    /// Daemon port.
    #[arg(long, env = "TFWIRE_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,
    /// Response timeout (e.g. 2500ms, 5s).
    #[arg(long, default_value = "2500ms")]
    pub timeout: String,
}

impl ConnectArgs {
    /// Connect to the daemon with the configured timeouts.
    pub fn connect(&self) -> CliResult<IpConnection> {
        let timeout = parse_duration(&self.timeout)?;
        let config = ConnectionConfig::new(self.host.clone(), self.port)
            .with_response_timeout(timeout)
            .with_connect_timeout(timeout);
        let ipcon = IpConnection::new(config);
        debug!(endpoint = %ipcon.endpoint(), "connecting");
        ipcon
            .connect()
            .map_err(|err| ipcon_error("connect failed", err))?;
        Ok(ipcon)
    }
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

#[derive(Args, Debug)]
pub struct IdentityArgs {
    /// Base58 device uid.
    pub uid: String,
    #[command(flatten)]
    pub connect: ConnectArgs,
}

#[derive(Args, Debug)]
pub struct CallArgs {
    /// Base58 device uid.
    pub uid: String,
    /// Function id to call.
    #[arg(long, short = 'f', value_parser = clap::value_parser!(u8).range(1..))]
    pub function: u8,
    /// Request payload as hex (e.g. 0400 or 04:00).
    #[arg(long, default_value = "")]
    pub data: String,
    /// Send without waiting for a response.
    #[arg(long)]
    pub no_response: bool,
    #[command(flatten)]
    pub connect: ConnectArgs,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Base58 device uid.
    pub uid: String,
    /// Callback function id to print.
    #[arg(long, short = 'f', value_parser = clap::value_parser!(u8).range(1..))]
    pub function: u8,
    /// Function to call once before listening, e.g. an enable-callback setter.
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..))]
    pub enable: Option<u8>,
    /// Exit after N callbacks.
    #[arg(long)]
    pub count: Option<usize>,
    #[command(flatten)]
    pub connect: ConnectArgs,
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
