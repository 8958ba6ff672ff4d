use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::config::{DEFAULT_HOST, DEFAULT_PORT, RelayConfig};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the relay, accepting TCP connections.
    Server(ServerArgs),
    /// Connect to a relay and chat from the terminal.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Address to bind to.
    #[arg(long, default_value = DEFAULT_HOST)]
    pub host: String,

    /// Port to listen on. Use 0 for an ephemeral port.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Give up on a slow client after this many milliseconds per message.
    #[arg(long, default_value_t = 5000)]
    pub send_timeout_ms: u64,
}

impl ServerArgs {
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            send_timeout: Duration::from_millis(self.send_timeout_ms),
            ..RelayConfig::default()
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Host of the relay.
    #[arg(long, default_value = DEFAULT_HOST)]
    pub host: String,

    /// Port of the relay.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,
}
