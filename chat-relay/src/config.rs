use std::time::Duration;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 9999;

/// Tunables shared by every session of one server.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Upper bound on a single write to one broadcast target. The registry lock
    /// is held while writing, so a stalled peer can delay others by at most this.
    pub send_timeout: Duration,
    /// Maximum bytes read for the name during the handshake.
    pub name_buffer_size: usize,
    /// Maximum bytes read per inbound chat message.
    pub read_buffer_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            send_timeout: Duration::from_secs(5),
            name_buffer_size: 1024,
            read_buffer_size: 4096,
        }
    }
}
