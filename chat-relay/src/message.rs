//! Text lines exchanged with peers.
//!
//! There is no framing on the wire: each server-side read is treated as one
//! message and every outbound line carries a trailing newline.

/// First bytes written to a freshly accepted connection.
pub const NAME_PROMPT: &str = "Enter your name: ";

/// Name used as the author of membership announcements.
pub const SERVER_NAME: &str = "Server";

/// Display name for a client that sent an empty name.
pub fn default_name(remote_port: u16) -> String {
    format!("User-{remote_port}")
}

/// Decode a raw name read and fall back to [`default_name`] when it is blank.
pub fn resolve_name(raw: &[u8], remote_port: u16) -> String {
    let name = String::from_utf8_lossy(raw);
    let name = name.trim();
    if name.is_empty() {
        default_name(remote_port)
    } else {
        name.to_string()
    }
}

pub fn chat_line(name: &str, raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    format!("[{name}] {}\n", text.trim_end())
}

pub fn joined_line(name: &str) -> String {
    format!("[{SERVER_NAME}] {name} joined the chat.\n")
}

pub fn left_line(name: &str) -> String {
    format!("[{SERVER_NAME}] {name} left the chat.\n")
}
