// ssh/error.rs
//
// Errors raised by the SSH transport

use thiserror::Error;

/// Errors that can occur while dialing or driving an SSH connection
#[derive(Error, Debug)]
pub enum SshError {
    #[error("Failed to connect to {host}: {source}")]
    Connect {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("SSH handshake with {host} failed: {source}")]
    Handshake {
        host: String,
        #[source]
        source: ssh2::Error,
    },

    #[error("Authentication for {username}@{host} failed: {source}")]
    Auth {
        username: String,
        host: String,
        #[source]
        source: ssh2::Error,
    },

    #[error("SSH session error: {0}")]
    Session(#[from] ssh2::Error),

    #[error("I/O error on SSH channel: {0}")]
    Io(#[from] std::io::Error),

    #[error("Remote command timed out")]
    Timeout,

    #[error("Remote command canceled")]
    Canceled,

    #[error("Background SSH task failed: {0}")]
    Task(String),
}

impl SshError {
    /// Whether this failure came from cancellation or the per-command
    /// timeout, which is treated as cancellation.
    pub fn is_canceled(&self) -> bool {
        matches!(self, SshError::Canceled | SshError::Timeout)
    }
}
