// ssh/connection.rs
//
// Contracts for running commands and streams over SSH

use std::io::{Read, Write};

use async_trait::async_trait;

use super::error::SshError;

/// Captured result of one remote command.
///
/// `exit_code` is the remote process status; transport failures surface as
/// `SshError` instead. Streaming commands leave `stdout` empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i32,
}

impl CommandOutput {
    /// Whether the remote command exited zero.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Captured stderr as lossy UTF-8, trimmed.
    pub fn stderr_string(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }

    /// Captured stdout as lossy UTF-8.
    pub fn stdout_string(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }
}

/// One open SSH connection to a remote instance.
///
/// A connection is owned by exactly one instance facade; commands on it are
/// serialized. Every operation either captures the remote exit code or fails
/// with a transport error.
#[async_trait]
pub trait SshConnection: Send + Sync {
    /// Run a command, capturing stdout and stderr in full.
    async fn run(&self, cmd: &str) -> Result<CommandOutput, SshError>;

    /// Run a command, piping its stdout into `writer`. Stderr is captured.
    async fn stream(
        &self,
        cmd: &str,
        writer: Box<dyn Write + Send>,
    ) -> Result<CommandOutput, SshError>;

    /// Run a command, feeding `reader` into its stdin until EOF.
    async fn stream_stdin(
        &self,
        cmd: &str,
        reader: Box<dyn Read + Send>,
    ) -> Result<CommandOutput, SshError>;

    /// Close the underlying session. Further commands fail.
    async fn close(&self) -> Result<(), SshError>;
}

/// Opens SSH connections to instance hosts.
#[async_trait]
pub trait SshDialer: Send + Sync {
    async fn dial(&self, host: &str) -> Result<Box<dyn SshConnection>, SshError>;
}
