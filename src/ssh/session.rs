// ssh/session.rs
//
// libssh2-backed implementation of the SSH transport

use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use tokio_util::sync::CancellationToken;

use super::connection::{CommandOutput, SshConnection, SshDialer};
use super::error::SshError;

/// An SSH connection backed by a libssh2 session.
///
/// The blocking session work runs on the tokio blocking pool; the session is
/// guarded by a mutex so commands on one connection never interleave.
pub struct Ssh2Connection {
    host: String,
    session: Arc<Mutex<ssh2::Session>>,
    timeout: Option<Duration>,
    cancel: CancellationToken,
}

impl Ssh2Connection {
    fn new(
        host: String,
        session: ssh2::Session,
        timeout: Option<Duration>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            host,
            session: Arc::new(Mutex::new(session)),
            timeout,
            cancel,
        }
    }

    /// Run blocking session work, racing it against cancellation and the
    /// per-command timeout.
    async fn dispatch<T, F>(&self, f: F) -> Result<T, SshError>
    where
        F: FnOnce(&Mutex<ssh2::Session>) -> Result<T, SshError> + Send + 'static,
        T: Send + 'static,
    {
        let session = Arc::clone(&self.session);
        let handle = tokio::task::spawn_blocking(move || f(&session));
        let work = async move {
            match handle.await {
                Ok(result) => result,
                Err(err) => Err(SshError::Task(err.to_string())),
            }
        };

        match self.timeout {
            Some(limit) => tokio::select! {
                _ = self.cancel.cancelled() => Err(SshError::Canceled),
                result = tokio::time::timeout(limit, work) => match result {
                    Ok(inner) => inner,
                    Err(_) => Err(SshError::Timeout),
                },
            },
            None => tokio::select! {
                _ = self.cancel.cancelled() => Err(SshError::Canceled),
                result = work => result,
            },
        }
    }
}

#[async_trait]
impl SshConnection for Ssh2Connection {
    async fn run(&self, cmd: &str) -> Result<CommandOutput, SshError> {
        debug!("Running `{}` on {}", cmd, self.host);
        let cmd = cmd.to_string();
        self.dispatch(move |session| exec_capture(session, &cmd)).await
    }

    async fn stream(
        &self,
        cmd: &str,
        writer: Box<dyn Write + Send>,
    ) -> Result<CommandOutput, SshError> {
        debug!("Streaming `{}` from {}", cmd, self.host);
        let cmd = cmd.to_string();
        self.dispatch(move |session| {
            let mut writer = writer;
            let session = session.lock().unwrap();
            let mut channel = session.channel_session()?;
            channel.exec(&cmd)?;
            std::io::copy(&mut channel, &mut writer)?;
            writer.flush()?;
            let mut stderr = Vec::new();
            channel.stderr().read_to_end(&mut stderr)?;
            channel.wait_close()?;
            let exit_code = channel.exit_status()?;
            Ok(CommandOutput {
                stdout: Vec::new(),
                stderr,
                exit_code,
            })
        })
        .await
    }

    async fn stream_stdin(
        &self,
        cmd: &str,
        reader: Box<dyn Read + Send>,
    ) -> Result<CommandOutput, SshError> {
        debug!("Streaming stdin of `{}` on {}", cmd, self.host);
        let cmd = cmd.to_string();
        self.dispatch(move |session| {
            let mut reader = reader;
            let session = session.lock().unwrap();
            let mut channel = session.channel_session()?;
            channel.exec(&cmd)?;
            std::io::copy(&mut reader, &mut channel)?;
            channel.send_eof()?;
            let mut stdout = Vec::new();
            channel.read_to_end(&mut stdout)?;
            let mut stderr = Vec::new();
            channel.stderr().read_to_end(&mut stderr)?;
            channel.wait_close()?;
            let exit_code = channel.exit_status()?;
            Ok(CommandOutput {
                stdout,
                stderr,
                exit_code,
            })
        })
        .await
    }

    async fn close(&self) -> Result<(), SshError> {
        debug!("Closing SSH session to {}", self.host);
        self.dispatch(move |session| {
            let session = session.lock().unwrap();
            session.disconnect(None, "cleanup", None)?;
            Ok(())
        })
        .await
    }
}

fn exec_capture(session: &Mutex<ssh2::Session>, cmd: &str) -> Result<CommandOutput, SshError> {
    let session = session.lock().unwrap();
    let mut channel = session.channel_session()?;
    channel.exec(cmd)?;
    let mut stdout = Vec::new();
    channel.read_to_end(&mut stdout)?;
    let mut stderr = Vec::new();
    channel.stderr().read_to_end(&mut stderr)?;
    channel.wait_close()?;
    let exit_code = channel.exit_status()?;
    Ok(CommandOutput {
        stdout,
        stderr,
        exit_code,
    })
}

/// Dials instance hosts with public-key authentication.
#[derive(Clone)]
pub struct Ssh2Dialer {
    username: String,
    private_key: PathBuf,
    port: u16,
    timeout: Option<Duration>,
    cancel: CancellationToken,
}

impl Ssh2Dialer {
    pub fn new(
        username: impl Into<String>,
        private_key: impl Into<PathBuf>,
        port: u16,
        timeout: Option<Duration>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            username: username.into(),
            private_key: private_key.into(),
            port,
            timeout,
            cancel,
        }
    }
}

#[async_trait]
impl SshDialer for Ssh2Dialer {
    async fn dial(&self, host: &str) -> Result<Box<dyn SshConnection>, SshError> {
        debug!("Dialing {}@{}:{}", self.username, host, self.port);
        let host = host.to_string();
        let username = self.username.clone();
        let private_key = self.private_key.clone();
        let port = self.port;

        let connect = tokio::task::spawn_blocking(move || {
            let tcp = TcpStream::connect((host.as_str(), port)).map_err(|source| {
                SshError::Connect {
                    host: host.clone(),
                    source,
                }
            })?;
            let mut session = ssh2::Session::new()?;
            session.set_tcp_stream(tcp);
            session
                .handshake()
                .map_err(|source| SshError::Handshake {
                    host: host.clone(),
                    source,
                })?;
            session
                .userauth_pubkey_file(&username, None, &private_key, None)
                .map_err(|source| SshError::Auth {
                    username: username.clone(),
                    host: host.clone(),
                    source,
                })?;
            Ok::<_, SshError>((host, session))
        });

        let (host, session) = match connect.await {
            Ok(result) => result?,
            Err(err) => return Err(SshError::Task(err.to_string())),
        };

        Ok(Box::new(Ssh2Connection::new(
            host,
            session,
            self.timeout,
            self.cancel.clone(),
        )))
    }
}
