// ssh/fake.rs
//
// Scriptable in-memory SSH connection for tests

use std::io::{Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::connection::{CommandOutput, SshConnection, SshDialer};
use super::error::SshError;

#[derive(Clone)]
enum Response {
    Output(CommandOutput),
    TransportError,
    Canceled,
}

struct Inner {
    stubs: Mutex<Vec<(String, Response)>>,
    stream_body: Mutex<Vec<u8>>,
    commands: Mutex<Vec<String>>,
    uploads: Mutex<Vec<(String, Vec<u8>)>>,
    close_count: AtomicUsize,
}

/// Fake connection that answers commands from stubbed responses.
///
/// Commands with no matching stub succeed with empty output. Clones share
/// state, so tests can keep one handle and hand another to the code under
/// test.
#[derive(Clone)]
pub struct FakeSshConnection {
    inner: Arc<Inner>,
}

impl FakeSshConnection {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                stubs: Mutex::new(Vec::new()),
                stream_body: Mutex::new(Vec::new()),
                commands: Mutex::new(Vec::new()),
                uploads: Mutex::new(Vec::new()),
                close_count: AtomicUsize::new(0),
            }),
        }
    }

    /// Answer any command containing `pattern` with `output`. First match wins.
    pub fn stub(&self, pattern: &str, output: CommandOutput) -> &Self {
        self.inner
            .stubs
            .lock()
            .unwrap()
            .push((pattern.to_string(), Response::Output(output)));
        self
    }

    /// Answer any command containing `pattern` with stdout and exit code 0.
    pub fn stub_stdout(&self, pattern: &str, stdout: &str) -> &Self {
        self.stub(
            pattern,
            CommandOutput {
                stdout: stdout.as_bytes().to_vec(),
                stderr: Vec::new(),
                exit_code: 0,
            },
        )
    }

    /// Answer any command containing `pattern` with stderr and an exit code.
    pub fn stub_failure(&self, pattern: &str, exit_code: i32, stderr: &str) -> &Self {
        self.stub(
            pattern,
            CommandOutput {
                stdout: Vec::new(),
                stderr: stderr.as_bytes().to_vec(),
                exit_code,
            },
        )
    }

    /// Fail any command containing `pattern` with a transport error.
    pub fn stub_transport_error(&self, pattern: &str) -> &Self {
        self.inner
            .stubs
            .lock()
            .unwrap()
            .push((pattern.to_string(), Response::TransportError));
        self
    }

    /// Fail any command containing `pattern` as if the run was canceled.
    pub fn stub_canceled(&self, pattern: &str) -> &Self {
        self.inner
            .stubs
            .lock()
            .unwrap()
            .push((pattern.to_string(), Response::Canceled));
        self
    }

    /// Bytes written to the caller's writer by `stream`.
    pub fn set_stream_body(&self, body: &[u8]) -> &Self {
        *self.inner.stream_body.lock().unwrap() = body.to_vec();
        self
    }

    /// Every command seen, in order, across run/stream/stream_stdin.
    pub fn commands(&self) -> Vec<String> {
        self.inner.commands.lock().unwrap().clone()
    }

    /// Data fed to `stream_stdin`, per command.
    pub fn uploads(&self) -> Vec<(String, Vec<u8>)> {
        self.inner.uploads.lock().unwrap().clone()
    }

    pub fn close_count(&self) -> usize {
        self.inner.close_count.load(Ordering::SeqCst)
    }

    fn respond(&self, cmd: &str) -> Result<CommandOutput, SshError> {
        self.inner.commands.lock().unwrap().push(cmd.to_string());
        let stubs = self.inner.stubs.lock().unwrap();
        for (pattern, response) in stubs.iter() {
            if cmd.contains(pattern.as_str()) {
                return match response {
                    Response::Output(output) => Ok(output.clone()),
                    Response::TransportError => {
                        Err(SshError::Task("connection lost".to_string()))
                    }
                    Response::Canceled => Err(SshError::Canceled),
                };
            }
        }
        Ok(CommandOutput::default())
    }
}

#[async_trait]
impl SshConnection for FakeSshConnection {
    async fn run(&self, cmd: &str) -> Result<CommandOutput, SshError> {
        self.respond(cmd)
    }

    async fn stream(
        &self,
        cmd: &str,
        mut writer: Box<dyn Write + Send>,
    ) -> Result<CommandOutput, SshError> {
        let output = self.respond(cmd)?;
        if output.success() {
            writer.write_all(&self.inner.stream_body.lock().unwrap())?;
            writer.flush()?;
        }
        Ok(output)
    }

    async fn stream_stdin(
        &self,
        cmd: &str,
        mut reader: Box<dyn Read + Send>,
    ) -> Result<CommandOutput, SshError> {
        let output = self.respond(cmd)?;
        let mut body = Vec::new();
        reader.read_to_end(&mut body)?;
        self.inner
            .uploads
            .lock()
            .unwrap()
            .push((cmd.to_string(), body));
        Ok(output)
    }

    async fn close(&self) -> Result<(), SshError> {
        self.inner.close_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Dialer handing out preconfigured fake connections keyed by host.
pub struct FakeSshDialer {
    connections: Mutex<std::collections::HashMap<String, FakeSshConnection>>,
}

impl FakeSshDialer {
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(std::collections::HashMap::new()),
        }
    }

    pub fn insert(&self, host: &str, connection: FakeSshConnection) {
        self.connections
            .lock()
            .unwrap()
            .insert(host.to_string(), connection);
    }
}

#[async_trait]
impl SshDialer for FakeSshDialer {
    async fn dial(&self, host: &str) -> Result<Box<dyn SshConnection>, SshError> {
        match self.connections.lock().unwrap().get(host) {
            Some(connection) => Ok(Box::new(connection.clone())),
            None => Err(SshError::Task(format!("no fake connection for {}", host))),
        }
    }
}
