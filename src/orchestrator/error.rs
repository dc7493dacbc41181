// orchestrator/error.rs
//
// Typed orchestration errors and their ordered accumulation

use std::fmt;

use thiserror::Error;

use crate::deployment::DeploymentError;

/// Orchestration phase a failure or cancellation is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Check,
    Lock,
    Backup,
    PostBackupUnlock,
    Drain,
    Restore,
    Cleanup,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Phase::Check => write!(f, "Pre-check"),
            Phase::Lock => write!(f, "Pre-backup lock"),
            Phase::Backup => write!(f, "Backup"),
            Phase::PostBackupUnlock => write!(f, "Post-backup unlock"),
            Phase::Drain => write!(f, "Drain"),
            Phase::Restore => write!(f, "Restore"),
            Phase::Cleanup => write!(f, "Cleanup"),
        }
    }
}

/// One recorded orchestration failure, tagged by phase.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("{0}")]
    General(String),

    #[error("{0}")]
    Check(String),

    #[error("Pre-backup lock failed: {0}")]
    Lock(String),

    #[error("Backup failed: {0}")]
    Backup(String),

    #[error("Post-backup unlock failed: {0}")]
    PostBackupUnlock(String),

    #[error("Drain failed: {0}")]
    Drain(String),

    #[error("Restore failed: {0}")]
    Restore(String),

    #[error("Cleanup failed: {0}")]
    Cleanup(String),

    #[error("{0} canceled")]
    Canceled(Phase),
}

impl OrchestratorError {
    /// Record a phase failure, keeping cancellation distinguishable from
    /// an ordinary remote error.
    pub fn phase(phase: Phase, err: &DeploymentError) -> Self {
        if err.is_canceled() {
            return OrchestratorError::Canceled(phase);
        }
        let message = err.to_string();
        match phase {
            Phase::Check => OrchestratorError::Check(message),
            Phase::Lock => OrchestratorError::Lock(message),
            Phase::Backup => OrchestratorError::Backup(message),
            Phase::PostBackupUnlock => OrchestratorError::PostBackupUnlock(message),
            Phase::Drain => OrchestratorError::Drain(message),
            Phase::Restore => OrchestratorError::Restore(message),
            Phase::Cleanup => OrchestratorError::Cleanup(message),
        }
    }

    /// Fatal kinds forbid draining: a failed or canceled lock or backup
    /// means the staged data cannot be trusted as a complete backup.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            OrchestratorError::Lock(_)
                | OrchestratorError::Backup(_)
                | OrchestratorError::Canceled(Phase::Lock)
                | OrchestratorError::Canceled(Phase::Backup)
        )
    }

    fn exit_bit(&self) -> i32 {
        match self {
            OrchestratorError::PostBackupUnlock(_)
            | OrchestratorError::Canceled(Phase::PostBackupUnlock) => 8,
            OrchestratorError::Cleanup(_) | OrchestratorError::Canceled(Phase::Cleanup) => 16,
            _ => 1,
        }
    }
}

/// Ordered, additive accumulation of orchestration errors.
///
/// Phases append to it and consult `is_fatal`; nothing is ever dropped.
/// The accumulation renders one line per recorded error and maps to a
/// process exit code bitmask, so callers can tell a run that only failed
/// cleanup from a failed backup.
#[derive(Debug, Default)]
pub struct Error {
    errors: Vec<OrchestratorError>,
}

impl Error {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: OrchestratorError) {
        self.errors.push(error);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn errors(&self) -> &[OrchestratorError] {
        &self.errors
    }

    /// Whether any recorded error forbids draining.
    pub fn is_fatal(&self) -> bool {
        self.errors.iter().any(OrchestratorError::is_fatal)
    }

    /// Bitmask exit code: 1 for general failures, 8 for post-backup-unlock
    /// failures, 16 for cleanup failures. 0 when nothing was recorded.
    pub fn exit_code(&self) -> i32 {
        self.errors
            .iter()
            .fold(0, |code, error| code | error.exit_bit())
    }

    pub fn into_result(self) -> Result<(), Error> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, error) in self.errors.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", error)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}
