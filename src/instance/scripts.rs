// instance/scripts.rs
//
// Lifecycle script paths and the closed set of recognized script names

use std::fmt;

/// Directory where co-resident jobs install their lifecycle scripts.
pub const JOBS_DIR: &str = "/var/vcap/jobs";

/// Remote staging directory written by backup scripts and read by drain.
pub const REMOTE_ARTIFACT_DIR: &str = "/var/vcap/store/backup";

/// The closed set of lifecycle script names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptKind {
    PreBackupLock,
    Backup,
    PostBackupUnlock,
    Restore,
    Metadata,
}

impl ScriptKind {
    /// Map a script file name to its kind. Unrecognized names are ignored
    /// by the classifier rather than treated as errors.
    pub fn from_script_name(name: &str) -> Option<Self> {
        match name {
            "p-pre-backup-lock" => Some(ScriptKind::PreBackupLock),
            "p-backup" => Some(ScriptKind::Backup),
            "p-post-backup-unlock" => Some(ScriptKind::PostBackupUnlock),
            "p-restore" => Some(ScriptKind::Restore),
            "metadata" => Some(ScriptKind::Metadata),
            _ => None,
        }
    }

    pub fn script_name(self) -> &'static str {
        match self {
            ScriptKind::PreBackupLock => "p-pre-backup-lock",
            ScriptKind::Backup => "p-backup",
            ScriptKind::PostBackupUnlock => "p-post-backup-unlock",
            ScriptKind::Restore => "p-restore",
            ScriptKind::Metadata => "metadata",
        }
    }
}

impl fmt::Display for ScriptKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ScriptKind::PreBackupLock => write!(f, "pre-backup lock"),
            ScriptKind::Backup => write!(f, "backup"),
            ScriptKind::PostBackupUnlock => write!(f, "post-backup unlock"),
            ScriptKind::Restore => write!(f, "restore"),
            ScriptKind::Metadata => write!(f, "metadata"),
        }
    }
}

/// A script path of the form `/var/vcap/jobs/<jobName>/bin/<scriptName>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Script(String);

impl Script {
    pub fn new(path: impl Into<String>) -> Self {
        Script(path.into())
    }

    pub fn path(&self) -> &str {
        &self.0
    }

    /// The owning job's name, when the path matches the expected layout.
    pub fn job_name(&self) -> Option<&str> {
        self.parts().map(|(job, _)| job)
    }

    /// The lifecycle kind, when the script name is in the closed set.
    pub fn kind(&self) -> Option<ScriptKind> {
        self.parts()
            .and_then(|(_, name)| ScriptKind::from_script_name(name))
    }

    fn parts(&self) -> Option<(&str, &str)> {
        let rest = self.0.strip_prefix(JOBS_DIR)?.strip_prefix('/')?;
        let mut segments = rest.split('/');
        let job = segments.next()?;
        let bin = segments.next()?;
        let name = segments.next()?;
        if bin != "bin" || job.is_empty() || name.is_empty() || segments.next().is_some() {
            return None;
        }
        Some((job, name))
    }
}

impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
