// instance/job.rs
//
// A job and the lifecycle scripts it owns

use super::metadata::JobMetadata;
use super::scripts::{Script, ScriptKind};

/// A logical bundle of lifecycle scripts installed under one job name.
///
/// Jobs are produced by classification and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    name: String,
    scripts: Vec<Script>,
    blob_name: Option<String>,
    restore_name: Option<String>,
}

impl Job {
    pub fn new(name: impl Into<String>, mut scripts: Vec<Script>, metadata: JobMetadata) -> Self {
        scripts.sort();
        scripts.dedup();
        Self {
            name: name.into(),
            scripts,
            blob_name: metadata.backup_name.filter(|n| !n.is_empty()),
            restore_name: metadata.restore_name.filter(|n| !n.is_empty()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scripts(&self) -> &[Script] {
        &self.scripts
    }

    /// The script of the given kind, if the job installed one.
    pub fn script(&self, kind: ScriptKind) -> Option<&Script> {
        self.scripts.iter().find(|s| s.kind() == Some(kind))
    }

    pub fn is_backupable(&self) -> bool {
        self.script(ScriptKind::Backup).is_some()
    }

    pub fn is_restorable(&self) -> bool {
        self.script(ScriptKind::Restore).is_some()
    }

    pub fn is_pre_backupable(&self) -> bool {
        self.script(ScriptKind::PreBackupLock).is_some()
    }

    pub fn is_post_backupable(&self) -> bool {
        self.script(ScriptKind::PostBackupUnlock).is_some()
    }

    pub fn has_named_blob(&self) -> bool {
        self.blob_name.is_some()
    }

    /// The blob this job's backup script writes into, when named.
    pub fn blob_name(&self) -> Option<&str> {
        self.blob_name.as_deref()
    }

    /// The blob this job's restore script consumes: its `restore_name`
    /// when present, otherwise the blob it produces itself.
    pub fn restore_blob_name(&self) -> Option<&str> {
        self.restore_name.as_deref().or(self.blob_name.as_deref())
    }
}
