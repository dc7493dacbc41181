// instance/metadata.rs
//
// YAML emitted by a job's `metadata` script

use serde::Deserialize;

use super::error::InstanceError;

/// Output of a job's `metadata` script.
///
/// `backup_name` names the blob the job's backup script writes;
/// `restore_name` names the blob its restore script consumes when that
/// differs from the produced one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct JobMetadata {
    #[serde(default)]
    pub backup_name: Option<String>,
    #[serde(default)]
    pub restore_name: Option<String>,
}

impl JobMetadata {
    /// Parse the stdout of a metadata script.
    pub fn parse(job: &str, yaml: &str) -> Result<Self, InstanceError> {
        serde_yaml::from_str(yaml).map_err(|source| InstanceError::InvalidMetadata {
            job: job.to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_backup_and_restore_names() {
        let metadata = JobMetadata::parse(
            "redis",
            "---\nbackup_name: a-backup\nrestore_name: other-backup\n",
        )
        .unwrap();
        assert_eq!(metadata.backup_name.as_deref(), Some("a-backup"));
        assert_eq!(metadata.restore_name.as_deref(), Some("other-backup"));
    }

    #[test]
    fn restore_name_is_optional() {
        let metadata = JobMetadata::parse("redis", "backup_name: a-backup\n").unwrap();
        assert_eq!(metadata.backup_name.as_deref(), Some("a-backup"));
        assert_eq!(metadata.restore_name, None);
    }

    #[test]
    fn rejects_malformed_yaml() {
        let err = JobMetadata::parse("redis", ":: not yaml ::").unwrap_err();
        assert!(err.to_string().contains("redis"));
    }
}
