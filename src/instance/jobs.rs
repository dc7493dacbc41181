// instance/jobs.rs
//
// Classification of discovered scripts into jobs, and job selectors

use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::job::Job;
use super::metadata::JobMetadata;
use super::scripts::Script;

/// The jobs discovered on one instance, ordered by job name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Jobs(Vec<Job>);

impl Jobs {
    /// Group a flat list of discovered script paths into jobs.
    ///
    /// Pure and deterministic: scripts with unrecognized names are ignored,
    /// jobs that end up with no recognized script are dropped, and metadata
    /// is attached only on an exact job-name match. The resulting jobs are
    /// ordered lexicographically by name.
    pub fn classify(
        scripts: impl IntoIterator<Item = Script>,
        metadata: &HashMap<String, JobMetadata>,
    ) -> Jobs {
        let mut grouped: BTreeMap<String, Vec<Script>> = BTreeMap::new();
        for script in scripts {
            if script.kind().is_none() {
                continue;
            }
            let Some(job_name) = script.job_name().map(str::to_string) else {
                continue;
            };
            grouped.entry(job_name).or_default().push(script);
        }

        Jobs(
            grouped
                .into_iter()
                .map(|(name, scripts)| {
                    let names = metadata.get(&name).cloned().unwrap_or_default();
                    Job::new(name, scripts, names)
                })
                .collect(),
        )
    }

    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn backupable(&self) -> Vec<&Job> {
        self.0.iter().filter(|j| j.is_backupable()).collect()
    }

    pub fn restorable(&self) -> Vec<&Job> {
        self.0.iter().filter(|j| j.is_restorable()).collect()
    }

    pub fn pre_backupable(&self) -> Vec<&Job> {
        self.0.iter().filter(|j| j.is_pre_backupable()).collect()
    }

    pub fn post_backupable(&self) -> Vec<&Job> {
        self.0.iter().filter(|j| j.is_post_backupable()).collect()
    }

    pub fn with_named_blobs(&self) -> Vec<&Job> {
        self.0.iter().filter(|j| j.has_named_blob()).collect()
    }

    /// Distinct blob names produced on this instance, sorted.
    pub fn named_blobs(&self) -> Vec<&str> {
        self.0
            .iter()
            .filter_map(Job::blob_name)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn any_are_backupable(&self) -> bool {
        self.0.iter().any(Job::is_backupable)
    }

    pub fn any_are_restorable(&self) -> bool {
        self.0.iter().any(Job::is_restorable)
    }

    pub fn any_are_pre_backupable(&self) -> bool {
        self.0.iter().any(Job::is_pre_backupable)
    }

    pub fn any_are_post_backupable(&self) -> bool {
        self.0.iter().any(Job::is_post_backupable)
    }
}

impl<'a> IntoIterator for &'a Jobs {
    type Item = &'a Job;
    type IntoIter = std::slice::Iter<'a, Job>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scripts(paths: &[&str]) -> Vec<Script> {
        paths.iter().map(|p| Script::new(*p)).collect()
    }

    fn names(pairs: &[(&str, &str)]) -> HashMap<String, JobMetadata> {
        pairs
            .iter()
            .map(|(job, blob)| {
                (
                    job.to_string(),
                    JobMetadata {
                        backup_name: Some(blob.to_string()),
                        restore_name: None,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn groups_scripts_into_jobs_by_job_name() {
        let jobs = Jobs::classify(
            scripts(&[
                "/var/vcap/jobs/foo/bin/p-backup",
                "/var/vcap/jobs/bar/bin/p-backup",
            ]),
            &HashMap::new(),
        );

        assert_eq!(jobs.len(), 2);
        assert!(jobs.iter().all(Job::is_backupable));
        assert!(jobs.named_blobs().is_empty());
    }

    #[test]
    fn selectors_partition_jobs_by_lifecycle_phase() {
        let jobs = Jobs::classify(
            scripts(&[
                "/var/vcap/jobs/foo/bin/p-pre-backup-lock",
                "/var/vcap/jobs/foo/bin/p-backup",
                "/var/vcap/jobs/bar/bin/p-restore",
            ]),
            &HashMap::new(),
        );

        let pre_backupable = jobs.pre_backupable();
        assert_eq!(pre_backupable.len(), 1);
        assert_eq!(pre_backupable[0].name(), "foo");

        let restorable = jobs.restorable();
        assert_eq!(restorable.len(), 1);
        assert_eq!(restorable[0].name(), "bar");

        assert!(jobs.any_are_backupable());
        assert!(jobs.any_are_pre_backupable());
        assert!(!jobs.any_are_post_backupable());
    }

    #[test]
    fn classification_is_order_insensitive() {
        let forward = scripts(&[
            "/var/vcap/jobs/foo/bin/p-backup",
            "/var/vcap/jobs/foo/bin/p-pre-backup-lock",
            "/var/vcap/jobs/bar/bin/p-restore",
            "/var/vcap/jobs/baz/bin/p-backup",
        ]);
        let mut shuffled = forward.clone();
        shuffled.rotate_left(2);
        shuffled.swap(0, 1);

        let metadata = names(&[("baz", "a-blob")]);
        assert_eq!(
            Jobs::classify(forward, &metadata),
            Jobs::classify(shuffled, &metadata)
        );
    }

    #[test]
    fn drops_jobs_with_no_recognized_scripts() {
        let jobs = Jobs::classify(
            scripts(&[
                "/var/vcap/jobs/foo/bin/ctl",
                "/var/vcap/jobs/foo/bin/drain",
                "/var/vcap/jobs/bar/bin/p-backup",
            ]),
            &HashMap::new(),
        );

        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs.iter().next().unwrap().name(), "bar");
    }

    #[test]
    fn attaches_blob_names_on_exact_job_match() {
        let jobs = Jobs::classify(
            scripts(&[
                "/var/vcap/jobs/bar/bin/p-backup",
                "/var/vcap/jobs/bar/bin/p-restore",
                "/var/vcap/jobs/foo/bin/p-backup",
                "/var/vcap/jobs/baz/bin/p-restore",
            ]),
            &names(&[("bar", "my-cool-blob")]),
        );

        assert_eq!(jobs.named_blobs(), vec!["my-cool-blob"]);
        let named = jobs.with_named_blobs();
        assert_eq!(named.len(), 1);
        assert_eq!(named[0].name(), "bar");
    }

    #[test]
    fn collects_distinct_blob_names() {
        let jobs = Jobs::classify(
            scripts(&[
                "/var/vcap/jobs/foo/bin/p-backup",
                "/var/vcap/jobs/bar/bin/p-backup",
            ]),
            &names(&[("foo", "a-backup"), ("bar", "another-backup")]),
        );

        assert_eq!(jobs.named_blobs(), vec!["a-backup", "another-backup"]);
    }
}
