//! Submission metadata store.
//!
//! The pipeline only reads from the store: it lists submissions, looks up the
//! output records of selected submissions and asks for a short-lived URL per
//! output. [`ManifestStore`] serves all three from a JSON manifest on disk.
//!
//! Manifest layout:
//! ```json
//! {
//!   "submissions": [{"id": "s1", "name": "RunA", "status": "completed", "workflow_ref": "bracken"}],
//!   "outputs": [{"submission_id": "s1", "file_name": "RunA.bracken_long_format.tsv", "location": "s1/long.tsv"}]
//! }
//! ```
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::StoreError;
use crate::fetch::{file_url, Location};
use crate::model::{Submission, SubmissionStatus};

/// One output file attached to a submission.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
pub struct OutputRecord {
    pub submission_id: String,
    pub file_name: String,
    /// Path (relative to the manifest) or URL of the file.
    pub location: String,
}

/// Selects which of a submission's outputs a pipeline reads.
///
/// A file matches when its name, with the extension removed, ends with the
/// marker (`RunA.bracken_long_format.tsv` matches `bracken_long_format`).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OutputPredicate {
    marker: String,
}

impl OutputPredicate {
    pub fn new(marker: impl Into<String>) -> Self {
        OutputPredicate { marker: marker.into() }
    }

    /// Long-format per-taxon detection output.
    pub fn long_format() -> Self {
        Self::new("bracken_long_format")
    }

    /// Per-sample read count summary.
    pub fn summary_stats() -> Self {
        Self::new("summary_stats")
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    pub fn matches(&self, file_name: &str) -> bool {
        let stem = match file_name.rsplit_once('.') {
            Some((stem, _)) => stem,
            None => file_name,
        };
        stem.ends_with(&self.marker)
    }
}

/// Filter for [`SubmissionStore::list_submissions`].
#[derive(Clone, Debug, Default)]
pub struct SubmissionFilter {
    pub status: Option<SubmissionStatus>,
    /// Case-insensitive substring of the submission name.
    pub name_contains: Option<String>,
}

impl SubmissionFilter {
    pub fn completed() -> Self {
        SubmissionFilter { status: Some(SubmissionStatus::Completed), name_contains: None }
    }

    pub fn accepts(&self, s: &Submission) -> bool {
        let status_ok = self.status.map_or(true, |st| s.status == st);
        let name_ok = self
            .name_contains
            .as_ref()
            .map_or(true, |n| s.name.to_lowercase().contains(&n.to_lowercase()));
        status_ok && name_ok
    }
}

/// Read-only, idempotent view of the submission metadata store.
#[async_trait]
pub trait SubmissionStore: Send + Sync {
    async fn list_submissions(&self, filter: &SubmissionFilter) -> Result<Vec<Submission>, StoreError>;

    /// Outputs of the given submissions whose file name satisfies `predicate`.
    async fn find_outputs(
        &self,
        submission_ids: &[String],
        predicate: &OutputPredicate,
    ) -> Result<Vec<OutputRecord>, StoreError>;

    /// Issue a short-lived URL for one output.
    async fn issue_url(&self, output: &OutputRecord) -> Result<String, StoreError>;
}

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    submissions: Vec<Submission>,
    #[serde(default)]
    outputs: Vec<OutputRecord>,
}

/// Metadata store backed by a JSON manifest.
#[derive(Debug, Clone)]
pub struct ManifestStore {
    base_dir: PathBuf,
    submissions: Vec<Submission>,
    outputs: Vec<OutputRecord>,
}

impl ManifestStore {
    pub fn new(base_dir: impl Into<PathBuf>, submissions: Vec<Submission>, outputs: Vec<OutputRecord>) -> Self {
        ManifestStore { base_dir: base_dir.into(), submissions, outputs }
    }

    /// Load a manifest; relative output locations resolve against its directory.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|source| StoreError::ManifestIo { path: path.display().to_string(), source })?;
        let manifest: Manifest = serde_json::from_str(&text)
            .map_err(|source| StoreError::ManifestFormat { path: path.display().to_string(), source })?;
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        tracing::debug!(
            manifest = %path.display(),
            submissions = manifest.submissions.len(),
            outputs = manifest.outputs.len(),
            "loaded manifest"
        );
        Ok(ManifestStore::new(base_dir, manifest.submissions, manifest.outputs))
    }

    pub fn submission(&self, id: &str) -> Option<&Submission> {
        self.submissions.iter().find(|s| s.id == id)
    }
}

#[async_trait]
impl SubmissionStore for ManifestStore {
    async fn list_submissions(&self, filter: &SubmissionFilter) -> Result<Vec<Submission>, StoreError> {
        Ok(self.submissions.iter().filter(|s| filter.accepts(s)).cloned().collect())
    }

    async fn find_outputs(
        &self,
        submission_ids: &[String],
        predicate: &OutputPredicate,
    ) -> Result<Vec<OutputRecord>, StoreError> {
        Ok(self
            .outputs
            .iter()
            .filter(|o| submission_ids.contains(&o.submission_id) && predicate.matches(&o.file_name))
            .cloned()
            .collect())
    }

    async fn issue_url(&self, output: &OutputRecord) -> Result<String, StoreError> {
        match Location::parse(&output.location) {
            Location::Http(url) => Ok(url),
            Location::Local(path) => {
                let path = if path.is_absolute() { path } else { self.base_dir.join(path) };
                // Refuse to hand out URLs for files that are not there.
                if !path.is_file() {
                    return Err(StoreError::UrlNotIssued {
                        submission_id: output.submission_id.clone(),
                        file_name: output.file_name.clone(),
                    });
                }
                let path = std::fs::canonicalize(&path).unwrap_or(path);
                Ok(file_url(&path))
            }
        }
    }
}

#[cfg(test)]
mod manifest_tests {
    use super::*;

    fn write_manifest(dir: &Path) -> PathBuf {
        std::fs::write(dir.join("a.tsv"), "x\n1\n").unwrap();
        let manifest = r#"{
            "submissions": [
                {"id": "s1", "name": "RunA", "status": "completed", "workflowRef": "bracken"},
                {"id": "s2", "name": "RunB", "status": "processing"}
            ],
            "outputs": [
                {"submission_id": "s1", "file_name": "RunA.bracken_long_format.tsv", "location": "a.tsv"},
                {"submission_id": "s1", "file_name": "RunA.summary_stats.tsv", "location": "missing.tsv"}
            ]
        }"#;
        let p = dir.join("manifest.json");
        std::fs::write(&p, manifest).unwrap();
        p
    }

    #[test]
    fn predicate_matches_on_stem_suffix() {
        let p = OutputPredicate::long_format();
        assert!(p.matches("RunA.bracken_long_format.tsv"));
        assert!(p.matches("bracken_long_format.parquet"));
        assert!(!p.matches("RunA.summary_stats.tsv"));
        assert!(!p.matches("bracken_long_format_old.tsv"));
    }

    #[tokio::test]
    async fn lists_and_filters_submissions() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestStore::from_json_file(write_manifest(dir.path())).unwrap();
        let all = store.list_submissions(&SubmissionFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].workflow_ref, "bracken");
        let done = store.list_submissions(&SubmissionFilter::completed()).await.unwrap();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].name, "RunA");
        let named = SubmissionFilter { status: None, name_contains: Some("runb".into()) };
        assert_eq!(store.list_submissions(&named).await.unwrap()[0].id, "s2");
    }

    #[tokio::test]
    async fn issues_file_urls_only_for_existing_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestStore::from_json_file(write_manifest(dir.path())).unwrap();
        let ids = vec!["s1".to_string()];
        let long = store.find_outputs(&ids, &OutputPredicate::long_format()).await.unwrap();
        assert_eq!(long.len(), 1);
        let url = store.issue_url(&long[0]).await.unwrap();
        assert!(url.starts_with("file://") && url.ends_with("a.tsv"));

        let summary = store.find_outputs(&ids, &OutputPredicate::summary_stats()).await.unwrap();
        let err = store.issue_url(&summary[0]).await.unwrap_err();
        assert!(matches!(err, StoreError::UrlNotIssued { .. }));
    }

    #[test]
    fn malformed_manifest_is_a_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("m.json");
        std::fs::write(&p, "{ not json").unwrap();
        assert!(matches!(ManifestStore::from_json_file(&p), Err(StoreError::ManifestFormat { .. })));
    }
}
