//! Tabular merge: many sources → one provenance-tagged root relation.
//!
//! A rebuild runs under the root table's lock:
//! 1. load each source into its own scoped table, skipping failures,
//! 2. union the loaded tables into a staging table, each row tagged with
//!    `submission = source.name`, then drop the per-source tables,
//! 3. decode the staged relation,
//! 4. replace the root with the staged relation and drop the staging table.
//!
//! The root is only ever replaced whole, in step 4. A failure anywhere, or a
//! newer request superseding this one, leaves the previous root in place. If
//! every source fails the root becomes an empty relation.
use std::sync::Arc;

use polars::prelude::DataFrame;
use tracing::{debug, info, warn};

use crate::error::{EngineError, PipelineError};
use crate::engine::TabularEngine;
use crate::model::{Source, SUBMISSION_COLUMN};
use crate::query::{Query, TableName, TaggedPart};
use crate::sequence::TableLocks;

/// A source that made it into the root relation.
#[derive(Clone, Debug)]
pub struct LoadedSource {
    pub source: Source,
    pub rows: usize,
}

/// A source skipped during a rebuild, with the reason.
#[derive(Clone, Debug)]
pub struct FailedSource {
    pub source: Source,
    pub reason: String,
}

/// Result of one rebuild.
#[derive(Clone, Debug)]
pub struct MergeReport {
    pub table: TableName,
    pub frame: DataFrame,
    pub loaded: Vec<LoadedSource>,
    pub failed: Vec<FailedSource>,
}

impl MergeReport {
    pub fn all_failed(&self) -> bool {
        self.loaded.is_empty() && !self.failed.is_empty()
    }
}

/// Outcome of a gated rebuild.
#[derive(Debug)]
pub enum Rebuilt<T> {
    /// `root` now holds the new relation; `value` is its decoded form.
    Promoted { value: T, report: MergeReport },
    /// A newer request started first; `root` was not touched.
    Stale,
}

/// Rebuilds root relations on a shared engine.
pub struct MergeEngine<E: ?Sized> {
    engine: Arc<E>,
    locks: Arc<TableLocks>,
}

impl<E: ?Sized> Clone for MergeEngine<E> {
    fn clone(&self) -> Self {
        MergeEngine { engine: Arc::clone(&self.engine), locks: Arc::clone(&self.locks) }
    }
}

impl<E: TabularEngine + ?Sized> MergeEngine<E> {
    pub fn new(engine: Arc<E>, locks: Arc<TableLocks>) -> Self {
        MergeEngine { engine, locks }
    }

    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    pub fn locks(&self) -> &Arc<TableLocks> {
        &self.locks
    }

    /// Rebuild `root` from `sources`, in source order, decoding the result
    /// with `decode` before it becomes visible.
    ///
    /// Runs under the root table's lock. `is_current` is asked once the lock
    /// is held and again before promotion; a `false` answer leaves `root`
    /// untouched and yields [`Rebuilt::Stale`]. Any error also leaves `root`
    /// as it was.
    pub async fn rebuild_as<T, C, D>(
        &self,
        root: &TableName,
        sources: &[Source],
        is_current: C,
        decode: D,
    ) -> Result<Rebuilt<T>, PipelineError>
    where
        C: Fn() -> bool,
        D: FnOnce(&DataFrame) -> Result<T, EngineError>,
    {
        if sources.is_empty() {
            return Err(PipelineError::NoSources { table: root.to_string() });
        }
        let staging = TableName::staging(root)?;
        let _guard = self.locks.acquire(root).await;
        if !is_current() {
            debug!(%root, "request superseded before rebuild; skipping");
            return Ok(Rebuilt::Stale);
        }

        let (frame, loaded, failed) = self.stage(root, &staging, sources).await?;
        let value = match decode(&frame) {
            Ok(v) => v,
            Err(e) => {
                self.discard(&staging).await;
                return Err(e.into());
            }
        };
        if !is_current() {
            debug!(%root, "request superseded during rebuild; discarding");
            self.discard(&staging).await;
            return Ok(Rebuilt::Stale);
        }

        let promoted = self.engine.create_table(root, &Query::scan(&staging)).await;
        self.discard(&staging).await;
        promoted?;

        info!(%root, rows = frame.height(), loaded = loaded.len(), failed = failed.len(), "rebuilt root relation");
        Ok(Rebuilt::Promoted { value, report: MergeReport { table: root.clone(), frame, loaded, failed } })
    }

    /// Replace `root` with an empty relation, under its lock. Returns `false`
    /// (and leaves `root` alone) if `is_current` says the request is stale.
    pub async fn clear<C: Fn() -> bool>(&self, root: &TableName, is_current: C) -> Result<bool, PipelineError> {
        let _guard = self.locks.acquire(root).await;
        if !is_current() {
            return Ok(false);
        }
        self.engine.create_table(root, &Query::TaggedUnion(Vec::new())).await?;
        debug!(%root, "cleared root relation");
        Ok(true)
    }

    // Load every source into its scoped table and union them into `staging`.
    // Source tables are gone afterwards; `staging` is gone on error.
    async fn stage(
        &self,
        root: &TableName,
        staging: &TableName,
        sources: &[Source],
    ) -> Result<(DataFrame, Vec<LoadedSource>, Vec<FailedSource>), PipelineError> {
        let mut parts = Vec::with_capacity(sources.len());
        let mut loaded = Vec::new();
        let mut failed = Vec::new();
        for source in sources {
            let table = match TableName::for_source(root, &source.id) {
                Ok(t) => t,
                Err(e) => {
                    warn!(%root, source = %source.name, error = %e, "unusable source id; skipping");
                    failed.push(FailedSource { source: source.clone(), reason: e.to_string() });
                    continue;
                }
            };
            match self.engine.load_remote_file(&source.url, &table).await {
                Ok(rows) => {
                    parts.push(TaggedPart {
                        table,
                        column: SUBMISSION_COLUMN.to_string(),
                        tag: source.name.clone(),
                    });
                    loaded.push(LoadedSource { source: source.clone(), rows });
                }
                Err(e) => {
                    warn!(%root, source = %source.name, url = %source.url, error = %e, "source failed to load; skipping");
                    failed.push(FailedSource { source: source.clone(), reason: e.to_string() });
                }
            }
        }

        let union = Query::TaggedUnion(parts.clone());
        let created = self.engine.create_table(staging, &union).await;
        for part in &parts {
            self.discard(&part.table).await;
        }
        let frame = match created {
            Ok(_) => self.engine.execute(&Query::scan(staging)).await,
            Err(e) => Err(e),
        };
        match frame {
            Ok(f) => Ok((f, loaded, failed)),
            Err(e) => {
                self.discard(staging).await;
                Err(e.into())
            }
        }
    }

    async fn discard(&self, table: &TableName) {
        if let Err(e) = self.engine.drop_table(table).await {
            warn!(%table, error = %e, "failed to drop table");
        }
    }
}

#[cfg(test)]
mod merge_tests {
    use super::*;
    use crate::engine::PolarsEngine;
    use crate::fetch::file_url;
    use crate::model::taxon_records;
    use std::cell::Cell;
    use std::path::Path;

    const HEADER: &str = "name\ttaxonomy_id\ttaxonomy_lvl\tsample\tabundance_num\tabundance_frac\n";

    fn write_rows(dir: &Path, file: &str, sample: &str, n: usize) -> String {
        let mut text = HEADER.to_string();
        for i in 0..n {
            text.push_str(&format!("Taxon {i}\t{}\tS\t{sample}\t{}\t0.1\n", 1000 + i, 10 * i));
        }
        let p = dir.join(file);
        std::fs::write(&p, text).unwrap();
        file_url(&p)
    }

    fn merger() -> MergeEngine<PolarsEngine> {
        MergeEngine::new(Arc::new(PolarsEngine::new()), Arc::new(TableLocks::new()))
    }

    fn root() -> TableName {
        TableName::new("insights_root").unwrap()
    }

    async fn rebuild(m: &MergeEngine<PolarsEngine>, sources: &[Source]) -> MergeReport {
        match m.rebuild_as(&root(), sources, || true, |_| Ok(())).await.unwrap() {
            Rebuilt::Promoted { report, .. } => report,
            Rebuilt::Stale => panic!("rebuild reported stale"),
        }
    }

    async fn root_height(m: &MergeEngine<PolarsEngine>) -> usize {
        m.engine().execute(&Query::scan(&root())).await.unwrap().height()
    }

    #[tokio::test]
    async fn union_counts_rows_and_tags_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let sources = vec![
            Source { id: "s1".into(), url: write_rows(dir.path(), "a.tsv", "S1", 3), name: "RunA".into() },
            Source { id: "s2".into(), url: write_rows(dir.path(), "b.tsv", "S2", 5), name: "RunB".into() },
        ];
        let report = rebuild(&merger(), &sources).await;
        assert_eq!(report.frame.height(), 8);
        let rows = taxon_records(&report.frame).unwrap();
        assert_eq!(rows.iter().filter(|r| r.submission == "RunA").count(), 3);
        assert_eq!(rows.iter().filter(|r| r.submission == "RunB").count(), 5);
        assert!(rows.iter().all(|r| r.submission != "s1" && r.submission != "s2"));
    }

    #[tokio::test]
    async fn decoded_value_comes_from_the_staged_relation() {
        let dir = tempfile::tempdir().unwrap();
        let sources = vec![Source { id: "s1".into(), url: write_rows(dir.path(), "a.tsv", "S1", 3), name: "RunA".into() }];
        let out = merger().rebuild_as(&root(), &sources, || true, taxon_records).await.unwrap();
        match out {
            Rebuilt::Promoted { value, .. } => assert_eq!(value.len(), 3),
            Rebuilt::Stale => panic!("rebuild reported stale"),
        }
    }

    #[tokio::test]
    async fn failed_sources_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let sources = vec![
            Source { id: "s1".into(), url: write_rows(dir.path(), "a.tsv", "S1", 3), name: "RunA".into() },
            Source { id: "s2".into(), url: file_url(&dir.path().join("gone.tsv")), name: "RunB".into() },
        ];
        let report = rebuild(&merger(), &sources).await;
        assert_eq!(report.frame.height(), 3);
        assert_eq!(report.loaded.len(), 1);
        assert_eq!(report.failed[0].source.name, "RunB");
        assert!(!report.all_failed());
    }

    #[tokio::test]
    async fn all_failing_yields_empty_relation() {
        let dir = tempfile::tempdir().unwrap();
        let sources = vec![Source { id: "s1".into(), url: file_url(&dir.path().join("gone.tsv")), name: "RunA".into() }];
        let m = merger();
        let report = rebuild(&m, &sources).await;
        assert_eq!(report.frame.height(), 0);
        assert!(report.all_failed());
        assert_eq!(root_height(&m).await, 0);
    }

    #[tokio::test]
    async fn rebuild_is_idempotent_and_leaves_only_root() {
        let dir = tempfile::tempdir().unwrap();
        let sources = vec![
            Source { id: "s-1".into(), url: write_rows(dir.path(), "a.tsv", "S1", 2), name: "RunA".into() },
            Source { id: "s-2".into(), url: write_rows(dir.path(), "b.tsv", "S2", 4), name: "RunB".into() },
        ];
        let m = merger();
        let first = rebuild(&m, &sources).await;
        let second = rebuild(&m, &sources).await;
        assert!(first.frame.equals(&second.frame));
        assert_eq!(m.engine().table_names().await, vec![root()]);
    }

    #[tokio::test]
    async fn stale_requests_leave_root_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let m = merger();
        let old = vec![Source { id: "s1".into(), url: write_rows(dir.path(), "a.tsv", "S1", 3), name: "RunA".into() }];
        rebuild(&m, &old).await;

        let new = vec![Source { id: "s2".into(), url: write_rows(dir.path(), "b.tsv", "S2", 5), name: "RunB".into() }];
        let out = m.rebuild_as(&root(), &new, || false, |_| Ok(())).await.unwrap();
        assert!(matches!(out, Rebuilt::Stale));
        assert_eq!(root_height(&m).await, 3);

        // Superseded while loading: staged work is thrown away.
        let asked = Cell::new(0);
        let current = || {
            asked.set(asked.get() + 1);
            asked.get() == 1
        };
        let out = m.rebuild_as(&root(), &new, current, |_| Ok(())).await.unwrap();
        assert!(matches!(out, Rebuilt::Stale));
        assert_eq!(asked.get(), 2);
        assert_eq!(root_height(&m).await, 3);
        assert_eq!(m.engine().table_names().await, vec![root()]);
    }

    #[tokio::test]
    async fn decode_failure_keeps_previous_root() {
        let dir = tempfile::tempdir().unwrap();
        let m = merger();
        let old = vec![Source { id: "s1".into(), url: write_rows(dir.path(), "a.tsv", "S1", 3), name: "RunA".into() }];
        rebuild(&m, &old).await;

        let new = vec![Source { id: "s2".into(), url: write_rows(dir.path(), "b.tsv", "S2", 5), name: "RunB".into() }];
        let out = m
            .rebuild_as(&root(), &new, || true, |_| -> Result<(), EngineError> {
                Err(EngineError::MissingColumn { column: "sample".into() })
            })
            .await;
        assert!(out.is_err());
        assert_eq!(root_height(&m).await, 3);
        assert_eq!(m.engine().table_names().await, vec![root()]);
    }

    #[tokio::test]
    async fn clear_empties_root_unless_stale() {
        let dir = tempfile::tempdir().unwrap();
        let m = merger();
        let old = vec![Source { id: "s1".into(), url: write_rows(dir.path(), "a.tsv", "S1", 3), name: "RunA".into() }];
        rebuild(&m, &old).await;
        assert!(!m.clear(&root(), || false).await.unwrap());
        assert_eq!(root_height(&m).await, 3);
        assert!(m.clear(&root(), || true).await.unwrap());
        assert_eq!(root_height(&m).await, 0);
    }

    #[tokio::test]
    async fn no_sources_is_rejected() {
        let out = merger().rebuild_as(&root(), &[], || true, |_| Ok(())).await;
        assert!(matches!(out, Err(PipelineError::NoSources { .. })));
    }
}
