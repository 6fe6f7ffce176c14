//! An analysis session: the explicitly scoped owner of catalog, selection and
//! the two committed views (insights and summary).
//!
//! Rebuilds are explicit requests. Each one takes a [`Ticket`] when it starts.
//! Rebuilds of the same root table queue on that table's lock; once a request
//! holds the lock it checks its ticket, and a request that a newer one has
//! overtaken leaves both the root table and the view alone. The root table
//! and the committed view therefore always describe the same selection.
//! Rebuilds of different roots run concurrently.
//!
//! Failures are logged where they happen. The ones an analyst can act on
//! (every source failed, a query failed, reference data is missing) are also
//! recorded as [`Notice`]s, one per failure.
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use polars::prelude::DataFrame;
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::config::PipelineConfig;
use crate::engine::{write_frame, ExportFormat, TabularEngine};
use crate::error::{EngineError, PipelineError};
use crate::merge::{MergeEngine, MergeReport, Rebuilt};
use crate::model::{taxon_frame, taxon_records, Source, Submission, SummaryRecord, TaxonRecord};
use crate::query::TableName;
use crate::resolve::resolve;
use crate::screen;
use crate::selection::SelectionState;
use crate::sequence::{LatestWins, TableLocks, Ticket};
use crate::store::{OutputPredicate, SubmissionFilter, SubmissionStore};
use crate::summary::{self, ReadChart};

/// Which pipeline a notice or view belongs to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Pipeline {
    Insights,
    Summary,
    Catalog,
}

/// A user-visible notification.
#[derive(Clone, Debug, PartialEq)]
pub struct Notice {
    pub pipeline: Pipeline,
    pub message: String,
}

/// Committed long-format view.
#[derive(Debug)]
pub struct InsightsView {
    pub sources: Vec<Source>,
    pub frame: DataFrame,
    pub rows: Vec<TaxonRecord>,
}

/// Committed summary-statistics view.
#[derive(Debug)]
pub struct SummaryView {
    pub sources: Vec<Source>,
    pub records: Vec<SummaryRecord>,
}

/// Outcome of one rebuild request.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Refresh {
    /// The result is now the visible view.
    Committed { seq: u64, rows: usize },
    /// A newer request started first; neither the root nor the view changed.
    Superseded { seq: u64 },
    /// Submissions are selected but none resolved yet; the previous view
    /// stays until the next request.
    Pending { seq: u64 },
    /// A query failed; the previous root and view stay.
    Failed { seq: u64 },
}

pub struct Session<S: ?Sized, E: ?Sized> {
    config: PipelineConfig,
    insights_table: TableName,
    summary_table: TableName,
    store: Arc<S>,
    merge: MergeEngine<E>,
    catalog: Catalog,
    selection: SelectionState,
    insights: LatestWins<InsightsView>,
    summary: LatestWins<SummaryView>,
    notices: Mutex<Vec<Notice>>,
}

impl<S, E> Session<S, E>
where
    S: SubmissionStore + ?Sized,
    E: TabularEngine + ?Sized,
{
    /// Start a session. Catalog load errors become notices right away.
    pub fn new(config: PipelineConfig, store: Arc<S>, engine: Arc<E>, catalog: Catalog) -> Result<Self, PipelineError> {
        let insights_table = TableName::new(&config.insights_table)?;
        let summary_table = TableName::new(&config.summary_table)?;
        let selection = SelectionState::new(config.default_mode);
        let session = Session {
            config,
            insights_table,
            summary_table,
            store,
            merge: MergeEngine::new(engine, Arc::new(TableLocks::new())),
            catalog,
            selection,
            insights: LatestWins::new(),
            summary: LatestWins::new(),
            notices: Mutex::new(Vec::new()),
        };
        session.note_catalog_errors();
        Ok(session)
    }

    // One notice however many feeds failed.
    fn note_catalog_errors(&self) {
        let errors = self.catalog.errors();
        if !errors.is_empty() {
            self.notify(Pipeline::Catalog, format!("reference data unavailable: {}", errors.join("; ")));
        }
    }

    fn notify(&self, pipeline: Pipeline, message: String) {
        warn!(?pipeline, %message, "notice");
        self.notices.lock().unwrap_or_else(PoisonError::into_inner).push(Notice { pipeline, message });
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub async fn reload_catalog(&mut self) {
        self.catalog.reload().await;
        self.note_catalog_errors();
    }

    pub fn selection(&self) -> &SelectionState {
        &self.selection
    }

    pub fn selection_mut(&mut self) -> &mut SelectionState {
        &mut self.selection
    }

    pub fn insights_table(&self) -> &TableName {
        &self.insights_table
    }

    pub fn summary_table(&self) -> &TableName {
        &self.summary_table
    }

    pub async fn list_submissions(&self, filter: &SubmissionFilter) -> Result<Vec<Submission>, PipelineError> {
        Ok(self.store.list_submissions(filter).await?)
    }

    /// Select submissions by id, in the given order. Unknown or not yet
    /// completed submissions are skipped; returns how many were selected.
    pub async fn select_submission_ids(&mut self, ids: &[String]) -> Result<usize, PipelineError> {
        let all = self.store.list_submissions(&SubmissionFilter::default()).await?;
        let mut chosen = Vec::with_capacity(ids.len());
        for id in ids {
            match all.iter().find(|s| &s.id == id || &s.name == id) {
                Some(s) => chosen.push(s.clone()),
                None => warn!(submission = %id, "unknown submission; skipping"),
            }
        }
        Ok(self.selection.select_submissions(chosen))
    }

    /// Pick a panel by name, or clear it with `None`.
    pub fn select_panel(&mut self, name: Option<&str>) -> bool {
        match name {
            Some(n) => match self.catalog.panel(n) {
                Some(panel) => {
                    self.selection.select_panel(Some(panel), &self.catalog);
                    true
                }
                None => {
                    warn!(panel = %n, "unknown panel");
                    false
                }
            },
            None => {
                self.selection.select_panel(None, &self.catalog);
                true
            }
        }
    }

    /// Select pathogens by taxonomy id, dropping any active panel; ids missing
    /// from the catalog are skipped.
    pub fn select_pathogen_ids(&mut self, ids: &[String]) -> usize {
        let found: Vec<_> = ids.iter().filter_map(|id| self.catalog.pathogen(id).cloned()).collect();
        if found.len() < ids.len() {
            warn!(requested = ids.len(), found = found.len(), "some pathogens are not in the catalog");
        }
        self.selection.set_pathogens(found);
        self.selection.pathogens().len()
    }

    /// Rebuild the insights view from the current submission selection.
    pub async fn refresh_insights(&self) -> Refresh {
        let selected = self.selection.submissions().to_vec();
        self.rebuild_insights(&selected).await
    }

    /// Rebuild the summary view from the current submission selection.
    pub async fn refresh_summary(&self) -> Refresh {
        let selected = self.selection.submissions().to_vec();
        self.rebuild_summary(&selected).await
    }

    /// Rebuild the insights view from `selected`.
    pub async fn rebuild_insights(&self, selected: &[Submission]) -> Refresh {
        let slot = &self.insights;
        let ticket = slot.begin();
        let root = &self.insights_table;
        let is_current = || slot.is_current(ticket);
        if selected.is_empty() {
            let empty = InsightsView { sources: Vec::new(), frame: DataFrame::empty(), rows: Vec::new() };
            return self.clear(Pipeline::Insights, slot, ticket, root, empty).await;
        }
        let Some(sources) = self.sources_for(Pipeline::Insights, ticket, selected, &self.config.long_format_predicate()).await else {
            return Refresh::Pending { seq: ticket.seq() };
        };
        match self.merge.rebuild_as(root, &sources, is_current, taxon_records).await {
            Ok(Rebuilt::Promoted { value: rows, report }) => {
                self.note_all_failed(Pipeline::Insights, &report);
                let n = rows.len();
                self.commit(slot, ticket, InsightsView { sources, frame: report.frame, rows }, n)
            }
            Ok(Rebuilt::Stale) => Refresh::Superseded { seq: ticket.seq() },
            Err(e) => self.fail(Pipeline::Insights, slot, ticket, root, e),
        }
    }

    /// Rebuild the summary view from `selected`.
    pub async fn rebuild_summary(&self, selected: &[Submission]) -> Refresh {
        let slot = &self.summary;
        let ticket = slot.begin();
        let root = &self.summary_table;
        let is_current = || slot.is_current(ticket);
        if selected.is_empty() {
            let empty = SummaryView { sources: Vec::new(), records: Vec::new() };
            return self.clear(Pipeline::Summary, slot, ticket, root, empty).await;
        }
        let Some(sources) = self.sources_for(Pipeline::Summary, ticket, selected, &self.config.summary_predicate()).await else {
            return Refresh::Pending { seq: ticket.seq() };
        };
        match summary::rebuild_summary(&self.merge, root, &sources, is_current).await {
            Ok(Rebuilt::Promoted { value: records, report }) => {
                self.note_all_failed(Pipeline::Summary, &report);
                let n = records.len();
                self.commit(slot, ticket, SummaryView { sources, records }, n)
            }
            Ok(Rebuilt::Stale) => Refresh::Superseded { seq: ticket.seq() },
            Err(e) => self.fail(Pipeline::Summary, slot, ticket, root, e),
        }
    }

    // `None` when nothing resolved yet; the previous root and view stay.
    async fn sources_for(
        &self,
        pipeline: Pipeline,
        ticket: Ticket,
        selected: &[Submission],
        predicate: &OutputPredicate,
    ) -> Option<Vec<Source>> {
        let sources = resolve(&*self.store, selected, predicate).await;
        if sources.is_empty() {
            info!(?pipeline, seq = ticket.seq(), "no sources resolved yet; keeping previous view");
            return None;
        }
        Some(sources)
    }

    // Nothing selected: empty the root, then commit an empty view.
    async fn clear<T>(&self, pipeline: Pipeline, slot: &LatestWins<T>, ticket: Ticket, root: &TableName, empty: T) -> Refresh {
        match self.merge.clear(root, || slot.is_current(ticket)).await {
            Ok(true) => self.commit(slot, ticket, empty, 0),
            Ok(false) => Refresh::Superseded { seq: ticket.seq() },
            Err(e) => self.fail(pipeline, slot, ticket, root, e),
        }
    }

    fn note_all_failed(&self, pipeline: Pipeline, report: &MergeReport) {
        if report.all_failed() {
            self.notify(pipeline, format!("none of the {} selected sources could be loaded", report.failed.len()));
        }
    }

    fn commit<T>(&self, slot: &LatestWins<T>, ticket: Ticket, value: T, rows: usize) -> Refresh {
        if slot.commit(ticket, value) {
            debug!(seq = ticket.seq(), rows, "committed view");
            Refresh::Committed { seq: ticket.seq(), rows }
        } else {
            debug!(seq = ticket.seq(), "superseded; result dropped");
            Refresh::Superseded { seq: ticket.seq() }
        }
    }

    fn fail<T>(&self, pipeline: Pipeline, slot: &LatestWins<T>, ticket: Ticket, root: &TableName, err: PipelineError) -> Refresh {
        if slot.is_current(ticket) {
            self.notify(pipeline, format!("rebuild of {} failed: {}", root, err));
        }
        Refresh::Failed { seq: ticket.seq() }
    }

    pub fn insights(&self) -> Option<Arc<InsightsView>> {
        self.insights.current()
    }

    pub fn summary(&self) -> Option<Arc<SummaryView>> {
        self.summary.current()
    }

    /// Rows to present: the committed insights view screened by the current
    /// selection, or unfiltered when "show all pathogens" is on.
    pub fn visible_rows(&self) -> Result<Vec<TaxonRecord>, EngineError> {
        let Some(view) = self.insights.current() else {
            return Ok(Vec::new());
        };
        if self.selection.show_all_pathogens() {
            return Ok(view.rows.clone());
        }
        screen::apply_frame(&view.frame, self.selection.pathogens(), self.selection.mode())
    }

    pub fn summary_records(&self) -> Vec<SummaryRecord> {
        self.summary.current().map(|v| v.records.clone()).unwrap_or_default()
    }

    pub fn summary_chart(&self) -> ReadChart {
        summary::chart(&self.summary_records())
    }

    /// Export the insights root table; the engine names the file.
    pub async fn export_insights(&self, format: ExportFormat, dir: Option<&Path>) -> Result<PathBuf, PipelineError> {
        self.export(&self.insights_table, format, dir).await
    }

    /// Export the summary root table; the engine names the file.
    pub async fn export_summary(&self, format: ExportFormat, dir: Option<&Path>) -> Result<PathBuf, PipelineError> {
        self.export(&self.summary_table, format, dir).await
    }

    /// Export screened rows (for example [`Self::visible_rows`]) as
    /// `<insights table>_screened.<ext>`, synthetic rows flagged in the
    /// `synthetic` column.
    pub fn export_screened(&self, rows: &[TaxonRecord], format: ExportFormat, dir: Option<&Path>) -> Result<PathBuf, PipelineError> {
        let dir = dir.unwrap_or(self.config.export_dir.as_path());
        let path = dir.join(format!("{}_screened.{}", self.insights_table, format.extension()));
        let mut frame = taxon_frame(rows).map_err(EngineError::from)?;
        write_frame(&mut frame, format, &path)?;
        debug!(rows = rows.len(), path = %path.display(), "exported screened rows");
        Ok(path)
    }

    async fn export(&self, table: &TableName, format: ExportFormat, dir: Option<&Path>) -> Result<PathBuf, PipelineError> {
        let dir = dir.unwrap_or(self.config.export_dir.as_path());
        let _guard = self.merge.locks().acquire(table).await;
        Ok(self.merge.engine().export_table(table, format, dir).await?)
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn take_notices(&self) -> Vec<Notice> {
        std::mem::take(&mut *self.notices.lock().unwrap_or_else(PoisonError::into_inner))
    }
}
