#![forbid(unsafe_code)]
//! # panelscreen
//!
//! Merge per-sample pathogen **detection tables** produced by many analysis
//! submissions into one queryable relation, then **screen** that relation
//! against curated pathogen **panels**.
//!
//! ## Highlights
//! - 🧬 **One relation per output kind**: every long-format output of the
//!   selected submissions lands in a single root table, each row tagged with its
//!   submission name. Summary statistics get a second, independent root.
//! - 🩺 **Two screening policies**: *detected* keeps only observed pathogens;
//!   *screened* reports every selected pathogen for every observed sample,
//!   padding absences with zero-abundance rows.
//! - 🔁 **Latest selection wins**: rebuilds of the same root are serialized and
//!   only the newest request's result becomes visible.
//!
//! ## Layout
//! - [`store`] + [`resolve`]: which files belong to the selected submissions.
//! - [`engine`] + [`merge`]: load them and build the tagged union.
//! - [`catalog`] + [`selection`] + [`screen`]: what the analyst asked to see.
//! - [`summary`]: read-count charts.
//! - [`session`]: ties the above together for one analysis.
//!
//! ## Examples
//! ```rust
//! use panelscreen::model::{Pathogen, TaxonRecord};
//! use panelscreen::screen;
//!
//! let observed = TaxonRecord {
//!     name: "Escherichia coli".into(),
//!     taxonomy_id: "562".into(),
//!     taxonomy_lvl: "S".into(),
//!     sample: "S1".into(),
//!     abundance_num: 40,
//!     abundance_frac: 0.4,
//!     submission: "RunA".into(),
//!     synthetic: false,
//! };
//! let panel = [
//!     Pathogen { id: "562".into(), name: "Escherichia coli".into() },
//!     Pathogen { id: "1313".into(), name: "Streptococcus pneumoniae".into() },
//! ];
//! assert_eq!(screen::detected(&[observed.clone()], &panel).len(), 1);
//! let rows = screen::screened(&[observed], &panel);
//! assert_eq!(rows.len(), 2);
//! assert!(rows[1].synthetic && rows[1].abundance_num == 0);
//! ```

pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod logging;
pub mod merge;
pub mod model;
pub mod query;
pub mod resolve;
pub mod screen;
pub mod selection;
pub mod sequence;
pub mod session;
pub mod store;
pub mod summary;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

pub use catalog::Catalog;
pub use config::PipelineConfig;
pub use engine::{ExportFormat, PolarsEngine, TabularEngine};
pub use error::{CatalogError, EngineError, FetchError, PipelineError, StoreError};
pub use model::{Panel, Pathogen, ScreenMode, Source, Submission, SubmissionStatus, SummaryRecord, TaxonRecord};
pub use session::{Notice, Pipeline, Refresh, Session};
pub use store::{ManifestStore, SubmissionStore};

/// Crate version string (from `CARGO_PKG_VERSION`).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// A session over a JSON manifest and the in-memory polars engine.
pub type LocalSession = Session<ManifestStore, PolarsEngine>;

/// Open a [`LocalSession`]: read the manifest, load the reference feeds named
/// in `config` and start with empty views.
pub async fn open_local_session<P: AsRef<Path>>(config: PipelineConfig, manifest: P) -> Result<LocalSession> {
    let manifest = manifest.as_ref();
    config.validate()?;
    let store = ManifestStore::from_json_file(manifest)
        .with_context(|| format!("Failed to open manifest: {}", manifest.display()))?;
    let catalog = Catalog::load(config.pathogen_feed.as_deref(), config.panel_feed.as_deref()).await;
    let session = Session::new(config, Arc::new(store), Arc::new(PolarsEngine::new()), catalog)?;
    Ok(session)
}

#[cfg(test)]
mod open_tests {
    use super::*;

    #[tokio::test]
    async fn opens_manifest_and_reports_missing_feeds() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join("manifest.json");
        std::fs::write(&manifest, r#"{"submissions": [{"id": "s1", "name": "RunA", "status": "completed"}]}"#).unwrap();
        let session = open_local_session(PipelineConfig::default(), &manifest).await.unwrap();
        // Neither feed configured: both halves of the catalog are degraded,
        // reported as one notice.
        assert_eq!(session.catalog().errors().len(), 2);
        assert_eq!(session.notices().len(), 1);
        assert!(session.catalog().pathogens().is_empty());
        let subs = session.list_submissions(&store::SubmissionFilter::completed()).await.unwrap();
        assert_eq!(subs.len(), 1);
    }

    #[tokio::test]
    async fn missing_manifest_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = open_local_session(PipelineConfig::default(), dir.path().join("nope.json")).await;
        assert!(err.is_err());
    }
}
