//! Error families of the merge-and-screen pipeline.
//!
//! Each family maps to one failure class: resolution ([`StoreError`]), fetching
//! and loading ([`FetchError`], [`EngineError`]), reference feeds
//! ([`CatalogError`]). [`PipelineError`] wraps them for callers that do not care
//! which stage failed.
use thiserror::Error;

/// Failures reading a local file or an HTTP location.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("failed to read '{location}': {source}")]
    Io {
        location: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to fetch '{location}': {source}")]
    Http {
        location: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Failures talking to the submission metadata store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("metadata store not ready: {0}")]
    NotReady(String),

    #[error("no output '{file_name}' available for submission {submission_id}")]
    UrlNotIssued { submission_id: String, file_name: String },

    #[error("failed to read manifest '{path}': {source}")]
    ManifestIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed manifest '{path}': {source}")]
    ManifestFormat {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Failures inside the tabular engine.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid table identifier '{0}'")]
    InvalidIdentifier(String),

    #[error("no such table: {0}")]
    NoSuchTable(String),

    #[error("no such column: {column}")]
    MissingColumn { column: String },

    #[error("unsupported remote format for '{0}'")]
    UnsupportedFormat(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("query failed: {0}")]
    Query(#[from] polars::prelude::PolarsError),
}

/// Failures loading a reference feed.
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("no location configured for the {0} feed")]
    Unconfigured(&'static str),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("malformed pathogen feed: {0}")]
    PathogenFormat(#[from] csv::Error),

    #[error("malformed panel feed: {0}")]
    PanelFormat(#[from] serde_json::Error),
}

/// Umbrella error for pipeline stages.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("no sources to merge into {table}")]
    NoSources { table: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}
