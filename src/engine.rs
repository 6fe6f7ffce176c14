//! The tabular engine: named in-memory tables, typed queries, export.
//!
//! [`TabularEngine`] is the seam the pipeline talks to; [`PolarsEngine`] is the
//! implementation, keeping one polars [`DataFrame`] per [`TableName`].
//!
//! ### Remote formats
//! - `.csv` comma-delimited, `.tsv`/`.txt` tab-delimited, with a header row.
//!   Every delimited column is read as text; typed decoding happens later.
//! - `.parquet`, columns cast to text for the same reason.
use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use polars::prelude::*;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::EngineError;
use crate::fetch::{extension_of, fetch_bytes};
use crate::query::{Query, TableName};

/// File formats the engine can load.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RemoteFormat {
    Delimited(u8),
    Parquet,
}

impl RemoteFormat {
    pub fn from_location(location: &str) -> Result<Self, EngineError> {
        match extension_of(location).as_deref() {
            Some("csv") => Ok(RemoteFormat::Delimited(b',')),
            Some("tsv") | Some("txt") => Ok(RemoteFormat::Delimited(b'\t')),
            Some("parquet") => Ok(RemoteFormat::Parquet),
            _ => Err(EngineError::UnsupportedFormat(location.to_string())),
        }
    }
}

/// Export formats.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ExportFormat {
    Csv,
    #[default]
    Tsv,
    Parquet,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Tsv => "tsv",
            ExportFormat::Parquet => "parquet",
        }
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "tsv" => Ok(Self::Tsv),
            "parquet" => Ok(Self::Parquet),
            other => Err(format!("Unknown export format: {}", other)),
        }
    }
}

/// Capability set the pipeline needs from a tabular engine.
///
/// Implementations must be safe to share across tasks. Callers serialize
/// statements per table name (see [`crate::sequence::TableLocks`]); engines do
/// not need to.
#[async_trait]
pub trait TabularEngine: Send + Sync {
    /// Load the file at `url` into `table`, replacing it. Returns the row count.
    async fn load_remote_file(&self, url: &str, table: &TableName) -> Result<usize, EngineError>;

    async fn execute(&self, query: &Query) -> Result<DataFrame, EngineError>;

    /// Materialize `query` as `table`, replacing it. Returns the row count.
    async fn create_table(&self, table: &TableName, query: &Query) -> Result<usize, EngineError>;

    /// Drop `table`; `Ok(false)` if it did not exist.
    async fn drop_table(&self, table: &TableName) -> Result<bool, EngineError>;

    /// Write `table` into `dir`; the engine picks the file name.
    async fn export_table(&self, table: &TableName, format: ExportFormat, dir: &Path) -> Result<PathBuf, EngineError>;
}

/// `frame` restricted to rows whose `column` (compared as text) is in `values`.
pub fn filter_in(frame: &DataFrame, column: &str, values: &[String]) -> Result<DataFrame, EngineError> {
    if frame.column(column).is_err() {
        return Err(EngineError::MissingColumn { column: column.to_string() });
    }
    let set: Vec<&str> = values.iter().map(String::as_str).collect();
    let set = Series::new(column, set);
    let out = frame
        .clone()
        .lazy()
        .filter(col(column).cast(DataType::String).is_in(lit(set)))
        .collect()?;
    Ok(out)
}

/// Write `frame` to `path` in `format`, replacing any existing file.
pub fn write_frame(frame: &mut DataFrame, format: ExportFormat, path: &Path) -> Result<(), EngineError> {
    let file = std::fs::File::create(path)?;
    match format {
        ExportFormat::Csv => CsvWriter::new(file).include_header(true).finish(frame)?,
        ExportFormat::Tsv => CsvWriter::new(file)
            .include_header(true)
            .with_separator(b'\t')
            .finish(frame)?,
        ExportFormat::Parquet => {
            ParquetWriter::new(file).finish(frame)?;
        }
    }
    Ok(())
}

fn parse_frame(bytes: Vec<u8>, format: RemoteFormat) -> PolarsResult<DataFrame> {
    match format {
        RemoteFormat::Delimited(sep) => CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(Some(0))
            .with_parse_options(CsvParseOptions::default().with_separator(sep))
            .into_reader_with_file_handle(Cursor::new(bytes))
            .finish(),
        RemoteFormat::Parquet => {
            let df = ParquetReader::new(Cursor::new(bytes)).finish()?;
            df.lazy().select([col("*").cast(DataType::String)]).collect()
        }
    }
}

/// In-memory engine backed by polars.
#[derive(Default)]
pub struct PolarsEngine {
    tables: RwLock<HashMap<TableName, DataFrame>>,
}

impl PolarsEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an in-memory frame as `table`.
    pub async fn register(&self, table: &TableName, frame: DataFrame) {
        self.tables.write().await.insert(table.clone(), frame);
    }

    pub async fn has_table(&self, table: &TableName) -> bool {
        self.tables.read().await.contains_key(table)
    }

    pub async fn table_names(&self) -> Vec<TableName> {
        let mut names: Vec<TableName> = self.tables.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

fn lookup<'a>(tables: &'a HashMap<TableName, DataFrame>, table: &TableName) -> Result<&'a DataFrame, EngineError> {
    tables.get(table).ok_or_else(|| EngineError::NoSuchTable(table.to_string()))
}

fn run(tables: &HashMap<TableName, DataFrame>, query: &Query) -> Result<DataFrame, EngineError> {
    match query {
        Query::Scan(t) => Ok(lookup(tables, t)?.clone()),
        Query::FilterIn { table, column, values } => filter_in(lookup(tables, table)?, column, values),
        Query::TaggedUnion(parts) => {
            if parts.is_empty() {
                return Ok(DataFrame::empty());
            }
            let mut frames = Vec::with_capacity(parts.len());
            for p in parts {
                let lf = lookup(tables, &p.table)?
                    .clone()
                    .lazy()
                    .with_column(lit(p.tag.clone()).alias(p.column.as_str()));
                frames.push(lf);
            }
            Ok(concat(frames, UnionArgs::default())?.collect()?)
        }
    }
}

#[async_trait]
impl TabularEngine for PolarsEngine {
    async fn load_remote_file(&self, url: &str, table: &TableName) -> Result<usize, EngineError> {
        let format = RemoteFormat::from_location(url)?;
        let bytes = fetch_bytes(url).await?;
        let frame = parse_frame(bytes, format)?;
        let rows = frame.height();
        debug!(%table, rows, "loaded remote file");
        self.tables.write().await.insert(table.clone(), frame);
        Ok(rows)
    }

    async fn execute(&self, query: &Query) -> Result<DataFrame, EngineError> {
        debug!(%query, "execute");
        let tables = self.tables.read().await;
        run(&tables, query)
    }

    async fn create_table(&self, table: &TableName, query: &Query) -> Result<usize, EngineError> {
        debug!(%table, %query, "create table");
        let mut tables = self.tables.write().await;
        let frame = run(&tables, query)?;
        let rows = frame.height();
        tables.insert(table.clone(), frame);
        Ok(rows)
    }

    async fn drop_table(&self, table: &TableName) -> Result<bool, EngineError> {
        Ok(self.tables.write().await.remove(table).is_some())
    }

    async fn export_table(&self, table: &TableName, format: ExportFormat, dir: &Path) -> Result<PathBuf, EngineError> {
        let mut frame = lookup(&*self.tables.read().await, table)?.clone();
        let path = dir.join(format!("{}.{}", table, format.extension()));
        write_frame(&mut frame, format, &path)?;
        debug!(%table, path = %path.display(), "exported table");
        Ok(path)
    }
}
