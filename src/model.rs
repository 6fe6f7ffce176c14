//! Core types for **submissions**, **sources**, **pathogens**, **panels** and the
//! rows of the merged relations.
//!
//! This module holds the data model used across the crate. Rows of the merged
//! relations live in a polars [`DataFrame`] while they sit inside the tabular
//! engine; [`taxon_records`] and [`summary_records`] decode them into owned,
//! typed rows for screening and display.
use core::fmt;
use std::collections::BTreeSet;
use std::str::FromStr;

use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::EngineError;

/// Column carrying human-readable provenance on every merged row.
pub const SUBMISSION_COLUMN: &str = "submission";
/// Column holding the taxonomy identifier used for screening.
pub const TAXONOMY_ID_COLUMN: &str = "taxonomy_id";

/// Lifecycle of a submission in the metadata store.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Created,
    Queued,
    Processing,
    Completed,
    Error,
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SubmissionStatus::Created => "created",
            SubmissionStatus::Queued => "queued",
            SubmissionStatus::Processing => "processing",
            SubmissionStatus::Completed => "completed",
            SubmissionStatus::Error => "error",
        };
        f.write_str(s)
    }
}

impl FromStr for SubmissionStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "created" => Ok(Self::Created),
            "queued" => Ok(Self::Queued),
            "processing" => Ok(Self::Processing),
            "completed" | "complete" => Ok(Self::Completed),
            "error" | "failed" => Ok(Self::Error),
            other => Err(format!("Unknown submission status: {}", other)),
        }
    }
}

/// A unit of prior pathogen-detection analysis with associated output files.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    /// Opaque identifier assigned by the metadata store.
    pub id: String,
    /// Human-readable name; becomes the `submission` tag of merged rows.
    pub name: String,
    /// Current lifecycle state. Only `Completed` submissions are selectable.
    pub status: SubmissionStatus,
    /// Reference to the workflow that produced the outputs.
    #[serde(default, alias = "workflowRef")]
    pub workflow_ref: String,
}

impl Submission {
    pub fn is_selectable(&self) -> bool {
        self.status == SubmissionStatus::Completed
    }
}

/// A resolved `(id, url, name)` triple pointing at one submission's output file.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Source {
    /// Submission id.
    pub id: String,
    /// Short-lived location of the output file.
    pub url: String,
    /// Submission name, used for provenance tagging.
    pub name: String,
}

/// A pathogen from the taxonomy reference feed, keyed by taxonomy id.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Pathogen {
    pub id: String,
    pub name: String,
}

/// A curated, named grouping of pathogen identifiers.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Panel {
    /// Panels are identified by their name.
    pub id: String,
    pub name: String,
    pub pathogen_ids: BTreeSet<String>,
}

impl Panel {
    pub fn contains(&self, pathogen_id: &str) -> bool {
        self.pathogen_ids.contains(pathogen_id)
    }
}

/// Screening policy applied to the merged relation.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreenMode {
    /// Only rows physically present in the data.
    #[default]
    Detected,
    /// Every selected pathogen for every observed sample, zero-padded.
    Screened,
}

impl FromStr for ScreenMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "detected" => Ok(Self::Detected),
            "screened" => Ok(Self::Screened),
            other => Err(format!("Unknown screening mode: {}", other)),
        }
    }
}

impl fmt::Display for ScreenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScreenMode::Detected => f.write_str("detected"),
            ScreenMode::Screened => f.write_str("screened"),
        }
    }
}

/// One row of the merged long-format relation.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TaxonRecord {
    pub name: String,
    pub taxonomy_id: String,
    pub taxonomy_lvl: String,
    pub sample: String,
    pub abundance_num: u64,
    /// Fraction in `[0, 1]`; rows of one sample need not sum to 1.
    pub abundance_frac: f64,
    /// Name of the originating submission.
    pub submission: String,
    /// `true` for zero-abundance rows injected by screened mode.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub synthetic: bool,
}

impl TaxonRecord {
    /// Zero-abundance placeholder for a pathogen absent from a sample.
    pub fn synthetic(pathogen: &Pathogen, submission: &str, sample: &str) -> Self {
        TaxonRecord {
            name: pathogen.name.clone(),
            taxonomy_id: pathogen.id.clone(),
            taxonomy_lvl: "S".to_string(),
            sample: sample.to_string(),
            abundance_num: 0,
            abundance_frac: 0.0,
            submission: submission.to_string(),
            synthetic: true,
        }
    }
}

/// One row of the merged summary-statistics relation.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SummaryRecord {
    pub sample_name: String,
    pub total_sequences: u64,
    pub classified_reads: u64,
    pub unclassified_reads: u64,
    pub percentage_classified: f64,
    pub submission: String,
}

fn column_or_missing<'a>(df: &'a DataFrame, name: &str) -> Result<&'a Series, EngineError> {
    df.column(name).map_err(|_| EngineError::MissingColumn { column: name.to_string() })
}

fn string_values(df: &DataFrame, name: &str) -> Result<Vec<String>, EngineError> {
    let s = column_or_missing(df, name)?.cast(&DataType::String)?;
    let values = s.str()?.into_iter().map(|v| v.unwrap_or_default().to_string()).collect();
    Ok(values)
}

fn float_values(df: &DataFrame, name: &str) -> Result<Vec<f64>, EngineError> {
    let s = column_or_missing(df, name)?.cast(&DataType::Float64)?;
    let values = s.f64()?.into_iter().map(|v| v.unwrap_or(0.0)).collect();
    Ok(values)
}

// Counts arrive as text ("12" or "12.0"); go through f64 so both parse.
// Negative, fractional or non-finite values are not counts: they are clamped
// and reported once per column.
fn count_values(df: &DataFrame, name: &str) -> Result<Vec<u64>, EngineError> {
    let mut bad = 0usize;
    let values = float_values(df, name)?
        .into_iter()
        .map(|v| {
            let (n, clean) = to_count(v);
            if !clean {
                bad += 1;
            }
            n
        })
        .collect();
    if bad > 0 {
        warn!(column = name, bad, "values are not non-negative whole numbers; clamped");
    }
    Ok(values)
}

fn to_count(v: f64) -> (u64, bool) {
    if !v.is_finite() || v < 0.0 {
        return (0, false);
    }
    (v.round() as u64, v.fract() == 0.0)
}

/// Decode a merged long-format relation into typed rows.
///
/// A frame without columns (the union of zero sources) decodes to no rows.
pub fn taxon_records(df: &DataFrame) -> Result<Vec<TaxonRecord>, EngineError> {
    if df.width() == 0 || df.height() == 0 {
        return Ok(Vec::new());
    }
    let names = string_values(df, "name")?;
    let ids = string_values(df, TAXONOMY_ID_COLUMN)?;
    let lvls = string_values(df, "taxonomy_lvl")?;
    let samples = string_values(df, "sample")?;
    let nums = count_values(df, "abundance_num")?;
    let fracs = float_values(df, "abundance_frac")?;
    let subs = string_values(df, SUBMISSION_COLUMN)?;

    let mut rows = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        rows.push(TaxonRecord {
            name: names[i].clone(),
            taxonomy_id: ids[i].clone(),
            taxonomy_lvl: lvls[i].clone(),
            sample: samples[i].clone(),
            abundance_num: nums[i],
            abundance_frac: fracs[i],
            submission: subs[i].clone(),
            synthetic: false,
        });
    }
    Ok(rows)
}

/// Decode a merged summary-statistics relation into typed rows.
pub fn summary_records(df: &DataFrame) -> Result<Vec<SummaryRecord>, EngineError> {
    if df.width() == 0 || df.height() == 0 {
        return Ok(Vec::new());
    }
    let samples = string_values(df, "sample_name")?;
    let totals = count_values(df, "total_sequences")?;
    let classified = count_values(df, "classified_reads")?;
    let unclassified = count_values(df, "unclassified_reads")?;
    let pct = float_values(df, "percentage_classified")?;
    let subs = string_values(df, SUBMISSION_COLUMN)?;

    Ok((0..df.height())
        .map(|i| SummaryRecord {
            sample_name: samples[i].clone(),
            total_sequences: totals[i],
            classified_reads: classified[i],
            unclassified_reads: unclassified[i],
            percentage_classified: pct[i],
            submission: subs[i].clone(),
        })
        .collect())
}

/// Build a display/export frame from typed taxon rows.
pub fn taxon_frame(rows: &[TaxonRecord]) -> PolarsResult<DataFrame> {
    df!(
        "name"           => rows.iter().map(|r| r.name.clone()).collect::<Vec<_>>(),
        "taxonomy_id"    => rows.iter().map(|r| r.taxonomy_id.clone()).collect::<Vec<_>>(),
        "taxonomy_lvl"   => rows.iter().map(|r| r.taxonomy_lvl.clone()).collect::<Vec<_>>(),
        "sample"         => rows.iter().map(|r| r.sample.clone()).collect::<Vec<_>>(),
        "abundance_num"  => rows.iter().map(|r| r.abundance_num).collect::<Vec<_>>(),
        "abundance_frac" => rows.iter().map(|r| r.abundance_frac).collect::<Vec<_>>(),
        "submission"     => rows.iter().map(|r| r.submission.clone()).collect::<Vec<_>>(),
        "synthetic"      => rows.iter().map(|r| r.synthetic).collect::<Vec<_>>(),
    )
}

#[cfg(test)]
mod decode_tests {
    use super::*;

    #[test]
    fn counts_clamp_values_that_are_not_whole_numbers() {
        assert_eq!(to_count(12.0), (12, true));
        assert_eq!(to_count(0.0), (0, true));
        assert_eq!(to_count(-1.0), (0, false));
        assert_eq!(to_count(2.5), (3, false));
        assert_eq!(to_count(f64::NAN), (0, false));
        let df = df!("n" => ["3", "-4", "1.5"]).unwrap();
        assert_eq!(count_values(&df, "n").unwrap(), vec![3, 0, 2]);
    }

    #[test]
    fn decodes_text_columns_into_typed_rows() {
        let df = df!(
            "name" => ["Escherichia coli"],
            "taxonomy_id" => ["562"],
            "taxonomy_lvl" => ["S"],
            "sample" => ["S1"],
            "abundance_num" => ["12.0"],
            "abundance_frac" => ["0.25"],
            "submission" => ["RunA"],
        )
        .unwrap();
        let rows = taxon_records(&df).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].abundance_num, 12);
        assert!((rows[0].abundance_frac - 0.25).abs() < 1e-12);
        assert!(!rows[0].synthetic);
    }

    #[test]
    fn missing_column_is_reported_by_name() {
        let df = df!("name" => ["x"], "sample" => ["S1"]).unwrap();
        match taxon_records(&df) {
            Err(EngineError::MissingColumn { column }) => assert_eq!(column, "taxonomy_id"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn empty_frame_decodes_to_nothing() {
        assert!(taxon_records(&DataFrame::empty()).unwrap().is_empty());
        assert!(summary_records(&DataFrame::empty()).unwrap().is_empty());
    }

    #[test]
    fn status_and_mode_parse_case_insensitively() {
        assert_eq!("Completed".parse::<SubmissionStatus>().unwrap(), SubmissionStatus::Completed);
        assert_eq!("SCREENED".parse::<ScreenMode>().unwrap(), ScreenMode::Screened);
        assert!("sideways".parse::<ScreenMode>().is_err());
    }
}
