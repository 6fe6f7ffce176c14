//! Summary statistics: per-sample read counts merged across submissions, and
//! the chart reductions derived from them.
//!
//! The merge itself is the same tagged union as the long-format pipeline, run
//! against the summary-statistics outputs and a separate root table.
//!
//! Which chart applies depends only on the number of distinct `sample_name`s:
//! none → no chart, one → radial, more → grouped bars.
use std::collections::HashMap;

use serde::Serialize;

use crate::engine::TabularEngine;
use crate::error::PipelineError;
use crate::merge::{MergeEngine, Rebuilt};
use crate::model::{summary_records, Source, SummaryRecord};
use crate::query::TableName;

/// Rebuild the summary root from `sources` and decode it. The root is only
/// replaced if the records decode and `is_current` still holds.
pub async fn rebuild_summary<E, C>(
    merge: &MergeEngine<E>,
    root: &TableName,
    sources: &[Source],
    is_current: C,
) -> Result<Rebuilt<Vec<SummaryRecord>>, PipelineError>
where
    E: TabularEngine + ?Sized,
    C: Fn() -> bool,
{
    merge.rebuild_as(root, sources, is_current, summary_records).await
}

/// Classified vs. unclassified reads of a single sample.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RadialChart {
    pub sample_name: String,
    pub classified_reads: u64,
    pub unclassified_reads: u64,
    pub total: u64,
}

/// One group of the grouped bar chart.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BarGroup {
    pub sample_name: String,
    pub classified_reads: u64,
    pub unclassified_reads: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReadChart {
    None,
    Radial(RadialChart),
    Bar { groups: Vec<BarGroup> },
}

// Rows sharing a sample_name (same sample in several submissions) are summed.
fn per_sample(records: &[SummaryRecord]) -> Vec<BarGroup> {
    let mut order: Vec<BarGroup> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();
    for r in records {
        let i = *index.entry(r.sample_name.as_str()).or_insert_with(|| {
            order.push(BarGroup { sample_name: r.sample_name.clone(), classified_reads: 0, unclassified_reads: 0 });
            order.len() - 1
        });
        order[i].classified_reads += r.classified_reads;
        order[i].unclassified_reads += r.unclassified_reads;
    }
    order
}

/// Radial reduction; `None` unless exactly one sample is present.
pub fn radial(records: &[SummaryRecord]) -> Option<RadialChart> {
    let mut groups = per_sample(records);
    if groups.len() != 1 {
        return None;
    }
    let g = groups.remove(0);
    Some(RadialChart {
        total: g.classified_reads + g.unclassified_reads,
        sample_name: g.sample_name,
        classified_reads: g.classified_reads,
        unclassified_reads: g.unclassified_reads,
    })
}

/// Grouped bar reduction, one group per sample in first-seen order.
pub fn grouped_bars(records: &[SummaryRecord]) -> Vec<BarGroup> {
    per_sample(records)
}

pub fn chart(records: &[SummaryRecord]) -> ReadChart {
    let groups = per_sample(records);
    match groups.len() {
        0 => ReadChart::None,
        1 => radial(records).map_or(ReadChart::None, ReadChart::Radial),
        _ => ReadChart::Bar { groups },
    }
}
