//! Screening the merged relation against a pathogen selection.
//!
//! Two policies:
//! - **detected**: the rows whose `taxonomy_id` is selected. Pathogens absent
//!   from the data contribute nothing.
//! - **screened**: a reindex over the key space
//!   `observed (submission, sample) × selected pathogens`. Each key gets the
//!   real row when one exists, otherwise a zero-abundance synthetic row, so
//!   every key appears exactly once.
//!
//! An empty selection means "no filter" in both modes. Screening works on the
//! committed relation held by the session and never touches the engine.
use std::collections::{HashMap, HashSet};

use polars::prelude::DataFrame;

use crate::engine::filter_in;
use crate::error::EngineError;
use crate::model::{taxon_records, Pathogen, ScreenMode, TaxonRecord, TAXONOMY_ID_COLUMN};

/// Rows of the committed relation `frame` visible under `pathogens` and `mode`.
pub fn apply_frame(frame: &DataFrame, pathogens: &[Pathogen], mode: ScreenMode) -> Result<Vec<TaxonRecord>, EngineError> {
    if pathogens.is_empty() {
        return taxon_records(frame);
    }
    match mode {
        ScreenMode::Detected => detected_frame(frame, &ids_of(pathogens)),
        ScreenMode::Screened => Ok(screened(&taxon_records(frame)?, pathogens)),
    }
}

fn ids_of(pathogens: &[Pathogen]) -> Vec<String> {
    pathogens.iter().map(|p| p.id.clone()).collect()
}

fn detected_frame(frame: &DataFrame, ids: &[String]) -> Result<Vec<TaxonRecord>, EngineError> {
    if frame.width() == 0 {
        return Ok(Vec::new());
    }
    taxon_records(&filter_in(frame, TAXONOMY_ID_COLUMN, ids)?)
}

/// Rows of `rows` whose taxonomy id is one of `pathogens`.
pub fn detected(rows: &[TaxonRecord], pathogens: &[Pathogen]) -> Vec<TaxonRecord> {
    if pathogens.is_empty() {
        return rows.to_vec();
    }
    let ids: HashSet<&str> = pathogens.iter().map(|p| p.id.as_str()).collect();
    rows.iter().filter(|r| ids.contains(r.taxonomy_id.as_str())).cloned().collect()
}

/// Exactly one row per `(submission, sample, pathogen)` key.
///
/// Keys are ordered by first appearance of `(submission, sample)` in `rows`,
/// then by selection order. When `rows` holds several rows for one key the
/// first one wins.
pub fn screened(rows: &[TaxonRecord], pathogens: &[Pathogen]) -> Vec<TaxonRecord> {
    if pathogens.is_empty() {
        return rows.to_vec();
    }
    let mut samples: Vec<(&str, &str)> = Vec::new();
    let mut seen_samples = HashSet::new();
    let mut by_key: HashMap<(&str, &str, &str), &TaxonRecord> = HashMap::new();
    for r in rows {
        let pair = (r.submission.as_str(), r.sample.as_str());
        if seen_samples.insert(pair) {
            samples.push(pair);
        }
        by_key.entry((pair.0, pair.1, r.taxonomy_id.as_str())).or_insert(r);
    }

    let mut seen_pathogens = HashSet::new();
    let pathogens: Vec<&Pathogen> = pathogens.iter().filter(|p| seen_pathogens.insert(p.id.as_str())).collect();

    let mut out = Vec::with_capacity(samples.len() * pathogens.len());
    for (submission, sample) in samples {
        for p in &pathogens {
            match by_key.get(&(submission, sample, p.id.as_str())) {
                Some(real) => out.push((*real).clone()),
                None => out.push(TaxonRecord::synthetic(p, submission, sample)),
            }
        }
    }
    out
}

/// The `n` most abundant taxa per `(submission, sample)`, by `abundance_frac`
/// descending then name. Group order follows first appearance.
pub fn top_taxa(rows: &[TaxonRecord], n: usize) -> Vec<TaxonRecord> {
    let mut order: Vec<(&str, &str)> = Vec::new();
    let mut groups: HashMap<(&str, &str), Vec<&TaxonRecord>> = HashMap::new();
    for r in rows {
        let key = (r.submission.as_str(), r.sample.as_str());
        groups
            .entry(key)
            .or_insert_with(|| {
                order.push(key);
                Vec::new()
            })
            .push(r);
    }
    let mut out = Vec::new();
    for key in order {
        if let Some(mut g) = groups.remove(&key) {
            g.sort_by(|a, b| b.abundance_frac.total_cmp(&a.abundance_frac).then_with(|| a.name.cmp(&b.name)));
            out.extend(g.into_iter().take(n).cloned());
        }
    }
    out
}

#[cfg(test)]
mod screen_tests {
    use super::*;
    use crate::model::taxon_frame;

    fn row(sub: &str, sample: &str, id: &str, num: u64, frac: f64) -> TaxonRecord {
        TaxonRecord {
            name: format!("taxon {id}"),
            taxonomy_id: id.into(),
            taxonomy_lvl: "S".into(),
            sample: sample.into(),
            abundance_num: num,
            abundance_frac: frac,
            submission: sub.into(),
            synthetic: false,
        }
    }

    fn pathogen(id: &str, name: &str) -> Pathogen {
        Pathogen { id: id.into(), name: name.into() }
    }

    fn base() -> Vec<TaxonRecord> {
        vec![
            row("RunA", "S1", "562", 40, 0.4),
            row("RunA", "S1", "727", 5, 0.05),
            row("RunA", "S2", "1313", 9, 0.09),
            row("RunB", "S1", "562", 12, 0.12),
        ]
    }

    #[test]
    fn screened_pads_absent_pathogens_with_zero_rows() {
        let ps = [pathogen("1313", "Streptococcus pneumoniae")];
        let out = screened(&base(), &ps);
        assert_eq!(out.len(), 3);
        let pad = out.iter().find(|r| r.submission == "RunA" && r.sample == "S1").unwrap();
        assert_eq!(pad.name, "Streptococcus pneumoniae");
        assert_eq!(pad.taxonomy_id, "1313");
        assert_eq!(pad.taxonomy_lvl, "S");
        assert_eq!((pad.abundance_num, pad.abundance_frac), (0, 0.0));
        assert!(pad.synthetic);
        let real = out.iter().find(|r| r.sample == "S2").unwrap();
        assert_eq!(real.abundance_num, 9);
    }

    #[test]
    fn screened_is_total_over_observed_keys() {
        let mut rows = base();
        rows.push(row("RunA", "S1", "562", 99, 0.99)); // duplicate key
        let ps = [pathogen("562", "E. coli"), pathogen("1313", "S. pneumoniae"), pathogen("562", "dup")];
        let out = screened(&rows, &ps);
        // 3 observed (submission, sample) pairs × 2 distinct pathogens
        assert_eq!(out.len(), 6);
        let keys: HashSet<_> = out.iter().map(|r| (&r.submission, &r.sample, &r.taxonomy_id)).collect();
        assert_eq!(keys.len(), 6);
        let first = out.iter().find(|r| r.sample == "S1" && r.submission == "RunA" && r.taxonomy_id == "562").unwrap();
        assert_eq!(first.abundance_num, 40);
    }

    #[test]
    fn detected_is_subset_of_screened_real_rows() {
        let ps = [pathogen("562", "E. coli"), pathogen("1313", "S. pneumoniae"), pathogen("28901", "Salmonella")];
        let det = detected(&base(), &ps);
        let scr: Vec<_> = screened(&base(), &ps).into_iter().filter(|r| !r.synthetic).collect();
        assert_eq!(det.len(), 3);
        assert!(det.iter().all(|r| scr.contains(r)));
    }

    #[test]
    fn empty_selection_means_no_filter() {
        assert_eq!(detected(&base(), &[]), base());
        assert_eq!(screened(&base(), &[]), base());
        let frame = taxon_frame(&base()).unwrap();
        assert_eq!(apply_frame(&frame, &[], ScreenMode::Screened).unwrap().len(), 4);
    }

    #[test]
    fn frame_detection_matches_row_detection() {
        let frame = taxon_frame(&base()).unwrap();
        let ps = [pathogen("562", "E. coli")];
        assert_eq!(apply_frame(&frame, &ps, ScreenMode::Detected).unwrap(), detected(&base(), &ps));
        assert!(apply_frame(&DataFrame::empty(), &ps, ScreenMode::Detected).unwrap().is_empty());
    }

    #[test]
    fn top_taxa_keeps_most_abundant_per_sample() {
        let out = top_taxa(&base(), 1);
        let ids: Vec<_> = out.iter().map(|r| (r.submission.as_str(), r.sample.as_str(), r.taxonomy_id.as_str())).collect();
        assert_eq!(ids, [("RunA", "S1", "562"), ("RunA", "S2", "1313"), ("RunB", "S1", "562")]);
    }
}
