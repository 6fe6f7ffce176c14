//! Source resolution: selected submissions → downloadable [`Source`]s.
//!
//! Resolution never fails as a whole. A submission without a matching output,
//! or whose URL cannot be issued, is skipped with a warning. A store that is
//! not ready yields an empty list; callers retry on the next selection change.
use tracing::{debug, warn};

use crate::model::{Source, Submission};
use crate::store::{OutputPredicate, SubmissionStore};

/// Resolve `selected` to sources in selection order.
pub async fn resolve<S>(store: &S, selected: &[Submission], predicate: &OutputPredicate) -> Vec<Source>
where
    S: SubmissionStore + ?Sized,
{
    if selected.is_empty() {
        return Vec::new();
    }
    let ids: Vec<String> = selected.iter().map(|s| s.id.clone()).collect();
    let outputs = match store.find_outputs(&ids, predicate).await {
        Ok(o) => o,
        Err(e) => {
            warn!(marker = predicate.marker(), error = %e, "metadata query failed; no sources resolved");
            return Vec::new();
        }
    };

    let mut sources = Vec::with_capacity(selected.len());
    for sub in selected {
        let mut matching = outputs.iter().filter(|o| o.submission_id == sub.id);
        let Some(output) = matching.next() else {
            warn!(submission = %sub.name, marker = predicate.marker(), "no matching output; skipping");
            continue;
        };
        let extra = matching.count();
        if extra > 0 {
            debug!(submission = %sub.name, extra, "several outputs match; using the first");
        }
        match store.issue_url(output).await {
            Ok(url) => sources.push(Source { id: sub.id.clone(), url, name: sub.name.clone() }),
            Err(e) => warn!(submission = %sub.name, error = %e, "URL issuance failed; skipping"),
        }
    }
    debug!(marker = predicate.marker(), selected = selected.len(), resolved = sources.len(), "resolved sources");
    sources
}
