//! Pathogen taxonomy and curated panels.
//!
//! Two reference feeds are read once per session:
//! - the **pathogen feed**, delimited text with `taxonomy_id` (or `id`) and
//!   `name` columns (comma for `.csv`, tab otherwise);
//! - the **panel feed**, a JSON list of `{"name": ..., "pathogens": [ids]}`.
//!
//! A feed that fails to load leaves its half of the catalog empty and records
//! the error; nothing is thrown. Filtering over an empty catalog yields no
//! pathogens.
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde::Deserialize;
use tracing::{info, warn};

use crate::error::CatalogError;
use crate::fetch::{extension_of, fetch_bytes};
use crate::model::{Panel, Pathogen};

#[derive(Debug, Deserialize)]
struct PathogenRow {
    #[serde(alias = "id", alias = "taxid")]
    taxonomy_id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FeedId {
    Text(String),
    Number(u64),
}

impl FeedId {
    fn into_string(self) -> String {
        match self {
            FeedId::Text(s) => s,
            FeedId::Number(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PanelRow {
    name: String,
    #[serde(alias = "pathogen_ids", alias = "taxonomy_ids")]
    pathogens: Vec<FeedId>,
}

/// Parse the pathogen feed, keeping the first row for duplicate ids.
pub fn parse_pathogens(bytes: &[u8], delimiter: u8) -> Result<Vec<Pathogen>, CatalogError> {
    let mut rdr = csv::ReaderBuilder::new().has_headers(true).delimiter(delimiter).from_reader(bytes);
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for row in rdr.deserialize::<PathogenRow>() {
        let row = row?;
        let id = row.taxonomy_id.trim().to_string();
        if !seen.insert(id.clone()) {
            warn!(taxonomy_id = %id, "duplicate pathogen in feed; keeping first");
            continue;
        }
        out.push(Pathogen { id, name: row.name.trim().to_string() });
    }
    Ok(out)
}

/// Parse the panel feed into panels keyed by name.
pub fn parse_panels(bytes: &[u8]) -> Result<BTreeMap<String, Panel>, CatalogError> {
    let rows: Vec<PanelRow> = serde_json::from_slice(bytes)?;
    let mut panels = BTreeMap::new();
    for row in rows {
        let ids: BTreeSet<String> = row.pathogens.into_iter().map(|id| id.into_string().trim().to_string()).collect();
        let panel = Panel { id: row.name.clone(), name: row.name.clone(), pathogen_ids: ids };
        if panels.insert(row.name.clone(), panel).is_some() {
            warn!(panel = %row.name, "duplicate panel in feed; keeping last");
        }
    }
    Ok(panels)
}

async fn load_pathogen_feed(location: Option<&str>) -> Result<Vec<Pathogen>, CatalogError> {
    let location = location.ok_or(CatalogError::Unconfigured("pathogen"))?;
    let bytes = fetch_bytes(location).await?;
    let delimiter = if extension_of(location).as_deref() == Some("csv") { b',' } else { b'\t' };
    parse_pathogens(&bytes, delimiter)
}

async fn load_panel_feed(location: Option<&str>) -> Result<BTreeMap<String, Panel>, CatalogError> {
    let location = location.ok_or(CatalogError::Unconfigured("panel"))?;
    let bytes = fetch_bytes(location).await?;
    parse_panels(&bytes)
}

/// Session-scoped pathogen and panel reference data.
#[derive(Debug, Default)]
pub struct Catalog {
    pathogen_feed: Option<String>,
    panel_feed: Option<String>,
    pathogens: Vec<Pathogen>,
    index: HashMap<String, usize>,
    panels: BTreeMap<String, Panel>,
    errors: Vec<String>,
}

impl Catalog {
    /// Build a catalog from already-parsed reference data.
    pub fn from_parts(pathogens: Vec<Pathogen>, panels: BTreeMap<String, Panel>) -> Self {
        let mut catalog = Catalog { panels, ..Catalog::default() };
        catalog.set_pathogens(pathogens);
        catalog
    }

    /// Load both feeds. Failures degrade the affected half to empty.
    pub async fn load(pathogen_feed: Option<&str>, panel_feed: Option<&str>) -> Self {
        let mut catalog = Catalog {
            pathogen_feed: pathogen_feed.map(str::to_string),
            panel_feed: panel_feed.map(str::to_string),
            ..Catalog::default()
        };
        catalog.reload().await;
        catalog
    }

    /// Re-read both feeds from their configured locations.
    pub async fn reload(&mut self) {
        self.errors.clear();
        let (pathogens, panels) = tokio::join!(
            load_pathogen_feed(self.pathogen_feed.as_deref()),
            load_panel_feed(self.panel_feed.as_deref())
        );
        match pathogens {
            Ok(p) => self.set_pathogens(p),
            Err(e) => {
                warn!(error = %e, "pathogen feed unavailable; catalog has no pathogens");
                self.set_pathogens(Vec::new());
                self.errors.push(e.to_string());
            }
        }
        match panels {
            Ok(p) => self.panels = p,
            Err(e) => {
                warn!(error = %e, "panel feed unavailable; catalog has no panels");
                self.panels.clear();
                self.errors.push(e.to_string());
            }
        }
        info!(pathogens = self.pathogens.len(), panels = self.panels.len(), "catalog loaded");
    }

    fn set_pathogens(&mut self, pathogens: Vec<Pathogen>) {
        self.index = pathogens.iter().enumerate().map(|(i, p)| (p.id.clone(), i)).collect();
        self.pathogens = pathogens;
    }

    /// Load errors from the last (re)load, one per failed feed.
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn is_degraded(&self) -> bool {
        !self.errors.is_empty()
    }

    /// All pathogens in feed order.
    pub fn pathogens(&self) -> &[Pathogen] {
        &self.pathogens
    }

    pub fn pathogen(&self, id: &str) -> Option<&Pathogen> {
        self.index.get(id).map(|&i| &self.pathogens[i])
    }

    pub fn panels(&self) -> impl Iterator<Item = &Panel> {
        self.panels.values()
    }

    pub fn panel(&self, name: &str) -> Option<&Panel> {
        self.panels.get(name)
    }

    /// Pathogens to offer for selection.
    ///
    /// Without a panel: the selected pathogens first, then every other one.
    /// With a panel: the panel's members, then selected pathogens outside it.
    pub fn filtered_pathogens(&self, selected_panel: Option<&Panel>, selected_ids: &[String]) -> Vec<Pathogen> {
        let selected: Vec<&Pathogen> = selected_ids.iter().filter_map(|id| self.pathogen(id)).collect();
        match selected_panel {
            None => {
                let chosen: HashSet<&str> = selected.iter().map(|p| p.id.as_str()).collect();
                let mut out: Vec<Pathogen> = selected.iter().map(|&p| p.clone()).collect();
                out.extend(self.pathogens.iter().filter(|p| !chosen.contains(p.id.as_str())).cloned());
                out
            }
            Some(panel) => {
                let mut out: Vec<Pathogen> = self.pathogens.iter().filter(|p| panel.contains(&p.id)).cloned().collect();
                out.extend(selected.into_iter().filter(|p| !panel.contains(&p.id)).cloned());
                out
            }
        }
    }

    /// The pathogen selection that picking `panel` produces: exactly its members.
    pub fn on_panel_change(&self, panel: &Panel) -> Vec<Pathogen> {
        let members: Vec<Pathogen> = self.pathogens.iter().filter(|p| panel.contains(&p.id)).cloned().collect();
        if members.len() < panel.pathogen_ids.len() {
            warn!(
                panel = %panel.name,
                unknown = panel.pathogen_ids.len() - members.len(),
                "panel lists pathogens missing from the taxonomy feed"
            );
        }
        members
    }
}
