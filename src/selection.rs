//! Selection state and the user actions that change it.
use tracing::warn;

use crate::catalog::Catalog;
use crate::model::{Panel, Pathogen, ScreenMode, Submission};

/// What the analyst has currently chosen.
#[derive(Clone, Debug, Default)]
pub struct SelectionState {
    submissions: Vec<Submission>,
    pathogens: Vec<Pathogen>,
    panel: Option<Panel>,
    show_all_pathogens: bool,
    mode: ScreenMode,
}

impl SelectionState {
    pub fn new(mode: ScreenMode) -> Self {
        SelectionState { mode, ..Self::default() }
    }

    pub fn submissions(&self) -> &[Submission] {
        &self.submissions
    }

    pub fn pathogens(&self) -> &[Pathogen] {
        &self.pathogens
    }

    pub fn pathogen_ids(&self) -> Vec<String> {
        self.pathogens.iter().map(|p| p.id.clone()).collect()
    }

    pub fn panel(&self) -> Option<&Panel> {
        self.panel.as_ref()
    }

    pub fn show_all_pathogens(&self) -> bool {
        self.show_all_pathogens
    }

    pub fn mode(&self) -> ScreenMode {
        self.mode
    }

    /// Replace the submission selection. Submissions that are not completed
    /// are dropped; returns how many were kept.
    pub fn select_submissions(&mut self, submissions: Vec<Submission>) -> usize {
        let (kept, dropped): (Vec<_>, Vec<_>) = submissions.into_iter().partition(Submission::is_selectable);
        for s in &dropped {
            warn!(submission = %s.name, status = %s.status, "only completed submissions can be selected");
        }
        self.submissions = kept;
        self.submissions.len()
    }

    /// Pick a panel (replacing the pathogen selection with its members) or
    /// clear it (leaving the pathogen selection as it is).
    pub fn select_panel(&mut self, panel: Option<&Panel>, catalog: &Catalog) {
        match panel {
            Some(p) => {
                self.pathogens = catalog.on_panel_change(p);
                self.panel = Some(p.clone());
            }
            None => self.panel = None,
        }
    }

    /// Replace the selection with a manual pick, leaving no panel active.
    /// Duplicates are ignored.
    pub fn set_pathogens(&mut self, pathogens: Vec<Pathogen>) {
        self.panel = None;
        self.pathogens.clear();
        for p in pathogens {
            if !self.pathogens.iter().any(|q| q.id == p.id) {
                self.pathogens.push(p);
            }
        }
    }

    /// Add `pathogen` if absent, remove it if present.
    pub fn toggle_pathogen(&mut self, pathogen: &Pathogen) {
        if let Some(pos) = self.pathogens.iter().position(|p| p.id == pathogen.id) {
            self.pathogens.remove(pos);
        } else {
            self.pathogens.push(pathogen.clone());
        }
    }

    pub fn set_show_all_pathogens(&mut self, show_all: bool) {
        self.show_all_pathogens = show_all;
    }

    pub fn set_mode(&mut self, mode: ScreenMode) {
        self.mode = mode;
    }
}

#[cfg(test)]
mod selection_tests {
    use super::*;
    use crate::catalog::{parse_panels, parse_pathogens};
    use crate::model::SubmissionStatus;

    fn catalog() -> Catalog {
        let p = parse_pathogens(b"taxonomy_id\tname\n1313\tS. pneumoniae\n562\tE. coli\n727\tH. influenzae\n", b'\t').unwrap();
        let panels = parse_panels(br#"[{"name": "Resp", "pathogens": ["1313", "727"]}]"#).unwrap();
        Catalog::from_parts(p, panels)
    }

    #[test]
    fn only_completed_submissions_are_kept() {
        let mut s = SelectionState::default();
        let mk = |id: &str, status| Submission { id: id.into(), name: id.into(), status, workflow_ref: String::new() };
        let kept = s.select_submissions(vec![
            mk("a", SubmissionStatus::Completed),
            mk("b", SubmissionStatus::Processing),
            mk("c", SubmissionStatus::Completed),
        ]);
        assert_eq!(kept, 2);
        assert_eq!(s.submissions()[1].id, "c");
    }

    #[test]
    fn panel_selection_is_exclusive_and_clearing_keeps_pathogens() {
        let c = catalog();
        let mut s = SelectionState::default();
        s.set_pathogens(vec![c.pathogen("562").unwrap().clone()]);
        s.select_panel(c.panel("Resp"), &c);
        assert_eq!(s.pathogen_ids(), ["1313", "727"]);

        s.toggle_pathogen(c.pathogen("562").unwrap());
        s.select_panel(None, &c);
        assert!(s.panel().is_none());
        assert_eq!(s.pathogen_ids(), ["1313", "727", "562"]);
    }

    #[test]
    fn manual_pick_replaces_active_panel() {
        let c = catalog();
        let mut s = SelectionState::default();
        s.select_panel(c.panel("Resp"), &c);
        s.toggle_pathogen(c.pathogen("562").unwrap());
        assert_eq!(s.panel().map(|p| p.name.as_str()), Some("Resp"));

        s.set_pathogens(vec![c.pathogen("562").unwrap().clone()]);
        assert!(s.panel().is_none());
        assert_eq!(s.pathogen_ids(), ["562"]);
    }

    #[test]
    fn toggling_twice_restores_selection() {
        let c = catalog();
        let mut s = SelectionState::new(ScreenMode::Screened);
        let p = c.pathogen("727").unwrap();
        s.toggle_pathogen(p);
        s.toggle_pathogen(p);
        assert!(s.pathogens().is_empty());
        assert_eq!(s.mode(), ScreenMode::Screened);
    }
}
