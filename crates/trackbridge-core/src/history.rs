//! Snapshot-based undo/redo over the structural model.

use std::collections::VecDeque;

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::model::Project;

pub const DEFAULT_HISTORY_DEPTH: usize = 128;

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub project: Project,
    pub key: String,
}

impl HistoryEntry {
    #[must_use]
    pub fn capture(project: &Project) -> Self {
        Self {
            project: project.clone(),
            key: comparison_key(project),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Undo,
    Redo,
}

/// A stack transition that has been performed but not yet confirmed.
///
/// Hand it back to [`History::rollback`] when applying `target` fails.
#[derive(Debug, Clone)]
pub struct HistoryTransition {
    pub direction: Direction,
    pub target: HistoryEntry,
    previous_baseline: HistoryEntry,
    evicted: Option<HistoryEntry>,
}

#[derive(Debug, Clone)]
pub struct History {
    undo: VecDeque<HistoryEntry>,
    redo: VecDeque<HistoryEntry>,
    baseline: HistoryEntry,
    max_depth: usize,
}

impl History {
    #[must_use]
    pub fn new(project: &Project, max_depth: usize) -> Self {
        Self {
            undo: VecDeque::new(),
            redo: VecDeque::new(),
            baseline: HistoryEntry::capture(project),
            max_depth: max_depth.max(1),
        }
    }

    /// Drops both stacks and treats `project` as the new starting point.
    pub fn reset(&mut self, project: &Project) {
        self.undo.clear();
        self.redo.clear();
        self.baseline = HistoryEntry::capture(project);
    }

    /// Records the state after a mutation. Returns false for net no-ops.
    pub fn record(&mut self, project: &Project) -> bool {
        let entry = HistoryEntry::capture(project);
        if entry.key == self.baseline.key {
            debug!("history unchanged, nothing recorded");
            return false;
        }
        let previous = std::mem::replace(&mut self.baseline, entry);
        push_bounded(&mut self.undo, previous, self.max_depth);
        self.redo.clear();
        debug!(undo_depth = self.undo.len(), "history entry recorded");
        true
    }

    pub fn begin_undo(&mut self, current: &Project) -> Option<HistoryTransition> {
        let target = self.undo.pop_back()?;
        let evicted = push_bounded(&mut self.redo, HistoryEntry::capture(current), self.max_depth);
        let previous_baseline = std::mem::replace(&mut self.baseline, target.clone());
        Some(HistoryTransition {
            direction: Direction::Undo,
            target,
            previous_baseline,
            evicted,
        })
    }

    pub fn begin_redo(&mut self, current: &Project) -> Option<HistoryTransition> {
        let target = self.redo.pop_back()?;
        let evicted = push_bounded(&mut self.undo, HistoryEntry::capture(current), self.max_depth);
        let previous_baseline = std::mem::replace(&mut self.baseline, target.clone());
        Some(HistoryTransition {
            direction: Direction::Redo,
            target,
            previous_baseline,
            evicted,
        })
    }

    /// Reverts a transition returned by `begin_undo`/`begin_redo`.
    pub fn rollback(&mut self, transition: HistoryTransition) {
        let (taken_from, pushed_onto) = match transition.direction {
            Direction::Undo => (&mut self.undo, &mut self.redo),
            Direction::Redo => (&mut self.redo, &mut self.undo),
        };
        pushed_onto.pop_back();
        if let Some(evicted) = transition.evicted {
            pushed_onto.push_front(evicted);
        }
        taken_from.push_back(transition.target);
        self.baseline = transition.previous_baseline;
        debug!(direction = ?transition.direction, "history transition rolled back");
    }

    #[must_use]
    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    #[must_use]
    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }

    #[must_use]
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }
}

/// Hash of the canonical JSON form, ignoring the modification timestamp.
#[must_use]
pub fn comparison_key(project: &Project) -> String {
    let mut normalized = project.clone();
    normalized.updated_at = normalized.created_at;
    let bytes = serde_json::to_vec(&normalized).unwrap_or_default();
    format!("{:x}", Sha256::digest(&bytes))
}

fn push_bounded(
    stack: &mut VecDeque<HistoryEntry>,
    entry: HistoryEntry,
    max_depth: usize,
) -> Option<HistoryEntry> {
    let evicted = if stack.len() >= max_depth {
        stack.pop_front()
    } else {
        None
    };
    stack.push_back(entry);
    evicted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project_with_bpm(bpm: f64) -> Project {
        let mut project = Project::new("History", 120.0);
        project.bpm = bpm;
        project
    }

    #[test]
    fn identical_state_is_not_recorded() {
        let project = project_with_bpm(120.0);
        let mut history = History::new(&project, 8);
        let mut touched = project.clone();
        touched.touch();
        assert!(!history.record(&touched));
        assert_eq!(history.undo_len(), 0);
    }

    #[test]
    fn stacks_evict_oldest_entries() {
        let mut history = History::new(&project_with_bpm(100.0), 2);
        let mut base = project_with_bpm(100.0);
        for bpm in [101.0, 102.0, 103.0] {
            base.bpm = bpm;
            history.record(&base);
        }
        assert_eq!(history.undo_len(), 2);
        let transition = history.begin_undo(&base).expect("undo should be available");
        assert_eq!(transition.target.project.bpm, 102.0);
    }

    #[test]
    fn rollback_restores_stacks_and_baseline() {
        let mut project = project_with_bpm(100.0);
        let mut history = History::new(&project, 4);
        project.bpm = 110.0;
        history.record(&project);

        let transition = history.begin_undo(&project).expect("undo should be available");
        assert_eq!(history.undo_len(), 0);
        assert_eq!(history.redo_len(), 1);
        history.rollback(transition);
        assert_eq!(history.undo_len(), 1);
        assert_eq!(history.redo_len(), 0);
        assert!(!history.record(&project));
    }
}
