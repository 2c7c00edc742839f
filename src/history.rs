//! History tracking (§4.7): record leaf/deep configurations per history
//! state on exit, restore on re-entry.

use std::collections::HashMap;

use crate::document::StateId;

#[derive(Debug, Clone, Default)]
pub struct HistoryTracker {
    /// history-state id -> recorded ids (shallow: direct children of the
    /// parent that were on the active path; deep: the active leaves
    /// themselves).
    recorded: HashMap<StateId, Vec<StateId>>,
}

impl HistoryTracker {
    pub fn new() -> Self {
        HistoryTracker::default()
    }

    pub fn record(&mut self, history_id: &str, ids: Vec<StateId>) {
        self.recorded.insert(history_id.to_string(), ids);
    }

    pub fn recorded_for(&self, history_id: &str) -> Option<&[StateId]> {
        self.recorded.get(history_id).map(|v| v.as_slice())
    }

    pub fn has_recording(&self, history_id: &str) -> bool {
        self.recorded.contains_key(history_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_recalls() {
        let mut tracker = HistoryTracker::new();
        assert!(!tracker.has_recording("h"));
        tracker.record("h", vec!["a".into(), "b".into()]);
        assert!(tracker.has_recording("h"));
        assert_eq!(tracker.recorded_for("h"), Some(&["a".to_string(), "b".to_string()][..]));
    }
}
