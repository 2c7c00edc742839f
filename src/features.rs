//! Feature Detector (§4.9): a pure function from `Document` to the set of
//! SCXML features it exercises, used by the test harness to skip documents
//! that need something this interpreter does not implement.

use std::collections::BTreeSet;

use crate::document::{Action, Document, StateType};

pub const FEATURE_ONENTRY_ACTIONS: &str = "onentry_actions";
pub const FEATURE_ONEXIT_ACTIONS: &str = "onexit_actions";
pub const FEATURE_DATAMODEL: &str = "datamodel";
pub const FEATURE_PARALLEL_STATES: &str = "parallel_states";
pub const FEATURE_HISTORY_STATES: &str = "history_states";
pub const FEATURE_SEND_DELAY_EXPRESSIONS: &str = "send_delay_expressions";
pub const FEATURE_SEND_EXTERNAL_TARGET: &str = "send_external_target";
pub const FEATURE_INVOKE_ELEMENTS: &str = "invoke_elements";
pub const FEATURE_SCRIPT_ELEMENTS: &str = "script_elements";
pub const FEATURE_FOREACH: &str = "foreach";
pub const FEATURE_INTERNAL_TRANSITIONS: &str = "internal_transitions";

pub fn detect_features(doc: &Document) -> BTreeSet<&'static str> {
    let mut features = BTreeSet::new();

    if !doc.datamodel_elements.is_empty() {
        features.insert(FEATURE_DATAMODEL);
    }

    for tag in &doc.requires_unsupported {
        match tag.as_str() {
            "script" => {
                features.insert(FEATURE_SCRIPT_ELEMENTS);
            }
            "invoke" => {
                features.insert(FEATURE_INVOKE_ELEMENTS);
            }
            _ => {}
        }
    }

    for state in doc.states_iter() {
        match state.state_type {
            StateType::Parallel => {
                features.insert(FEATURE_PARALLEL_STATES);
            }
            StateType::History => {
                features.insert(FEATURE_HISTORY_STATES);
            }
            _ => {}
        }
        if !state.onentry.is_empty() {
            features.insert(FEATURE_ONENTRY_ACTIONS);
            scan_actions(&state.onentry, &mut features);
        }
        if !state.onexit.is_empty() {
            features.insert(FEATURE_ONEXIT_ACTIONS);
            scan_actions(&state.onexit, &mut features);
        }
        for t in &state.transitions {
            if t.transition_type == crate::document::TransitionType::Internal {
                features.insert(FEATURE_INTERNAL_TRANSITIONS);
            }
            scan_actions(&t.actions, &mut features);
        }
    }

    features
}

fn scan_actions(actions: &[Action], features: &mut BTreeSet<&'static str>) {
    for action in actions {
        match action {
            Action::Foreach { actions, .. } => {
                features.insert(FEATURE_FOREACH);
                scan_actions(actions, features);
            }
            Action::If { blocks } => {
                for block in blocks {
                    scan_actions(&block.actions, features);
                }
            }
            Action::Send(send) => {
                if send.delay.is_some() || send.delay_expr.is_some() {
                    features.insert(FEATURE_SEND_DELAY_EXPRESSIONS);
                }
                let is_internal_target = send
                    .target
                    .as_deref()
                    .map(|t| t == "#_internal")
                    .unwrap_or(true);
                if !is_internal_target || send.target_expr.is_some() {
                    features.insert(FEATURE_SEND_EXTERNAL_TARGET);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{DataElement, State};

    #[test]
    fn detects_datamodel_and_parallel() {
        let mut doc = Document::new();
        doc.datamodel_elements.push(DataElement {
            id: "x".into(),
            expr: Some("1".into()),
            compiled_expr: None,
            src: None,
        });
        let p = State::new("p".into(), StateType::Parallel, 0);
        doc.insert_state(p);

        let features = detect_features(&doc);
        assert!(features.contains(FEATURE_DATAMODEL));
        assert!(features.contains(FEATURE_PARALLEL_STATES));
        assert!(!features.contains(FEATURE_HISTORY_STATES));
    }
}
