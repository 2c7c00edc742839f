//! The Validator (§4.3): seven sequential passes over a parsed `Document`,
//! each appending errors/warnings to accumulators; returns an
//! `OptimizedDocument` only if no pass produced an error.

use std::collections::HashSet;

use crate::document::{Action, Document, HistoryType, IfKind, StateId, StateType, TransitionType};
use crate::error::{HistoryKindLabel, ScxmlError, ValidationError, ValidationWarning};
use crate::expr::{compile, compile_location};
use crate::hierarchy::{self, HierarchyCache};

/// A validated, enriched document: immutable and freely shareable read-only
/// (§5), carrying the lookup indexes and hierarchy cache the interpreter
/// needs on every microstep.
#[derive(Debug)]
pub struct OptimizedDocument {
    pub document: Document,
    pub hierarchy: HierarchyCache,
}

impl OptimizedDocument {
    pub fn state(&self, id: &str) -> Option<&crate::document::State> {
        self.document.state(id)
    }

    /// The "source-state-to-transitions map" of §3: realized as a lookup
    /// through the owning state rather than a second copy of the same
    /// transitions, since `State::transitions` already is that index.
    pub fn transitions_for(&self, id: &str) -> &[crate::document::Transition] {
        self.document
            .state(id)
            .map(|s| s.transitions.as_slice())
            .unwrap_or(&[])
    }
}

struct Accumulator {
    errors: Vec<ValidationError>,
    warnings: Vec<ValidationWarning>,
}

impl Accumulator {
    fn new() -> Self {
        Accumulator {
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

pub fn validate(mut doc: Document) -> Result<(OptimizedDocument, Vec<ValidationWarning>), ScxmlError> {
    let mut acc = Accumulator::new();

    pass_state_structure(&doc, &mut acc);
    pass_history(&doc, &mut acc);
    pass_transitions(&mut doc, &mut acc);
    pass_initial(&doc, &mut acc);
    pass_expressions(&mut doc, &mut acc);

    if !acc.errors.is_empty() {
        return Err(ScxmlError::Validation {
            errors: acc.errors,
            warnings: acc.warnings,
        });
    }

    // Pass 6 (lookup-map build) is already satisfied by `Document`'s
    // internal id->state map; pass 7 builds the hierarchy cache.
    let hierarchy = HierarchyCache::build(&doc);
    pass_unreachable(&doc, &hierarchy, &mut acc);

    Ok((
        OptimizedDocument {
            document: doc,
            hierarchy,
        },
        acc.warnings,
    ))
}

/// Pass 1: id uniqueness, parallel-child-not-atomic, final-state shape.
fn pass_state_structure(doc: &Document, acc: &mut Accumulator) {
    for id in &doc.duplicate_ids {
        acc.errors.push(ValidationError::DuplicateStateId { id: id.clone() });
    }

    for state in doc.states_iter() {
        if state.is_parallel() {
            for child in state.non_initial_children(doc) {
                if let Some(child_state) = doc.state(child) {
                    if matches!(child_state.state_type, StateType::Atomic) {
                        acc.warnings.push(ValidationWarning::ParallelChildAtomic {
                            id: state.id.clone(),
                            child: child.clone(),
                        });
                    }
                }
            }
        }
        if state.is_final() && (!state.children.is_empty() || !state.transitions.is_empty()) {
            acc.errors.push(ValidationError::FinalStateHasChildrenOrTransitions {
                id: state.id.clone(),
            });
        }
    }
}

/// Pass 2: history placement and default-transition resolution.
fn pass_history(doc: &Document, acc: &mut Accumulator) {
    for state in doc.states_iter() {
        if state.is_history() && state.parent.is_none() {
            acc.errors.push(ValidationError::HistoryAtRoot { id: state.id.clone() });
        }
    }

    for state in doc.states_iter() {
        let mut shallow = 0;
        let mut deep = 0;
        for child in &state.children {
            if let Some(c) = doc.state(child) {
                if c.is_history() {
                    match c.history_type {
                        Some(HistoryType::Shallow) => shallow += 1,
                        Some(HistoryType::Deep) => deep += 1,
                        None => {}
                    }
                }
            }
        }
        if shallow > 1 {
            acc.errors.push(ValidationError::DuplicateHistory {
                parent: state.id.clone(),
                kind: HistoryKindLabel::Shallow,
            });
        }
        if deep > 1 {
            acc.errors.push(ValidationError::DuplicateHistory {
                parent: state.id.clone(),
                kind: HistoryKindLabel::Deep,
            });
        }
    }

    for state in doc.states_iter() {
        if state.is_history() {
            match state.transitions.first() {
                Some(t) => {
                    for target in &t.targets {
                        if doc.state(target).is_none() {
                            acc.errors.push(ValidationError::UnresolvedHistoryDefault {
                                id: state.id.clone(),
                                target: target.clone(),
                            });
                        }
                    }
                }
                None => {
                    // A history state with no default transition is only a
                    // problem if it is ever entered without a recording;
                    // that's a runtime concern, not flagged here.
                }
            }
        }
    }
}

/// Pass 3: transition target resolution, condition compilation, and the
/// internal-transition-to-external downgrade rule (§3 Transition invariant).
fn pass_transitions(doc: &mut Document, acc: &mut Accumulator) {
    let ids: Vec<StateId> = doc.states_iter().map(|s| s.id.clone()).collect();
    for id in &ids {
        let targets: Vec<StateId> = doc.state(id).map(|s| {
            s.transitions.iter().flat_map(|t| t.targets.clone()).collect()
        }).unwrap_or_default();
        for target in &targets {
            if doc.state(target).is_none() {
                acc.errors.push(ValidationError::UnresolvedTransitionTarget {
                    target: target.clone(),
                });
            }
        }
    }

    for id in &ids {
        let source_is_compound = doc.state(id).map(|s| s.is_compound()).unwrap_or(false);
        let n_transitions = doc.state(id).map(|s| s.transitions.len()).unwrap_or(0);
        for i in 0..n_transitions {
            let (targets, cond, is_internal) = {
                let t = &doc.state(id).unwrap().transitions[i];
                (t.targets.clone(), t.cond.clone(), t.transition_type == TransitionType::Internal)
            };

            if is_internal {
                let all_proper_descendants = !targets.is_empty() && targets.iter().all(|target| {
                    let mut set = HashSet::new();
                    hierarchy::collect_descendants(doc, id, &mut set);
                    set.contains(target)
                });
                if !source_is_compound || !all_proper_descendants {
                    doc.state_mut(id).unwrap().transitions[i].transition_type = TransitionType::External;
                }
            }

            if let Some(source) = cond {
                match compile(&source) {
                    Ok(expr) => {
                        doc.state_mut(id).unwrap().transitions[i].compiled_cond = Some(expr);
                    }
                    Err(err) => {
                        acc.warnings.push(ValidationWarning::ConditionCompileFailed {
                            state: id.clone(),
                            source,
                            reason: err.message,
                        });
                        doc.state_mut(id).unwrap().transitions[i].compiled_cond = None;
                    }
                }
            }
        }
    }
}

/// Pass 4: `initial` attribute resolution.
fn pass_initial(doc: &Document, acc: &mut Accumulator) {
    for state in doc.states_iter() {
        if state.initial_attr.is_empty() {
            continue;
        }
        for target in &state.initial_attr {
            match doc.state(target) {
                Some(t) if t.parent.as_deref() == Some(state.id.as_str()) => {}
                _ => acc.errors.push(ValidationError::BadInitial {
                    id: state.id.clone(),
                    target: target.clone(),
                }),
            }
        }
        if state.initial_attr.len() > 1 && !state.is_parallel() {
            // Multi-target initials are only legal when they collectively
            // identify one leaf per parallel region; a non-parallel compound
            // state cannot host more than one simultaneously-active child.
            acc.errors.push(ValidationError::MultiInitialNotOneLeafPerRegion {
                id: state.id.clone(),
            });
        }
    }
}

/// Pass 5: compile every expression reachable from data elements and
/// actions. Failures degrade to a nil compiled form (evaluated at runtime to
/// `undefined` / condition false) rather than aborting validation.
fn pass_expressions(doc: &mut Document, acc: &mut Accumulator) {
    for elem in &mut doc.datamodel_elements {
        if let Some(source) = &elem.expr {
            match compile(source) {
                Ok(expr) => elem.compiled_expr = Some(expr),
                Err(err) => {
                    acc.warnings.push(ValidationWarning::ExpressionCompileFailed {
                        context: format!("datamodel '{}'", elem.id),
                        source: source.clone(),
                        reason: err.message,
                    });
                }
            }
        }
    }

    let ids: Vec<StateId> = doc.states_iter().map(|s| s.id.clone()).collect();
    for id in &ids {
        let mut onentry = doc.state_mut(id).unwrap().onentry.clone();
        compile_actions(&mut onentry, &format!("state '{}' onentry", id), acc);
        doc.state_mut(id).unwrap().onentry = onentry;

        let mut onexit = doc.state_mut(id).unwrap().onexit.clone();
        compile_actions(&mut onexit, &format!("state '{}' onexit", id), acc);
        doc.state_mut(id).unwrap().onexit = onexit;

        let n = doc.state(id).unwrap().transitions.len();
        for i in 0..n {
            let mut actions = doc.state_mut(id).unwrap().transitions[i].actions.clone();
            compile_actions(&mut actions, &format!("transition on state '{}'", id), acc);
            doc.state_mut(id).unwrap().transitions[i].actions = actions;
        }
    }
}

fn compile_actions(actions: &mut [Action], context: &str, acc: &mut Accumulator) {
    for action in actions.iter_mut() {
        match action {
            Action::Log { expr, compiled_expr, .. } => {
                if let Some(source) = expr {
                    compile_into(source, compiled_expr, &format!("{} log", context), acc);
                }
            }
            Action::Assign {
                location,
                compiled_location,
                expr,
                compiled_expr,
            } => {
                compile_into(expr, compiled_expr, &format!("{} assign", context), acc);
                match compile_location(location) {
                    Ok(loc) => *compiled_location = Some(loc),
                    Err(err) => {
                        acc.warnings.push(ValidationWarning::ExpressionCompileFailed {
                            context: format!("{} assign location", context),
                            source: location.clone(),
                            reason: err.message,
                        });
                    }
                }
            }
            Action::If { blocks } => {
                for block in blocks.iter_mut() {
                    if block.kind != IfKind::Else {
                        if let Some(source) = &block.cond {
                            compile_into(source, &mut block.compiled_cond, &format!("{} if", context), acc);
                        }
                    }
                    compile_actions(&mut block.actions, context, acc);
                }
            }
            Action::Foreach {
                array_expr,
                compiled_array_expr,
                actions,
                ..
            } => {
                compile_into(array_expr, compiled_array_expr, &format!("{} foreach", context), acc);
                compile_actions(actions, context, acc);
            }
            Action::Raise { .. } => {}
            Action::Send(send) => {
                if let Some(source) = &send.event_expr {
                    compile_into(
                        source,
                        &mut send.compiled_event_expr,
                        &format!("{} send eventexpr", context),
                        acc,
                    );
                }
                if let Some(source) = &send.target_expr {
                    compile_into(
                        source,
                        &mut send.compiled_target_expr,
                        &format!("{} send targetexpr", context),
                        acc,
                    );
                }
                if let Some(source) = &send.delay_expr {
                    compile_into(
                        source,
                        &mut send.compiled_delay_expr,
                        &format!("{} send delayexpr", context),
                        acc,
                    );
                }
                if let Some(crate::document::SendContent::Expr(source, compiled)) = &mut send.content {
                    compile_into(&source.clone(), compiled, &format!("{} send content", context), acc);
                }
                for param in send.params.iter_mut() {
                    if let Some(source) = &param.expr {
                        compile_into(source, &mut param.compiled_expr, &format!("{} send param", context), acc);
                    }
                    if let Some(source) = &param.location {
                        match compile_location(source) {
                            Ok(loc) => param.compiled_location = Some(loc),
                            Err(err) => {
                                acc.warnings.push(ValidationWarning::ExpressionCompileFailed {
                                    context: format!("{} send param location", context),
                                    source: source.clone(),
                                    reason: err.message,
                                });
                            }
                        }
                    }
                }
            }
        }
    }
}

fn compile_into(
    source: &str,
    slot: &mut Option<crate::expr::Expr>,
    context: &str,
    acc: &mut Accumulator,
) {
    match compile(source) {
        Ok(expr) => *slot = Some(expr),
        Err(err) => {
            acc.warnings.push(ValidationWarning::ExpressionCompileFailed {
                context: context.to_string(),
                source: source.to_string(),
                reason: err.message,
            });
        }
    }
}

/// Reports (as warnings) states and history pseudo-states that can never be
/// reached from the initial configuration.
fn pass_unreachable(doc: &Document, hierarchy: &HierarchyCache, acc: &mut Accumulator) {
    let mut reachable: HashSet<StateId> = HashSet::new();
    let mut frontier: Vec<StateId> = if doc.initial.is_empty() {
        doc.top_level.first().cloned().into_iter().collect()
    } else {
        doc.initial.clone()
    };
    // Every ancestor of the starting point(s) is trivially reachable, and so
    // is any state reachable by following transition targets transitively.
    for id in &frontier {
        for ancestor in hierarchy.ancestor_path(id) {
            reachable.insert(ancestor.clone());
        }
    }
    while let Some(id) = frontier.pop() {
        if !reachable.insert(id.clone()) {
            continue;
        }
        if let Some(state) = doc.state(&id) {
            for child in &state.children {
                frontier.push(child.clone());
            }
            for t in &state.transitions {
                for target in &t.targets {
                    frontier.push(target.clone());
                }
            }
        }
    }

    for state in doc.states_iter() {
        if !reachable.contains(&state.id) {
            if state.is_history() {
                acc.warnings.push(ValidationWarning::UnreachableHistory { id: state.id.clone() });
            } else if state.state_type != crate::document::StateType::Initial {
                acc.warnings.push(ValidationWarning::UnreachableState { id: state.id.clone() });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{State, Transition, EventDescriptor};

    fn minimal_doc() -> Document {
        let mut doc = Document::new();
        let mut a = State::new("a".into(), StateType::Atomic, 0);
        a.transitions.push(Transition {
            event: EventDescriptor::parse("go"),
            targets: vec!["b".into()],
            cond: None,
            compiled_cond: None,
            transition_type: TransitionType::External,
            source: "a".into(),
            actions: Vec::new(),
            doc_order: 0,
            source_loc: Default::default(),
        });
        let b = State::new("b".into(), StateType::Atomic, 1);
        doc.top_level = vec!["a".into(), "b".into()];
        doc.insert_state(a);
        doc.insert_state(b);
        doc
    }

    #[test]
    fn validates_a_minimal_document() {
        let doc = minimal_doc();
        let (opt, warnings) = validate(doc).unwrap();
        assert!(warnings.is_empty());
        assert!(opt.state("a").is_some());
    }

    #[test]
    fn rejects_unresolved_transition_target() {
        let mut doc = minimal_doc();
        doc.state_mut("a").unwrap().transitions[0].targets = vec!["missing".into()];
        let err = validate(doc).unwrap_err();
        match err {
            ScxmlError::Validation { errors, .. } => {
                assert!(errors.iter().any(|e| matches!(e, ValidationError::UnresolvedTransitionTarget { .. })));
            }
            _ => panic!("expected validation error"),
        }
    }

    #[test]
    fn downgrades_internal_transition_with_non_descendant_target_to_external() {
        let mut doc = Document::new();
        let mut root = State::new("root".into(), StateType::Compound, 0);
        root.children = vec!["s1".into(), "s2".into()];
        let mut s1 = State::new("s1".into(), StateType::Atomic, 1);
        s1.parent = Some("root".into());
        s1.transitions.push(Transition {
            event: EventDescriptor::parse("go"),
            targets: vec!["s2".into()],
            cond: None,
            compiled_cond: None,
            transition_type: TransitionType::Internal,
            source: "s1".into(),
            actions: Vec::new(),
            doc_order: 0,
            source_loc: Default::default(),
        });
        let mut s2 = State::new("s2".into(), StateType::Atomic, 2);
        s2.parent = Some("root".into());
        doc.top_level = vec!["root".into()];
        doc.insert_state(root);
        doc.insert_state(s1);
        doc.insert_state(s2);

        let (opt, _) = validate(doc).unwrap();
        assert_eq!(
            opt.state("s1").unwrap().transitions[0].transition_type,
            TransitionType::External
        );
    }

    #[test]
    fn condition_compile_failure_is_a_warning_with_nil_compiled_form() {
        let mut doc = minimal_doc();
        doc.state_mut("a").unwrap().transitions[0].cond = Some("1 +".to_string());
        let (opt, warnings) = validate(doc).unwrap();
        assert!(warnings
            .iter()
            .any(|w| matches!(w, ValidationWarning::ConditionCompileFailed { .. })));
        assert!(opt.state("a").unwrap().transitions[0].compiled_cond.is_none());
    }
}
