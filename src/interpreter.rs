//! The interpreter (§4.5): `initialize`/`send_event` drive the
//! macrostep/microstep algorithm over an `OptimizedDocument`, producing a new
//! `StateChart` each time rather than mutating one in place (§5 "no locks;
//! advance by computing a new StateChart from the old one").

use std::collections::{HashSet, VecDeque};

use crate::actions::{execute_block, ActionHost};
use crate::document::{State, StateType, Transition, TransitionType};
use crate::event::{done_state_event, Event, EventOrigin};
use crate::expr::{evaluate_condition, EvalContext};
use crate::history::HistoryTracker;
use crate::logging::{LogAdapter, LogLevel, LogMetadata, StdLogAdapter};
use crate::value::{OrderedMap, Value};
use crate::validator::OptimizedDocument;

/// The set of currently active states: every compound/parallel ancestor of
/// each active leaf, plus the leaves themselves (§3 "Configuration").
pub type Configuration = HashSet<crate::document::StateId>;

/// A microstep budget (§4.5 "more than 100 consecutive eventless microsteps
/// indicates a non-terminating document"); exceeding it stops the macrostep
/// and logs a warning rather than looping forever.
const MAX_MICROSTEPS: usize = 100;

pub struct StateChart<'a> {
    pub doc: &'a OptimizedDocument,
    pub configuration: Configuration,
    pub data: OrderedMap,
    pub history: HistoryTracker,
    pub current_event: Option<Event>,
    pub running: bool,
    internal_queue: VecDeque<Event>,
    external_queue: VecDeque<Event>,
    log_adapter: Box<dyn LogAdapter>,
    phase: String,
}

impl<'a> std::fmt::Debug for StateChart<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateChart")
            .field("configuration", &self.configuration)
            .field("data", &self.data)
            .field("running", &self.running)
            .finish()
    }
}

impl<'a> StateChart<'a> {
    fn new(doc: &'a OptimizedDocument) -> Self {
        let mut data = OrderedMap::new();
        for elem in &doc.document.datamodel_elements {
            let value = match &elem.compiled_expr {
                Some(expr) => {
                    let seed = SeedEvalContext;
                    crate::expr::evaluate(expr, &seed).unwrap_or(Value::Undefined)
                }
                None => Value::Undefined,
            };
            data.insert(elem.id.clone(), value);
        }
        StateChart {
            doc,
            configuration: Configuration::new(),
            data,
            history: HistoryTracker::new(),
            current_event: None,
            running: true,
            internal_queue: VecDeque::new(),
            external_queue: VecDeque::new(),
            log_adapter: Box::new(StdLogAdapter::default()),
            phase: "init".to_string(),
        }
    }

    pub fn with_log_adapter(mut self, adapter: Box<dyn LogAdapter>) -> Self {
        self.log_adapter = adapter;
        self
    }

    /// Active leaves (§6 `active_leaves(state_chart) -> ordered list`):
    /// atomic/final states in the configuration, in document order.
    pub fn active_leaves(&self) -> Vec<crate::document::StateId> {
        let mut leaves: Vec<&State> = self
            .configuration
            .iter()
            .filter_map(|id| self.doc.state(id))
            .filter(|s| s.is_atomic())
            .collect();
        leaves.sort_by_key(|s| s.doc_order);
        leaves.into_iter().map(|s| s.id.clone()).collect()
    }

    pub fn logs(&self) -> Option<&[crate::logging::LogEntry]> {
        self.log_adapter
            .as_any()
            .downcast_ref::<crate::logging::TestLogAdapter>()
            .map(|t| t.entries.as_slice())
    }
}

/// A placeholder context used only to seed datamodel values before any
/// configuration exists; `In(...)` is always false and `_event` is always
/// undefined at that point (§4.1 "datamodel initialization happens before
/// the first microstep").
struct SeedEvalContext;

impl EvalContext for SeedEvalContext {
    fn get_variable(&self, _name: &str) -> Value {
        Value::Undefined
    }
    fn is_in_configuration(&self, _state_id: &str) -> bool {
        false
    }
}

impl<'a> EvalContext for StateChart<'a> {
    fn get_variable(&self, name: &str) -> Value {
        if name == "_event" {
            return match &self.current_event {
                Some(e) => e.data.clone(),
                None => Value::Undefined,
            };
        }
        self.data.get(name).cloned().unwrap_or(Value::Undefined)
    }

    fn is_in_configuration(&self, state_id: &str) -> bool {
        self.configuration.contains(state_id)
    }
}

impl<'a> ActionHost for StateChart<'a> {
    fn data(&self) -> &OrderedMap {
        &self.data
    }
    fn data_mut(&mut self) -> &mut OrderedMap {
        &mut self.data
    }
    fn log(&mut self, level: LogLevel, message: String, phase: &str) {
        let mut leaves: Vec<_> = self.active_leaves();
        leaves.sort();
        self.log_adapter.log(
            level,
            message,
            LogMetadata {
                configuration: leaves,
                event: self.current_event.as_ref().map(|e| e.name.clone()),
                phase: phase.to_string(),
            },
        );
    }
    fn raise_internal(&mut self, event: Event) {
        self.internal_queue.push_back(event);
    }
    fn enqueue_external(&mut self, event: Event) {
        self.external_queue.push_back(event);
    }
    fn current_phase(&self) -> String {
        self.phase.clone()
    }
}

/// Builds the initial configuration (§4.5 "interpretation begins with an
/// implicit eventless transition into the document's initial configuration")
/// and runs it to completion.
pub fn initialize(doc: &OptimizedDocument) -> StateChart<'_> {
    let mut chart = StateChart::new(doc);
    let targets = if !doc.document.initial.is_empty() {
        doc.document.initial.clone()
    } else {
        doc.document.top_level.clone()
    };

    let mut entry_set = Vec::new();
    let mut entered = HashSet::new();
    for target in &targets {
        enter_with_ancestors(doc, &chart.history, None, target, &mut entry_set, &mut entered);
    }
    sort_by_doc_order(doc, &mut entry_set);

    chart.phase = "onentry".to_string();
    enter_states(&mut chart, &entry_set);
    chart.configuration = entered;
    raise_done_events(&mut chart, &entry_set);
    run_to_completion(&mut chart);
    chart
}

/// Delivers one external event and runs the resulting macrostep to
/// completion (§4.5 "a macrostep consists of the transitions enabled by one
/// external event, followed by all eventless microsteps they unblock").
pub fn send_event(mut chart: StateChart<'_>, event: Event) -> StateChart<'_> {
    chart.external_queue.push_back(event);
    run_to_completion(&mut chart);
    chart
}

fn run_to_completion(chart: &mut StateChart<'_>) {
    let mut steps = 0usize;
    loop {
        // Eventless transitions always take priority (§4.5 step ordering);
        // only once none are enabled does the internal queue, then the
        // external queue, get a look.
        let eventless_transitions = select_transitions(chart, None);
        if !eventless_transitions.is_empty() {
            steps += 1;
            if steps > MAX_MICROSTEPS {
                chart.log(
                    LogLevel::Warn,
                    "eventless microstep budget exceeded; stopping macrostep".to_string(),
                    "microstep",
                );
                break;
            }
            microstep(chart, eventless_transitions, None);
            continue;
        }

        let next = match chart.internal_queue.pop_front() {
            Some(e) => e,
            None => match chart.external_queue.pop_front() {
                Some(e) => e,
                None => break,
            },
        };

        // The event must be current *before* transitions are selected: a
        // guard condition may read `_event` (§4.5 "set current_event" then
        // "run one microstep", not the other way around).
        let event_name = next.name.clone();
        chart.current_event = Some(next);
        let enabled = select_transitions(chart, Some(&event_name));
        steps += 1;
        if steps > MAX_MICROSTEPS {
            chart.log(
                LogLevel::Warn,
                "microstep budget exceeded while processing an event; stopping".to_string(),
                "microstep",
            );
            break;
        }
        if !enabled.is_empty() {
            microstep(chart, enabled, Some(event_name.as_str()));
        }
    }
}

/// Finds, for each active leaf, the innermost enabled transition (§4.5
/// "walk each active leaf's ancestor chain; the first state with a matching,
/// satisfied transition wins for that leaf"), then resolves conflicts.
fn select_transitions(chart: &StateChart<'_>, event_name: Option<&str>) -> Vec<(String, usize)> {
    let mut enabled = Vec::new();
    for leaf in chart.active_leaves() {
        let path = chart.doc.hierarchy.ancestor_path(&leaf).to_vec();
        'walk: for anc in path.iter().rev() {
            if let Some(state) = chart.doc.state(anc) {
                for (idx, t) in state.transitions.iter().enumerate() {
                    if !t.event.matches(event_name) {
                        continue;
                    }
                    let cond_ok = match &t.compiled_cond {
                        Some(c) => evaluate_condition(c, chart),
                        None => t.cond.is_none(),
                    };
                    if cond_ok {
                        enabled.push((anc.clone(), idx));
                        break 'walk;
                    }
                }
            }
        }
    }
    remove_conflicting_transitions(chart, enabled)
}

/// Conflict resolution (§4.5 "a transition whose source is a descendant of
/// another enabled transition's source wins; otherwise document order
/// decides"): transitions whose exit sets intersect cannot both fire.
fn remove_conflicting_transitions(chart: &StateChart<'_>, enabled: Vec<(String, usize)>) -> Vec<(String, usize)> {
    let mut filtered: Vec<(String, usize)> = Vec::new();
    'outer: for (src, idx) in enabled {
        let exit_t = exit_set_for(chart, &src, idx);
        let mut i = 0;
        while i < filtered.len() {
            let (src2, idx2) = filtered[i].clone();
            let exit_t2 = exit_set_for(chart, &src2, idx2);
            if !exit_t.is_disjoint(&exit_t2) {
                if chart.doc.hierarchy.is_descendant(&src, &src2) {
                    filtered.remove(i);
                    continue;
                } else {
                    continue 'outer;
                }
            }
            i += 1;
        }
        filtered.push((src, idx));
    }
    filtered
}

/// A transition's scope (§4.5 "the deepest compound or parallel ancestor
/// that contains both the source and all targets"). There is no modeled
/// `<scxml>` root state, so two top-level states (or any pair with no
/// compound/parallel ancestor in common) have no `Some` domain at all —
/// `Root` stands in for the implicit document root the W3C algorithm would
/// otherwise use, and spans the whole configuration.
enum TransitionScope {
    /// A targetless transition: no exit, no entry.
    Targetless,
    /// No compound/parallel ancestor contains source and every target; the
    /// domain is the whole document.
    Root,
    /// The deepest compound/parallel ancestor containing source and every
    /// target.
    State(String),
}

fn transition_domain(chart: &StateChart<'_>, source: &str, t: &Transition) -> TransitionScope {
    if t.targets.is_empty() {
        return TransitionScope::Targetless;
    }
    let source_state = match chart.doc.state(source) {
        Some(s) => s,
        None => return TransitionScope::Root,
    };
    let internal_to_source = t.transition_type == TransitionType::Internal
        && source_state.is_compound()
        && t.targets
            .iter()
            .all(|target| chart.doc.hierarchy.is_descendant(target, source));
    if internal_to_source {
        return TransitionScope::State(source.to_string());
    }
    let mut domain = Some(source.to_string());
    for target in &t.targets {
        domain = match domain {
            Some(d) => chart.doc.hierarchy.lcca(&d, target),
            None => None,
        };
        if domain.is_none() {
            // No ancestor in common with this target; once that happens the
            // domain is the document root regardless of the remaining
            // targets, so stop folding.
            break;
        }
    }
    match domain {
        Some(d) => TransitionScope::State(d),
        None => TransitionScope::Root,
    }
}

fn exit_set_for(chart: &StateChart<'_>, source: &str, idx: usize) -> HashSet<String> {
    let t = &chart.doc.state(source).unwrap().transitions[idx];
    match transition_domain(chart, source, t) {
        TransitionScope::Targetless => HashSet::new(),
        TransitionScope::Root => chart.configuration.clone(),
        TransitionScope::State(domain) => chart
            .configuration
            .iter()
            .filter(|s| chart.doc.hierarchy.is_descendant(s, &domain))
            .cloned()
            .collect(),
    }
}

fn microstep(chart: &mut StateChart<'_>, transitions: Vec<(String, usize)>, _event_name: Option<&str>) {
    let mut exit_union: HashSet<String> = HashSet::new();
    for (src, idx) in &transitions {
        exit_union.extend(exit_set_for(chart, src, *idx));
    }
    let mut exit_set: Vec<String> = exit_union.iter().cloned().collect();
    sort_by_doc_order_desc(chart.doc, &mut exit_set);

    chart.phase = "onexit".to_string();
    record_history(chart, &exit_set);
    for state_id in &exit_set {
        if let Some(state) = chart.doc.state(state_id) {
            let onexit = state.onexit.clone();
            execute_block(&onexit, chart);
        }
        chart.configuration.remove(state_id);
    }

    chart.phase = "transition".to_string();
    let mut ordered_transitions = transitions.clone();
    ordered_transitions.sort_by_key(|(src, idx)| {
        chart.doc.state(src).unwrap().transitions[*idx].doc_order
    });
    for (src, idx) in &ordered_transitions {
        let actions = chart.doc.state(src).unwrap().transitions[*idx].actions.clone();
        execute_block(&actions, chart);
    }

    let mut entry_set = Vec::new();
    let mut entered: HashSet<String> = chart.configuration.clone();
    for (src, idx) in &transitions {
        let t = &chart.doc.state(src).unwrap().transitions[*idx];
        if t.targets.is_empty() {
            continue;
        }
        // `Root` and the targetless case (already skipped above) both mean
        // "enter from the document root"; `enter_with_ancestors` already
        // treats `None` that way.
        let domain = match transition_domain(chart, src, t) {
            TransitionScope::State(d) => Some(d),
            TransitionScope::Root | TransitionScope::Targetless => None,
        };
        for target in &t.targets {
            enter_with_ancestors(chart.doc, &chart.history, domain.as_deref(), target, &mut entry_set, &mut entered);
        }
    }
    sort_by_doc_order(chart.doc, &mut entry_set);

    chart.phase = "onentry".to_string();
    enter_states(chart, &entry_set);
    chart.configuration = entered;
    raise_done_events(chart, &entry_set);
}

/// Records shallow/deep history for every history pseudo-state that is
/// being exited alongside its parent (§4.7): shallow records the parent's
/// active direct children, deep records the active leaves beneath it.
fn record_history(chart: &mut StateChart<'_>, exit_set: &[String]) {
    for state_id in exit_set {
        let state = match chart.doc.state(state_id) {
            Some(s) => s,
            None => continue,
        };
        for child_id in &state.children {
            let child = match chart.doc.state(child_id) {
                Some(c) => c,
                None => continue,
            };
            if !child.is_history() {
                continue;
            }
            let recorded: Vec<String> = match child.history_type {
                Some(crate::document::HistoryType::Shallow) => state
                    .children
                    .iter()
                    .filter(|c| chart.configuration.contains(*c))
                    .cloned()
                    .collect(),
                Some(crate::document::HistoryType::Deep) => chart
                    .configuration
                    .iter()
                    .filter(|s| chart.doc.hierarchy.is_descendant(s, state_id))
                    .filter(|s| chart.doc.state(s).map(|st| st.is_atomic()).unwrap_or(false))
                    .cloned()
                    .collect(),
                None => Vec::new(),
            };
            if !recorded.is_empty() {
                chart.history.record(&child.id, recorded);
            }
        }
    }
}

/// Adds `target` and every ancestor strictly between `domain` (exclusive)
/// and `target` to the entry set, resolving default children / history as it
/// descends (§4.5 "computeEntrySet"). When a crossed ancestor is a parallel
/// state, every sibling region not already entered is entered via its own
/// default descendant.
fn enter_with_ancestors(
    doc: &OptimizedDocument,
    history: &HistoryTracker,
    domain: Option<&str>,
    target: &str,
    entry_set: &mut Vec<String>,
    entered: &mut HashSet<String>,
) {
    let path = doc.hierarchy.ancestor_path(target);
    let start = domain
        .and_then(|d| path.iter().position(|p| p == d))
        .map(|i| i + 1)
        .unwrap_or(0);

    for anc in &path[start..path.len().saturating_sub(1)] {
        if entered.insert(anc.clone()) {
            entry_set.push(anc.clone());
        }
        if let Some(s) = doc.state(anc) {
            if s.is_parallel() {
                for region in s.non_initial_children(&doc.document) {
                    if !entered.contains(region) {
                        add_descendant_states_to_enter(doc, history, region, entry_set, entered);
                    }
                }
            }
        }
    }

    // A transition may target a history pseudo-state directly (not only
    // reach one while descending into its compound parent's default child);
    // resolve it the same way without ever adding the pseudo-state itself to
    // the configuration (§4.5 "History state → resolve via HistoryTracker").
    if let Some(target_state) = doc.state(target) {
        if target_state.is_history() {
            enter_history(doc, history, target_state, entry_set, entered);
            return;
        }
    }

    add_descendant_states_to_enter(doc, history, target, entry_set, entered);
}

/// Enters whatever a history pseudo-state resolves to: its recorded
/// configuration if one exists, otherwise its single default transition's
/// targets (§4.7) — never the history pseudo-state id itself.
fn enter_history(
    doc: &OptimizedDocument,
    history: &HistoryTracker,
    history_state: &State,
    entry_set: &mut Vec<String>,
    entered: &mut HashSet<String>,
) {
    let parent = history_state.parent.as_deref();
    if let Some(recorded) = history.recorded_for(&history_state.id) {
        let recorded = recorded.to_vec();
        for r in recorded {
            enter_with_ancestors(doc, history, parent, &r, entry_set, entered);
        }
        return;
    }
    if let Some(default) = history_state.transitions.first() {
        for target in default.targets.clone() {
            enter_with_ancestors(doc, history, parent, &target, entry_set, entered);
        }
    }
}

fn add_descendant_states_to_enter(
    doc: &OptimizedDocument,
    history: &HistoryTracker,
    state_id: &str,
    entry_set: &mut Vec<String>,
    entered: &mut HashSet<String>,
) {
    if !entered.insert(state_id.to_string()) {
        return;
    }
    entry_set.push(state_id.to_string());

    let state = match doc.state(state_id) {
        Some(s) => s,
        None => return,
    };

    match state.state_type {
        StateType::Compound => {
            if let Some(history_child) = state
                .children
                .iter()
                .find_map(|c| doc.state(c).filter(|s| s.is_history()))
            {
                enter_history(doc, history, history_child, entry_set, entered);
                return;
            }
            if !state.initial_attr.is_empty() {
                let targets = state.initial_attr.clone();
                for target in targets {
                    enter_with_ancestors(doc, history, Some(state_id), &target, entry_set, entered);
                }
            } else if let Some(first) = state
                .non_initial_children(doc)
                .filter_map(|c| doc.state(c))
                .min_by_key(|s| s.doc_order)
            {
                let first_id = first.id.clone();
                add_descendant_states_to_enter(doc, history, &first_id, entry_set, entered);
            }
        }
        StateType::Parallel => {
            let children: Vec<String> = state.non_initial_children(doc).cloned().collect();
            for child in children {
                add_descendant_states_to_enter(doc, history, &child, entry_set, entered);
            }
        }
        _ => {}
    }
}

fn enter_states(chart: &mut StateChart<'_>, entry_set: &[String]) {
    for state_id in entry_set {
        if let Some(state) = chart.doc.state(state_id) {
            let onentry = state.onentry.clone();
            execute_block(&onentry, chart);
        }
    }
}

/// Raises `done.state.<parent>` for any final state just entered, and
/// `done.state.<parallel>` for every enclosing parallel ancestor once every
/// one of its regions has reached a final state of its own (§4.5
/// "done.state.* event emission"). The regions of a real SCXML document are
/// themselves compound states, so a final's parallel ancestor is almost
/// never its direct parent — `parallel_ancestors` walks the whole chain
/// rather than checking only `state.parent`.
fn raise_done_events(chart: &mut StateChart<'_>, entry_set: &[String]) {
    for state_id in entry_set {
        let state = match chart.doc.state(state_id) {
            Some(s) => s,
            None => continue,
        };
        if !state.is_final() {
            continue;
        }

        if let Some(parent) = &state.parent {
            if chart.doc.state(parent).map(|p| p.is_compound()).unwrap_or(false) {
                chart.raise_internal(Event::internal(done_state_event(parent), Value::Undefined));
            }
        }

        let parallels: Vec<String> = chart.doc.hierarchy.parallel_ancestors(state_id).to_vec();
        for parallel in parallels {
            let regions = chart.doc.hierarchy.parallel_regions_of(&parallel);
            if regions.is_empty() {
                continue;
            }
            let all_done = regions.iter().all(|region| {
                chart.configuration.iter().any(|s| {
                    chart.doc.hierarchy.is_descendant(s, region)
                        && chart.doc.state(s).map(|st| st.is_final()).unwrap_or(false)
                })
            });
            if all_done {
                chart.raise_internal(Event::internal(done_state_event(&parallel), Value::Undefined));
            }
        }
    }
}

fn sort_by_doc_order(doc: &OptimizedDocument, ids: &mut [String]) {
    ids.sort_by_key(|id| doc.state(id).map(|s| s.doc_order).unwrap_or(usize::MAX));
}

fn sort_by_doc_order_desc(doc: &OptimizedDocument, ids: &mut [String]) {
    ids.sort_by_key(|id| std::cmp::Reverse(doc.state(id).map(|s| s.doc_order).unwrap_or(0)));
}

impl Event {
    pub fn is_external(&self) -> bool {
        self.origin == EventOrigin::External
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Document, EventDescriptor, State, StateType, Transition, TransitionType};
    use crate::validator::validate;

    fn two_state_doc() -> OptimizedDocument {
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
        validate(doc).unwrap().0
    }

    #[test]
    fn initialize_enters_first_top_level_state_when_no_initial_given() {
        let doc = two_state_doc();
        let chart = initialize(&doc);
        assert_eq!(chart.active_leaves(), vec!["a".to_string()]);
    }

    #[test]
    fn matching_event_transitions_to_target_state() {
        let doc = two_state_doc();
        let chart = initialize(&doc);
        let chart = send_event(chart, Event::external("go", Value::Undefined));
        assert_eq!(chart.active_leaves(), vec!["b".to_string()]);
    }

    #[test]
    fn non_matching_event_is_a_no_op() {
        let doc = two_state_doc();
        let chart = initialize(&doc);
        let chart = send_event(chart, Event::external("other", Value::Undefined));
        assert_eq!(chart.active_leaves(), vec!["a".to_string()]);
    }

    /// A raised internal event must still be processed even when an
    /// unrelated eventless transition is enabled in the same macrostep: the
    /// eventless transition runs first, but the internal event is not lost
    /// once it does.
    #[test]
    fn raised_internal_event_survives_a_concurrent_eventless_transition() {
        let xml = br#"
            <scxml initial="p">
              <parallel id="p">
                <state id="r1" initial="a1">
                  <state id="a1">
                    <onentry><raise event="e1"/></onentry>
                    <transition event="e1" target="b1"/>
                  </state>
                  <state id="b1"/>
                </state>
                <state id="r2" initial="a2">
                  <state id="a2">
                    <transition target="b2"/>
                  </state>
                  <state id="b2"/>
                </state>
              </parallel>
            </scxml>
        "#;
        let doc = crate::parser::parse(xml).unwrap();
        let (opt, _) = validate(doc).unwrap();
        let chart = initialize(&opt);
        let mut leaves = chart.active_leaves();
        leaves.sort();
        assert_eq!(leaves, vec!["b1".to_string(), "b2".to_string()]);
    }
}
