//! The document model (§3): a typed tree of states, transitions, actions and
//! data elements, generalized from the donor's `fsm::State`/`fsm::Transition`
//! (`fsm.rs`) to the action/event-matching semantics spec.md requires
//! (full `if`/`elseif*`/`else` block lists, pre-compiled conditions and
//! expressions stored alongside their source text, dot-prefix event
//! matching).
//!
//! States live in a flat arena (`Document::states`) addressed by string id
//! rather than as an owned recursive tree, so lookups (parent chains,
//! children) don't fight the borrow checker the way a `Vec<State>`-of-`State`
//! tree would; this is the donor's own approach in spirit (`fsm.rs` keeps a
//! `HashTable<Id, StateRef>` of reference-counted states rather than nesting
//! owned structs).

use crate::expr::{CompiledLocation, Expr};

pub type StateId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateType {
    Atomic,
    Compound,
    Parallel,
    Final,
    /// The synthetic `<initial>` child of a compound state: holds exactly
    /// one eventless transition to the default entry target(s).
    Initial,
    History,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryType {
    Shallow,
    Deep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceLoc {
    pub offset: u64,
}

#[derive(Debug, Clone)]
pub struct State {
    pub id: StateId,
    pub state_type: StateType,
    pub parent: Option<StateId>,
    pub depth: usize,
    /// Ordered child ids (document order), including `<initial>`/`<history>`
    /// pseudo-state children.
    pub children: Vec<StateId>,
    /// `initial` attribute targets, if present (compound states only).
    pub initial_attr: Vec<StateId>,
    pub history_type: Option<HistoryType>,
    pub onentry: Vec<Action>,
    pub onexit: Vec<Action>,
    pub transitions: Vec<Transition>,
    pub doc_order: usize,
    pub source_loc: SourceLoc,
}

impl State {
    pub fn new(id: StateId, state_type: StateType, doc_order: usize) -> Self {
        State {
            id,
            state_type,
            parent: None,
            depth: 0,
            children: Vec::new(),
            initial_attr: Vec::new(),
            history_type: None,
            onentry: Vec::new(),
            onexit: Vec::new(),
            transitions: Vec::new(),
            doc_order,
            source_loc: SourceLoc::default(),
        }
    }

    pub fn is_atomic(&self) -> bool {
        matches!(self.state_type, StateType::Atomic | StateType::Final)
    }

    pub fn is_compound(&self) -> bool {
        matches!(self.state_type, StateType::Compound)
    }

    pub fn is_parallel(&self) -> bool {
        matches!(self.state_type, StateType::Parallel)
    }

    pub fn is_final(&self) -> bool {
        matches!(self.state_type, StateType::Final)
    }

    pub fn is_history(&self) -> bool {
        matches!(self.state_type, StateType::History)
    }

    /// A "real" child for the purpose of default-entry resolution: not the
    /// synthetic `<initial>` pseudo-state.
    pub fn non_initial_children<'a>(&'a self, doc: &'a Document) -> impl Iterator<Item = &'a StateId> {
        self.children
            .iter()
            .filter(move |id| doc.state(id).map(|s| s.state_type != StateType::Initial).unwrap_or(true))
    }
}

/// An event descriptor on a transition. `None` means eventless; `Any` is the
/// bare `*` wildcard; `Tokens` is one or more space-separated dot-token
/// patterns (an explicit trailing `.*` is equivalent to the bare prefix and
/// is stripped at compile time — see §4.5 matching rule).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventDescriptor {
    None,
    Any,
    Tokens(Vec<Vec<String>>),
}

impl EventDescriptor {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() {
            return EventDescriptor::None;
        }
        if raw == "*" {
            return EventDescriptor::Any;
        }
        let mut patterns = Vec::new();
        for word in raw.split_whitespace() {
            if word == "*" {
                return EventDescriptor::Any;
            }
            let trimmed = word.strip_suffix(".*").unwrap_or(word);
            patterns.push(trimmed.split('.').map(|s| s.to_string()).collect());
        }
        EventDescriptor::Tokens(patterns)
    }

    /// §4.5 event matching: empty descriptor only matches "no event"
    /// (eventless microsteps); `*` matches any event; a token sequence
    /// matches the event name or any of its dot-delimited extensions.
    pub fn matches(&self, event_name: Option<&str>) -> bool {
        match (self, event_name) {
            (EventDescriptor::None, None) => true,
            (EventDescriptor::None, Some(_)) => false,
            (EventDescriptor::Any, Some(_)) => true,
            (EventDescriptor::Any, None) => false,
            (EventDescriptor::Tokens(_), None) => false,
            (EventDescriptor::Tokens(patterns), Some(name)) => {
                let name_tokens: Vec<&str> = name.split('.').collect();
                patterns.iter().any(|pattern| {
                    pattern.len() <= name_tokens.len()
                        && pattern.iter().zip(name_tokens.iter()).all(|(p, n)| p == n)
                })
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionType {
    External,
    Internal,
}

#[derive(Debug, Clone)]
pub struct Transition {
    pub event: EventDescriptor,
    pub targets: Vec<StateId>,
    pub cond: Option<String>,
    pub compiled_cond: Option<Expr>,
    pub transition_type: TransitionType,
    /// Assigned when the enclosing state closes during parsing.
    pub source: StateId,
    pub actions: Vec<Action>,
    pub doc_order: usize,
    pub source_loc: SourceLoc,
}

impl Transition {
    pub fn is_targetless(&self) -> bool {
        self.targets.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IfKind {
    If,
    ElseIf,
    Else,
}

#[derive(Debug, Clone)]
pub struct IfBlock {
    pub kind: IfKind,
    pub cond: Option<String>,
    pub compiled_cond: Option<Expr>,
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    /// Exactly one of `expr`/`location` is set, per the `<param>` grammar.
    pub expr: Option<String>,
    pub compiled_expr: Option<Expr>,
    pub location: Option<String>,
    pub compiled_location: Option<CompiledLocation>,
}

#[derive(Debug, Clone)]
pub enum SendContent {
    Expr(String, Option<Expr>),
    Text(String),
}

#[derive(Debug, Clone)]
pub struct SendAction {
    pub event: Option<String>,
    pub event_expr: Option<String>,
    pub compiled_event_expr: Option<Expr>,
    pub target: Option<String>,
    pub target_expr: Option<String>,
    pub compiled_target_expr: Option<Expr>,
    pub type_attr: Option<String>,
    pub type_expr: Option<String>,
    pub id: Option<String>,
    pub id_location: Option<String>,
    pub delay: Option<String>,
    pub delay_expr: Option<String>,
    pub compiled_delay_expr: Option<Expr>,
    pub namelist: Vec<String>,
    pub params: Vec<Param>,
    pub content: Option<SendContent>,
}

/// Executable content (§3 "Action (tagged variant)"). A closed set, matched
/// by a single dispatch function in `actions::execute_action` — no
/// inheritance or trait objects, unlike the donor's `ExecutableContent`
/// trait + `ToAny`-downcasting scheme, since spec.md's action set is fixed
/// (§9 "action variants are a closed set").
#[derive(Debug, Clone)]
pub enum Action {
    Log {
        label: Option<String>,
        expr: Option<String>,
        compiled_expr: Option<Expr>,
    },
    Raise {
        event: Option<String>,
    },
    Assign {
        location: String,
        compiled_location: Option<CompiledLocation>,
        expr: String,
        compiled_expr: Option<Expr>,
    },
    If {
        blocks: Vec<IfBlock>,
    },
    Foreach {
        array_expr: String,
        compiled_array_expr: Option<Expr>,
        item_name: String,
        index_name: Option<String>,
        actions: Vec<Action>,
    },
    Send(Box<SendAction>),
}

#[derive(Debug, Clone)]
pub struct DataElement {
    pub id: String,
    pub expr: Option<String>,
    pub compiled_expr: Option<Expr>,
    pub src: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatamodelKind {
    Early,
}

/// The parsed document, pre-validation.
#[derive(Debug, Clone)]
pub struct Document {
    pub name: Option<String>,
    pub initial: Vec<StateId>,
    pub datamodel: DatamodelKind,
    pub version: Option<String>,
    pub top_level: Vec<StateId>,
    pub datamodel_elements: Vec<DataElement>,
    pub doc_order_counter: usize,
    states: std::collections::HashMap<StateId, State>,
    /// Required-feature tags spotted during parsing (§4.9 supplements this).
    pub requires_unsupported: Vec<String>,
    /// Ids seen more than once during parsing; `insert_state` keeps the
    /// first and records every later collision here for the validator's id
    /// uniqueness pass.
    pub duplicate_ids: Vec<StateId>,
}

impl Document {
    pub fn new() -> Self {
        Document {
            name: None,
            initial: Vec::new(),
            datamodel: DatamodelKind::Early,
            version: None,
            top_level: Vec::new(),
            datamodel_elements: Vec::new(),
            doc_order_counter: 0,
            states: std::collections::HashMap::new(),
            requires_unsupported: Vec::new(),
            duplicate_ids: Vec::new(),
        }
    }

    pub fn next_doc_order(&mut self) -> usize {
        let n = self.doc_order_counter;
        self.doc_order_counter += 1;
        n
    }

    pub fn insert_state(&mut self, state: State) {
        if self.states.contains_key(&state.id) {
            self.duplicate_ids.push(state.id);
        } else {
            self.states.insert(state.id.clone(), state);
        }
    }

    pub fn state(&self, id: &str) -> Option<&State> {
        self.states.get(id)
    }

    pub fn state_mut(&mut self, id: &str) -> Option<&mut State> {
        self.states.get_mut(id)
    }

    pub fn states_iter(&self) -> impl Iterator<Item = &State> {
        self.states.values()
    }

    pub fn states_iter_mut(&mut self) -> impl Iterator<Item = &mut State> {
        self.states.values_mut()
    }

    pub fn state_count(&self) -> usize {
        self.states.len()
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}
