//! The Parser (§4.2): an event-driven translation of an XML event stream
//! into a `Document`, maintaining a stack of `(tag, partial_element)`
//! frames exactly as spec.md describes. Generalized from the donor's
//! `reader.rs` (`ReaderState`/`ReaderStackItem` push/pop pattern, the same
//! `quick_xml::Reader` driver loop) to the full element set spec.md names —
//! the donor only handles `scxml`/`state`/`parallel`/`transition`; this adds
//! `final`, `initial`, `history`, `datamodel`/`data`, `onentry`/`onexit`,
//! and the executable-content tags (`if`/`elseif`/`else`/`foreach`/`log`/
//! `raise`/`assign`/`send`/`param`/`content`), plus `script`/`invoke` as
//! accepted-but-unsupported.

use std::str;

use quick_xml::events::attributes::Attributes;
use quick_xml::events::{BytesStart, Event as XmlEvent};
use quick_xml::Reader;

use crate::document::{
    Action, DataElement, Document, EventDescriptor, HistoryType, IfBlock, IfKind, Param,
    SendAction, SendContent, SourceLoc, State, StateType, Transition, TransitionType,
};
use crate::error::{ParseError, SourcePos};

const TAG_SCXML: &str = "scxml";
const TAG_STATE: &str = "state";
const TAG_PARALLEL: &str = "parallel";
const TAG_FINAL: &str = "final";
const TAG_INITIAL: &str = "initial";
const TAG_HISTORY: &str = "history";
const TAG_TRANSITION: &str = "transition";
const TAG_DATAMODEL: &str = "datamodel";
const TAG_DATA: &str = "data";
const TAG_ONENTRY: &str = "onentry";
const TAG_ONEXIT: &str = "onexit";
const TAG_LOG: &str = "log";
const TAG_RAISE: &str = "raise";
const TAG_ASSIGN: &str = "assign";
const TAG_IF: &str = "if";
const TAG_ELSEIF: &str = "elseif";
const TAG_ELSE: &str = "else";
const TAG_FOREACH: &str = "foreach";
const TAG_SEND: &str = "send";
const TAG_PARAM: &str = "param";
const TAG_CONTENT: &str = "content";
const TAG_SCRIPT: &str = "script";
const TAG_INVOKE: &str = "invoke";

type AttributeMap = std::collections::HashMap<String, String>;

/// A partially-built element, one per open tag on the stack.
enum Frame {
    Scxml,
    State(State),
    Transition(Transition),
    Datamodel,
    Data(DataElement),
    OnEntry(Vec<Action>),
    OnExit(Vec<Action>),
    Log { label: Option<String>, expr: Option<String> },
    Raise { event: Option<String> },
    Assign { location: String, expr: String },
    If { blocks: Vec<IfBlock> },
    Foreach {
        array_expr: String,
        item_name: String,
        index_name: Option<String>,
        actions: Vec<Action>,
    },
    Send(Box<SendAction>),
    Param(Param),
    Content(SendContent),
    /// `<script>`/`<invoke>` or any unrecognized element: children are
    /// consumed and discarded (§4.2 "unknown elements parse into a 'skip'
    /// frame").
    Skip,
}

struct StackItem {
    tag: String,
    frame: Frame,
}

struct ParserState {
    document: Document,
    stack: Vec<StackItem>,
    saw_root: bool,
    initial_counter: usize,
    history_counter: usize,
}

impl ParserState {
    fn new() -> Self {
        ParserState {
            document: Document::new(),
            stack: Vec::new(),
            saw_root: false,
            initial_counter: 0,
            history_counter: 0,
        }
    }

    fn source_loc(reader: &Reader<&[u8]>) -> SourceLoc {
        SourceLoc {
            offset: reader.buffer_position() as u64,
        }
    }

    fn source_pos(reader: &Reader<&[u8]>) -> SourcePos {
        SourcePos {
            offset: reader.buffer_position() as u64,
        }
    }

    fn gen_initial_id(&mut self) -> String {
        self.initial_counter += 1;
        format!("__initial_{}__", self.initial_counter)
    }

    fn gen_history_id(&mut self) -> String {
        self.history_counter += 1;
        format!("__history_{}__", self.history_counter)
    }

    fn parent_tag(&self) -> &str {
        self.stack.last().map(|i| i.tag.as_str()).unwrap_or("")
    }

    fn start_element(
        &mut self,
        reader: &Reader<&[u8]>,
        name: &str,
        attrs: AttributeMap,
        pos: SourceLoc,
    ) -> Result<(), ParseError> {
        if !self.saw_root {
            if name != TAG_SCXML {
                return Err(ParseError::UnrecognizedRoot { tag: name.to_string() });
            }
            self.saw_root = true;
            self.document.name = attrs.get("name").cloned();
            self.document.version = attrs.get("version").cloned();
            self.document.initial = split_ids(attrs.get("initial"));
            self.stack.push(StackItem {
                tag: name.to_string(),
                frame: Frame::Scxml,
            });
            return Ok(());
        }

        // `<elseif>`/`<else>` do not push their own frame: they append a new
        // block to the *currently open* `<if>` accumulator and subsequent
        // actions keep attaching to that block until the next sibling opens
        // one of its own (§4.2 "subsequent action closes attach to the
        // currently-open block").
        if name == TAG_ELSEIF || name == TAG_ELSE {
            if let Some(StackItem { frame: Frame::If { blocks }, .. }) = self.stack.last_mut() {
                let kind = if name == TAG_ELSEIF { IfKind::ElseIf } else { IfKind::Else };
                blocks.push(IfBlock {
                    kind,
                    cond: attrs.get("cond").cloned(),
                    compiled_cond: None,
                    actions: Vec::new(),
                });
            }
            return Ok(());
        }

        let frame = match name {
            TAG_STATE => Frame::State(self.new_state(StateType::Atomic, &attrs, pos)),
            TAG_PARALLEL => Frame::State(self.new_state(StateType::Parallel, &attrs, pos)),
            TAG_FINAL => Frame::State(self.new_state(StateType::Final, &attrs, pos)),
            TAG_INITIAL => {
                let id = self.gen_initial_id();
                Frame::State(self.new_state_with_id(id, StateType::Initial, pos))
            }
            TAG_HISTORY => {
                let id = attrs.get("id").cloned().unwrap_or_else(|| self.gen_history_id());
                let mut state = self.new_state_with_id(id, StateType::History, pos);
                state.history_type = Some(match attrs.get("type").map(|s| s.as_str()) {
                    Some("deep") => HistoryType::Deep,
                    _ => HistoryType::Shallow,
                });
                Frame::State(state)
            }
            TAG_TRANSITION => {
                let doc_order = self.document.next_doc_order();
                Frame::Transition(Transition {
                    event: EventDescriptor::parse(attrs.get("event").map(String::as_str).unwrap_or("")),
                    targets: split_ids(attrs.get("target")),
                    cond: attrs.get("cond").cloned(),
                    compiled_cond: None,
                    transition_type: if attrs.get("type").map(String::as_str) == Some("internal") {
                        TransitionType::Internal
                    } else {
                        TransitionType::External
                    },
                    source: String::new(),
                    actions: Vec::new(),
                    doc_order,
                    source_loc: pos,
                })
            }
            TAG_DATAMODEL => Frame::Datamodel,
            TAG_DATA => Frame::Data(DataElement {
                id: attrs.get("id").cloned().unwrap_or_default(),
                expr: attrs.get("expr").cloned(),
                compiled_expr: None,
                src: attrs.get("src").cloned(),
            }),
            TAG_ONENTRY => Frame::OnEntry(Vec::new()),
            TAG_ONEXIT => Frame::OnExit(Vec::new()),
            TAG_LOG => Frame::Log {
                label: attrs.get("label").cloned(),
                expr: attrs.get("expr").cloned(),
            },
            TAG_RAISE => Frame::Raise {
                event: attrs.get("event").cloned(),
            },
            TAG_ASSIGN => Frame::Assign {
                location: attrs.get("location").cloned().unwrap_or_default(),
                expr: attrs.get("expr").cloned().unwrap_or_default(),
            },
            TAG_IF => Frame::If {
                blocks: vec![IfBlock {
                    kind: IfKind::If,
                    cond: attrs.get("cond").cloned(),
                    compiled_cond: None,
                    actions: Vec::new(),
                }],
            },
            TAG_FOREACH => Frame::Foreach {
                array_expr: attrs.get("array").cloned().unwrap_or_default(),
                item_name: attrs.get("item").cloned().unwrap_or_default(),
                index_name: attrs.get("index").cloned(),
                actions: Vec::new(),
            },
            TAG_SEND => Frame::Send(Box::new(SendAction {
                event: attrs.get("event").cloned(),
                event_expr: attrs.get("eventexpr").cloned(),
                compiled_event_expr: None,
                target: attrs.get("target").cloned(),
                target_expr: attrs.get("targetexpr").cloned(),
                compiled_target_expr: None,
                type_attr: attrs.get("type").cloned(),
                type_expr: attrs.get("typeexpr").cloned(),
                id: attrs.get("id").cloned(),
                id_location: attrs.get("idlocation").cloned(),
                delay: attrs.get("delay").cloned(),
                delay_expr: attrs.get("delayexpr").cloned(),
                compiled_delay_expr: None,
                namelist: attrs
                    .get("namelist")
                    .map(|s| s.split_whitespace().map(String::from).collect())
                    .unwrap_or_default(),
                params: Vec::new(),
                content: None,
            })),
            TAG_PARAM => Frame::Param(Param {
                name: attrs.get("name").cloned().unwrap_or_default(),
                expr: attrs.get("expr").cloned(),
                compiled_expr: None,
                location: attrs.get("location").cloned(),
                compiled_location: None,
            }),
            TAG_CONTENT => match attrs.get("expr") {
                Some(expr) => Frame::Content(SendContent::Expr(expr.clone(), None)),
                None => Frame::Content(SendContent::Text(String::new())),
            },
            TAG_SCRIPT => {
                self.document.requires_unsupported.push("script".to_string());
                Frame::Skip
            }
            TAG_INVOKE => {
                self.document.requires_unsupported.push("invoke".to_string());
                Frame::Skip
            }
            _ => Frame::Skip,
        };

        let _ = reader;
        self.stack.push(StackItem {
            tag: name.to_string(),
            frame,
        });
        Ok(())
    }

    fn new_state(&mut self, state_type: StateType, attrs: &AttributeMap, pos: SourceLoc) -> State {
        let id = attrs.get("id").cloned().unwrap_or_default();
        let mut state = self.new_state_with_id(id, state_type, pos);
        state.initial_attr = split_ids(attrs.get("initial"));
        state
    }

    fn new_state_with_id(&mut self, id: String, state_type: StateType, pos: SourceLoc) -> State {
        let doc_order = self.document.next_doc_order();
        let mut state = State::new(id, state_type, doc_order);
        state.source_loc = pos;
        state
    }

    fn end_element(&mut self, name: &str) -> Result<(), ParseError> {
        if name == TAG_ELSEIF || name == TAG_ELSE {
            return Ok(());
        }

        let top = match self.stack.pop() {
            Some(item) => item,
            None => return Err(ParseError::UnbalancedTag { tag: name.to_string() }),
        };
        if top.tag != name {
            return Err(ParseError::UnbalancedTag { tag: name.to_string() });
        }

        match top.frame {
            Frame::Scxml => {}
            Frame::State(state) => self.attach_state(state),
            Frame::Transition(t) => self.attach_transition(t),
            Frame::Datamodel => {}
            Frame::Data(d) => self.document.datamodel_elements.push(d),
            Frame::OnEntry(actions) => {
                if let Some(StackItem { frame: Frame::State(state), .. }) = self.stack.last_mut() {
                    state.onentry = actions;
                }
            }
            Frame::OnExit(actions) => {
                if let Some(StackItem { frame: Frame::State(state), .. }) = self.stack.last_mut() {
                    state.onexit = actions;
                }
            }
            Frame::Log { label, expr } => self.attach_action(Action::Log {
                label,
                expr,
                compiled_expr: None,
            }),
            Frame::Raise { event } => self.attach_action(Action::Raise { event }),
            Frame::Assign { location, expr } => self.attach_action(Action::Assign {
                location,
                compiled_location: None,
                expr,
                compiled_expr: None,
            }),
            Frame::If { blocks } => self.attach_action(Action::If { blocks }),
            Frame::Foreach {
                array_expr,
                item_name,
                index_name,
                actions,
            } => self.attach_action(Action::Foreach {
                array_expr,
                compiled_array_expr: None,
                item_name,
                index_name,
                actions,
            }),
            Frame::Send(send) => self.attach_action(Action::Send(send)),
            Frame::Param(p) => {
                if let Some(StackItem { frame: Frame::Send(send), .. }) = self.stack.last_mut() {
                    send.params.push(p);
                }
            }
            Frame::Content(c) => {
                if let Some(StackItem { frame: Frame::Send(send), .. }) = self.stack.last_mut() {
                    send.content = Some(c);
                }
            }
            Frame::Skip => {}
        }
        Ok(())
    }

    /// Attaches a just-closed state to its enclosing state's `children`, or
    /// to `Document::top_level` if it closed directly under `<scxml>`
    /// (§4.2 "states attach to parent state's children").
    fn attach_state(&mut self, mut state: State) {
        let is_child = match self.stack.last_mut() {
            Some(StackItem { frame: Frame::State(parent), .. }) => {
                state.parent = Some(parent.id.clone());
                state.depth = parent.depth + 1;
                parent.children.push(state.id.clone());
                true
            }
            _ => {
                state.parent = None;
                state.depth = 0;
                false
            }
        };
        finalize_state_type(&mut state);
        if !is_child {
            self.document.top_level.push(state.id.clone());
        }
        self.document.insert_state(state);
    }

    fn attach_transition(&mut self, mut t: Transition) {
        if let Some(StackItem { frame: Frame::State(state), .. }) = self.stack.last_mut() {
            t.source = state.id.clone();
            state.transitions.push(t);
        }
    }

    /// Attaches executable content to whichever open container is on top of
    /// the stack: `<onentry>`/`<onexit>`/`<transition>`/the last block of an
    /// open `<if>`/an open `<foreach>` (§4.2).
    fn attach_action(&mut self, action: Action) {
        match self.stack.last_mut() {
            Some(StackItem { frame: Frame::OnEntry(actions), .. }) => actions.push(action),
            Some(StackItem { frame: Frame::OnExit(actions), .. }) => actions.push(action),
            Some(StackItem { frame: Frame::Transition(t), .. }) => t.actions.push(action),
            Some(StackItem { frame: Frame::If { blocks }, .. }) => {
                if let Some(block) = blocks.last_mut() {
                    block.actions.push(action);
                }
            }
            Some(StackItem { frame: Frame::Foreach { actions, .. }, .. }) => actions.push(action),
            _ => {}
        }
    }

    fn characters(&mut self, text: &str) {
        if let Some(StackItem { frame: Frame::Content(SendContent::Text(buf)), .. }) = self.stack.last_mut() {
            buf.push_str(text);
        }
    }

    fn finish(mut self) -> Result<Document, ParseError> {
        if !self.saw_root {
            return Err(ParseError::UnrecognizedRoot { tag: String::new() });
        }
        // `<content>` text is captured verbatim but trailing/leading
        // whitespace from XML formatting is trimmed (§4.2).
        for state in self.document.states_iter_mut() {
            trim_content_in_actions(&mut state.onentry);
            trim_content_in_actions(&mut state.onexit);
            for t in &mut state.transitions {
                trim_content_in_actions(&mut t.actions);
            }
        }
        Ok(self.document)
    }
}

fn trim_content_in_actions(actions: &mut [Action]) {
    for action in actions {
        match action {
            Action::If { blocks } => {
                for block in blocks {
                    trim_content_in_actions(&mut block.actions);
                }
            }
            Action::Foreach { actions, .. } => trim_content_in_actions(actions),
            Action::Send(send) => {
                if let Some(SendContent::Text(text)) = &mut send.content {
                    let trimmed = text.trim().to_string();
                    *text = trimmed;
                }
            }
            _ => {}
        }
    }
}

/// §4.2 "a non-parallel, non-final state with children becomes compound;
/// otherwise remains atomic" — pseudo-state types (initial, history,
/// parallel, final) are left untouched.
fn finalize_state_type(state: &mut State) {
    if state.state_type == StateType::Atomic && !state.children.is_empty() {
        state.state_type = StateType::Compound;
    }
}

fn split_ids(raw: Option<&String>) -> Vec<String> {
    raw.map(|s| s.split_whitespace().map(String::from).collect()).unwrap_or_default()
}

fn decode_attributes(reader: &Reader<&[u8]>, attrs: &mut Attributes) -> Result<AttributeMap, ParseError> {
    let mut map = AttributeMap::new();
    for attr_result in attrs {
        let attr = attr_result.map_err(|e| ParseError::Xml {
            message: e.to_string(),
            pos: ParserState::source_pos(reader),
        })?;
        let key = reader
            .decoder()
            .decode(attr.key.as_ref())
            .map_err(|e| ParseError::Xml {
                message: e.to_string(),
                pos: ParserState::source_pos(reader),
            })?
            .to_string();
        let value = attr
            .decode_and_unescape_value(reader)
            .map_err(|e| ParseError::Xml {
                message: e.to_string(),
                pos: ParserState::source_pos(reader),
            })?
            .to_string();
        map.insert(key, value);
    }
    Ok(map)
}

fn local_name<'a>(e: &'a BytesStart) -> Result<&'a str, ParseError> {
    str::from_utf8(e.local_name().as_ref()).map_err(|e| ParseError::Xml {
        message: e.to_string(),
        pos: SourcePos::default(),
    })
}

/// Parses an SCXML document from a byte slice (§6 `parse(xml_bytes) ->
/// {ok, document} | {error, parse_errors}`).
pub fn parse(xml: &[u8]) -> Result<Document, ParseError> {
    let text = str::from_utf8(xml).map_err(|e| ParseError::Xml {
        message: e.to_string(),
        pos: SourcePos::default(),
    })?;
    let mut reader = Reader::from_str(text);
    reader.trim_text(true);

    let mut buf = Vec::new();
    let mut state = ParserState::new();

    loop {
        let loc = ParserState::source_loc(&reader);
        let pos = ParserState::source_pos(&reader);
        match reader.read_event_into(&mut buf) {
            Err(e) => {
                return Err(ParseError::Xml {
                    message: e.to_string(),
                    pos,
                })
            }
            Ok(XmlEvent::Eof) => break,
            Ok(XmlEvent::Start(e)) => {
                let name = local_name(&e)?.to_string();
                let attrs = decode_attributes(&reader, &mut e.attributes())?;
                state.start_element(&reader, &name, attrs, loc)?;
            }
            Ok(XmlEvent::Empty(e)) => {
                let name = local_name(&e)?.to_string();
                let attrs = decode_attributes(&reader, &mut e.attributes())?;
                state.start_element(&reader, &name, attrs, loc)?;
                state.end_element(&name)?;
            }
            Ok(XmlEvent::End(e)) => {
                let name = str::from_utf8(e.local_name().as_ref())
                    .map_err(|err| ParseError::Xml {
                        message: err.to_string(),
                        pos,
                    })?
                    .to_string();
                state.end_element(&name)?;
            }
            Ok(XmlEvent::Text(e)) => {
                let text = e.unescape().map_err(|err| ParseError::Xml {
                    message: err.to_string(),
                    pos,
                })?;
                state.characters(&text);
            }
            Ok(XmlEvent::CData(e)) => {
                let text = str::from_utf8(e.as_ref()).unwrap_or_default().to_string();
                state.characters(&text);
            }
            _ => {}
        }
        buf.clear();
    }

    state.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_scxml_root() {
        let err = parse(b"<foo/>").unwrap_err();
        assert!(matches!(err, ParseError::UnrecognizedRoot { .. }));
    }

    #[test]
    fn parses_minimal_two_state_document() {
        let xml = br#"
            <scxml initial="a">
              <state id="a">
                <transition event="go" target="b"/>
              </state>
              <state id="b"/>
            </scxml>
        "#;
        let doc = parse(xml).unwrap();
        assert_eq!(doc.initial, vec!["a".to_string()]);
        assert_eq!(doc.top_level, vec!["a".to_string(), "b".to_string()]);
        let a = doc.state("a").unwrap();
        assert_eq!(a.transitions.len(), 1);
        assert_eq!(a.transitions[0].targets, vec!["b".to_string()]);
    }

    #[test]
    fn compound_state_with_children_and_initial_element() {
        let xml = br#"
            <scxml>
              <state id="parent">
                <initial><transition target="child2"/></initial>
                <state id="child1"/>
                <state id="child2"/>
              </state>
            </scxml>
        "#;
        let doc = parse(xml).unwrap();
        let parent = doc.state("parent").unwrap();
        assert_eq!(parent.state_type, StateType::Compound);
        assert!(parent.children.iter().any(|c| doc.state(c).unwrap().state_type == StateType::Initial));
    }

    #[test]
    fn parses_onentry_actions_including_nested_if_and_foreach() {
        let xml = br#"
            <scxml>
              <state id="s">
                <onentry>
                  <assign location="x" expr="1"/>
                  <if cond="x == 1">
                    <log label="one"/>
                  <elseif cond="x == 2"/>
                    <log label="two"/>
                  <else/>
                    <log label="other"/>
                  </if>
                  <foreach array="xs" item="i" index="idx">
                    <assign location="sum" expr="sum+i"/>
                  </foreach>
                </onentry>
              </state>
            </scxml>
        "#;
        let doc = parse(xml).unwrap();
        let s = doc.state("s").unwrap();
        assert_eq!(s.onentry.len(), 3);
        match &s.onentry[1] {
            Action::If { blocks } => {
                assert_eq!(blocks.len(), 3);
                assert_eq!(blocks[0].kind, IfKind::If);
                assert_eq!(blocks[1].kind, IfKind::ElseIf);
                assert_eq!(blocks[2].kind, IfKind::Else);
                assert_eq!(blocks[0].actions.len(), 1);
                assert_eq!(blocks[1].actions.len(), 1);
                assert_eq!(blocks[2].actions.len(), 1);
            }
            other => panic!("expected If action, got {:?}", other),
        }
        match &s.onentry[2] {
            Action::Foreach { item_name, index_name, actions, .. } => {
                assert_eq!(item_name, "i");
                assert_eq!(index_name.as_deref(), Some("idx"));
                assert_eq!(actions.len(), 1);
            }
            other => panic!("expected Foreach action, got {:?}", other),
        }
    }

    #[test]
    fn parses_send_with_params_and_content() {
        let xml = br#"
            <scxml>
              <state id="s">
                <onentry>
                  <send event="notify" target="#_internal">
                    <param name="a" expr="1"/>
                    <content>hello</content>
                  </send>
                </onentry>
              </state>
            </scxml>
        "#;
        let doc = parse(xml).unwrap();
        let s = doc.state("s").unwrap();
        match &s.onentry[0] {
            Action::Send(send) => {
                assert_eq!(send.event.as_deref(), Some("notify"));
                assert_eq!(send.params.len(), 1);
                assert_eq!(send.params[0].name, "a");
                match &send.content {
                    Some(SendContent::Text(t)) => assert_eq!(t, "hello"),
                    other => panic!("expected text content, got {:?}", other),
                }
            }
            other => panic!("expected Send action, got {:?}", other),
        }
    }

    #[test]
    fn parallel_with_history_and_final_children() {
        let xml = br#"
            <scxml>
              <parallel id="p">
                <state id="r1">
                  <history id="h" type="deep">
                    <transition target="r1a"/>
                  </history>
                  <state id="r1a"/>
                  <final id="r1f"/>
                </state>
                <state id="r2">
                  <final id="r2f"/>
                </state>
              </parallel>
            </scxml>
        "#;
        let doc = parse(xml).unwrap();
        assert_eq!(doc.state("p").unwrap().state_type, StateType::Parallel);
        let h = doc.state("h").unwrap();
        assert_eq!(h.state_type, StateType::History);
        assert_eq!(h.history_type, Some(HistoryType::Deep));
        assert_eq!(h.transitions[0].targets, vec!["r1a".to_string()]);
        assert_eq!(doc.state("r1f").unwrap().state_type, StateType::Final);
    }

    #[test]
    fn script_and_invoke_mark_unsupported_features() {
        let xml = br#"
            <scxml>
              <state id="s">
                <onentry><script>ignored</script></onentry>
              </state>
            </scxml>
        "#;
        let doc = parse(xml).unwrap();
        assert!(doc.requires_unsupported.contains(&"script".to_string()));
    }

    #[test]
    fn unbalanced_end_tag_is_an_error() {
        let xml = b"<scxml><state id=\"a\"></parallel></scxml>";
        assert!(parse(xml).is_err());
    }
}
