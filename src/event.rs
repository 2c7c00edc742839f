//! SCXML events (§6 "an event is `{name, data, origin}`"). Simplified from
//! the donor's `fsm::Event`/`EventType`, which carries session/invoke/sendid
//! fields needed for the external-IO-processor machinery that is out of
//! scope here (§1 Non-goals).

use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOrigin {
    Internal,
    External,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub name: String,
    pub data: Value,
    pub origin: EventOrigin,
}

impl Event {
    pub fn internal(name: impl Into<String>, data: Value) -> Self {
        Event {
            name: name.into(),
            data,
            origin: EventOrigin::Internal,
        }
    }

    pub fn external(name: impl Into<String>, data: Value) -> Self {
        Event {
            name: name.into(),
            data,
            origin: EventOrigin::External,
        }
    }

    /// Dot-delimited tokens of the event name, e.g. `"a.b.c"` → `["a","b","c"]`.
    pub fn tokens(&self) -> Vec<&str> {
        self.name.split('.').collect()
    }
}

pub const EVENT_ERROR_EXECUTION: &str = "error.execution";
pub const EVENT_ERROR_COMMUNICATION: &str = "error.communication";

pub fn done_state_event(state_id: &str) -> String {
    format!("done.state.{}", state_id)
}
