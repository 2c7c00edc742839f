//! The Action Executor (§4.6): dispatches over the closed `Action` enum,
//! mutating a live chart through the `ActionHost` trait so this module does
//! not depend on `interpreter` (which depends on this one, and on
//! `expr::EvalContext`, for the reverse direction).
//!
//! Every action runs to completion even on failure: a failing `assign`,
//! `foreach`, or `send` logs and raises an internal `error.execution` /
//! `error.communication` event (§7 "Runtime errors never propagate to the
//! caller") rather than aborting the remaining actions in the block.

use crate::document::{Action, IfKind, Param, SendAction, SendContent};
use crate::event::{Event, EVENT_ERROR_COMMUNICATION, EVENT_ERROR_EXECUTION};
use crate::expr::{evaluate, evaluate_condition, assign as assign_value, EvalContext};
use crate::logging::{LogLevel, LogMetadata};
use crate::value::{OrderedMap, Value};

/// What `actions::execute` needs from the chart it mutates.
pub trait ActionHost: EvalContext {
    fn data(&self) -> &OrderedMap;
    fn data_mut(&mut self) -> &mut OrderedMap;
    fn log(&mut self, level: LogLevel, message: String, phase: &str);
    fn raise_internal(&mut self, event: Event);
    /// Queues an event as if delivered from outside (§6); used both for
    /// externally-targeted sends this interpreter cannot actually transmit
    /// (logged, not delivered — external IO is out of scope) and for
    /// `#_internal`/same-session sends, which loop back as external events
    /// per the SCXML event queue model.
    fn enqueue_external(&mut self, event: Event);
    fn current_phase(&self) -> String;
}

/// Runs a block of actions in document order. Each action's own failure is
/// contained; it never stops later actions in the same block (§4.6).
pub fn execute_block(actions: &[Action], host: &mut dyn ActionHost) {
    for action in actions {
        execute_action(action, host);
    }
}

fn execute_action(action: &Action, host: &mut dyn ActionHost) {
    match action {
        Action::Log { label, expr, compiled_expr } => execute_log(label, expr, compiled_expr, host),
        Action::Raise { event } => {
            let name = event.clone().unwrap_or_else(|| "anonymous_event".to_string());
            host.raise_internal(Event::internal(name, Value::Undefined));
        }
        Action::Assign {
            location,
            compiled_location,
            expr,
            compiled_expr,
        } => execute_assign(location, compiled_location, expr, compiled_expr, host),
        Action::If { blocks } => execute_if(blocks, host),
        Action::Foreach {
            array_expr,
            compiled_array_expr,
            item_name,
            index_name,
            actions,
        } => execute_foreach(array_expr, compiled_array_expr, item_name, index_name.as_deref(), actions, host),
        Action::Send(send) => execute_send(send, host),
    }
}

fn execute_log(
    label: &Option<String>,
    expr: &Option<String>,
    compiled_expr: &Option<crate::expr::Expr>,
    host: &mut dyn ActionHost,
) {
    let value = match compiled_expr {
        Some(e) => evaluate(e, host).unwrap_or(Value::Undefined),
        None => Value::Undefined,
    };
    let message = match (label, expr.is_some()) {
        (Some(l), true) => format!("{}: {}", l, value),
        (Some(l), false) => l.clone(),
        (None, true) => format!("{}", value),
        (None, false) => String::new(),
    };
    let phase = host.current_phase();
    host.log(LogLevel::Info, message, &phase);
}

fn execute_assign(
    location: &str,
    compiled_location: &Option<crate::expr::CompiledLocation>,
    _expr: &str,
    compiled_expr: &Option<crate::expr::Expr>,
    host: &mut dyn ActionHost,
) {
    let value = match compiled_expr {
        Some(e) => match evaluate(e, host) {
            Ok(v) => v,
            Err(err) => {
                raise_assign_error(host, location, &err.to_string());
                return;
            }
        },
        None => {
            raise_assign_error(host, location, "expression failed to compile");
            return;
        }
    };
    let loc = match compiled_location {
        Some(l) => l,
        None => {
            raise_assign_error(host, location, "location failed to compile");
            return;
        }
    };
    let mut data = host.data().clone();
    match assign_value(loc, value, &mut data) {
        Ok(()) => *host.data_mut() = data,
        Err(err) => raise_assign_error(host, location, &err.reason),
    }
}

fn execute_if(blocks: &[crate::document::IfBlock], host: &mut dyn ActionHost) {
    for block in blocks {
        let taken = match block.kind {
            IfKind::Else => true,
            IfKind::If | IfKind::ElseIf => match &block.compiled_cond {
                Some(cond) => evaluate_condition(cond, host),
                None => false,
            },
        };
        if taken {
            execute_block(&block.actions, host);
            return;
        }
    }
}

fn execute_foreach(
    array_expr: &str,
    compiled_array_expr: &Option<crate::expr::Expr>,
    item_name: &str,
    index_name: Option<&str>,
    actions: &[Action],
    host: &mut dyn ActionHost,
) {
    let array = match compiled_array_expr {
        Some(e) => match evaluate(e, host) {
            Ok(Value::Array(items)) => items,
            Ok(_) | Err(_) => {
                raise_execution_error(host, "foreach.not_iterable", &format!("'{}' did not evaluate to an array", array_expr));
                return;
            }
        },
        None => {
            raise_execution_error(host, "foreach.not_iterable", &format!("'{}' failed to compile", array_expr));
            return;
        }
    };

    for (i, item) in array.into_iter().enumerate() {
        let mut data = host.data().clone();
        data.insert(item_name.to_string(), item);
        if let Some(idx) = index_name {
            data.insert(idx.to_string(), Value::Number(i as f64));
        }
        *host.data_mut() = data;
        execute_block(actions, host);
    }
}

fn execute_send(send: &SendAction, host: &mut dyn ActionHost) {
    let name = match resolve_send_event_name(send, host) {
        Ok(n) => n,
        Err(msg) => {
            raise_execution_error(host, "send.execution", &msg);
            return;
        }
    };

    if let Some(delay_source) = send.delay.as_deref().or(None) {
        if let Err(msg) = parse_duration_to_milliseconds(delay_source) {
            raise_communication_error(host, "send.communication", &format!("send '{}': invalid delay '{}': {}", name, delay_source, msg));
            return;
        }
    }
    if let Some(expr) = &send.compiled_delay_expr {
        match evaluate(expr, host) {
            Ok(Value::String(s)) => {
                if let Err(msg) = parse_duration_to_milliseconds(&s) {
                    raise_communication_error(host, "send.communication", &format!("send '{}': invalid delayexpr '{}': {}", name, s, msg));
                    return;
                }
            }
            Ok(_) | Err(_) => {
                raise_communication_error(host, "send.communication", &format!("send '{}': delayexpr did not evaluate to a duration string", name));
                return;
            }
        }
    }
    // Delay parsing above is validated but not scheduled: delayed-send
    // dispatch is out of scope, so every send (delayed or not) is enqueued
    // immediately.

    let target = resolve_send_target(send, host);
    let data = build_send_data(send, host);

    match target.as_deref() {
        None | Some("#_internal") => host.raise_internal(Event::internal(name, data)),
        Some(_other) => {
            // An externally-targeted send cannot actually be transmitted
            // (external IO is out of scope); it surfaces as a communication
            // error rather than being silently dropped.
            raise_communication_error(host, "send.communication", &format!("send '{}': external targets are not supported", name));
        }
    }
}

fn resolve_send_event_name(send: &SendAction, host: &mut dyn ActionHost) -> Result<String, String> {
    if let Some(expr) = &send.compiled_event_expr {
        return match evaluate(expr, host) {
            Ok(Value::String(s)) => Ok(s),
            Ok(other) => Ok(format!("{}", other)),
            Err(err) => Err(format!("send eventexpr: {}", err)),
        };
    }
    if let Some(name) = &send.event {
        return Ok(name.clone());
    }
    Err("send has neither 'event' nor 'eventexpr'".to_string())
}

fn resolve_send_target(send: &SendAction, host: &mut dyn ActionHost) -> Option<String> {
    if let Some(expr) = &send.compiled_target_expr {
        if let Ok(Value::String(s)) = evaluate(expr, host) {
            return Some(s);
        }
    }
    send.target.clone()
}

fn build_send_data(send: &SendAction, host: &mut dyn ActionHost) -> Value {
    if send.params.is_empty() && send.namelist.is_empty() {
        if let Some(SendContent::Expr(_, Some(expr))) = &send.content {
            return evaluate(expr, host).unwrap_or(Value::Undefined);
        }
        if let Some(SendContent::Text(text)) = &send.content {
            return Value::String(text.clone());
        }
        return Value::Undefined;
    }

    let mut map = OrderedMap::new();
    for name in &send.namelist {
        map.insert(name.clone(), host.get_variable(name));
    }
    for param in &send.params {
        map.insert(param.name.clone(), resolve_param(param, host));
    }
    Value::Object(map)
}

fn resolve_param(param: &Param, host: &mut dyn ActionHost) -> Value {
    if let Some(expr) = &param.compiled_expr {
        return evaluate(expr, host).unwrap_or(Value::Undefined);
    }
    if let Some(loc) = &param.compiled_location {
        let (root, rest) = loc.path.split_first().expect("location path is non-empty");
        let mut value = host.get_variable(root);
        for key in rest {
            value = value.get_member(key);
        }
        return value;
    }
    Value::Undefined
}

/// Raises `error.execution` with the structured `{type, reason}` payload
/// §4.6/§7 require, so a transition with `event="error.execution"` can read
/// `_event.data.type` to distinguish failure kinds.
fn raise_execution_error(host: &mut dyn ActionHost, error_type: &str, reason: &str) {
    raise_structured_error(host, EVENT_ERROR_EXECUTION, error_type, reason, None);
}

/// Like `raise_execution_error`, but always tagged `assign.execution` and
/// carrying the failed `location` (§4.6 "`{type:"assign.execution",
/// location, reason}`").
fn raise_assign_error(host: &mut dyn ActionHost, location: &str, reason: &str) {
    raise_structured_error(host, EVENT_ERROR_EXECUTION, "assign.execution", reason, Some(location));
}

fn raise_communication_error(host: &mut dyn ActionHost, error_type: &str, reason: &str) {
    raise_structured_error(host, EVENT_ERROR_COMMUNICATION, error_type, reason, None);
}

fn raise_structured_error(
    host: &mut dyn ActionHost,
    event_name: &str,
    error_type: &str,
    reason: &str,
    location: Option<&str>,
) {
    let phase = host.current_phase();
    host.log(LogLevel::Warn, format!("{}: {}", error_type, reason), &phase);
    let mut payload = OrderedMap::new();
    payload.insert("type", Value::String(error_type.to_string()));
    payload.insert("reason", Value::String(reason.to_string()));
    if let Some(loc) = location {
        payload.insert("location", Value::String(loc.to_string()));
    }
    host.raise_internal(Event::internal(event_name, Value::Object(payload)));
}

/// W3C SCXML duration grammar: a non-negative number followed by an optional
/// unit (`ms`, `s`, `m`/`min`, `h`, `d`); a bare number is milliseconds.
/// Ported from the donor's duration parser (`executable_content.rs`), kept
/// as a free function since it has no dependency on chart state.
pub fn parse_duration_to_milliseconds(source: &str) -> Result<u64, String> {
    let s = source.trim();
    if s.is_empty() {
        return Err("empty duration".to_string());
    }

    let (number_part, multiplier) = if let Some(rest) = s.strip_suffix("ms") {
        (rest, 1.0)
    } else if let Some(rest) = s.strip_suffix("min") {
        (rest, 60_000.0)
    } else if let Some(rest) = s.strip_suffix('s') {
        (rest, 1_000.0)
    } else if let Some(rest) = s.strip_suffix('m') {
        (rest, 60_000.0)
    } else if let Some(rest) = s.strip_suffix('h') {
        (rest, 3_600_000.0)
    } else if let Some(rest) = s.strip_suffix('d') {
        (rest, 86_400_000.0)
    } else {
        (s, 1.0)
    };

    let number: f64 = number_part
        .trim()
        .parse()
        .map_err(|_| format!("'{}' is not a number", number_part.trim()))?;
    if number < 0.0 {
        return Err("duration must not be negative".to_string());
    }
    Ok((number * multiplier).round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_milliseconds() {
        assert_eq!(parse_duration_to_milliseconds("500").unwrap(), 500);
        assert_eq!(parse_duration_to_milliseconds("500ms").unwrap(), 500);
    }

    #[test]
    fn parses_fractional_seconds_and_days() {
        assert_eq!(parse_duration_to_milliseconds("6.7s").unwrap(), 6700);
        assert_eq!(parse_duration_to_milliseconds("0.5d").unwrap(), 43_200_000);
    }

    #[test]
    fn rejects_malformed_or_negative_duration() {
        assert!(parse_duration_to_milliseconds("soon").is_err());
        assert!(parse_duration_to_milliseconds("-5s").is_err());
    }
}
