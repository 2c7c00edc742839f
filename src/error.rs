//! Error taxonomy (§7). Grounded in the `thiserror` idiom used by the
//! `cryptopatrick-harel` repo in this corpus rather than the donor's
//! loosely-typed `Result<_, String>` returns — spec.md's §6/§7 calls for a
//! structured taxonomy callers can match on.
//!
//! Runtime errors (`Runtime.execution`/`Runtime.communication`) are
//! deliberately *not* part of this enum: per §7 they never propagate to the
//! caller, they only ever surface as an internal `error.execution`/
//! `error.communication` event and a log entry (see `actions::ActionError`).

use thiserror::Error;

/// A single source position, in bytes from the start of the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourcePos {
    pub offset: u64,
}

/// A `Parse` failure (§7): returned from `parse`, aborts the pipeline.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    #[error("malformed XML at byte {pos}: {message}")]
    Xml { message: String, pos: SourcePos },
    #[error("unrecognized root element '{tag}', expected 'scxml'")]
    UnrecognizedRoot { tag: String },
    #[error("unexpected closing tag '{tag}' with no matching open element")]
    UnbalancedTag { tag: String },
    #[error("'{parent}' cannot contain '{child}' at byte {pos}")]
    UnexpectedChild {
        parent: String,
        child: String,
        pos: SourcePos,
    },
}

/// A `Validation.error` (§7): returned from `validate`, aborts.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("duplicate state id '{id}'")]
    DuplicateStateId { id: String },
    #[error("transition target '{target}' does not resolve to any state")]
    UnresolvedTransitionTarget { target: String },
    #[error("history state '{id}' must not be at the document root")]
    HistoryAtRoot { id: String },
    #[error("parent '{parent}' has more than one {kind:?} history child")]
    DuplicateHistory { parent: String, kind: HistoryKindLabel },
    #[error("history state '{id}' default transition target '{target}' does not resolve to any state")]
    UnresolvedHistoryDefault { id: String, target: String },
    #[error("'initial' attribute of '{id}' references '{target}', which is not a direct child")]
    BadInitial { id: String, target: String },
    #[error("'initial' attribute of '{id}' does not select exactly one leaf per parallel region")]
    MultiInitialNotOneLeafPerRegion { id: String },
    #[error("final state '{id}' must not have outgoing transitions or child states")]
    FinalStateHasChildrenOrTransitions { id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryKindLabel {
    Shallow,
    Deep,
}

/// A `Validation.warning` (§7): non-fatal; the affected construct degrades
/// to a safe default (disabled condition, unbound variable, etc).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationWarning {
    #[error("condition '{source}' on transition from '{state}' failed to compile: {reason}")]
    ConditionCompileFailed {
        state: String,
        source: String,
        reason: String,
    },
    #[error("expression '{source}' in {context} failed to compile: {reason}")]
    ExpressionCompileFailed {
        context: String,
        source: String,
        reason: String,
    },
    #[error("state '{id}' is not reachable from the initial configuration")]
    UnreachableState { id: String },
    #[error("history state '{id}' is not reachable from the initial configuration")]
    UnreachableHistory { id: String },
    #[error("parallel state '{id}' has an atomic child '{child}'; treating as a single-state region")]
    ParallelChildAtomic { id: String, child: String },
    #[error("document uses unsupported feature '{feature}'")]
    UnsupportedFeature { feature: String },
}

/// Top-level error returned by `parse`/`validate`.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ScxmlError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("{} validation error(s)", .errors.len())]
    Validation {
        errors: Vec<ValidationError>,
        warnings: Vec<ValidationWarning>,
    },
}
