//! An SCXML (Harel Statecharts) interpreter: parse, validate, and run
//! statechart documents through the W3C macrostep/microstep algorithm.
//!
//! The public surface mirrors the donor's own pipeline shape (`parse` →
//! `validate` → drive an `Fsm`) but returns structured `thiserror` results
//! throughout instead of loosely-typed strings, and produces a new
//! `StateChart` per step rather than mutating one behind a lock.

extern crate core;

use std::collections::HashMap;
use std::env;

pub mod actions;
pub mod document;
pub mod error;
pub mod event;
pub mod expr;
pub mod features;
pub mod hierarchy;
pub mod history;
pub mod interpreter;
pub mod logging;
pub mod parser;
pub mod validator;
pub mod value;

pub use document::Document;
pub use error::{ParseError, ScxmlError, ValidationError, ValidationWarning};
pub use event::Event;
pub use interpreter::{initialize, send_event, StateChart};
pub use validator::OptimizedDocument;
pub use value::Value;

/// Parses SCXML source into a `Document` (§6 `parse(xml_bytes) -> {ok,
/// document} | {error, parse_errors}`).
pub fn parse(xml_bytes: &[u8]) -> Result<Document, ParseError> {
    parser::parse(xml_bytes)
}

/// Validates a parsed `Document` into an `OptimizedDocument` ready for
/// `initialize` (§6 `validate(document) -> {ok, optimized_document,
/// warnings} | {error, errors, warnings}`).
pub fn validate(doc: Document) -> Result<(OptimizedDocument, Vec<ValidationWarning>), ScxmlError> {
    validator::validate(doc)
}

/// The datamodel snapshot of a running chart (§6 `datamodel(state_chart) ->
/// map`).
pub fn datamodel<'a, 'b>(chart: &'b StateChart<'a>) -> &'b value::OrderedMap {
    &chart.data
}

/// Descriptor of a program argument option, kept from the donor rather than
/// pulling in `clap` for the two small binaries that wrap this library.
pub struct ArgOption {
    pub name: &'static str,
    pub required: bool,
    pub with_value: bool,
}

impl ArgOption {
    pub fn new(name: &'static str) -> ArgOption {
        ArgOption {
            name,
            required: false,
            with_value: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_value(mut self) -> Self {
        self.with_value = true;
        self
    }
}

/// Parses `std::env::args()` against a set of known options, returning the
/// named option values and the remaining positional arguments.
pub fn get_arguments(arguments: &[&ArgOption]) -> (HashMap<&'static str, String>, Vec<String>) {
    let mut final_args = Vec::<String>::new();
    let args: Vec<String> = env::args().collect();
    let mut idx = 1;
    let mut map = HashMap::new();

    // Don't use clap to parse arguments for now to reduce dependencies.
    while idx < args.len() {
        let arg = &args[idx];
        idx += 1;

        if let Some(sarg) = arg.strip_prefix('-') {
            let sarg = sarg.trim_start_matches('-');
            let mut match_found = false;
            for opt in arguments {
                match_found = opt.name == sarg;
                if match_found {
                    if opt.with_value {
                        if idx >= args.len() {
                            panic!("Missing value for argument '{}'", opt.name);
                        }
                        map.insert(opt.name, args[idx].clone());
                        idx += 1;
                    } else {
                        map.insert(opt.name, String::new());
                    }
                    break;
                }
            }
            if !match_found {
                panic!("Unknown option '{}'", arg);
            }
        } else {
            final_args.push(arg.clone());
        }
    }
    (map, final_args)
}

/// Initializes the `env_logger` backend the way the donor's binaries do,
/// gated behind the `EnvLog` feature so a pure-library consumer never pulls
/// it in.
#[cfg(feature = "EnvLog")]
pub fn init_logging() {
    let _ = env_logger::try_init();
}

#[cfg(not(feature = "EnvLog"))]
pub fn init_logging() {}
