//! Batch validator. Usage:
//!    scxml_check file.scxml [file2.scxml ...]
//!
//! Parses and validates every file given, printing errors and warnings;
//! exits non-zero if any file failed to parse or validate. Grounded in the
//! donor's `bin/test.rs` (load-many-files-and-report-per-file shape) and
//! `bin/scxml_to_fsm.rs` (single-document parse-or-exit shape), without the
//! donor's test-specification/assertion machinery, which is out of scope for
//! a plain validator.

use std::process;

use scxml_core::{parse, validate, ArgOption};

fn main() {
    scxml_core::init_logging();

    let (_named_opt, final_args) = scxml_core::get_arguments(&[] as &[&ArgOption]);

    if final_args.is_empty() {
        println!("Missing argument. Please specify one or more scxml file(s)");
        process::exit(1);
    }

    let mut had_error = false;

    for path in &final_args {
        let source = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) => {
                println!("{}: failed to read file: {}", path, err);
                had_error = true;
                continue;
            }
        };

        let document = match parse(&source) {
            Ok(doc) => doc,
            Err(err) => {
                println!("{}: parse error: {}", path, err);
                had_error = true;
                continue;
            }
        };

        match validate(document) {
            Ok((_optimized, warnings)) => {
                if warnings.is_empty() {
                    println!("{}: ok", path);
                } else {
                    println!("{}: ok, {} warning(s)", path, warnings.len());
                    for warning in &warnings {
                        println!("  warning: {}", warning);
                    }
                }
            }
            Err(scxml_core::ScxmlError::Validation { errors, warnings }) => {
                println!("{}: {} error(s), {} warning(s)", path, errors.len(), warnings.len());
                for error in &errors {
                    println!("  error: {}", error);
                }
                for warning in &warnings {
                    println!("  warning: {}", warning);
                }
                had_error = true;
            }
            Err(err) => {
                println!("{}: {}", path, err);
                had_error = true;
            }
        }
    }

    if had_error {
        process::exit(1);
    }
}
