//! Demonstration and test application.
//! Usage:
//!    fsm scxmlfile
//!
//! Loads the given SCXML document, prints its initial configuration, then
//! prompts for events on stdin and prints the resulting configuration after
//! each one. The interpreter itself is synchronous, so unlike the donor's
//! `fsm` binary this runs entirely on the main thread: no worker thread, no
//! channel, no polling loop.

use std::io::{self, stdout, Write};
use std::process;

use scxml_core::event::Event;
use scxml_core::value::Value;
use scxml_core::{initialize, parse, send_event, validate, ArgOption};

fn main() {
    scxml_core::init_logging();

    let (_named_opt, final_args) = scxml_core::get_arguments(&[] as &[&ArgOption]);

    if final_args.is_empty() {
        println!("Missing argument. Please specify a scxml file");
        process::exit(1);
    }

    let source = match std::fs::read(&final_args[0]) {
        Ok(bytes) => bytes,
        Err(err) => {
            eprintln!("Failed to read '{}': {}", final_args[0], err);
            process::exit(2);
        }
    };

    let document = match parse(&source) {
        Ok(doc) => doc,
        Err(err) => {
            eprintln!("Failed to parse '{}': {}", final_args[0], err);
            process::exit(2);
        }
    };

    let (optimized, warnings) = match validate(document) {
        Ok(result) => result,
        Err(err) => {
            eprintln!("Failed to validate '{}': {}", final_args[0], err);
            process::exit(2);
        }
    };
    for warning in &warnings {
        println!("warning: {}", warning);
    }

    let mut chart = initialize(&optimized);
    print_configuration(&chart);

    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        print!("\nEnter Event >> ");
        let _ = stdout().flush();
        line.clear();
        match stdin.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {
                let trimmed = line.trim_end_matches(['\r', '\n']);
                if trimmed.is_empty() {
                    println!("Type the name of an event and press enter. An empty line exits.");
                    continue;
                }
                chart = send_event(chart, Event::external(trimmed.to_string(), Value::Undefined));
                print_configuration(&chart);
            }
            Err(err) => {
                eprintln!("Error reading stdin: {}. aborting...", err);
                process::exit(1);
            }
        }
    }
}

fn print_configuration(chart: &scxml_core::StateChart<'_>) {
    let leaves = chart.active_leaves();
    println!("Active leaves: {:?}", leaves);
}
