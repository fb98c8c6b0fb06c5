//! plate_check - validate licence-plate strings offline
//!
//! Runs raw strings (e.g. copied from the rejection log) through the same
//! normalisation and grammar checks the pipeline applies to OCR output.

use anyhow::{anyhow, Result};
use clap::Parser;
use serde::Serialize;

use helmet_watch::plate;

#[derive(Parser, Debug)]
#[command(name = "plate_check", about = "Validate plate text against the supported grammars")]
struct Args {
    /// Raw plate strings
    #[arg(required = true)]
    plates: Vec<String>,

    /// Emit one JSON object per input
    #[arg(long)]
    json: bool,

    /// Exit with an error if any input is rejected
    #[arg(long)]
    strict: bool,
}

#[derive(Serialize)]
struct Outcome<'a> {
    raw: &'a str,
    normalized: String,
    accepted: Option<String>,
    grammar: Option<&'static str>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut rejected = 0usize;
    for raw in &args.plates {
        let validated = plate::validate(raw);
        if validated.is_none() {
            rejected += 1;
        }
        let outcome = Outcome {
            raw,
            normalized: plate::normalize(raw),
            grammar: validated.as_ref().map(|v| v.grammar.name()),
            accepted: validated.map(|v| v.text),
        };
        if args.json {
            println!("{}", serde_json::to_string(&outcome)?);
        } else {
            match (&outcome.accepted, outcome.grammar) {
                (Some(text), Some(grammar)) => println!("{:?} -> {} ({})", raw, text, grammar),
                _ => println!("{:?} -> rejected ({:?})", raw, outcome.normalized),
            }
        }
    }
    if args.strict && rejected > 0 {
        return Err(anyhow!("{} of {} inputs rejected", rejected, args.plates.len()));
    }
    Ok(())
}
