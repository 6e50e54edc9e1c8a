//! Control-message dispatch.
//!
//! One state machine over one message at a time. A message is an optional
//! leading selector plus an ordered argument list, and resolves to one of:
//! no-op, positional parameter set, named parameter set, function switch, or
//! the combined "switch and configure" form.
//!
//! A leading selector with arguments is ambiguous: it is speculatively tried
//! as a function switch, and if the selector does not resolve it falls back
//! to a named-parameter message in which the selector is just the first name.
//! A parameter name that happens to match a script function therefore wins as
//! a switch.

use rhai::ImmutableString;

use crate::diagnostics::FaultPhase;
use crate::engine::ScriptEngine;
use crate::fault::Fault;

/// One element of a control message's argument list.
#[derive(Debug, Clone, PartialEq)]
pub enum Atom {
    Num(f64),
    Sym(String),
}

impl From<f64> for Atom {
    fn from(value: f64) -> Self {
        Atom::Num(value)
    }
}

impl From<&str> for Atom {
    fn from(value: &str) -> Self {
        Atom::Sym(value.to_string())
    }
}

/// Route one control message. Faults are recorded on the engine's
/// diagnostics channel and returned to the caller.
pub fn dispatch(
    engine: &mut ScriptEngine,
    selector: Option<&str>,
    args: &[Atom],
) -> Result<(), Fault> {
    match selector {
        None if args.is_empty() => Ok(()),
        None => apply_param_message(engine, args).map_err(|fault| {
            engine.record_fault(FaultPhase::Dispatch, &fault);
            fault
        }),
        Some(sel) if args.is_empty() => engine.switch_function(sel).map_err(|fault| {
            engine.record_fault(FaultPhase::Dispatch, &fault);
            fault
        }),
        Some(sel) => {
            // Force silence while resolution is in flight so the perform
            // loop cannot invoke a function mid-replacement.
            let prior = engine.is_latched();
            engine.set_latched(true);
            match engine.switch_function(sel) {
                Ok(()) => {
                    // Switch succeeded (latch now clear); the remaining args
                    // are the parameter message for the new function.
                    apply_param_message(engine, args).map_err(|fault| {
                        engine.record_fault(FaultPhase::Dispatch, &fault);
                        fault
                    })
                }
                Err(_) => {
                    // Not a function: the selector is just the first
                    // parameter name.
                    engine.set_latched(prior);
                    let mut combined = Vec::with_capacity(args.len() + 1);
                    combined.push(Atom::Sym(sel.to_string()));
                    combined.extend_from_slice(args);
                    match parse_named(&combined) {
                        Ok(pairs) => {
                            engine.set_named(pairs);
                            Ok(())
                        }
                        Err(fault) => {
                            engine.record_fault(FaultPhase::Dispatch, &fault);
                            Err(fault)
                        }
                    }
                }
            }
        }
    }
}

/// Classify a selector-less argument list as positional (all numeric) or
/// named (name/value pairs) and apply it.
fn apply_param_message(engine: &mut ScriptEngine, args: &[Atom]) -> Result<(), Fault> {
    if args.iter().all(|a| matches!(a, Atom::Num(_))) {
        let values: Vec<f64> = args
            .iter()
            .map(|a| match a {
                Atom::Num(v) => *v,
                Atom::Sym(_) => 0.0,
            })
            .collect();
        engine.set_positional(&values);
        Ok(())
    } else {
        let pairs = parse_named(args)?;
        engine.set_named(pairs);
        Ok(())
    }
}

fn parse_named(args: &[Atom]) -> Result<Vec<(ImmutableString, f64)>, Fault> {
    if args.len() % 2 != 0 {
        return Err(Fault::MalformedParameters(
            "named parameters must come in name/value pairs".to_string(),
        ));
    }

    let mut pairs = Vec::with_capacity(args.len() / 2);
    for chunk in args.chunks_exact(2) {
        match (&chunk[0], &chunk[1]) {
            (Atom::Sym(name), Atom::Num(value)) => pairs.push((name.as_str().into(), *value)),
            (Atom::Num(_), _) => {
                return Err(Fault::MalformedParameters(
                    "parameter name expected, got a number".to_string(),
                ))
            }
            (Atom::Sym(name), Atom::Sym(_)) => {
                return Err(Fault::MalformedParameters(format!(
                    "numeric value expected for parameter '{}'",
                    name
                )))
            }
        }
    }
    Ok(pairs)
}
