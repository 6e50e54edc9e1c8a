//! The perform loop: per-block execution on the audio path.
//!
//! Two states, Running and Silent. Silent is entered on a missing active
//! function, a failed protected call, or a non-numeric / non-finite return,
//! and is left only through a successful control-side switch or reload. The
//! loop never retries a call known to be broken within the same block; the
//! remainder of a faulting block, including the faulting sample, is zeroed.
//!
//! The positional parameter array is snapshotted once per block. Parameter
//! writes happen on the control side between blocks, so the snapshot is
//! representative for the whole block.

use std::sync::Arc;

use rhai::{CallFnOptions, Dynamic, FuncArgs};

use crate::diagnostics::{Diagnostic, FaultPhase};
use crate::engine::ScriptEngine;
use crate::fault::{Fault, FaultKind};
use crate::script_log;

impl ScriptEngine {
    /// Process one block of mono samples. Never blocks, never panics, never
    /// returns an error: on any fault the output degrades to silence and the
    /// fault shows up on the diagnostics channel.
    pub fn process_block(&mut self, input: &[f64], output: &mut [f64]) {
        script_log::reset_block_log_count();

        if self.latched {
            output.fill(0.0);
            return;
        }
        if self.active.is_none() {
            let fault = Fault::RuntimeFault("no script function active".to_string());
            self.record_fault(FaultPhase::Perform, &fault);
            self.latched = true;
            output.fill(0.0);
            return;
        }

        let (buf, count) = self.params.snapshot();
        let params = &buf[..count];

        let len = output.len();
        let mut prev = self.prev_sample;

        for i in 0..len {
            let x = input.get(i).copied().unwrap_or(0.0);
            // Counts down to 0 on the last sample of the block.
            let remaining = (len - 1 - i) as f64;
            match self.call_active(x, prev, remaining, params) {
                Ok(value) => {
                    prev = value;
                    output[i] = value;
                }
                Err(_) => {
                    // Fault already recorded by call_active.
                    self.latched = true;
                    for sample in output[i..].iter_mut() {
                        *sample = 0.0;
                    }
                    break;
                }
            }
        }

        self.prev_sample = prev;
    }

    /// One protected call into the active function.
    fn call_active(
        &mut self,
        input: f64,
        prev: f64,
        remaining: f64,
        params: &[f64],
    ) -> Result<f64, Fault> {
        let (name, ast) = match &self.active {
            Some(handle) => (handle.name.clone(), Arc::clone(&handle.ast)),
            None => return Err(Fault::RuntimeFault("no script function active".to_string())),
        };

        // Refill the preallocated scratch; its capacity already covers the
        // worst case, so nothing here allocates.
        self.call_args.clear();
        self.call_args.push(Dynamic::from(input));
        self.call_args.push(Dynamic::from(prev));
        self.call_args.push(Dynamic::from(remaining));
        for &p in params {
            self.call_args.push(Dynamic::from(p));
        }

        // The script body was already run at load time; only the function is
        // evaluated here.
        let options = CallFnOptions::new().eval_ast(false).rewind_scope(true);
        match self.engine.call_fn_with_options::<Dynamic>(
            options,
            &mut self.scope,
            &ast,
            name.as_str(),
            ScratchArgs(&mut self.call_args),
        ) {
            Ok(value) => match validate_result(value) {
                Ok(sample) => Ok(sample),
                Err(fault) => {
                    self.record_fault(FaultPhase::Perform, &fault);
                    Err(fault)
                }
            },
            Err(e) => {
                log::error!("script call '{}' failed: {}", name, e);
                self.push_diagnostic(Diagnostic::from_eval_error(
                    FaultKind::RuntimeFault,
                    FaultPhase::Perform,
                    &e,
                ));
                Err(Fault::RuntimeFault(e.to_string()))
            }
        }
    }
}

/// Hands the argument scratch to the interpreter by draining it, so the
/// backing buffer stays with the engine from one sample to the next.
struct ScratchArgs<'a>(&'a mut Vec<Dynamic>);

impl FuncArgs for ScratchArgs<'_> {
    fn parse<ARGS: Extend<Dynamic>>(self, args: &mut ARGS) {
        args.extend(self.0.drain(..));
    }
}

/// Validate a script return value and clamp it to the safe audio range.
fn validate_result(value: Dynamic) -> Result<f64, Fault> {
    let num = if let Ok(f) = value.as_float() {
        f
    } else if let Ok(i) = value.as_int() {
        i as f64
    } else {
        return Err(Fault::InvalidResult(format!(
            "script function returned {}, expected a number",
            value.type_name()
        )));
    };

    if !num.is_finite() {
        return Err(Fault::InvalidResult(
            "script function returned a non-finite value (NaN or inf)".to_string(),
        ));
    }

    Ok(num.clamp(-1.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_with(source: &str, function: &str) -> ScriptEngine {
        let mut engine = ScriptEngine::new();
        engine.reload_from(source).unwrap();
        engine.switch_function(function).unwrap();
        engine
    }

    #[test]
    fn passthrough_with_clamp() {
        let mut engine = engine_with("fn id(x, prev, n) { x }", "id");
        let input = [0.5, -0.25, 2.0, -3.0];
        let mut output = [0.0; 4];
        engine.process_block(&input, &mut output);
        assert_eq!(output, [0.5, -0.25, 1.0, -1.0]);
    }

    #[test]
    fn integer_returns_are_numeric() {
        let mut engine = engine_with("fn one(x, prev, n) { 1 }", "one");
        let input = [0.0; 3];
        let mut output = [0.0; 3];
        engine.process_block(&input, &mut output);
        assert_eq!(output, [1.0, 1.0, 1.0]);
    }

    #[test]
    fn remaining_counts_down_to_zero() {
        let mut engine = engine_with("fn count(x, prev, n) { n / 100.0 }", "count");
        let input = [0.0; 4];
        let mut output = [0.0; 4];
        engine.process_block(&input, &mut output);
        assert_eq!(output, [0.03, 0.02, 0.01, 0.0]);
    }

    #[test]
    fn feedback_persists_across_blocks() {
        let mut engine = engine_with("fn ramp(x, prev, n) { prev + 0.125 }", "ramp");
        let input = [0.0; 4];
        let mut output = [0.0; 4];
        engine.process_block(&input, &mut output);
        assert_eq!(output, [0.125, 0.25, 0.375, 0.5]);

        engine.process_block(&input, &mut output);
        assert_eq!(output, [0.625, 0.75, 0.875, 1.0]);
    }

    #[test]
    fn positional_params_are_trailing_arguments() {
        let mut engine = engine_with("fn mix(x, prev, n, a, b) { (a + b) / 20.0 }", "mix");
        engine.set_positional(&[3.0, 4.0]);
        let input = [0.0; 2];
        let mut output = [0.0; 2];
        engine.process_block(&input, &mut output);
        assert_eq!(output, [0.35, 0.35]);
    }

    #[test]
    fn call_scratch_is_reused_across_samples() {
        let mut engine = engine_with("fn mix(x, prev, n, a, b) { (a + b) / 20.0 }", "mix");
        engine.set_positional(&[3.0, 4.0]);
        let cap = engine.call_args.capacity();

        let input = [0.0; 32];
        let mut output = [0.0; 32];
        engine.process_block(&input, &mut output);
        engine.process_block(&input, &mut output);

        // Same buffer, drained by each call, never regrown.
        assert_eq!(engine.call_args.capacity(), cap);
        assert!(engine.call_args.is_empty());
        assert_eq!(output[0], 0.35);
    }

    #[test]
    fn arity_mismatch_latches_silence() {
        // Function takes no positional parameters but two are active.
        let mut engine = engine_with("fn id(x, prev, n) { x }", "id");
        engine.set_positional(&[1.0, 2.0]);
        let input = [0.5; 4];
        let mut output = [0.0; 4];
        engine.process_block(&input, &mut output);
        assert_eq!(output, [0.0; 4]);
        assert!(engine.is_latched());
    }

    #[test]
    fn non_numeric_return_latches_and_zero_fills() {
        let mut engine = engine_with(r#"fn s(x, prev, n) { "nope" }"#, "s");
        let input = [0.9; 4];
        let mut output = [9.0; 4];
        engine.process_block(&input, &mut output);
        assert_eq!(output, [0.0; 4]);
        assert!(engine.is_latched());

        let diags = engine.take_diagnostics();
        assert!(diags.iter().any(|d| d.kind == FaultKind::InvalidResult));
    }

    #[test]
    fn runtime_error_zero_fills_from_faulting_sample() {
        // Faults on the third call only.
        let source = r#"
            let calls = 0;
            fn tick(x, prev, n) {
                calls += 1;
                if calls == 3 { undefined_fn() } else { 0.5 }
            }
        "#;
        let mut engine = engine_with(source, "tick");
        let input = [0.0; 5];
        let mut output = [9.0; 5];
        engine.process_block(&input, &mut output);
        assert_eq!(output, [0.5, 0.5, 0.0, 0.0, 0.0]);
        assert!(engine.is_latched());
    }

    #[test]
    fn missing_function_latches() {
        let mut engine = ScriptEngine::new();
        engine.reload_from("fn id(x, prev, n) { x }").unwrap();
        // Loaded but never switched: nothing to call.
        let input = [1.0; 4];
        let mut output = [9.0; 4];
        engine.process_block(&input, &mut output);
        assert_eq!(output, [0.0; 4]);
        assert!(engine.is_latched());
    }

    #[test]
    fn latched_engine_outputs_silence_without_calling() {
        let mut engine = engine_with("fn id(x, prev, n) { x }", "id");
        engine.set_latched(true);
        let input = [0.7; 8];
        let mut output = [9.0; 8];
        engine.process_block(&input, &mut output);
        assert_eq!(output, [0.0; 8]);
    }

    #[test]
    fn loop_does_not_self_heal() {
        let source = r#"
            let calls = 0;
            fn flaky(x, prev, n) {
                calls += 1;
                if calls == 1 { 1.0 / 0.0 } else { x }
            }
        "#;
        let mut engine = engine_with(source, "flaky");
        let input = [0.5; 4];
        let mut output = [0.0; 4];
        engine.process_block(&input, &mut output);
        assert_eq!(output, [0.0; 4]);

        // Later calls would return valid values, but the latch holds.
        engine.process_block(&input, &mut output);
        assert_eq!(output, [0.0; 4]);
        assert!(engine.is_latched());
    }

    #[test]
    fn sample_rate_is_visible_to_scripts() {
        let mut engine = engine_with("fn sr(x, prev, n) { sample_rate() / 96000.0 }", "sr");
        engine.set_block_context(48000.0, 64);
        let input = [0.0; 1];
        let mut output = [0.0; 1];
        engine.process_block(&input, &mut output);
        assert_eq!(output, [0.5]);
    }

    #[test]
    fn named_params_reach_scripts() {
        let mut engine = engine_with(
            "fn g(x, prev, n) { if has_param(\"gain\") { x * param(\"gain\") } else { x } }",
            "g",
        );
        engine.set_named(vec![("gain".into(), 0.5)]);
        let input = [0.8; 2];
        let mut output = [0.0; 2];
        engine.process_block(&input, &mut output);
        assert_eq!(output, [0.4, 0.4]);
    }
}
