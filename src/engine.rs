//! Rhai engine state for per-sample audio processing.
//!
//! One `ScriptEngine` per processor instance. It owns the interpreter, the
//! compiled script, the cached active-function handle, parameter storage and
//! the error latch.
//!
//! Scripts define top-level functions and pick one as the active sample
//! function. The active function is called once per sample as
//!
//! ```rhai
//! fn patch(input, prev, remaining) {
//!     input * param("gain") + prev * 0.0
//! }
//! ```
//!
//! with any active positional parameters appended as trailing arguments
//! (so two positional parameters mean a five-argument function). The return
//! value must be a finite number; it is clamped to [-1.0, 1.0] and fed back
//! as `prev` on the next call.
//!
//! Host API available to scripts:
//! - `param(name)` - named parameter value, 0.0 when unset
//! - `has_param(name)` - whether a named parameter is set
//! - `sample_rate()` - current sample rate in Hz
//! - `print` / `debug` - capped per-block logging
//!
//! Switching the active function follows an install-before-release protocol:
//! the candidate handle is resolved first, installed into the slot, and only
//! then is the previous handle dropped. The audio path therefore only ever
//! observes the unset slot or a handle whose compilation unit is still alive.

use std::cell::Cell;
use std::mem;
use std::rc::Rc;
use std::sync::Arc;

use rhai::{Dynamic, Engine, ImmutableString, Scope, AST};

use crate::diagnostics::{Diagnostic, FaultPhase};
use crate::fault::{Fault, FaultKind};
use crate::params::{ParamStore, MAX_POSITIONAL_PARAMS};
use crate::script_log;

pub const DEFAULT_SAMPLE_RATE: f64 = 44100.0;
pub const DEFAULT_BLOCK_SIZE: usize = 64;

/// Bounded queue so repeated runtime faults don't grow without limit.
const MAX_DIAGNOSTICS: usize = 32;

/// Cached reference to a callable script function.
///
/// Holds a strong reference to the compilation unit that defined it, so a
/// reload can never free code this handle still points into.
#[derive(Debug, Clone)]
pub(crate) struct FnHandle {
    pub(crate) name: ImmutableString,
    pub(crate) ast: Arc<AST>,
}

/// Engine state for one processor instance.
pub struct ScriptEngine {
    // Dropped before `engine` (declaration order), releasing the cached
    // function reference ahead of interpreter teardown.
    pub(crate) active: Option<FnHandle>,
    pub(crate) active_name: Option<ImmutableString>,
    pub(crate) ast: Option<Arc<AST>>,
    pub(crate) scope: Scope<'static>,
    pub(crate) params: ParamStore,
    /// Argument scratch for per-sample calls. Capacity covers the three
    /// fixed arguments plus the positional maximum, so refilling it on the
    /// audio path never allocates.
    pub(crate) call_args: Vec<Dynamic>,
    pub(crate) sample_rate: Rc<Cell<f64>>,
    pub(crate) block_size: usize,
    pub(crate) prev_sample: f64,
    /// Error latch. While set, blocks are rendered as silence. Cleared only
    /// by a successful function switch or reload, never from the audio path.
    pub(crate) latched: bool,
    pub(crate) diagnostics: Vec<Diagnostic>,
    pub(crate) last_error: Option<String>,
    pub(crate) engine: Engine,
}

impl ScriptEngine {
    /// Create an engine with no extra host bindings.
    pub fn new() -> Self {
        match Self::with_bindings(|_| Ok(())) {
            Ok(engine) => engine,
            Err(_) => unreachable!("no-op bindings cannot fail"),
        }
    }

    /// Create an engine and let the caller register native bindings on the
    /// interpreter. A binding failure is fatal for the instance.
    pub fn with_bindings(
        bindings: impl FnOnce(&mut Engine) -> anyhow::Result<()>,
    ) -> Result<Self, Fault> {
        let mut engine = Engine::new();

        // Bounded-execution settings: every call from the audio path has a
        // bounded worst case, so a runaway script faults instead of stalling
        // the callback.
        engine.set_max_expr_depths(64, 64);
        engine.set_max_call_levels(64);
        engine.set_max_operations(100_000);
        engine.set_max_string_size(10_000);
        engine.set_max_array_size(1_000);
        engine.set_max_map_size(500);

        let params = ParamStore::new();

        let named = params.shared_named();
        engine.register_fn("param", move |name: ImmutableString| -> f64 {
            named
                .borrow()
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| *value)
                .unwrap_or(0.0)
        });

        let named = params.shared_named();
        engine.register_fn("has_param", move |name: ImmutableString| -> bool {
            named.borrow().iter().any(|(key, _)| *key == name)
        });

        let sample_rate = Rc::new(Cell::new(DEFAULT_SAMPLE_RATE));
        let rate = Rc::clone(&sample_rate);
        engine.register_fn("sample_rate", move || -> f64 { rate.get() });

        script_log::install(&mut engine);

        bindings(&mut engine).map_err(|e| Fault::InitializationFailed(e.to_string()))?;

        Ok(Self {
            active: None,
            active_name: None,
            ast: None,
            scope: Scope::new(),
            params,
            call_args: Vec::with_capacity(3 + MAX_POSITIONAL_PARAMS),
            sample_rate,
            block_size: DEFAULT_BLOCK_SIZE,
            prev_sample: 0.0,
            latched: false,
            diagnostics: Vec::new(),
            last_error: None,
            engine,
        })
    }

    /// Record the block context supplied by the host at setup time. The new
    /// sample rate is visible to scripts through `sample_rate()` from the
    /// next call on.
    pub fn set_block_context(&mut self, sample_rate: f64, max_block_size: usize) {
        log::debug!("block setup: sample_rate={} max_block_size={}", sample_rate, max_block_size);
        self.sample_rate.set(sample_rate);
        self.block_size = max_block_size;
    }

    /// Switch the active function to `name`.
    ///
    /// Resolution happens first; on failure the currently active handle is
    /// untouched and the previous function keeps running. On success the
    /// candidate is installed before the old handle is dropped, and the
    /// error latch clears.
    pub fn switch_function(&mut self, name: &str) -> Result<(), Fault> {
        let ast = match &self.ast {
            Some(ast) if resolves(ast, name) => Arc::clone(ast),
            _ => return Err(Fault::UnknownFunction(name.to_string())),
        };

        let candidate = FnHandle {
            name: name.into(),
            ast,
        };
        // Install, then release. Never the other way around.
        let old = self.active.replace(candidate);
        drop(old);

        self.active_name = Some(name.into());
        self.latched = false;
        log::info!("active function: {}", name);
        Ok(())
    }

    /// Execute new script source, then re-resolve the active function name.
    ///
    /// The active handle is cleared and the latch set before the source runs,
    /// so the perform loop renders silence rather than calling into code that
    /// is mid-replacement. The latch clears only when the active name
    /// resolves against the new source.
    pub fn reload_from(&mut self, source: &str) -> Result<(), Fault> {
        self.latched = true;
        self.active = None;

        // Top-level script state is reinitialized on every load.
        self.scope = Scope::new();

        let ast = match self.engine.compile(source) {
            Ok(ast) => ast,
            Err(e) => {
                log::error!("script compile failed: {}", e);
                self.push_diagnostic(Diagnostic::from_parse_error(&e));
                return Err(Fault::ScriptLoadFailed(e.to_string()));
            }
        };

        if let Err(e) = self.engine.run_ast_with_scope(&mut self.scope, &ast) {
            log::error!("script execution failed: {}", e);
            self.push_diagnostic(Diagnostic::from_eval_error(
                FaultKind::ScriptLoadFailed,
                FaultPhase::Load,
                &e,
            ));
            return Err(Fault::ScriptLoadFailed(e.to_string()));
        }

        self.ast = Some(Arc::new(ast));

        if let Some(name) = self.active_name.clone() {
            if let Err(fault) = self.switch_function(name.as_str()) {
                // Previous function is not defined by the new source; the
                // engine stays silent until a successful switch.
                self.record_fault(FaultPhase::Load, &fault);
                return Err(fault);
            }
        }
        Ok(())
    }

    /// Name of the currently active function, if any.
    pub fn active_function(&self) -> Option<&str> {
        self.active_name.as_deref()
    }

    pub fn is_latched(&self) -> bool {
        self.latched
    }

    /// Force or restore the latch from the control side. Used by dispatch
    /// while a speculative function resolution is in flight.
    pub fn set_latched(&mut self, latched: bool) {
        self.latched = latched;
    }

    /// Drop the active handle and latch silence. Used when a reload's source
    /// fetch fails before any code can run.
    pub fn force_silent(&mut self) {
        self.latched = true;
        self.active = None;
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate.get()
    }

    /// Largest block size the host promised to hand [`process_block`].
    ///
    /// [`process_block`]: ScriptEngine::process_block
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn prev_sample(&self) -> f64 {
        self.prev_sample
    }

    /// Overwrite positional parameters from index 0, truncating at capacity.
    pub fn set_positional(&mut self, values: &[f64]) {
        let written = self.params.write_positional(values);
        if written < values.len() {
            log::debug!(
                "positional parameter list truncated: {} supplied, {} stored",
                values.len(),
                written
            );
        }
    }

    /// Replace the named parameter table wholesale.
    pub fn set_named(&mut self, pairs: Vec<(ImmutableString, f64)>) {
        self.params.replace_named(pairs);
    }

    pub fn positional(&self) -> &[f64] {
        self.params.positional()
    }

    pub fn named_value(&self, name: &str) -> Option<f64> {
        self.params.named_value(name)
    }

    pub fn named_pairs(&self) -> Vec<(ImmutableString, f64)> {
        self.params.named_pairs()
    }

    /// Drain all pending diagnostics, oldest first.
    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        mem::take(&mut self.diagnostics)
    }

    /// Most recent fault message, for display.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub(crate) fn push_diagnostic(&mut self, diag: Diagnostic) {
        self.last_error = Some(diag.message.clone());
        self.diagnostics.push(diag);
        if self.diagnostics.len() > MAX_DIAGNOSTICS {
            let excess = self.diagnostics.len() - MAX_DIAGNOSTICS;
            self.diagnostics.drain(0..excess);
        }
    }

    pub(crate) fn record_fault(&mut self, phase: FaultPhase, fault: &Fault) {
        log::error!("{}", fault);
        self.push_diagnostic(Diagnostic::from_fault(phase, fault));
    }
}

impl Default for ScriptEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn resolves(ast: &AST, name: &str) -> bool {
    ast.iter_functions().any(|f| f.name == name)
}
