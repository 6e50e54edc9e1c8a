//! Host-side embedding surface.
//!
//! [`Processor`] ties a [`ScriptEngine`] to a script source and exposes the
//! three entry points an audio host drives: block setup, per-block
//! processing, and control-message delivery. Script loading goes through the
//! [`ScriptSource`] trait so tests can feed strings while real hosts read
//! files.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::diagnostics::{Diagnostic, FaultPhase};
use crate::dispatch::{self, Atom};
use crate::engine::ScriptEngine;
use crate::fault::Fault;

/// Where script text comes from on a reload request.
pub trait ScriptSource {
    fn load(&mut self) -> anyhow::Result<String>;
}

/// Reads the script from disk on every reload, so edits are picked up
/// without restarting the host.
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ScriptSource for FileSource {
    fn load(&mut self) -> anyhow::Result<String> {
        fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read script {}", self.path.display()))
    }
}

impl ScriptSource for String {
    fn load(&mut self) -> anyhow::Result<String> {
        Ok(self.clone())
    }
}

/// A script engine bound to its source.
pub struct Processor<S: ScriptSource> {
    engine: ScriptEngine,
    source: S,
}

impl<S: ScriptSource> Processor<S> {
    /// Build a processor and perform the initial script load. A load failure
    /// is reported through diagnostics and leaves the processor silent, not
    /// dead; a later reload can recover it.
    pub fn new(source: S) -> Result<Self, Fault> {
        Self::with_bindings(source, |_| Ok(()))
    }

    /// Like [`Processor::new`] with extra host bindings registered on the
    /// interpreter before the first load.
    pub fn with_bindings(
        source: S,
        bindings: impl FnOnce(&mut rhai::Engine) -> anyhow::Result<()>,
    ) -> Result<Self, Fault> {
        let engine = ScriptEngine::with_bindings(bindings)?;
        let mut processor = Self { engine, source };
        let _ = processor.on_reload_request();
        Ok(processor)
    }

    /// Called when the host's streaming context changes.
    pub fn on_block_setup(&mut self, sample_rate: f64, max_block_size: usize) {
        self.engine.set_block_context(sample_rate, max_block_size);
    }

    /// Process one audio block. Always fills `output` completely.
    pub fn process_block(&mut self, input: &[f64], output: &mut [f64]) {
        self.engine.process_block(input, output);
    }

    /// Deliver one control message.
    pub fn on_message(&mut self, selector: Option<&str>, args: &[Atom]) -> Result<(), Fault> {
        dispatch::dispatch(&mut self.engine, selector, args)
    }

    /// Re-read the script from its source and recompile. If the source
    /// itself cannot be read the engine is forced silent until a subsequent
    /// reload succeeds.
    pub fn on_reload_request(&mut self) -> Result<(), Fault> {
        let text = match self.source.load() {
            Ok(text) => text,
            Err(e) => {
                let fault = Fault::ScriptLoadFailed(e.to_string());
                self.engine.force_silent();
                self.engine.record_fault(FaultPhase::Load, &fault);
                return Err(fault);
            }
        };
        self.engine.reload_from(&text)
    }

    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        self.engine.take_diagnostics()
    }

    pub fn engine(&self) -> &ScriptEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut ScriptEngine {
        &mut self.engine
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }
}
