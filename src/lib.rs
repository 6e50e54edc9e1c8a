pub mod diagnostics;
pub mod dispatch;
pub mod engine;
pub mod fault;
pub mod host;
pub mod params;
pub mod perform;
pub mod script_log;

pub mod cli;

pub use dispatch::Atom;
pub use engine::ScriptEngine;
pub use fault::{Fault, FaultKind};
pub use host::{FileSource, Processor, ScriptSource};
