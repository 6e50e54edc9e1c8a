//! Structured diagnostics for the control-side channel.
//!
//! Rhai provides rich error types (parse + runtime) with positions. We wrap
//! those into a stable, JSON-serializable format that a host UI or CLI can
//! surface without scraping Rust logs. The audio path never raises; faults
//! recorded there show up here after the fact.

use serde::Serialize;

use crate::fault::{Fault, FaultKind};

/// Where in the engine lifecycle a fault was recorded. Initialization
/// failures are returned directly from construction, before any diagnostics
/// queue exists, so they have no phase here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultPhase {
    /// Script source compile or top-level execution.
    Load,
    /// Control-message handling.
    Dispatch,
    /// Per-sample execution inside the audio callback.
    Perform,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SourceLocation {
    /// 1-based line number in the script source.
    pub line: u32,
    /// 1-based column number.
    pub column: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub kind: FaultKind,
    pub phase: FaultPhase,
    pub message: String,
    pub location: Option<SourceLocation>,
    /// Raw interpreter error string (useful for bug reports).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

fn location_of(pos: rhai::Position) -> Option<SourceLocation> {
    let line = pos.line()? as u32;
    let column = pos.position().unwrap_or(1) as u32;
    Some(SourceLocation {
        line,
        column: column.max(1),
    })
}

impl Diagnostic {
    /// A diagnostic with no interpreter position attached.
    pub fn from_fault(phase: FaultPhase, fault: &Fault) -> Self {
        Self {
            kind: fault.kind(),
            phase,
            message: fault.to_string(),
            location: None,
            raw: None,
        }
    }

    /// Compile-time (syntax) error in script source.
    pub fn from_parse_error(err: &rhai::ParseError) -> Self {
        let raw = err.to_string();
        Self {
            kind: FaultKind::ScriptLoadFailed,
            phase: FaultPhase::Load,
            message: raw.clone(),
            location: location_of(err.position()),
            raw: Some(raw),
        }
    }

    /// Runtime error from a protected call or top-level execution.
    pub fn from_eval_error(kind: FaultKind, phase: FaultPhase, err: &rhai::EvalAltResult) -> Self {
        let raw = err.to_string();
        Self {
            kind,
            phase,
            message: raw.clone(),
            location: location_of(err.position()),
            raw: Some(raw),
        }
    }
}
