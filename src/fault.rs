//! Fault taxonomy for the scripting host.
//!
//! Every failure is either absorbed (the previous function stays active) or
//! degrades output to silence until a control-side recovery action succeeds.
//! Nothing here ever crosses the audio boundary as a panic or an `Err`.

use std::fmt;

use serde::Serialize;

/// A control- or audio-side failure, with context.
#[derive(Debug, Clone, PartialEq)]
pub enum Fault {
    /// The interpreter or caller-supplied bindings failed to initialize.
    /// Fatal: the instance cannot be used.
    InitializationFailed(String),
    /// A name did not resolve to a script function. The previously active
    /// function, if any, remains active.
    UnknownFunction(String),
    /// A parameter message could not be parsed. The message is ignored.
    MalformedParameters(String),
    /// Script source failed to compile or run. The engine enters silence.
    ScriptLoadFailed(String),
    /// A protected call into the script failed. Latches silence.
    RuntimeFault(String),
    /// The script returned a non-numeric or non-finite value. Latches silence.
    InvalidResult(String),
}

/// Payload-free fault discriminant, used in serialized diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    InitializationFailed,
    UnknownFunction,
    MalformedParameters,
    ScriptLoadFailed,
    RuntimeFault,
    InvalidResult,
}

impl Fault {
    pub fn kind(&self) -> FaultKind {
        match self {
            Fault::InitializationFailed(_) => FaultKind::InitializationFailed,
            Fault::UnknownFunction(_) => FaultKind::UnknownFunction,
            Fault::MalformedParameters(_) => FaultKind::MalformedParameters,
            Fault::ScriptLoadFailed(_) => FaultKind::ScriptLoadFailed,
            Fault::RuntimeFault(_) => FaultKind::RuntimeFault,
            Fault::InvalidResult(_) => FaultKind::InvalidResult,
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::InitializationFailed(msg) => write!(f, "engine initialization failed: {}", msg),
            Fault::UnknownFunction(name) => write!(f, "'{}' is not a script function", name),
            Fault::MalformedParameters(msg) => write!(f, "malformed parameter message: {}", msg),
            Fault::ScriptLoadFailed(msg) => write!(f, "script load failed: {}", msg),
            Fault::RuntimeFault(msg) => write!(f, "script runtime error: {}", msg),
            Fault::InvalidResult(msg) => write!(f, "invalid script result: {}", msg),
        }
    }
}

impl std::error::Error for Fault {}
