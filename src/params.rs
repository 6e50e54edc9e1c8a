//! Parameter storage: positional and named.
//!
//! Both representations are written only from the control side. The positional
//! array is a fixed-capacity prefix of values appended to every script call;
//! the named table is shared with the interpreter through the `param()` host
//! function and fully replaced on every named-parameter message.

use std::cell::RefCell;
use std::rc::Rc;

use rhai::ImmutableString;

/// Fixed capacity of the positional parameter array. Values beyond this are
/// silently dropped (documented truncation policy, not an error).
pub const MAX_POSITIONAL_PARAMS: usize = 8;

/// Named table shared between the control side and the `param()` host
/// function registered with the interpreter. Insertion order is preserved for
/// inspection only; lookup is by name.
pub type SharedNamed = Rc<RefCell<Vec<(ImmutableString, f64)>>>;

#[derive(Debug)]
pub struct ParamStore {
    positional: [f64; MAX_POSITIONAL_PARAMS],
    /// Number of positional slots currently passed to script calls. Grows to
    /// cover the longest list written so far; never shrinks, so values beyond
    /// a shorter overwrite keep their previous contents and keep being passed.
    active_count: usize,
    named: SharedNamed,
}

impl ParamStore {
    pub fn new() -> Self {
        Self {
            positional: [0.0; MAX_POSITIONAL_PARAMS],
            active_count: 0,
            named: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Handle for the interpreter-side `param()` / `has_param()` closures.
    pub fn shared_named(&self) -> SharedNamed {
        Rc::clone(&self.named)
    }

    /// Overwrite positional slots `[0, k)` from `values`, truncating at
    /// capacity. Returns the number of values written.
    pub fn write_positional(&mut self, values: &[f64]) -> usize {
        let n = values.len().min(MAX_POSITIONAL_PARAMS);
        self.positional[..n].copy_from_slice(&values[..n]);
        if n > self.active_count {
            self.active_count = n;
        }
        n
    }

    /// Copy of the positional array and active count, taken once per block.
    pub fn snapshot(&self) -> ([f64; MAX_POSITIONAL_PARAMS], usize) {
        (self.positional, self.active_count)
    }

    /// The currently active positional prefix.
    pub fn positional(&self) -> &[f64] {
        &self.positional[..self.active_count]
    }

    /// Replace the whole named table. Full replace, never a merge.
    pub fn replace_named(&mut self, pairs: Vec<(ImmutableString, f64)>) {
        *self.named.borrow_mut() = pairs;
    }

    pub fn named_value(&self, name: &str) -> Option<f64> {
        self.named
            .borrow()
            .iter()
            .find(|(key, _)| key.as_str() == name)
            .map(|(_, value)| *value)
    }

    /// Snapshot of the named table, in insertion order, for inspection.
    pub fn named_pairs(&self) -> Vec<(ImmutableString, f64)> {
        self.named.borrow().clone()
    }
}

impl Default for ParamStore {
    fn default() -> Self {
        Self::new()
    }
}
