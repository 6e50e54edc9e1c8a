//! Logging for script code.
//!
//! Scripts log through rhai's `print` and `debug` statements, which we wire
//! into the `log` crate under the `script` target. Output is capped per audio
//! block so a script that prints from its sample function cannot flood the
//! console from the real-time path.

use std::sync::atomic::{AtomicU32, Ordering};

use rhai::Engine;

/// Maximum number of log messages allowed per processed block.
const MAX_LOGS_PER_BLOCK: u32 = 64;

/// Per-block message budget.
struct BlockLogCap {
    count: AtomicU32,
    warned: AtomicU32,
}

impl BlockLogCap {
    const fn new() -> Self {
        Self {
            count: AtomicU32::new(0),
            warned: AtomicU32::new(0),
        }
    }

    fn reset(&self) {
        self.count.store(0, Ordering::Relaxed);
        self.warned.store(0, Ordering::Relaxed);
    }

    /// Whether another message fits in this block's budget. Warns once per
    /// block when the budget runs out.
    fn admit(&self) -> bool {
        let count = self.count.fetch_add(1, Ordering::Relaxed);
        if count >= MAX_LOGS_PER_BLOCK {
            if self.warned.swap(1, Ordering::Relaxed) == 0 {
                log::warn!(
                    target: "script",
                    "script log limit exceeded ({} messages/block), further logs dropped",
                    MAX_LOGS_PER_BLOCK
                );
            }
            false
        } else {
            true
        }
    }
}

static CAP: BlockLogCap = BlockLogCap::new();

/// Reset the per-block log counter. Called at the start of each block.
pub fn reset_block_log_count() {
    CAP.reset();
}

/// Wire `print` and `debug` output from script code into the `log` crate.
pub fn install(engine: &mut Engine) {
    engine.on_print(|msg| {
        if CAP.admit() {
            log::info!(target: "script", "{}", msg);
        }
    });
    engine.on_debug(|msg, source, pos| {
        if CAP.admit() {
            match source {
                Some(source) => log::debug!(target: "script", "{} ({} @ {})", msg, source, pos),
                None => log::debug!(target: "script", "{} (@ {})", msg, pos),
            }
        }
    });
}
