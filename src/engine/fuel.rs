//! Instruction-budget metering
//!
//! Cancellation is expressed purely as fuel: a VM hook runs every
//! [`STRIDE`] instructions and subtracts the stride from the remaining
//! credit. At a non-positive remainder the hook raises a fixed Lua error
//! that terminates the script. There is no wall-clock timeout; a host that
//! wants one sizes the fuel limit accordingly.

use mlua::{HookTriggers, Lua};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Instructions between hook invocations
pub const STRIDE: u32 = 1_000;

/// The error a script dies with when its budget runs out
pub const KILL_MESSAGE: &str = "Script killed by fuel limit";

/// Remaining instruction credit, shared with the VM hook.
///
/// A zero limit means unenforced; the gauge is then refilled to `i64::MAX`,
/// which no single eval can plausibly drain.
#[derive(Debug, Clone)]
pub struct FuelGauge {
    remaining: Arc<AtomicI64>,
}

impl FuelGauge {
    pub fn new() -> Self {
        FuelGauge {
            remaining: Arc::new(AtomicI64::new(i64::MAX)),
        }
    }

    /// Refill the gauge from the configured limit. Called before every eval.
    pub fn refill(&self, max_fuel: u64) {
        let credit = if max_fuel == 0 {
            i64::MAX
        } else {
            max_fuel.min(i64::MAX as u64) as i64
        };
        self.remaining.store(credit, Ordering::Relaxed);
    }

    /// Credit left after the last eval; useful for accounting.
    pub fn remaining(&self) -> i64 {
        self.remaining.load(Ordering::Relaxed)
    }

    /// Install the metering hook on a freshly built VM.
    pub fn install(&self, lua: &Lua) -> mlua::Result<()> {
        let remaining = Arc::clone(&self.remaining);
        lua.set_hook(
            HookTriggers::new().every_nth_instruction(STRIDE),
            move |_lua, _debug| {
                let left = remaining.fetch_sub(STRIDE as i64, Ordering::Relaxed) - STRIDE as i64;
                if left <= 0 {
                    Err(mlua::Error::RuntimeError(KILL_MESSAGE.to_string()))
                } else {
                    Ok(())
                }
            },
        );
        Ok(())
    }
}

impl Default for FuelGauge {
    fn default() -> Self {
        Self::new()
    }
}
