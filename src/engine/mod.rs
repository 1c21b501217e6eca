//! Interpreter core
//!
//! Owns the Lua 5.1 VM and everything that keeps it honest: the library
//! whitelist and global scrub, the fuel meter, the size caps, and the
//! eval entrypoints. The VM is built once and reused across evals; `reset`
//! tears it down and rebuilds it atomically. One caller at a time, by
//! construction: every entrypoint takes `&mut self`.

pub mod fuel;
pub mod sandbox;

use crate::error::{EngineError, Result};
use crate::host::RedisHost;
use crate::lualib;
use crate::redis::{self, convert};
use crate::wire::{self, Reply};
use fuel::FuelGauge;
use mlua::{Lua, LuaOptions, MultiValue};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Chunkname scripts are loaded under; Lua renders it as `user_script:N:`
/// in diagnostics, which is what the error-decoration path keys on.
pub const CHUNK_NAME: &str = "@user_script";

const DEFAULT_RESP: u8 = 2;

/// Per-eval resource caps. Zero means unenforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Limits {
    /// Instruction credit per eval
    pub max_fuel: u64,

    /// Largest allowed encoded reply, in bytes
    pub max_reply_bytes: u64,

    /// Largest allowed encoded KEYS/ARGV input, in bytes
    pub max_arg_bytes: u64,
}

/// One sandboxed Lua 5.1 VM plus its fuel gauge, limits, and Redis bridge.
pub struct ScriptEngine {
    lua: Lua,
    host: Arc<dyn RedisHost>,
    limits: Limits,
    fuel: FuelGauge,
    resp: Arc<AtomicU8>,
}

impl ScriptEngine {
    /// Create an engine with unenforced limits.
    pub fn new(host: Arc<dyn RedisHost>) -> Result<Self> {
        Self::with_limits(host, Limits::default())
    }

    /// Create an engine with the given caps.
    pub fn with_limits(host: Arc<dyn RedisHost>, limits: Limits) -> Result<Self> {
        let fuel = FuelGauge::new();
        let resp = Arc::new(AtomicU8::new(DEFAULT_RESP));
        let lua = Self::build_vm(&host, &fuel, &resp)?;
        Ok(ScriptEngine {
            lua,
            host,
            limits,
            fuel,
            resp,
        })
    }

    /// Destroy and recreate the VM, repeating the init discipline. All
    /// script-visible state is discarded; limits are kept.
    pub fn reset(&mut self) -> Result<()> {
        self.resp.store(DEFAULT_RESP, Ordering::Relaxed);
        self.lua = Self::build_vm(&self.host, &self.fuel, &self.resp)?;
        debug!(target: "crucible::engine", "engine reset");
        Ok(())
    }

    /// Configure caps; takes effect on subsequent evals.
    pub fn set_limits(&mut self, limits: Limits) {
        self.limits = limits;
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    /// The RESP mode last recorded by `redis.setresp` (bookkeeping only).
    pub fn resp_version(&self) -> u8 {
        self.resp.load(Ordering::Relaxed)
    }

    /// Soft memory cap on the VM allocator, coordinated outside the core
    /// limits. Does not survive `reset`; reapply afterwards if needed.
    pub fn set_memory_limit(&self, bytes: usize) -> Result<usize> {
        self.lua
            .set_memory_limit(bytes)
            .map_err(|e| EngineError::Init(e.to_string()))
    }

    /// Evaluate a script with empty `KEYS`/`ARGV`.
    pub fn eval(&mut self, script: &[u8]) -> Reply {
        self.eval_split(script, &[], &[])
    }

    /// Evaluate a script against an encoded argument array, split into
    /// `KEYS` (the first `keys_count` elements) and `ARGV` (the rest).
    pub fn eval_with_args(&mut self, script: &[u8], args: &[u8], keys_count: usize) -> Reply {
        if self.limits.max_arg_bytes > 0 && args.len() as u64 > self.limits.max_arg_bytes {
            return EngineError::ArgBytesExceeded.into_reply();
        }
        let mut fields = match wire::decode_args(args) {
            Ok(fields) => fields,
            Err(_) => return EngineError::InvalidArgEncoding.into_reply(),
        };
        if keys_count > fields.len() {
            return EngineError::TooManyKeys.into_reply();
        }
        let argv = fields.split_off(keys_count);
        self.eval_split(script, &fields, &argv)
    }

    /// Evaluate with already-split argument slices.
    pub fn eval_split(&mut self, script: &[u8], keys: &[Vec<u8>], argv: &[Vec<u8>]) -> Reply {
        debug!(
            target: "crucible::engine",
            script_len = script.len(),
            keys = keys.len(),
            argv = argv.len(),
            "eval"
        );
        self.fuel.refill(self.limits.max_fuel);
        let reply = match self.run(script, keys, argv) {
            Ok(reply) => reply,
            Err(err) => {
                if matches!(&err, EngineError::Script(m) if m == fuel::KILL_MESSAGE) {
                    warn!(target: "crucible::engine", "script killed by fuel limit");
                }
                err.into_reply()
            }
        };
        self.enforce_reply_cap(reply)
    }

    /// As [`eval`](Self::eval), returning the reply in wire form.
    pub fn eval_encoded(&mut self, script: &[u8]) -> Vec<u8> {
        wire::encode_reply(&self.eval(script))
    }

    /// As [`eval_with_args`](Self::eval_with_args), returning wire form.
    pub fn eval_with_args_encoded(
        &mut self,
        script: &[u8],
        args: &[u8],
        keys_count: usize,
    ) -> Vec<u8> {
        wire::encode_reply(&self.eval_with_args(script, args, keys_count))
    }

    fn run(&self, script: &[u8], keys: &[Vec<u8>], argv: &[Vec<u8>]) -> Result<Reply> {
        let globals = self.lua.globals();
        let keys_table = convert::bytes_table(&self.lua, keys).map_err(EngineError::from_lua)?;
        let argv_table = convert::bytes_table(&self.lua, argv).map_err(EngineError::from_lua)?;
        globals
            .raw_set("KEYS", keys_table)
            .map_err(EngineError::from_lua)?;
        globals
            .raw_set("ARGV", argv_table)
            .map_err(EngineError::from_lua)?;

        // Chunk::call loads the source verbatim; Chunk::eval would wrap
        // single-statement scripts in `return ...` and change what a script
        // with no return statement reports.
        let returned: MultiValue = self
            .lua
            .load(script)
            .set_name(CHUNK_NAME)
            .call(())
            .map_err(EngineError::from_lua)?;

        match returned.into_iter().next() {
            // No return value is reported as a bare OK status.
            None => Ok(Reply::ok()),
            Some(value) => convert::lua_to_reply(&self.lua, value, 0),
        }
    }

    fn enforce_reply_cap(&self, reply: Reply) -> Reply {
        if self.limits.max_reply_bytes > 0
            && wire::encoded_reply_len(&reply) > self.limits.max_reply_bytes
        {
            return EngineError::ReplyBytesExceeded.into_reply();
        }
        reply
    }

    fn build_vm(host: &Arc<dyn RedisHost>, fuel: &FuelGauge, resp: &Arc<AtomicU8>) -> Result<Lua> {
        let init = |e: mlua::Error| EngineError::Init(e.to_string());

        let lua = Lua::new_with(sandbox::whitelist(), LuaOptions::default()).map_err(init)?;
        sandbox::apply(&lua).map_err(init)?;
        fuel.install(&lua).map_err(init)?;
        lualib::register_all(&lua).map_err(init)?;
        redis::install(&lua, Arc::clone(host), Arc::clone(resp)).map_err(init)?;
        sandbox::route_print(&lua, Arc::clone(host)).map_err(init)?;
        Ok(lua)
    }
}

impl std::fmt::Debug for ScriptEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptEngine")
            .field("limits", &self.limits)
            .field("fuel_remaining", &self.fuel.remaining())
            .finish_non_exhaustive()
    }
}
