//! Crucible library
//!
//! A sandboxed, deterministic, Redis-compatible Lua 5.1 scripting engine.
//! Scripts run against a VM stripped of filesystem, network, clock, module
//! loading, debug, and randomness facilities, metered by an instruction
//! fuel budget; `redis.call`/`redis.pcall` route to host-supplied callbacks
//! and the final value comes back as exactly one reply.

pub mod abi;
pub mod engine;
pub mod error;
pub mod host;
pub mod lualib;
pub mod redis;
pub mod wire;

// Re-export commonly used types
pub use engine::{Limits, ScriptEngine};
pub use error::EngineError;
pub use host::{FnHost, LogLevel, NullHost, RedisHost, ScriptRunner};
pub use wire::Reply;
