//! Host adapter surface for Crucible
//!
//! The engine never executes commands itself; every `redis.call` crosses a
//! host seam described by the [`RedisHost`] trait. This module provides the
//! trait, the standalone construction with no command backend, a
//! callback-backed host that models the encoded import edge, and the
//! [`ScriptRunner`] convenience adapter.

mod runner;

pub use runner::{decorate_reply, ScriptRunner};

use crate::wire::{self, Reply};
use sha1::{Digest, Sha1};
use thiserror::Error;

/// Redis log levels exposed to scripts as `redis.LOG_*`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Verbose,
    Notice,
    Warning,
}

impl LogLevel {
    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(LogLevel::Debug),
            1 => Some(LogLevel::Verbose),
            2 => Some(LogLevel::Notice),
            3 => Some(LogLevel::Warning),
            _ => None,
        }
    }

    pub fn as_i64(self) -> i64 {
        match self {
            LogLevel::Debug => 0,
            LogLevel::Verbose => 1,
            LogLevel::Notice => 2,
            LogLevel::Warning => 3,
        }
    }
}

/// A failed host call. The message becomes the Lua error raised inside the
/// script (for `redis.call`) or the `{err}` payload (for `redis.pcall`).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct HostError(pub String);

impl HostError {
    pub fn new(message: impl Into<String>) -> Self {
        HostError(message.into())
    }
}

/// Host-supplied command execution, logging, and hashing.
///
/// Implementations run synchronously on the engine's thread and must not
/// reenter the engine that invoked them.
pub trait RedisHost {
    /// Execute a command; the first element is the command name. A returned
    /// `Reply::Error` or a `HostError` both raise inside the script.
    fn call(&self, args: &[Vec<u8>]) -> Result<Reply, HostError>;

    /// Like `call`, but failures must surface as `Error` replies rather
    /// than propagate.
    fn pcall(&self, args: &[Vec<u8>]) -> Reply {
        match self.call(args) {
            Ok(reply) => reply,
            Err(err) => Reply::Error(err.0.into_bytes()),
        }
    }

    /// Sink for `redis.log`. Best-effort; must not fail.
    fn log(&self, level: LogLevel, message: &[u8]) {
        let text = String::from_utf8_lossy(message);
        match level {
            LogLevel::Debug => tracing::debug!(target: "crucible::script", "{text}"),
            LogLevel::Verbose => tracing::debug!(target: "crucible::script", "{text}"),
            LogLevel::Notice => tracing::info!(target: "crucible::script", "{text}"),
            LogLevel::Warning => tracing::warn!(target: "crucible::script", "{text}"),
        }
    }

    /// Backing for `redis.sha1hex`.
    fn sha1hex(&self, data: &[u8]) -> String {
        script_sha1(data)
    }
}

/// Lowercase hex SHA-1 of a script body; the script's identity for error
/// decoration and cache keying.
pub fn script_sha1(data: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// The standalone construction: an engine with no command backend. Scripts
/// run, but every `redis.call` fails the way an unknown command would.
#[derive(Debug, Default)]
pub struct NullHost;

impl RedisHost for NullHost {
    fn call(&self, args: &[Vec<u8>]) -> Result<Reply, HostError> {
        match args.first() {
            Some(cmd) => Err(HostError::new(format!(
                "ERR unknown command '{}'",
                String::from_utf8_lossy(cmd)
            ))),
            None => Err(HostError::new("ERR wrong number of arguments")),
        }
    }
}

/// A host backed by callbacks that speak the encoded import shapes:
/// encoded argument array in, encoded reply out. This is the in-process
/// model of the `redis_call`/`redis_pcall` imports.
pub struct FnHost {
    call_fn: Box<dyn Fn(&[u8]) -> Vec<u8>>,
    pcall_fn: Option<Box<dyn Fn(&[u8]) -> Vec<u8>>>,
}

impl FnHost {
    pub fn new(call_fn: impl Fn(&[u8]) -> Vec<u8> + 'static) -> Self {
        FnHost {
            call_fn: Box::new(call_fn),
            pcall_fn: None,
        }
    }

    /// Use a distinct callback for `redis.pcall` routing.
    pub fn with_pcall(mut self, pcall_fn: impl Fn(&[u8]) -> Vec<u8> + 'static) -> Self {
        self.pcall_fn = Some(Box::new(pcall_fn));
        self
    }
}

impl RedisHost for FnHost {
    fn call(&self, args: &[Vec<u8>]) -> Result<Reply, HostError> {
        let encoded = wire::encode_args(args);
        Ok(decode_host_reply(&(self.call_fn)(&encoded)))
    }

    fn pcall(&self, args: &[Vec<u8>]) -> Reply {
        let encoded = wire::encode_args(args);
        match &self.pcall_fn {
            Some(f) => decode_host_reply(&f(&encoded)),
            None => decode_host_reply(&(self.call_fn)(&encoded)),
        }
    }
}

/// Decode a reply buffer produced by a host import. Empty and malformed
/// buffers surface as `Error` replies instead of crashing the eval.
pub fn decode_host_reply(bytes: &[u8]) -> Reply {
    if bytes.is_empty() {
        return Reply::error("ERR empty reply from host");
    }
    match wire::decode_reply(bytes) {
        Ok(reply) => reply,
        Err(err) => Reply::error(err.to_string()),
    }
}
