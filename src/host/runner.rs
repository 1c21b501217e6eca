//! Script runner
//!
//! The convenience adapter application code talks to: it owns an engine,
//! computes each script's SHA-1 identity, encodes `KEYS`/`ARGV` through
//! the wire codec, applies the Redis error decoration to the final reply,
//! and keeps the sha1-keyed script cache behind `SCRIPT LOAD`/`EVALSHA`
//! style operations.

use super::{script_sha1, RedisHost};
use crate::engine::{Limits, ScriptEngine};
use crate::error::Result;
use crate::wire::{self, Reply};
use std::collections::HashMap;
use std::sync::Arc;

/// Engine plus host-adapter duties: script identity, argument encoding,
/// error decoration, script cache.
pub struct ScriptRunner {
    engine: ScriptEngine,
    scripts: HashMap<String, Vec<u8>>,
}

impl ScriptRunner {
    pub fn new(host: Arc<dyn RedisHost>) -> Result<Self> {
        Self::with_limits(host, Limits::default())
    }

    pub fn with_limits(host: Arc<dyn RedisHost>, limits: Limits) -> Result<Self> {
        Ok(ScriptRunner {
            engine: ScriptEngine::with_limits(host, limits)?,
            scripts: HashMap::new(),
        })
    }

    /// Direct access to the engine for limit changes and resets.
    pub fn engine(&mut self) -> &mut ScriptEngine {
        &mut self.engine
    }

    /// Soft memory cap on the VM allocator. Coordinated here in the
    /// adapter; not one of the per-eval core limits.
    pub fn set_memory_limit(&mut self, bytes: usize) -> Result<usize> {
        self.engine.set_memory_limit(bytes)
    }

    /// Evaluate a script with the given `KEYS`/`ARGV`, decorating any
    /// script-originated error with the script's identity.
    pub fn eval(&mut self, script: &[u8], keys: &[Vec<u8>], argv: &[Vec<u8>]) -> Reply {
        let sha = script_sha1(script);
        self.eval_identified(script, &sha, keys, argv)
    }

    /// Cache a script body and return its sha1 identity.
    pub fn load(&mut self, script: &[u8]) -> String {
        let sha = script_sha1(script);
        self.scripts.insert(sha.clone(), script.to_vec());
        sha
    }

    /// Whether a script with this identity is cached.
    pub fn exists(&self, sha: &str) -> bool {
        self.scripts.contains_key(&sha.to_ascii_lowercase())
    }

    /// Evaluate a previously loaded script by identity.
    pub fn eval_sha(&mut self, sha: &str, keys: &[Vec<u8>], argv: &[Vec<u8>]) -> Reply {
        let sha = sha.to_ascii_lowercase();
        match self.scripts.get(&sha).cloned() {
            Some(script) => self.eval_identified(&script, &sha, keys, argv),
            None => Reply::error("NOSCRIPT No matching script. Please use EVAL."),
        }
    }

    /// Drop every cached script.
    pub fn flush(&mut self) {
        self.scripts.clear();
    }

    fn eval_identified(
        &mut self,
        script: &[u8],
        sha: &str,
        keys: &[Vec<u8>],
        argv: &[Vec<u8>],
    ) -> Reply {
        let mut fields = keys.to_vec();
        fields.extend_from_slice(argv);
        let encoded = wire::encode_args(&fields);
        let reply = self.engine.eval_with_args(script, &encoded, keys.len());
        decorate_reply(reply, sha)
    }
}

impl std::fmt::Debug for ScriptRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptRunner")
            .field("cached_scripts", &self.scripts.len())
            .finish_non_exhaustive()
    }
}

/// Rewrite an error reply that carries the interpreter's `user_script:N:`
/// prefix into the Redis-exact decorated form; anything else passes
/// through unchanged.
pub fn decorate_reply(reply: Reply, sha: &str) -> Reply {
    match reply {
        Reply::Error(payload) => match std::str::from_utf8(&payload)
            .ok()
            .and_then(|message| decorate_message(message, sha))
        {
            Some(decorated) => Reply::Error(decorated.into_bytes()),
            None => Reply::Error(payload),
        },
        other => other,
    }
}

fn decorate_message(message: &str, sha: &str) -> Option<String> {
    let rest = message.strip_prefix("user_script:")?;
    let line_len = rest.chars().take_while(char::is_ascii_digit).count();
    if line_len == 0 || !rest[line_len..].starts_with(':') {
        return None;
    }
    let line = &rest[..line_len];
    Some(format!(
        "{message} script: {sha}, on @user_script:{line}."
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHA: &str = "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d";

    #[test]
    fn test_decorate_script_errors() {
        let reply = decorate_reply(
            Reply::error("user_script:2: attempt to call a nil value"),
            SHA,
        );
        assert_eq!(
            reply,
            Reply::error(format!(
                "user_script:2: attempt to call a nil value script: {SHA}, on @user_script:2."
            ))
        );
    }

    #[test]
    fn test_decorate_passes_other_errors_through() {
        for message in [
            "ERR boom",
            "user_script: no line number",
            "NOSCRIPT No matching script. Please use EVAL.",
        ] {
            assert_eq!(
                decorate_reply(Reply::error(message), SHA),
                Reply::error(message)
            );
        }
        assert_eq!(decorate_reply(Reply::Int(1), SHA), Reply::Int(1));
    }
}
