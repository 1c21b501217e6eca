//! Error types for Crucible
//!
//! Every failure inside the engine is surfaced to the host as an `Error`
//! reply; nothing unwinds past an entrypoint. The `Display` form of each
//! variant is the exact payload the host will see, so the messages here
//! follow Redis's error conventions.

use thiserror::Error;

/// Type alias for Results throughout Crucible
pub type Result<T> = std::result::Result<T, EngineError>;

/// Main error type for engine operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The encoded KEYS/ARGV buffer was truncated or carried a bad length
    #[error("ERR invalid KEYS/ARGV encoding")]
    InvalidArgEncoding,

    /// The encoded KEYS/ARGV buffer is larger than the configured cap
    #[error("ERR KEYS/ARGV exceeds configured limit")]
    ArgBytesExceeded,

    /// The key split point lies beyond the decoded argument count
    #[error("ERR Number of keys can't be greater than number of args")]
    TooManyKeys,

    /// The encoded reply is larger than the configured cap
    #[error("ERR reply exceeds configured limit")]
    ReplyBytesExceeded,

    /// The script returned a function, userdata, or thread
    #[error("ERR unsupported Lua return type")]
    UnsupportedReturn,

    /// Script load or runtime failure; the message is the interpreter's
    /// diagnostic, verbatim
    #[error("{0}")]
    Script(String),

    /// VM construction failed; never surfaced as a reply
    #[error("failed to initialize Lua state: {0}")]
    Init(String),
}

impl EngineError {
    /// Classify an interpreter error, keeping the diagnostic text the host
    /// expects and dropping the traceback mlua appends to script errors.
    pub fn from_lua(err: mlua::Error) -> Self {
        Self::from_lua_ref(&err)
    }

    fn from_lua_ref(err: &mlua::Error) -> Self {
        match err {
            // Callback errors wrap the original cause raised inside a Rust
            // function (host calls, the fuel hook); the root message is the
            // one the script author should see.
            mlua::Error::CallbackError { cause, .. } => Self::from_lua_ref(cause),
            mlua::Error::RuntimeError(message) => Self::Script(strip_traceback(message)),
            mlua::Error::SyntaxError { message, .. } => Self::Script(strip_traceback(message)),
            mlua::Error::MemoryError(_) => Self::Script("ERR script memory limit reached".to_string()),
            other => Self::Script(strip_traceback(&other.to_string())),
        }
    }

    /// The reply this error surfaces as.
    pub fn into_reply(self) -> crate::wire::Reply {
        crate::wire::Reply::error(self.to_string())
    }
}

/// Drop the `stack traceback:` section mlua's message handler appends to
/// runtime errors. The diagnostic itself may legitimately contain newlines
/// (`error("a\nb")`), so only the traceback suffix is removed.
fn strip_traceback(message: &str) -> String {
    match message.split("\nstack traceback:").next() {
        Some(first) => first.trim_end().to_string(),
        None => message.to_string(),
    }
}
