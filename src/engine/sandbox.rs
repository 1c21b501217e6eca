//! Script sandbox
//!
//! Two layers keep scripts deterministic and contained: the VM is built
//! with only the whitelisted standard libraries, and a scrub pass removes
//! the loader entrypoints the base library carries plus the randomness in
//! `math`. After `apply`, scripts have no filesystem, network, clock,
//! environment, module-loading, debug, or randomness access.

use crate::host::{LogLevel, RedisHost};
use mlua::{Lua, StdLib, Value, Variadic};
use std::sync::Arc;

/// Libraries opened in the VM: base plus `table`, `string`, `math`.
/// Everything else (`io`, `os`, `debug`, `package`, `coroutine`) is never
/// loaded at all.
pub fn whitelist() -> StdLib {
    StdLib::TABLE | StdLib::STRING | StdLib::MATH
}

/// Globals cleared after open. The base library contributes the file
/// loaders; the rest are cleared whether or not their library was loaded.
const SCRUBBED_GLOBALS: &[&str] = &[
    "io",
    "os",
    "debug",
    "package",
    "require",
    "dofile",
    "loadfile",
];

/// Apply the scrub pass to a freshly built VM.
pub fn apply(lua: &Lua) -> mlua::Result<()> {
    let globals = lua.globals();

    for name in SCRUBBED_GLOBALS {
        globals.raw_set(*name, Value::Nil)?;
    }

    // Determinism: scripts may not draw randomness.
    if let Ok(Value::Table(math)) = globals.raw_get::<_, Value>("math") {
        math.raw_set("random", Value::Nil)?;
        math.raw_set("randomseed", Value::Nil)?;
    }

    Ok(())
}

/// Replace `print` with a shim that writes through the host log at NOTICE
/// level, matching how Redis surfaces script prints.
pub fn route_print(lua: &Lua, host: Arc<dyn RedisHost>) -> mlua::Result<()> {
    let print = lua.create_function(move |lua, args: Variadic<Value>| {
        let mut parts = Vec::with_capacity(args.len());
        for value in args.iter() {
            let text = match lua.coerce_string(value.clone())? {
                Some(s) => String::from_utf8_lossy(s.as_bytes()).into_owned(),
                None => value.type_name().to_string(),
            };
            parts.push(text);
        }
        host.log(LogLevel::Notice, parts.join("\t").as_bytes());
        Ok(())
    })?;
    lua.globals().raw_set("print", print)
}
