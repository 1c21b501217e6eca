//! Redis API bridge
//!
//! Installs the `redis` global table in the VM and routes its operations
//! across the host seam: `call`/`pcall` marshal their arguments, invoke the
//! host, and decode the reply back into Lua shapes; `log` and `sha1hex`
//! forward to the host; `status_reply`/`error_reply` build the singleton
//! tables; `setresp` records the RESP mode and nothing more.

pub mod convert;

use crate::host::{LogLevel, RedisHost};
use mlua::{Lua, Table, Value, Variadic};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Install the `redis` table into the VM's globals.
pub fn install(lua: &Lua, host: Arc<dyn RedisHost>, resp: Arc<AtomicU8>) -> mlua::Result<()> {
    let redis = lua.create_table()?;

    {
        let host = Arc::clone(&host);
        let call = lua.create_function(move |lua, args: Variadic<Value>| {
            if args.is_empty() {
                return Err(mlua::Error::RuntimeError(
                    "redis.call requires at least one argument".to_string(),
                ));
            }
            let argv = convert::call_args(lua, &args)?;
            let reply = host
                .call(&argv)
                .map_err(|err| mlua::Error::RuntimeError(err.0))?;
            if let crate::wire::Reply::Error(payload) = &reply {
                return Err(mlua::Error::RuntimeError(
                    String::from_utf8_lossy(payload).into_owned(),
                ));
            }
            convert::reply_to_lua(lua, &reply)
        })?;
        redis.set("call", call)?;
    }

    {
        let host = Arc::clone(&host);
        let pcall = lua.create_function(move |lua, args: Variadic<Value>| {
            if args.is_empty() {
                return Err(mlua::Error::RuntimeError(
                    "redis.pcall requires at least one argument".to_string(),
                ));
            }
            // Argument marshalling failures still raise: the call never
            // reached the host, so there is no reply to wrap.
            let argv = convert::call_args(lua, &args)?;
            let reply = host.pcall(&argv);
            convert::reply_to_lua(lua, &reply)
        })?;
        redis.set("pcall", pcall)?;
    }

    {
        let host = Arc::clone(&host);
        let log = lua.create_function(move |lua, (level, message): (Value, Value)| {
            let level = match level {
                Value::Integer(n) => n,
                Value::Number(n) if n.fract() == 0.0 => n as i64,
                _ => {
                    return Err(mlua::Error::RuntimeError(
                        "redis.log level must be a number".to_string(),
                    ))
                }
            };
            let level = LogLevel::from_i64(level).ok_or_else(|| {
                mlua::Error::RuntimeError("Invalid debug level.".to_string())
            })?;
            let message = lua.coerce_string(message)?.ok_or_else(|| {
                mlua::Error::RuntimeError(
                    "redis.log requires level and message arguments".to_string(),
                )
            })?;
            host.log(level, message.as_bytes());
            Ok(())
        })?;
        redis.set("log", log)?;
    }

    {
        let host = Arc::clone(&host);
        let sha1hex = lua.create_function(move |lua, value: Value| {
            let input = lua.coerce_string(value)?.ok_or_else(|| {
                mlua::Error::RuntimeError("wrong number or type of arguments".to_string())
            })?;
            let digest = host.sha1hex(input.as_bytes());
            lua.create_string(digest.as_bytes())
        })?;
        redis.set("sha1hex", sha1hex)?;
    }

    redis.set("status_reply", singleton_reply(lua, "ok")?)?;
    redis.set("error_reply", singleton_reply(lua, "err")?)?;

    {
        let resp = Arc::clone(&resp);
        let setresp = lua.create_function(move |_, value: Value| {
            let version = match value {
                Value::Integer(n) => n,
                Value::Number(n) if n.fract() == 0.0 => n as i64,
                _ => 0,
            };
            if version != 2 && version != 3 {
                return Err(mlua::Error::RuntimeError(
                    "RESP version must be 2 or 3".to_string(),
                ));
            }
            let previous = resp.swap(version as u8, Ordering::Relaxed);
            Ok(previous as i64)
        })?;
        redis.set("setresp", setresp)?;
    }

    for (name, value) in [
        ("LOG_DEBUG", LogLevel::Debug),
        ("LOG_VERBOSE", LogLevel::Verbose),
        ("LOG_NOTICE", LogLevel::Notice),
        ("LOG_WARNING", LogLevel::Warning),
    ] {
        redis.set(name, value.as_i64())?;
    }

    lua.globals().raw_set("redis", redis)
}

/// Build `redis.status_reply` / `redis.error_reply`: one string argument in,
/// a `{field = s}` table out.
fn singleton_reply<'lua>(lua: &'lua Lua, field: &'static str) -> mlua::Result<mlua::Function<'lua>> {
    lua.create_function(move |lua, value: Value| {
        let message = match value {
            Value::String(s) => s,
            _ => {
                return Err(mlua::Error::RuntimeError(
                    "wrong number or type of arguments".to_string(),
                ))
            }
        };
        let table: Table = lua.create_table()?;
        table.raw_set(field, message)?;
        Ok(table)
    })
}
