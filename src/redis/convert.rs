//! Lua value ↔ reply conversion
//!
//! One direction runs at script return (and for `redis.call` argument
//! vectors), the other when a host reply is handed back into the script.
//! Number formatting goes through Lua's own tostring coercion so the wire
//! sees Lua 5.1's `%.14g` forms rather than Rust's float formatting.

use crate::error::EngineError;
use crate::wire::Reply;
use mlua::{Lua, Value, Variadic};

/// Nesting bound for script return values. Deeper trees could only be
/// built by pathological scripts and would risk the host stack during the
/// recursive encode.
const MAX_REPLY_DEPTH: usize = 128;

/// Convert a script's returned value into a reply tree.
///
/// Follows Redis's conversion table: `true` is `Int(1)`, `false` is
/// `Null`, integral numbers are `Int`, other numbers are `Bulk` of their
/// Lua tostring form, and tables are statuses (`ok`), errors (`err`), or
/// sequences cut at the `#` boundary with non-sequence keys dropped.
pub fn lua_to_reply<'lua>(
    lua: &'lua Lua,
    value: Value<'lua>,
    depth: usize,
) -> Result<Reply, EngineError> {
    if depth > MAX_REPLY_DEPTH {
        return Err(EngineError::ReplyBytesExceeded);
    }

    match value {
        Value::Nil => Ok(Reply::Null),
        Value::Boolean(true) => Ok(Reply::Int(1)),
        Value::Boolean(false) => Ok(Reply::Null),
        Value::Integer(n) => Ok(Reply::Int(n)),
        Value::Number(n) => {
            if n.fract() == 0.0 && n >= i64::MIN as f64 && n <= i64::MAX as f64 {
                Ok(Reply::Int(n as i64))
            } else {
                Ok(Reply::Bulk(number_bytes(lua, n)?))
            }
        }
        Value::String(s) => Ok(Reply::Bulk(s.as_bytes().to_vec())),
        Value::Table(table) => {
            if let Value::String(ok) = table
                .raw_get::<_, Value>("ok")
                .map_err(EngineError::from_lua)?
            {
                return Ok(Reply::Status(ok.as_bytes().to_vec()));
            }
            if let Value::String(err) = table
                .raw_get::<_, Value>("err")
                .map_err(EngineError::from_lua)?
            {
                return Ok(Reply::Error(err.as_bytes().to_vec()));
            }

            let len = table.raw_len();
            let mut items = Vec::with_capacity(len);
            for i in 1..=len {
                let element: Value = table.raw_get(i).map_err(EngineError::from_lua)?;
                items.push(lua_to_reply(lua, element, depth + 1)?);
            }
            Ok(Reply::Array(items))
        }
        Value::Function(_)
        | Value::Thread(_)
        | Value::UserData(_)
        | Value::LightUserData(_)
        | Value::Error(_) => Err(EngineError::UnsupportedReturn),
    }
}

/// Convert a host reply into the Lua shape scripts expect.
///
/// `Error` replies become `{err = ...}` tables here; the caller decides
/// whether to raise them (`redis.call`) or hand them back (`redis.pcall`).
pub fn reply_to_lua<'lua>(lua: &'lua Lua, reply: &Reply) -> mlua::Result<Value<'lua>> {
    match reply {
        Reply::Null => Ok(Value::Nil),
        Reply::Int(n) => Ok(Value::Integer(*n)),
        Reply::Bulk(bytes) => Ok(Value::String(lua.create_string(bytes)?)),
        Reply::Status(bytes) => {
            let table = lua.create_table()?;
            table.raw_set("ok", lua.create_string(bytes)?)?;
            Ok(Value::Table(table))
        }
        Reply::Error(bytes) => {
            let table = lua.create_table()?;
            table.raw_set("err", lua.create_string(bytes)?)?;
            Ok(Value::Table(table))
        }
        Reply::Array(items) => {
            let table = lua.create_table()?;
            for (i, item) in items.iter().enumerate() {
                table.raw_set(i + 1, reply_to_lua(lua, item)?)?;
            }
            Ok(Value::Table(table))
        }
    }
}

/// Coerce the variadic arguments of `redis.call`/`redis.pcall` into the
/// byte vector handed to the host. Strings pass as raw bytes, numbers take
/// their Lua decimal form, booleans become `"1"`/`"0"`.
pub fn call_args<'lua>(
    lua: &'lua Lua,
    args: &Variadic<Value<'lua>>,
) -> mlua::Result<Vec<Vec<u8>>> {
    let mut out = Vec::with_capacity(args.len());
    for value in args.iter() {
        match value {
            Value::String(s) => out.push(s.as_bytes().to_vec()),
            Value::Integer(_) | Value::Number(_) => {
                let s = lua
                    .coerce_string(value.clone())?
                    .ok_or_else(invalid_call_argument)?;
                out.push(s.as_bytes().to_vec());
            }
            Value::Boolean(b) => out.push(if *b { b"1".to_vec() } else { b"0".to_vec() }),
            _ => return Err(invalid_call_argument()),
        }
    }
    Ok(out)
}

fn invalid_call_argument() -> mlua::Error {
    mlua::Error::RuntimeError("ERR invalid argument to redis.call".to_string())
}

fn number_bytes(lua: &Lua, n: f64) -> Result<Vec<u8>, EngineError> {
    let coerced = lua
        .coerce_string(Value::Number(n))
        .map_err(EngineError::from_lua)?
        .ok_or(EngineError::UnsupportedReturn)?;
    Ok(coerced.as_bytes().to_vec())
}

/// Build a 1-based sequence table of byte strings; used for `KEYS`/`ARGV`.
pub fn bytes_table<'lua>(lua: &'lua Lua, items: &[Vec<u8>]) -> mlua::Result<mlua::Table<'lua>> {
    let table = lua.create_table()?;
    for (i, bytes) in items.iter().enumerate() {
        table.raw_set(i + 1, lua.create_string(bytes)?)?;
    }
    Ok(table)
}
