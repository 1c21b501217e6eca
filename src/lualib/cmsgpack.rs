//! cmsgpack library - MessagePack packing for Lua scripts
//!
//! `pack` concatenates one MessagePack value per argument; `unpack` returns
//! every value in the buffer. Tables with a non-empty sequence part pack as
//! arrays, everything else as maps (an empty table is an empty map).
//! Valid-UTF-8 strings use the str format, other byte strings use bin.

use mlua::{Lua, MultiValue, Value, Variadic};

/// Register the `cmsgpack` global table.
pub fn register(lua: &Lua) -> mlua::Result<()> {
    let cmsgpack = lua.create_table()?;
    cmsgpack.set("pack", lua.create_function(cmsgpack_pack)?)?;
    cmsgpack.set("unpack", lua.create_function(cmsgpack_unpack)?)?;
    lua.globals().raw_set("cmsgpack", cmsgpack)
}

fn cmsgpack_pack<'lua>(
    lua: &'lua Lua,
    args: Variadic<Value<'lua>>,
) -> mlua::Result<mlua::String<'lua>> {
    let mut out = Vec::new();
    for value in args.iter() {
        let packed = lua_to_msgpack(value)?;
        rmpv::encode::write_value(&mut out, &packed)
            .map_err(|e| mlua::Error::RuntimeError(format!("cmsgpack: pack failed: {e}")))?;
    }
    lua.create_string(&out)
}

fn cmsgpack_unpack<'lua>(
    lua: &'lua Lua,
    data: mlua::String<'lua>,
) -> mlua::Result<MultiValue<'lua>> {
    let mut cursor = data.as_bytes();
    let mut values = Vec::new();
    while !cursor.is_empty() {
        let value = rmpv::decode::read_value(&mut cursor)
            .map_err(|_| mlua::Error::RuntimeError("Missing bytes in input.".to_string()))?;
        values.push(msgpack_to_lua(lua, &value)?);
    }
    Ok(MultiValue::from_vec(values))
}

fn lua_to_msgpack(value: &Value) -> mlua::Result<rmpv::Value> {
    match value {
        Value::Nil => Ok(rmpv::Value::Nil),
        Value::Boolean(b) => Ok(rmpv::Value::Boolean(*b)),
        Value::Integer(n) => Ok(rmpv::Value::from(*n)),
        Value::Number(n) => {
            if n.fract() == 0.0 && *n >= i64::MIN as f64 && *n <= i64::MAX as f64 {
                Ok(rmpv::Value::from(*n as i64))
            } else {
                Ok(rmpv::Value::F64(*n))
            }
        }
        Value::String(s) => match s.to_str() {
            Ok(text) => Ok(rmpv::Value::from(text)),
            Err(_) => Ok(rmpv::Value::Binary(s.as_bytes().to_vec())),
        },
        Value::Table(table) => {
            let len = table.raw_len();
            if len > 0 {
                let mut items = Vec::with_capacity(len);
                for i in 1..=len {
                    let element: Value = table.raw_get(i)?;
                    items.push(lua_to_msgpack(&element)?);
                }
                Ok(rmpv::Value::Array(items))
            } else {
                let mut entries = Vec::new();
                for pair in table.clone().pairs::<Value, Value>() {
                    let (key, element) = pair?;
                    entries.push((lua_to_msgpack(&key)?, lua_to_msgpack(&element)?));
                }
                Ok(rmpv::Value::Map(entries))
            }
        }
        other => Err(mlua::Error::RuntimeError(format!(
            "cmsgpack: unsupported type: {}",
            other.type_name()
        ))),
    }
}

fn msgpack_to_lua<'lua>(lua: &'lua Lua, value: &rmpv::Value) -> mlua::Result<Value<'lua>> {
    match value {
        rmpv::Value::Nil => Ok(Value::Nil),
        rmpv::Value::Boolean(b) => Ok(Value::Boolean(*b)),
        rmpv::Value::Integer(n) => match n.as_i64() {
            Some(i) => Ok(Value::Integer(i)),
            None => Ok(Value::Number(n.as_f64().unwrap_or(f64::NAN))),
        },
        rmpv::Value::F32(f) => Ok(Value::Number(f64::from(*f))),
        rmpv::Value::F64(f) => Ok(Value::Number(*f)),
        rmpv::Value::String(s) => Ok(Value::String(lua.create_string(s.as_bytes())?)),
        rmpv::Value::Binary(bytes) => Ok(Value::String(lua.create_string(bytes)?)),
        rmpv::Value::Array(items) => {
            let table = lua.create_table()?;
            for (i, item) in items.iter().enumerate() {
                table.raw_set(i + 1, msgpack_to_lua(lua, item)?)?;
            }
            Ok(Value::Table(table))
        }
        rmpv::Value::Map(entries) => {
            let table = lua.create_table()?;
            for (key, item) in entries {
                table.raw_set(msgpack_to_lua(lua, key)?, msgpack_to_lua(lua, item)?)?;
            }
            Ok(Value::Table(table))
        }
        rmpv::Value::Ext(_, _) => Err(mlua::Error::RuntimeError(
            "cmsgpack: ext types are not supported".to_string(),
        )),
    }
}
