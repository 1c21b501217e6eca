//! cjson library - JSON encoding/decoding for Lua scripts
//!
//! Tables with a non-empty sequence part encode as JSON arrays cut at the
//! `#` boundary; every other table encodes as an object whose keys must be
//! strings or numbers. JSON `null` decodes to `nil`. Error messages follow
//! the cjson originals so scripts that match on them keep working.

use mlua::{Lua, Value};

/// Nesting bound shared by encode and decode, matching cjson's default.
const MAX_DEPTH: usize = 1000;

/// Register the `cjson` global table.
pub fn register(lua: &Lua) -> mlua::Result<()> {
    let cjson = lua.create_table()?;
    cjson.set("encode", lua.create_function(cjson_encode)?)?;
    cjson.set("decode", lua.create_function(cjson_decode)?)?;
    lua.globals().raw_set("cjson", cjson)
}

fn cjson_encode<'lua>(_lua: &'lua Lua, value: Value<'lua>) -> mlua::Result<String> {
    let json = lua_to_json(value, 0)?;
    serde_json::to_string(&json)
        .map_err(|e| mlua::Error::RuntimeError(format!("Cannot serialise value: {e}")))
}

fn cjson_decode<'lua>(lua: &'lua Lua, text: mlua::String<'lua>) -> mlua::Result<Value<'lua>> {
    let json: serde_json::Value = serde_json::from_slice(text.as_bytes()).map_err(|e| {
        mlua::Error::RuntimeError(format!(
            "Expected value but found invalid token at character {}",
            e.column()
        ))
    })?;
    json_to_lua(lua, &json)
}

fn lua_to_json(value: Value, depth: usize) -> mlua::Result<serde_json::Value> {
    if depth > MAX_DEPTH {
        return Err(mlua::Error::RuntimeError(format!(
            "Cannot serialise, excessive nesting ({depth})"
        )));
    }

    match value {
        Value::Nil => Ok(serde_json::Value::Null),
        Value::Boolean(b) => Ok(serde_json::Value::Bool(b)),
        Value::Integer(n) => Ok(serde_json::Value::from(n)),
        Value::Number(n) => serde_json::Number::from_f64(n)
            .map(serde_json::Value::Number)
            .ok_or_else(|| {
                mlua::Error::RuntimeError(
                    "Cannot serialise number: must not be NaN or Inf".to_string(),
                )
            }),
        Value::String(s) => match s.to_str() {
            Ok(text) => Ok(serde_json::Value::String(text.to_string())),
            Err(_) => Err(mlua::Error::RuntimeError(
                "Cannot serialise string: invalid UTF-8".to_string(),
            )),
        },
        Value::Table(table) => {
            let len = table.raw_len();
            if len > 0 {
                let mut items = Vec::with_capacity(len);
                for i in 1..=len {
                    let element: Value = table.raw_get(i)?;
                    items.push(lua_to_json(element, depth + 1)?);
                }
                Ok(serde_json::Value::Array(items))
            } else {
                let mut object = serde_json::Map::new();
                for pair in table.pairs::<Value, Value>() {
                    let (key, element) = pair?;
                    let key = match key {
                        Value::String(s) => s
                            .to_str()
                            .map(str::to_string)
                            .map_err(|_| {
                                mlua::Error::RuntimeError(
                                    "Cannot serialise string: invalid UTF-8".to_string(),
                                )
                            })?,
                        Value::Integer(n) => n.to_string(),
                        Value::Number(n) => {
                            if n.fract() == 0.0 {
                                (n as i64).to_string()
                            } else {
                                n.to_string()
                            }
                        }
                        other => {
                            return Err(mlua::Error::RuntimeError(format!(
                                "Cannot serialise {}: table key must be a number or string",
                                other.type_name()
                            )))
                        }
                    };
                    object.insert(key, lua_to_json(element, depth + 1)?);
                }
                Ok(serde_json::Value::Object(object))
            }
        }
        other => Err(mlua::Error::RuntimeError(format!(
            "Cannot serialise {}: type not supported",
            other.type_name()
        ))),
    }
}

fn json_to_lua<'lua>(lua: &'lua Lua, json: &serde_json::Value) -> mlua::Result<Value<'lua>> {
    match json {
        serde_json::Value::Null => Ok(Value::Nil),
        serde_json::Value::Bool(b) => Ok(Value::Boolean(*b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::Integer(i))
            } else {
                // u64 beyond i64::MAX, or a float
                Ok(Value::Number(n.as_f64().unwrap_or(f64::NAN)))
            }
        }
        serde_json::Value::String(s) => Ok(Value::String(lua.create_string(s)?)),
        serde_json::Value::Array(items) => {
            let table = lua.create_table()?;
            for (i, item) in items.iter().enumerate() {
                table.raw_set(i + 1, json_to_lua(lua, item)?)?;
            }
            Ok(Value::Table(table))
        }
        serde_json::Value::Object(entries) => {
            let table = lua.create_table()?;
            for (key, item) in entries {
                table.raw_set(key.as_str(), json_to_lua(lua, item)?)?;
            }
            Ok(Value::Table(table))
        }
    }
}
