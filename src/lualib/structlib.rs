//! struct library - binary packing for Lua scripts
//!
//! The format alphabet of the classic Lua struct library: `<` `>` `=` set
//! endianness, `b B h H i I l L` are integers (`iN`/`IN` take an explicit
//! byte width), `f` and `d` are floats, `s` is a zero-terminated string,
//! `cN` is a fixed-width string, `x` is a padding byte, and spaces are
//! ignored. `unpack` returns the parsed values followed by the 1-based
//! index of the first unread byte.

use mlua::{Lua, MultiValue, Value, Variadic};

/// Register the `struct` global table.
pub fn register(lua: &Lua) -> mlua::Result<()> {
    let st = lua.create_table()?;
    st.set("pack", lua.create_function(struct_pack)?)?;
    st.set("unpack", lua.create_function(struct_unpack)?)?;
    st.set("size", lua.create_function(struct_size)?)?;
    lua.globals().raw_set("struct", st)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endian {
    Little,
    Big,
}

/// One parsed format item
enum Item {
    Int { size: usize, signed: bool },
    Float,
    Double,
    /// Zero-terminated string
    Str,
    /// Fixed-width string
    Chars(usize),
    Padding,
    SetEndian(Endian),
}

fn runtime_error(message: impl Into<String>) -> mlua::Error {
    mlua::Error::RuntimeError(message.into())
}

/// Walk a format string, yielding items. The native endianness (`=`) is
/// little on every supported target.
fn parse_format(fmt: &str) -> mlua::Result<Vec<Item>> {
    let bytes = fmt.as_bytes();
    let mut items = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        i += 1;
        let item = match c {
            ' ' => continue,
            '<' | '=' => Item::SetEndian(Endian::Little),
            '>' => Item::SetEndian(Endian::Big),
            '!' => {
                // Alignment directive; fields are packed without padding
                i += count_digits(bytes, i);
                continue;
            }
            'b' => Item::Int { size: 1, signed: true },
            'B' => Item::Int { size: 1, signed: false },
            'h' => Item::Int { size: 2, signed: true },
            'H' => Item::Int { size: 2, signed: false },
            'l' => Item::Int { size: 8, signed: true },
            'L' => Item::Int { size: 8, signed: false },
            'i' | 'I' => {
                let digits = count_digits(bytes, i);
                let size = if digits == 0 {
                    4
                } else {
                    let n: usize = fmt[i..i + digits]
                        .parse()
                        .map_err(|_| runtime_error(format!("invalid format option '{c}'")))?;
                    i += digits;
                    n
                };
                if size == 0 || size > 8 {
                    return Err(runtime_error(format!("integral size {size} is out of limits")));
                }
                Item::Int { size, signed: c == 'i' }
            }
            'f' => Item::Float,
            'd' => Item::Double,
            's' => Item::Str,
            'c' => {
                let digits = count_digits(bytes, i);
                if digits == 0 {
                    return Err(runtime_error("missing size for format option 'c'"));
                }
                let n: usize = fmt[i..i + digits]
                    .parse()
                    .map_err(|_| runtime_error("missing size for format option 'c'"))?;
                i += digits;
                Item::Chars(n)
            }
            'x' => Item::Padding,
            other => return Err(runtime_error(format!("invalid format option '{other}'"))),
        };
        items.push(item);
    }
    Ok(items)
}

fn count_digits(bytes: &[u8], from: usize) -> usize {
    bytes[from..]
        .iter()
        .take_while(|b| b.is_ascii_digit())
        .count()
}

fn write_uint(out: &mut Vec<u8>, value: u64, size: usize, endian: Endian) {
    let le = value.to_le_bytes();
    match endian {
        Endian::Little => out.extend_from_slice(&le[..size]),
        Endian::Big => out.extend(le[..size].iter().rev()),
    }
}

fn read_uint(data: &[u8], size: usize, endian: Endian) -> u64 {
    let mut raw = [0u8; 8];
    match endian {
        Endian::Little => raw[..size].copy_from_slice(&data[..size]),
        Endian::Big => {
            for (i, byte) in data[..size].iter().enumerate() {
                raw[size - 1 - i] = *byte;
            }
        }
    }
    u64::from_le_bytes(raw)
}

fn sign_extend(value: u64, size: usize) -> i64 {
    if size >= 8 {
        return value as i64;
    }
    let shift = 64 - size * 8;
    ((value << shift) as i64) >> shift
}

fn arg_integer(value: &Value) -> mlua::Result<i64> {
    match value {
        Value::Integer(n) => Ok(*n),
        Value::Number(n) => Ok(*n as i64),
        _ => Err(runtime_error("bad argument to 'pack' (number expected)")),
    }
}

fn arg_number(value: &Value) -> mlua::Result<f64> {
    match value {
        Value::Integer(n) => Ok(*n as f64),
        Value::Number(n) => Ok(*n),
        _ => Err(runtime_error("bad argument to 'pack' (number expected)")),
    }
}

fn arg_bytes(value: &Value) -> mlua::Result<Vec<u8>> {
    match value {
        Value::String(s) => Ok(s.as_bytes().to_vec()),
        _ => Err(runtime_error("bad argument to 'pack' (string expected)")),
    }
}

fn struct_pack<'lua>(
    lua: &'lua Lua,
    (fmt, args): (String, Variadic<Value<'lua>>),
) -> mlua::Result<mlua::String<'lua>> {
    let mut endian = Endian::Little;
    let mut out = Vec::new();
    let mut next_arg = 0usize;
    let mut take = || {
        let value = args.get(next_arg).cloned();
        next_arg += 1;
        value.ok_or_else(|| runtime_error("bad argument to 'pack' (value expected)"))
    };

    for item in parse_format(&fmt)? {
        match item {
            Item::SetEndian(e) => endian = e,
            Item::Padding => out.push(0),
            Item::Int { size, .. } => {
                let n = arg_integer(&take()?)?;
                write_uint(&mut out, n as u64, size, endian);
            }
            Item::Float => {
                let n = arg_number(&take()?)? as f32;
                write_uint(&mut out, u64::from(n.to_bits()), 4, endian);
            }
            Item::Double => {
                let n = arg_number(&take()?)?;
                write_uint(&mut out, n.to_bits(), 8, endian);
            }
            Item::Str => {
                let bytes = arg_bytes(&take()?)?;
                out.extend_from_slice(&bytes);
                out.push(0);
            }
            Item::Chars(n) => {
                let bytes = arg_bytes(&take()?)?;
                if bytes.len() < n {
                    return Err(runtime_error("string too short"));
                }
                out.extend_from_slice(&bytes[..n]);
            }
        }
    }
    lua.create_string(&out)
}

fn struct_unpack<'lua>(
    lua: &'lua Lua,
    (fmt, data, init): (String, mlua::String<'lua>, Option<i64>),
) -> mlua::Result<MultiValue<'lua>> {
    let bytes = data.as_bytes();
    let mut endian = Endian::Little;
    let mut pos = match init {
        Some(p) if p >= 1 => (p - 1) as usize,
        Some(_) => return Err(runtime_error("bad argument to 'unpack' (position out of range)")),
        None => 0,
    };
    let mut values = Vec::new();

    let need = |pos: usize, len: usize, total: usize| -> mlua::Result<()> {
        if pos + len > total {
            Err(runtime_error("data string too short"))
        } else {
            Ok(())
        }
    };

    for item in parse_format(&fmt)? {
        match item {
            Item::SetEndian(e) => endian = e,
            Item::Padding => {
                need(pos, 1, bytes.len())?;
                pos += 1;
            }
            Item::Int { size, signed } => {
                need(pos, size, bytes.len())?;
                let raw = read_uint(&bytes[pos..], size, endian);
                pos += size;
                if signed {
                    values.push(Value::Integer(sign_extend(raw, size)));
                } else if raw <= i64::MAX as u64 {
                    values.push(Value::Integer(raw as i64));
                } else {
                    values.push(Value::Number(raw as f64));
                }
            }
            Item::Float => {
                need(pos, 4, bytes.len())?;
                let raw = read_uint(&bytes[pos..], 4, endian) as u32;
                pos += 4;
                values.push(Value::Number(f64::from(f32::from_bits(raw))));
            }
            Item::Double => {
                need(pos, 8, bytes.len())?;
                let raw = read_uint(&bytes[pos..], 8, endian);
                pos += 8;
                values.push(Value::Number(f64::from_bits(raw)));
            }
            Item::Str => {
                let terminator = bytes[pos..]
                    .iter()
                    .position(|b| *b == 0)
                    .ok_or_else(|| runtime_error("unfinished string for format 's'"))?;
                values.push(Value::String(
                    lua.create_string(&bytes[pos..pos + terminator])?,
                ));
                pos += terminator + 1;
            }
            Item::Chars(n) => {
                need(pos, n, bytes.len())?;
                values.push(Value::String(lua.create_string(&bytes[pos..pos + n])?));
                pos += n;
            }
        }
    }

    // Final value is the 1-based index of the first unread byte
    values.push(Value::Integer(pos as i64 + 1));
    Ok(MultiValue::from_vec(values))
}

fn struct_size(_lua: &Lua, fmt: String) -> mlua::Result<i64> {
    let mut total = 0i64;
    for item in parse_format(&fmt)? {
        total += match item {
            Item::SetEndian(_) => 0,
            Item::Padding => 1,
            Item::Int { size, .. } => size as i64,
            Item::Float => 4,
            Item::Double => 8,
            Item::Chars(n) => n as i64,
            Item::Str => return Err(runtime_error("variable-size format in struct.size")),
        };
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vm() -> Lua {
        let lua = Lua::new();
        register(&lua).unwrap();
        lua
    }

    #[test]
    fn test_pack_little_and_big_endian() {
        let lua = vm();
        let packed: mlua::String = lua.load("return struct.pack('<i4', 1)").eval().unwrap();
        assert_eq!(packed.as_bytes(), &[1, 0, 0, 0]);
        let packed: mlua::String = lua.load("return struct.pack('>i4', 1)").eval().unwrap();
        assert_eq!(packed.as_bytes(), &[0, 0, 0, 1]);
        let packed: mlua::String = lua.load("return struct.pack('>h', -2)").eval().unwrap();
        assert_eq!(packed.as_bytes(), &[0xff, 0xfe]);
    }

    #[test]
    fn test_unpack_returns_values_and_position() {
        let lua = vm();
        let (a, b, pos): (i64, i64, i64) = lua
            .load("return struct.unpack('<i4i4', struct.pack('<i4i4', 7, -9))")
            .eval()
            .unwrap();
        assert_eq!((a, b, pos), (7, -9, 9));
    }

    #[test]
    fn test_strings() {
        let lua = vm();
        let (s, pos): (String, i64) = lua
            .load("return struct.unpack('s', struct.pack('s', 'abc'))")
            .eval()
            .unwrap();
        assert_eq!((s.as_str(), pos), ("abc", 5));

        let (s, pos): (String, i64) = lua
            .load("return struct.unpack('c2', 'xyz')")
            .eval()
            .unwrap();
        assert_eq!((s.as_str(), pos), ("xy", 3));
    }

    #[test]
    fn test_doubles_roundtrip() {
        let lua = vm();
        let (d, _pos): (f64, i64) = lua
            .load("return struct.unpack('>d', struct.pack('>d', 2.5))")
            .eval()
            .unwrap();
        assert_eq!(d, 2.5);
    }

    #[test]
    fn test_size() {
        let lua = vm();
        let n: i64 = lua.load("return struct.size('>i4hc3x')").eval().unwrap();
        assert_eq!(n, 10);
        let err = lua.load("return struct.size('s')").eval::<i64>().unwrap_err();
        assert!(err.to_string().contains("variable-size format"));
    }

    #[test]
    fn test_invalid_option() {
        let lua = vm();
        let err = lua
            .load("return struct.pack('q', 1)")
            .eval::<mlua::String>()
            .unwrap_err();
        assert!(err.to_string().contains("invalid format option 'q'"));
    }

    #[test]
    fn test_unpack_short_data() {
        let lua = vm();
        let err = lua
            .load("return struct.unpack('i4', 'ab')")
            .eval::<Value>()
            .unwrap_err();
        assert!(err.to_string().contains("data string too short"));
    }
}
