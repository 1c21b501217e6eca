//! bit library - 32-bit bitwise operations for Lua scripts
//!
//! LuaJIT-style semantics: inputs are normalized modulo 2^32, results come
//! back as signed 32-bit numbers. Shift counts are masked to the low five
//! bits.

use mlua::{Lua, Variadic};

/// Register the `bit` global table.
pub fn register(lua: &Lua) -> mlua::Result<()> {
    let bit = lua.create_table()?;

    bit.set(
        "tobit",
        lua.create_function(|_, x: f64| Ok(norm(x) as i32 as i64))?,
    )?;
    bit.set(
        "bnot",
        lua.create_function(|_, x: f64| Ok(!norm(x) as i32 as i64))?,
    )?;
    bit.set("band", lua.create_function(|_, args: Variadic<f64>| fold(args, |a, b| a & b))?)?;
    bit.set("bor", lua.create_function(|_, args: Variadic<f64>| fold(args, |a, b| a | b))?)?;
    bit.set("bxor", lua.create_function(|_, args: Variadic<f64>| fold(args, |a, b| a ^ b))?)?;
    bit.set(
        "lshift",
        lua.create_function(|_, (x, n): (f64, f64)| Ok((norm(x) << shift(n)) as i32 as i64))?,
    )?;
    bit.set(
        "rshift",
        lua.create_function(|_, (x, n): (f64, f64)| Ok((norm(x) >> shift(n)) as i32 as i64))?,
    )?;
    bit.set(
        "arshift",
        lua.create_function(|_, (x, n): (f64, f64)| {
            Ok(((norm(x) as i32) >> shift(n)) as i64)
        })?,
    )?;
    bit.set(
        "rol",
        lua.create_function(|_, (x, n): (f64, f64)| {
            Ok(norm(x).rotate_left(shift(n)) as i32 as i64)
        })?,
    )?;
    bit.set(
        "ror",
        lua.create_function(|_, (x, n): (f64, f64)| {
            Ok(norm(x).rotate_right(shift(n)) as i32 as i64)
        })?,
    )?;
    bit.set(
        "bswap",
        lua.create_function(|_, x: f64| Ok(norm(x).swap_bytes() as i32 as i64))?,
    )?;
    bit.set(
        "tohex",
        lua.create_function(|_, (x, digits): (f64, Option<i64>)| Ok(tohex(norm(x), digits)))?,
    )?;

    lua.globals().raw_set("bit", bit)
}

/// Normalize a Lua number into the 32-bit domain.
fn norm(x: f64) -> u32 {
    if !x.is_finite() {
        return 0;
    }
    let wrapped = x % 4_294_967_296.0;
    let wrapped = if wrapped < 0.0 {
        wrapped + 4_294_967_296.0
    } else {
        wrapped
    };
    wrapped as u32
}

fn shift(n: f64) -> u32 {
    norm(n) & 31
}

fn fold(args: Variadic<f64>, op: impl Fn(u32, u32) -> u32) -> mlua::Result<i64> {
    let mut iter = args.iter();
    let first = iter.next().ok_or_else(|| {
        mlua::Error::RuntimeError("bad argument #1 (number expected)".to_string())
    })?;
    let mut acc = norm(*first);
    for x in iter {
        acc = op(acc, norm(*x));
    }
    Ok(acc as i32 as i64)
}

fn tohex(value: u32, digits: Option<i64>) -> String {
    let (upper, n) = match digits {
        Some(d) if d < 0 => (true, (-d) as usize),
        Some(d) => (false, d as usize),
        None => (false, 8),
    };
    let n = n.clamp(1, 8);
    let masked = if n == 8 {
        value
    } else {
        value & ((1u32 << (4 * n)) - 1)
    };
    if upper {
        format!("{masked:0n$X}", n = n)
    } else {
        format!("{masked:0n$x}", n = n)
    }
}
