//! Redis-side companion libraries
//!
//! The four modules Redis scripts expect beyond the Lua standard library:
//! `cjson`, `cmsgpack`, `struct`, and `bit`. Each registers itself as a
//! global table at VM construction time.

pub mod bit;
pub mod cjson;
pub mod cmsgpack;
pub mod structlib;

use mlua::Lua;

/// Register every companion library on a freshly built VM.
pub fn register_all(lua: &Lua) -> mlua::Result<()> {
    cjson::register(lua)?;
    cmsgpack::register(lua)?;
    structlib::register(lua)?;
    bit::register(lua)?;
    Ok(())
}
