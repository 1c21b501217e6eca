//! C-style ABI surface
//!
//! A versioned, pointer+length export surface over a thread-local engine
//! singleton, for embedding the interpreter as a linear-memory artifact.
//! On `wasm32` the raw `#[no_mangle]` wrappers are emitted and the host
//! imports are declared; on native targets the same entrypoints are exposed
//! as safe Rust functions (the raw symbol names would collide with libc).
//!
//! Ownership follows the producer-owns rule: the host allocates script and
//! argument buffers through [`alloc`] and frees them; reply buffers are
//! produced by the engine, registered in the same allocation registry, and
//! released by the host through the same [`free`].

use crate::engine::{Limits, ScriptEngine};
use crate::host::RedisHost;
use crate::wire::{self, Reply};
use lazy_static::lazy_static;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::error;

/// Bumped on any incompatible change to reply tags, field widths, or
/// export signatures.
pub const ABI_VERSION: i32 = 1;

thread_local! {
    static ENGINE: RefCell<Option<ScriptEngine>> = RefCell::new(None);
    static HOST: RefCell<Option<Arc<dyn RedisHost>>> = RefCell::new(None);
    static LIMITS: RefCell<Limits> = RefCell::new(Limits::default());
}

lazy_static! {
    /// ptr → length of every live buffer handed across the boundary
    static ref ALLOCATIONS: Mutex<HashMap<usize, usize>> = Mutex::new(HashMap::new());
}

/// The ABI version constant, as an export.
pub fn abi_version() -> i32 {
    ABI_VERSION
}

/// Select the host behind subsequent `init`/`reset` calls. Without one,
/// `init` falls back to the target's default: the wasm import shims on
/// `wasm32`, the standalone [`NullHost`] elsewhere.
pub fn set_host(host: Arc<dyn RedisHost>) {
    HOST.with(|cell| *cell.borrow_mut() = Some(host));
}

fn current_host() -> Arc<dyn RedisHost> {
    if let Some(host) = HOST.with(|cell| cell.borrow().clone()) {
        return host;
    }
    default_host()
}

#[cfg(target_arch = "wasm32")]
fn default_host() -> Arc<dyn RedisHost> {
    Arc::new(imports::WasmImportHost)
}

#[cfg(not(target_arch = "wasm32"))]
fn default_host() -> Arc<dyn RedisHost> {
    Arc::new(crate::host::NullHost)
}

/// Build (or rebuild) the engine. Returns 0 on success.
pub fn init() -> i32 {
    let limits = LIMITS.with(|cell| *cell.borrow());
    match ScriptEngine::with_limits(current_host(), limits) {
        Ok(engine) => ENGINE.with(|cell| match cell.try_borrow_mut() {
            Ok(mut slot) => {
                *slot = Some(engine);
                0
            }
            // init from inside an eval callback
            Err(_) => 1,
        }),
        Err(err) => {
            error!(target: "crucible::abi", "init failed: {err}");
            1
        }
    }
}

/// Recreate the VM. Valid only after a prior `init`; returns 0 on success.
pub fn reset() -> i32 {
    ENGINE.with(|cell| {
        let mut slot = match cell.try_borrow_mut() {
            Ok(slot) => slot,
            // reset from inside an eval callback
            Err(_) => return 1,
        };
        match slot.as_mut() {
            Some(engine) => match engine.reset() {
                Ok(()) => 0,
                Err(err) => {
                    error!(target: "crucible::abi", "reset failed: {err}");
                    1
                }
            },
            None => 1,
        }
    })
}

/// Configure caps; zero means unenforced. Takes effect on subsequent evals.
pub fn set_limits(max_fuel: u64, max_reply_bytes: u64, max_arg_bytes: u64) {
    let limits = Limits {
        max_fuel,
        max_reply_bytes,
        max_arg_bytes,
    };
    LIMITS.with(|cell| *cell.borrow_mut() = limits);
}

/// Evaluate a script with empty KEYS/ARGV; returns the encoded reply.
pub fn eval(script: &[u8]) -> Vec<u8> {
    with_engine(|engine| engine.eval_encoded(script))
}

/// Evaluate a script against an encoded argument array.
pub fn eval_with_args(script: &[u8], args: &[u8], keys_count: u32) -> Vec<u8> {
    with_engine(|engine| engine.eval_with_args_encoded(script, args, keys_count as usize))
}

fn with_engine(f: impl FnOnce(&mut ScriptEngine) -> Vec<u8>) -> Vec<u8> {
    // The recorded limits are authoritative; sync them in case set_limits
    // ran since the engine was built.
    let limits = LIMITS.with(|cell| *cell.borrow());
    ENGINE.with(|cell| match cell.try_borrow_mut() {
        Ok(mut slot) => match slot.as_mut() {
            Some(engine) => {
                engine.set_limits(limits);
                f(engine)
            }
            None => encoded_error("ERR engine not initialized"),
        },
        // A host callback re-entered the engine mid-eval.
        Err(_) => encoded_error("ERR reentrant eval not permitted"),
    })
}

fn encoded_error(message: &str) -> Vec<u8> {
    wire::encode_reply(&Reply::error(message))
}

/// Allocate a zeroed, registry-tracked buffer.
pub fn alloc(size: u32) -> *mut u8 {
    let boxed = vec![0u8; size as usize].into_boxed_slice();
    let len = boxed.len();
    let ptr = Box::into_raw(boxed) as *mut u8;
    allocations().insert(ptr as usize, len);
    ptr
}

/// Free a buffer allocated by either side through this registry. Unknown
/// pointers are ignored rather than corrupting the heap.
pub fn free(ptr: *mut u8) {
    if ptr.is_null() {
        return;
    }
    if let Some(len) = allocations().remove(&(ptr as usize)) {
        let slice = std::ptr::slice_from_raw_parts_mut(ptr, len);
        // Reconstructs the exact Box produced by alloc/publish.
        drop(unsafe { Box::from_raw(slice) });
    }
}

/// Hand a produced buffer to the caller: registry-tracked, released via
/// [`free`]. Returns the pointer and length.
pub fn publish(bytes: Vec<u8>) -> (*mut u8, usize) {
    let boxed = bytes.into_boxed_slice();
    let len = boxed.len();
    let ptr = Box::into_raw(boxed) as *mut u8;
    allocations().insert(ptr as usize, len);
    (ptr, len)
}

fn allocations() -> std::sync::MutexGuard<'static, HashMap<usize, usize>> {
    ALLOCATIONS.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Number of live registry-tracked buffers; accounting aid for hosts.
pub fn live_allocations() -> usize {
    allocations().len()
}

/// Raw `#[no_mangle]` exports, emitted only for the linear-memory target.
#[cfg(target_arch = "wasm32")]
pub mod exports {
    use crate::wire::PtrLen;

    fn publish_packed(bytes: Vec<u8>) -> u64 {
        let (ptr, len) = super::publish(bytes);
        PtrLen::new(ptr as u32, len as u32).packed()
    }

    #[no_mangle]
    pub extern "C" fn init() -> i32 {
        super::init()
    }

    #[no_mangle]
    pub extern "C" fn reset() -> i32 {
        super::reset()
    }

    #[no_mangle]
    pub extern "C" fn abi_version() -> i32 {
        super::abi_version()
    }

    #[no_mangle]
    pub extern "C" fn set_limits(max_fuel: u64, max_reply_bytes: u64, max_arg_bytes: u64) {
        super::set_limits(max_fuel, max_reply_bytes, max_arg_bytes);
    }

    /// # Safety
    /// `ptr`/`len` must describe a live buffer in linear memory.
    #[no_mangle]
    pub unsafe extern "C" fn eval(ptr: *const u8, len: u32) -> u64 {
        let script = std::slice::from_raw_parts(ptr, len as usize);
        publish_packed(super::eval(script))
    }

    /// # Safety
    /// Both pointer/length pairs must describe live buffers in linear memory.
    #[no_mangle]
    pub unsafe extern "C" fn eval_with_args(
        script_ptr: *const u8,
        script_len: u32,
        args_ptr: *const u8,
        args_len: u32,
        keys_count: u32,
    ) -> u64 {
        let script = std::slice::from_raw_parts(script_ptr, script_len as usize);
        let args = std::slice::from_raw_parts(args_ptr, args_len as usize);
        publish_packed(super::eval_with_args(script, args, keys_count))
    }

    #[no_mangle]
    pub extern "C" fn alloc(size: u32) -> *mut u8 {
        super::alloc(size)
    }

    #[no_mangle]
    pub extern "C" fn free(ptr: *mut u8) {
        super::free(ptr)
    }
}

/// Host import declarations and the host built on them, for the
/// linear-memory target.
#[cfg(target_arch = "wasm32")]
pub mod imports {
    use crate::host::{decode_host_reply, HostError, LogLevel, RedisHost};
    use crate::wire::{self, PtrLen, Reply};

    #[link(wasm_import_module = "env")]
    extern "C" {
        fn redis_call(ptr: *const u8, len: u32) -> u64;
        fn redis_pcall(ptr: *const u8, len: u32) -> u64;
        fn redis_log(level: i32, ptr: *const u8, len: u32);
        fn sha1hex(ptr: *const u8, len: u32) -> u64;
    }

    /// Routes the host seam across the wasm import boundary.
    pub struct WasmImportHost;

    impl RedisHost for WasmImportHost {
        fn call(&self, args: &[Vec<u8>]) -> Result<Reply, HostError> {
            let encoded = wire::encode_args(args);
            let packed = unsafe { redis_call(encoded.as_ptr(), encoded.len() as u32) };
            Ok(take_reply(packed))
        }

        fn pcall(&self, args: &[Vec<u8>]) -> Reply {
            let encoded = wire::encode_args(args);
            let packed = unsafe { redis_pcall(encoded.as_ptr(), encoded.len() as u32) };
            take_reply(packed)
        }

        fn log(&self, level: LogLevel, message: &[u8]) {
            unsafe { redis_log(level.as_i64() as i32, message.as_ptr(), message.len() as u32) };
        }

        fn sha1hex(&self, data: &[u8]) -> String {
            let packed = unsafe { sha1hex(data.as_ptr(), data.len() as u32) };
            let pair = PtrLen::from_packed(packed);
            if pair.ptr == 0 || pair.len == 0 {
                return String::new();
            }
            let bytes =
                unsafe { std::slice::from_raw_parts(pair.ptr as *const u8, pair.len as usize) };
            let digest = String::from_utf8_lossy(bytes).into_owned();
            super::free(pair.ptr as *mut u8);
            digest
        }
    }

    /// Decode an owned reply buffer produced by a host import, then release
    /// it back through the shared allocator.
    fn take_reply(packed: u64) -> Reply {
        let pair = PtrLen::from_packed(packed);
        if pair.ptr == 0 || pair.len == 0 {
            return Reply::error("ERR empty reply from host");
        }
        let bytes = unsafe { std::slice::from_raw_parts(pair.ptr as *const u8, pair.len as usize) };
        let reply = decode_host_reply(bytes);
        super::free(pair.ptr as *mut u8);
        reply
    }
}
