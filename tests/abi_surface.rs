//! Tests for the C-style ABI surface
//!
//! The engine behind these entrypoints is thread-local and each test runs
//! on its own thread, so every test sets up its own engine with `init`.

mod common;

use common::MemoryHost;
use crucible::abi;
use crucible::wire::{decode_reply, encode_args, Reply};
use std::sync::Arc;

#[test]
fn test_abi_version_constant() {
    assert_eq!(abi::abi_version(), abi::ABI_VERSION);
    assert_eq!(abi::ABI_VERSION, 1);
}

#[test]
fn test_eval_requires_init() {
    let reply = decode_reply(&abi::eval(b"return 1")).unwrap();
    assert_eq!(reply, Reply::error("ERR engine not initialized"));
    assert_eq!(abi::reset(), 1);
}

#[test]
fn test_init_eval_reset_cycle() {
    abi::set_host(Arc::new(MemoryHost::new()));
    assert_eq!(abi::init(), 0);

    let reply = decode_reply(&abi::eval(b"return 1+1")).unwrap();
    assert_eq!(reply, Reply::Int(2));

    let reply = decode_reply(&abi::eval(b"return redis.call('PING')")).unwrap();
    assert_eq!(reply, Reply::status("PONG"));

    // State survives until reset
    abi::eval(b"marker = 'here'");
    assert_eq!(
        decode_reply(&abi::eval(b"return marker")).unwrap(),
        Reply::bulk("here")
    );
    assert_eq!(abi::reset(), 0);
    assert_eq!(
        decode_reply(&abi::eval(b"return marker")).unwrap(),
        Reply::Null
    );
}

#[test]
fn test_eval_with_args_and_limits() {
    abi::set_host(Arc::new(MemoryHost::new()));
    assert_eq!(abi::init(), 0);
    abi::set_limits(0, 0, 4);

    let args = encode_args(&[b"a".to_vec(), b"b".to_vec()]);
    let reply = decode_reply(&abi::eval_with_args(b"return 1", &args, 1)).unwrap();
    assert_eq!(reply, Reply::error("ERR KEYS/ARGV exceeds configured limit"));

    abi::set_limits(0, 0, 0);
    let reply = decode_reply(&abi::eval_with_args(b"return KEYS[1]", &args, 1)).unwrap();
    assert_eq!(reply, Reply::bulk("a"));

    let reply = decode_reply(&abi::eval_with_args(b"return 1", &[0xff], 0)).unwrap();
    assert_eq!(reply, Reply::error("ERR invalid KEYS/ARGV encoding"));
}

#[test]
fn test_limits_set_before_init_apply() {
    abi::set_host(Arc::new(MemoryHost::new()));
    abi::set_limits(100_000, 0, 0);
    assert_eq!(abi::init(), 0);

    let reply = decode_reply(&abi::eval(b"while true do end")).unwrap();
    assert_eq!(reply, Reply::error("Script killed by fuel limit"));
}

#[test]
fn test_reentrant_eval_is_refused() {
    // A host whose callback re-enters the engine: the inner call must be
    // refused instead of aliasing the VM.
    abi::set_host(Arc::new(crucible::FnHost::new(|_args| {
        abi::eval(b"return 'inner'")
    })));
    assert_eq!(abi::init(), 0);

    let reply = decode_reply(&abi::eval(b"return redis.pcall('ANY')")).unwrap();
    assert_eq!(reply, Reply::error("ERR reentrant eval not permitted"));
}

#[test]
fn test_alloc_free_roundtrip() {
    let ptr = abi::alloc(16);
    assert!(!ptr.is_null());
    // The buffer is zeroed and writable
    unsafe {
        assert_eq!(*ptr, 0);
        std::ptr::write(ptr, 0xaa);
        assert_eq!(*ptr, 0xaa);
    }
    abi::free(ptr);

    // Reply buffers share the registry and the free primitive
    let (reply_ptr, len) = abi::publish(encode_args(&[]));
    assert_eq!(len, 4);
    abi::free(reply_ptr);
}
