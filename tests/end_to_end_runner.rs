//! End-to-end tests for the script runner: identity, decoration, caching
//!
//! The runner is the host-adapter layer: it computes the script's sha1,
//! feeds KEYS/ARGV through the wire codec, decorates script errors the way
//! Redis does, and serves the sha1-keyed script cache.

mod common;

use common::{bytes, MemoryHost};
use crucible::host::script_sha1;
use crucible::{FnHost, NullHost, Reply, ScriptRunner};
use std::sync::Arc;

fn runner() -> ScriptRunner {
    ScriptRunner::new(Arc::new(MemoryHost::new())).unwrap()
}

#[test]
fn test_eval_through_runner() {
    let mut runner = runner();
    assert_eq!(runner.eval(b"return 1+1", &[], &[]), Reply::Int(2));
    assert_eq!(
        runner.eval(
            b"return KEYS[1] .. ARGV[1]",
            &bytes(&[b"ab"]),
            &bytes(&[b"cd"])
        ),
        Reply::bulk("abcd")
    );
}

#[test]
fn test_script_error_is_decorated() {
    let mut runner = runner();
    let script = b"redis.nonexistent()";
    let sha = script_sha1(script);

    let reply = runner.eval(script, &[], &[]);
    let message = match reply {
        Reply::Error(payload) => String::from_utf8(payload).unwrap(),
        other => panic!("expected error reply, got {other:?}"),
    };

    assert!(
        message.starts_with("user_script:1: "),
        "got: {message}"
    );
    assert!(message.contains("attempt to call"), "got: {message}");
    assert!(
        message.ends_with(&format!(" script: {sha}, on @user_script:1.")),
        "got: {message}"
    );
    assert_eq!(sha.len(), 40);
}

#[test]
fn test_error_on_later_line_keeps_line_number() {
    let mut runner = runner();
    let script = b"local x = 1\nerror('deliberate')";
    let sha = script_sha1(script);

    let reply = runner.eval(script, &[], &[]);
    let message = match reply {
        Reply::Error(payload) => String::from_utf8(payload).unwrap(),
        other => panic!("expected error reply, got {other:?}"),
    };
    assert!(message.starts_with("user_script:2: deliberate"), "got: {message}");
    assert!(message.ends_with("on @user_script:2."), "got: {message}");
    assert!(message.contains(&sha));
}

#[test]
fn test_host_errors_pass_through_undecorated() {
    let mut runner = runner();
    let reply = runner.eval(b"return redis.pcall('THROW')", &[], &[]);
    assert_eq!(reply, Reply::error("ERR boom"));
}

#[test]
fn test_script_cache() {
    let mut runner = runner();
    let script = b"return ARGV[1] or 'empty'";

    let sha = runner.load(script);
    assert_eq!(sha, script_sha1(script));
    assert!(runner.exists(&sha));
    assert!(runner.exists(&sha.to_uppercase()));
    assert!(!runner.exists("0000000000000000000000000000000000000000"));

    assert_eq!(
        runner.eval_sha(&sha, &[], &bytes(&[b"cached"])),
        Reply::bulk("cached")
    );
    // Identity lookup is case-insensitive, like EVALSHA
    assert_eq!(
        runner.eval_sha(&sha.to_uppercase(), &[], &[]),
        Reply::bulk("empty")
    );
}

#[test]
fn test_eval_sha_miss_and_flush() {
    let mut runner = runner();
    let miss = Reply::error("NOSCRIPT No matching script. Please use EVAL.");

    assert_eq!(
        runner.eval_sha("ffffffffffffffffffffffffffffffffffffffff", &[], &[]),
        miss
    );

    let sha = runner.load(b"return 1");
    assert_eq!(runner.eval_sha(&sha, &[], &[]), Reply::Int(1));

    runner.flush();
    assert!(!runner.exists(&sha));
    assert_eq!(runner.eval_sha(&sha, &[], &[]), miss);
}

#[test]
fn test_cached_script_errors_decorate_with_cached_sha() {
    let mut runner = runner();
    let script = b"error('from cache')";
    let sha = runner.load(script);

    let reply = runner.eval_sha(&sha, &[], &[]);
    let message = match reply {
        Reply::Error(payload) => String::from_utf8(payload).unwrap(),
        other => panic!("expected error reply, got {other:?}"),
    };
    assert!(message.contains(&sha), "got: {message}");
}

#[test]
fn test_standalone_null_host() {
    let mut runner = ScriptRunner::new(Arc::new(NullHost)).unwrap();

    // Pure computation works without a command backend
    assert_eq!(runner.eval(b"return 6 * 7", &[], &[]), Reply::Int(42));

    // Command execution fails the way an unknown command would
    assert_eq!(
        runner.eval(b"return redis.pcall('GET', 'k')", &[], &[]),
        Reply::error("ERR unknown command 'GET'")
    );
}

#[test]
fn test_fn_host_speaks_the_wire_codec() {
    let host = FnHost::new(|encoded_args| {
        let args = crucible::wire::decode_args(encoded_args).unwrap();
        let reply = match args.first().map(|c| c.as_slice()) {
            Some(b"PING") => Reply::status("PONG"),
            Some(b"ECHO") => Reply::Bulk(args[1].clone()),
            _ => Reply::error("ERR unknown command"),
        };
        crucible::wire::encode_reply(&reply)
    });
    let mut runner = ScriptRunner::new(Arc::new(host)).unwrap();

    assert_eq!(
        runner.eval(b"return redis.call('PING')", &[], &[]),
        Reply::status("PONG")
    );
    assert_eq!(
        runner.eval(b"return redis.call('ECHO', 'payload')", &[], &[]),
        Reply::bulk("payload")
    );
}

#[test]
fn test_memory_soft_cap() {
    let mut runner = runner();
    runner.set_memory_limit(1 << 20).unwrap();

    let reply = runner.eval(b"return string.rep('a', 16 * 1024 * 1024)", &[], &[]);
    assert!(reply.is_error(), "expected allocation failure, got {reply:?}");

    // Small allocations still succeed under the cap
    assert_eq!(
        runner.eval(b"return string.rep('a', 8)", &[], &[]),
        Reply::bulk("aaaaaaaa")
    );
}

#[test]
fn test_runner_limits_reach_the_engine() {
    let mut runner = ScriptRunner::with_limits(
        Arc::new(MemoryHost::new()),
        crucible::Limits {
            max_fuel: 100_000,
            ..crucible::Limits::default()
        },
    )
    .unwrap();

    assert_eq!(
        runner.eval(b"while true do end", &[], &[]),
        Reply::error("Script killed by fuel limit")
    );
}
