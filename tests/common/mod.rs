//! Shared test fixtures: a deterministic in-memory command host
//!
//! Implements the handful of commands the scripting tests exercise, the
//! way a real host adapter would back them with a store.

// Not every test binary uses every fixture.
#![allow(dead_code)]

use crucible::host::HostError;
use crucible::{LogLevel, RedisHost, Reply};
use std::cell::RefCell;
use std::collections::HashMap;

/// In-memory host with a string store and a captured log.
#[derive(Default)]
pub struct MemoryHost {
    data: RefCell<HashMap<Vec<u8>, Vec<u8>>>,
    pub logged: RefCell<Vec<(i64, Vec<u8>)>>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: &[u8], value: &[u8]) {
        self.data.borrow_mut().insert(key.to_vec(), value.to_vec());
    }

    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.data.borrow().get(key).cloned()
    }
}

impl RedisHost for MemoryHost {
    fn call(&self, args: &[Vec<u8>]) -> Result<Reply, HostError> {
        let cmd = match args.first() {
            Some(cmd) => String::from_utf8_lossy(cmd).to_uppercase(),
            None => return Err(HostError::new("ERR wrong number of arguments")),
        };
        let rest = &args[1..];

        match cmd.as_str() {
            "PING" => Ok(Reply::status("PONG")),

            "ECHO" => match rest.first() {
                Some(msg) => Ok(Reply::Bulk(msg.clone())),
                None => Err(HostError::new(
                    "ERR wrong number of arguments for 'echo' command",
                )),
            },

            "GET" => match rest.first() {
                Some(key) => Ok(match self.data.borrow().get(key) {
                    Some(value) => Reply::Bulk(value.clone()),
                    None => Reply::Null,
                }),
                None => Err(HostError::new(
                    "ERR wrong number of arguments for 'get' command",
                )),
            },

            "SET" => match (rest.first(), rest.get(1)) {
                (Some(key), Some(value)) => {
                    self.data.borrow_mut().insert(key.clone(), value.clone());
                    Ok(Reply::ok())
                }
                _ => Err(HostError::new(
                    "ERR wrong number of arguments for 'set' command",
                )),
            },

            "DEL" => {
                let mut removed = 0;
                for key in rest {
                    if self.data.borrow_mut().remove(key).is_some() {
                        removed += 1;
                    }
                }
                Ok(Reply::Int(removed))
            }

            "EXISTS" => {
                let mut found = 0;
                for key in rest {
                    if self.data.borrow().contains_key(key) {
                        found += 1;
                    }
                }
                Ok(Reply::Int(found))
            }

            "INCR" => match rest.first() {
                Some(key) => {
                    let mut data = self.data.borrow_mut();
                    let current = match data.get(key) {
                        Some(value) => String::from_utf8_lossy(value)
                            .parse::<i64>()
                            .map_err(|_| {
                                HostError::new("ERR value is not an integer or out of range")
                            })?,
                        None => 0,
                    };
                    let next = current + 1;
                    data.insert(key.clone(), next.to_string().into_bytes());
                    Ok(Reply::Int(next))
                }
                None => Err(HostError::new(
                    "ERR wrong number of arguments for 'incr' command",
                )),
            },

            "MGET" => {
                let data = self.data.borrow();
                Ok(Reply::Array(
                    rest.iter()
                        .map(|key| match data.get(key) {
                            Some(value) => Reply::Bulk(value.clone()),
                            None => Reply::Null,
                        })
                        .collect(),
                ))
            }

            // Always fails; exercises the error paths
            "THROW" => Err(HostError::new("ERR boom")),

            _ => Err(HostError::new(format!("ERR unknown command '{cmd}'"))),
        }
    }

    fn log(&self, level: LogLevel, message: &[u8]) {
        self.logged
            .borrow_mut()
            .push((level.as_i64(), message.to_vec()));
    }
}

/// Byte-vector helper for KEYS/ARGV literals.
pub fn bytes(items: &[&[u8]]) -> Vec<Vec<u8>> {
    items.iter().map(|item| item.to_vec()).collect()
}

/// Route engine tracing through the test harness so `--nocapture` shows it.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}
