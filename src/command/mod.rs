pub mod key;
pub mod server_cmd;
pub mod string;

use std::collections::HashMap;

use crate::db::Db;
use crate::resp::RespValue;

/// A command with its arguments, as raw binary-safe tokens. `line[0]` is
/// the command name.
pub type CmdLine = Vec<Vec<u8>>;

/// Runs a command body against a database. Receives the arguments after
/// the command name. Called by the dispatcher with the key latches held.
pub type Executor = fn(&Db, &[Vec<u8>]) -> RespValue;

/// Extracts the keys a command writes and reads, for latching and for
/// undo preparation. Receives the arguments after the command name.
pub type KeyExtractor = fn(&[Vec<u8>]) -> KeySpec;

/// Produces the command lines that roll the command back, by capturing
/// the pre-image of every key it touches. Must run before the command,
/// under the same latches.
pub type UndoGenerator = fn(&Db, &[Vec<u8>]) -> Vec<CmdLine>;

/// The key sets one command invocation touches.
#[derive(Debug, Default, PartialEq)]
pub struct KeySpec {
    pub write: Vec<Vec<u8>>,
    pub read: Vec<Vec<u8>>,
}

impl KeySpec {
    pub fn none() -> Self {
        KeySpec::default()
    }

    pub fn write(keys: Vec<Vec<u8>>) -> Self {
        KeySpec {
            write: keys,
            read: Vec::new(),
        }
    }

    pub fn read(keys: Vec<Vec<u8>>) -> Self {
        KeySpec {
            write: Vec::new(),
            read: keys,
        }
    }
}

/// One registered command. Immutable after registration.
///
/// Arity is signed, Redis-style: positive N means exactly N tokens
/// including the command name, negative -N means at least N tokens.
pub struct CommandSpec {
    pub name: &'static str,
    pub exec: Executor,
    pub keys: KeyExtractor,
    pub undo: Option<UndoGenerator>,
    pub arity: i32,
}

pub fn arity_ok(arity: i32, tokens: usize) -> bool {
    if arity >= 0 {
        tokens == arity as usize
    } else {
        tokens >= (-arity) as usize
    }
}

/// Assembles the command table during server construction. Registering
/// the same name twice is a programming error and panics.
#[derive(Default)]
pub struct CommandTableBuilder {
    entries: HashMap<String, CommandSpec>,
}

impl CommandTableBuilder {
    pub fn new() -> Self {
        CommandTableBuilder::default()
    }

    pub fn register(&mut self, spec: CommandSpec) {
        let name = spec.name.to_ascii_lowercase();
        if self.entries.insert(name, spec).is_some() {
            panic!("duplicate command registration");
        }
    }

    pub fn finish(self) -> CommandTable {
        CommandTable {
            entries: self.entries,
        }
    }
}

/// The frozen name → descriptor table.
pub struct CommandTable {
    entries: HashMap<String, CommandSpec>,
}

impl CommandTable {
    /// The full keyspace-facing command set.
    pub fn standard() -> CommandTable {
        let mut builder = CommandTableBuilder::new();
        key::register(&mut builder);
        string::register(&mut builder);
        server_cmd::register(&mut builder);
        builder.finish()
    }

    /// Look up a descriptor by its already-lowercased name.
    pub fn lookup(&self, name: &str) -> Option<&CommandSpec> {
        self.entries.get(name)
    }
}

// Standard key extractors. Executors run only after arity validation, so
// the positional arguments they reference are present.

pub fn no_keys(_args: &[Vec<u8>]) -> KeySpec {
    KeySpec::none()
}

pub fn read_first_key(args: &[Vec<u8>]) -> KeySpec {
    KeySpec::read(args.first().cloned().into_iter().collect())
}

pub fn write_first_key(args: &[Vec<u8>]) -> KeySpec {
    KeySpec::write(args.first().cloned().into_iter().collect())
}

pub fn read_all_keys(args: &[Vec<u8>]) -> KeySpec {
    KeySpec::read(args.to_vec())
}

pub fn write_all_keys(args: &[Vec<u8>]) -> KeySpec {
    KeySpec::write(args.to_vec())
}

// Shared argument and reply helpers.

pub(crate) fn parse_i64(raw: &[u8]) -> Option<i64> {
    std::str::from_utf8(raw).ok()?.parse().ok()
}

pub(crate) fn wrong_arg_count(name: &str) -> RespValue {
    RespValue::error(format!("ERR wrong number of arguments for '{name}' command"))
}

pub(crate) fn not_an_integer() -> RespValue {
    RespValue::error("ERR value is not an integer or out of range")
}

pub(crate) fn wrong_type() -> RespValue {
    RespValue::error("WRONGTYPE Operation against a key holding the wrong kind of value")
}

/// Build a command line from a name and raw arguments.
pub(crate) fn cmdline(name: &str, args: &[&[u8]]) -> CmdLine {
    let mut line = Vec::with_capacity(1 + args.len());
    line.push(name.as_bytes().to_vec());
    line.extend(args.iter().map(|a| a.to_vec()));
    line
}

/// The command line that restores `key`'s current expiration state:
/// `PEXPIREAT key ms` when a TTL is set, `PERSIST key` otherwise.
pub(crate) fn ttl_restore_cmd(db: &Db, key: &[u8]) -> CmdLine {
    match db.keyspace().ttl(key) {
        Some(at) => cmdline("PEXPIREAT", &[key, at.to_string().as_bytes()]),
        None => cmdline("PERSIST", &[key]),
    }
}

/// Capture the pre-image of each key as command lines that recreate it:
/// `DEL` for an absent key, otherwise the entity's canonical rebuild
/// command followed by its TTL restoration.
pub(crate) fn rollback_keys(db: &Db, keys: &[&[u8]]) -> Vec<CmdLine> {
    let mut lines = Vec::new();
    for &key in keys {
        match db.keyspace().get(key) {
            None => lines.push(cmdline("DEL", &[key])),
            Some(entity) => {
                lines.push(entity.to_cmdline(key));
                lines.push(ttl_restore_cmd(db, key));
            }
        }
    }
    lines
}
