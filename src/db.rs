use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};

use tokio::sync::mpsc::UnboundedSender;
use tracing::error;

use crate::aof::AofRecord;
use crate::command::{arity_ok, wrong_arg_count, CmdLine, CommandTable};
use crate::locker::Locker;
use crate::resp::RespValue;
use crate::store::Keyspace;

/// One logical database: a sharded keyspace, its latch pool, and the
/// dispatcher that runs command lines against it.
pub struct Db {
    index: usize,
    keyspace: Keyspace,
    locker: Locker,
    table: Arc<CommandTable>,
    /// Sink for committed write records. Unset while an AOF replay (or an
    /// AOF-less server) is running, so nothing is re-appended.
    aof: OnceLock<UnboundedSender<AofRecord>>,
}

impl Db {
    pub fn new(index: usize, shards: usize, table: Arc<CommandTable>) -> Self {
        Db {
            index,
            keyspace: Keyspace::new(shards),
            locker: Locker::new(shards),
            table,
            aof: OnceLock::new(),
        }
    }

    pub fn keyspace(&self) -> &Keyspace {
        &self.keyspace
    }

    pub(crate) fn attach_aof(&self, tx: UnboundedSender<AofRecord>) {
        let _ = self.aof.set(tx);
    }

    /// Append one committed write record. Executors call this on their
    /// success paths only, while the dispatcher still holds the key
    /// latches, so record order per key follows commit order.
    pub(crate) fn add_aof(&self, line: CmdLine) {
        if let Some(tx) = self.aof.get() {
            if tx
                .send(AofRecord {
                    db: self.index,
                    line,
                })
                .is_err()
            {
                error!("append-only log writer is gone; dropping record");
            }
        }
    }

    /// Dispatch one command line: look up the descriptor, validate arity,
    /// latch the command's key set in canonical order, run the executor.
    /// A panicking executor is caught here, logged, and turned into a
    /// generic error reply; the latches are released on every path.
    pub async fn exec(&self, line: &CmdLine) -> RespValue {
        let name = match line.first() {
            Some(raw) => String::from_utf8_lossy(raw).to_lowercase(),
            None => return RespValue::error("ERR empty command"),
        };
        let spec = match self.table.lookup(&name) {
            Some(spec) => spec,
            None => return unknown_command(&name, &line[1..]),
        };
        if !arity_ok(spec.arity, line.len()) {
            return wrong_arg_count(&name);
        }

        let args = &line[1..];
        let keys = (spec.keys)(args);
        let _guards = self.locker.lock(&keys.write, &keys.read).await;

        match catch_unwind(AssertUnwindSafe(|| (spec.exec)(self, args))) {
            Ok(reply) => reply,
            Err(panic) => {
                let detail = panic_message(&panic);
                error!(command = %name, panic = %detail, "executor panicked");
                RespValue::error("ERR internal error")
            }
        }
    }

    /// The command lines that undo `line` against the current state.
    /// Callers coordinating multi-key operations must already hold the
    /// command's latches so the captured pre-image cannot drift.
    pub fn undo(&self, line: &CmdLine) -> Vec<CmdLine> {
        let name = match line.first() {
            Some(raw) => String::from_utf8_lossy(raw).to_lowercase(),
            None => return Vec::new(),
        };
        match self.table.lookup(&name) {
            Some(spec) if arity_ok(spec.arity, line.len()) => match spec.undo {
                Some(undo) => undo(self, &line[1..]),
                None => Vec::new(),
            },
            _ => Vec::new(),
        }
    }
}

fn unknown_command(name: &str, args: &[Vec<u8>]) -> RespValue {
    let preview: Vec<String> = args
        .iter()
        .take(3)
        .map(|a| format!("'{}'", String::from_utf8_lossy(a)))
        .collect();
    RespValue::error(format!(
        "ERR unknown command '{name}', with args beginning with: {}",
        preview.join(" ")
    ))
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{no_keys, CommandSpec, CommandTableBuilder};

    fn test_db() -> Db {
        Db::new(0, 16, Arc::new(CommandTable::standard()))
    }

    fn line(parts: &[&str]) -> CmdLine {
        parts.iter().map(|p| p.as_bytes().to_vec()).collect()
    }

    #[tokio::test]
    async fn unknown_command_is_reported() {
        let db = test_db();
        let reply = db.exec(&line(&["frobnicate", "a", "b"])).await;
        assert_eq!(
            reply,
            RespValue::error("ERR unknown command 'frobnicate', with args beginning with: 'a' 'b'")
        );
    }

    #[tokio::test]
    async fn arity_violations_are_rejected() {
        let db = test_db();
        assert_eq!(
            db.exec(&line(&["type"])).await,
            RespValue::error("ERR wrong number of arguments for 'type' command")
        );
        assert_eq!(
            db.exec(&line(&["del"])).await,
            RespValue::error("ERR wrong number of arguments for 'del' command")
        );
        assert_eq!(
            db.exec(&line(&["rename", "only-one"])).await,
            RespValue::error("ERR wrong number of arguments for 'rename' command")
        );
    }

    #[tokio::test]
    async fn command_names_are_case_insensitive() {
        let db = test_db();
        assert_eq!(db.exec(&line(&["SET", "k", "v"])).await, RespValue::ok());
        assert_eq!(db.exec(&line(&["GeT", "k"])).await, RespValue::bulk(&b"v"[..]));
    }

    #[tokio::test]
    async fn panicking_executor_is_recovered() {
        fn exec_boom(_db: &Db, _args: &[Vec<u8>]) -> RespValue {
            panic!("boom");
        }
        let mut builder = CommandTableBuilder::new();
        crate::command::key::register(&mut builder);
        builder.register(CommandSpec {
            name: "boom",
            exec: exec_boom,
            keys: no_keys,
            undo: None,
            arity: 1,
        });
        let db = Db::new(0, 16, Arc::new(builder.finish()));

        assert_eq!(
            db.exec(&line(&["boom"])).await,
            RespValue::error("ERR internal error")
        );
        // The database keeps serving afterwards.
        assert_eq!(db.exec(&line(&["exists", "k"])).await, RespValue::integer(0));
    }

    #[tokio::test]
    async fn empty_command_line() {
        let db = test_db();
        assert_eq!(
            db.exec(&Vec::new()).await,
            RespValue::error("ERR empty command")
        );
    }

    #[tokio::test]
    async fn undo_of_a_read_only_command_is_empty() {
        let db = test_db();
        assert!(db.undo(&line(&["ttl", "k"])).is_empty());
        assert!(db.undo(&line(&["nosuch", "k"])).is_empty());
    }
}
