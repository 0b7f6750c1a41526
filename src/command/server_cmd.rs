//! Connection utility commands.

use crate::command::{no_keys, CommandSpec, CommandTableBuilder};
use crate::db::Db;
use crate::resp::RespValue;

fn exec_ping(_db: &Db, args: &[Vec<u8>]) -> RespValue {
    match args {
        [] => RespValue::status("PONG"),
        [msg] => RespValue::bulk(msg.clone()),
        _ => RespValue::error("ERR wrong number of arguments for 'ping' command"),
    }
}

fn exec_echo(_db: &Db, args: &[Vec<u8>]) -> RespValue {
    RespValue::bulk(args[0].clone())
}

pub(crate) fn register(builder: &mut CommandTableBuilder) {
    builder.register(CommandSpec {
        name: "ping",
        exec: exec_ping,
        keys: no_keys,
        undo: None,
        arity: -1,
    });
    builder.register(CommandSpec {
        name: "echo",
        exec: exec_echo,
        keys: no_keys,
        undo: None,
        arity: 2,
    });
}
