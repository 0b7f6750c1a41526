//! String commands. Only the keyspace-facing pair lives in the core;
//! richer string operations belong to the data-structure layer.

use crate::command::{
    cmdline, not_an_integer, parse_i64, read_first_key, rollback_keys, write_first_key, CmdLine,
    CommandSpec, CommandTableBuilder,
};
use crate::db::Db;
use crate::entity::Entity;
use crate::resp::RespValue;
use crate::store::now_millis;

#[derive(PartialEq)]
enum SetPolicy {
    Any,
    IfAbsent,
    IfPresent,
}

fn exec_set(db: &Db, args: &[Vec<u8>]) -> RespValue {
    let key = args[0].as_slice();
    let value = args[1].as_slice();

    let mut policy = SetPolicy::Any;
    let mut expire_millis: Option<i64> = None;
    let mut i = 2;
    while i < args.len() {
        let opt = args[i].to_ascii_uppercase();
        match opt.as_slice() {
            b"NX" if policy == SetPolicy::Any => policy = SetPolicy::IfAbsent,
            b"XX" if policy == SetPolicy::Any => policy = SetPolicy::IfPresent,
            b"EX" | b"PX" if expire_millis.is_none() => {
                i += 1;
                let raw = match args.get(i) {
                    Some(raw) => raw,
                    None => return RespValue::error("ERR syntax error"),
                };
                let amount = match parse_i64(raw) {
                    Some(n) => n,
                    None => return not_an_integer(),
                };
                if amount <= 0 {
                    return RespValue::error("ERR invalid expire time in 'set' command");
                }
                expire_millis = Some(if opt[0] == b'E' { amount.saturating_mul(1000) } else { amount });
            }
            _ => return RespValue::error("ERR syntax error"),
        }
        i += 1;
    }

    let exists = db.keyspace().contains(key);
    match policy {
        SetPolicy::IfAbsent if exists => return RespValue::null_bulk(),
        SetPolicy::IfPresent if !exists => return RespValue::null_bulk(),
        _ => {}
    }

    // SET semantically resets the key, so any prior TTL goes; the store's
    // put deliberately never touches TTLs on its own.
    db.keyspace().persist(key);
    db.keyspace().put(key.to_vec(), Entity::String(value.to_vec()));
    db.add_aof(cmdline("SET", &[key, value]));

    if let Some(millis) = expire_millis {
        let at = (now_millis() as i64).saturating_add(millis).max(0) as u64;
        db.keyspace().expire(key, at);
        db.add_aof(cmdline("PEXPIREAT", &[key, at.to_string().as_bytes()]));
    }
    RespValue::ok()
}

fn undo_set(db: &Db, args: &[Vec<u8>]) -> Vec<CmdLine> {
    rollback_keys(db, &[args[0].as_slice()])
}

fn exec_get(db: &Db, args: &[Vec<u8>]) -> RespValue {
    match db.keyspace().get(&args[0]) {
        None => RespValue::null_bulk(),
        Some(Entity::String(data)) => RespValue::bulk(data),
        Some(_) => crate::command::wrong_type(),
    }
}

pub(crate) fn register(builder: &mut CommandTableBuilder) {
    builder.register(CommandSpec {
        name: "set",
        exec: exec_set,
        keys: write_first_key,
        undo: Some(undo_set),
        arity: -3,
    });
    builder.register(CommandSpec {
        name: "get",
        exec: exec_get,
        keys: read_first_key,
        undo: None,
        arity: 2,
    });
}
