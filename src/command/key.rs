//! The generic keyspace commands: lifetimes, lookups and renames over
//! whole keys, independent of the entity type stored at them.

use crate::command::{
    cmdline, no_keys, not_an_integer, parse_i64, read_all_keys, read_first_key, rollback_keys,
    ttl_restore_cmd, write_all_keys, write_first_key, CmdLine, CommandSpec, CommandTableBuilder,
    KeySpec,
};
use crate::db::Db;
use crate::glob::glob_match;
use crate::resp::RespValue;
use crate::store::now_millis;

fn exec_del(db: &Db, args: &[Vec<u8>]) -> RespValue {
    let removed = db.keyspace().remove_many(args);
    if removed > 0 {
        let refs: Vec<&[u8]> = args.iter().map(|a| a.as_slice()).collect();
        db.add_aof(cmdline("DEL", &refs));
    }
    RespValue::integer(removed as i64)
}

fn undo_del(db: &Db, args: &[Vec<u8>]) -> Vec<CmdLine> {
    let keys: Vec<&[u8]> = args.iter().map(|a| a.as_slice()).collect();
    rollback_keys(db, &keys)
}

fn exec_exists(db: &Db, args: &[Vec<u8>]) -> RespValue {
    let present = args.iter().filter(|key| db.keyspace().contains(key)).count();
    RespValue::integer(present as i64)
}

fn exec_type(db: &Db, args: &[Vec<u8>]) -> RespValue {
    match db.keyspace().type_name(&args[0]) {
        Some(name) => RespValue::status(name),
        None => RespValue::status("none"),
    }
}

fn exec_keys(db: &Db, args: &[Vec<u8>]) -> RespValue {
    let pattern = &args[0];
    let mut matches = Vec::new();
    db.keyspace().for_each(|key, _| {
        if glob_match(pattern, key) {
            matches.push(RespValue::bulk(key.to_vec()));
        }
        true
    });
    RespValue::array(matches)
}

fn prepare_rename(args: &[Vec<u8>]) -> KeySpec {
    // The source is read then dropped, the destination overwritten; both
    // need exclusive latches.
    KeySpec::write(args.iter().take(2).cloned().collect())
}

fn exec_rename(db: &Db, args: &[Vec<u8>]) -> RespValue {
    let (src, dst) = (args[0].as_slice(), args[1].as_slice());
    let entity = match db.keyspace().get(src) {
        Some(entity) => entity,
        None => return RespValue::error("ERR no such key"),
    };
    let ttl = db.keyspace().ttl(src);

    db.keyspace().remove(src);
    // Overwriting dst discards its old value and TTL, per Redis semantics.
    db.keyspace().remove(dst);
    db.keyspace().put(dst.to_vec(), entity);
    if let Some(at) = ttl {
        db.keyspace().expire(dst, at);
    }

    db.add_aof(cmdline("RENAME", &[src, dst]));
    RespValue::ok()
}

fn undo_rename(db: &Db, args: &[Vec<u8>]) -> Vec<CmdLine> {
    rollback_keys(db, &[args[0].as_slice(), args[1].as_slice()])
}

fn exec_renamenx(db: &Db, args: &[Vec<u8>]) -> RespValue {
    let (src, dst) = (args[0].as_slice(), args[1].as_slice());
    if db.keyspace().contains(dst) {
        return RespValue::integer(0);
    }
    let entity = match db.keyspace().get(src) {
        Some(entity) => entity,
        None => return RespValue::error("ERR no such key"),
    };
    let ttl = db.keyspace().ttl(src);

    db.keyspace().remove(src);
    db.keyspace().remove(dst);
    db.keyspace().put(dst.to_vec(), entity);
    if let Some(at) = ttl {
        db.keyspace().expire(dst, at);
    }

    db.add_aof(cmdline("RENAMENX", &[src, dst]));
    RespValue::integer(1)
}

/// Shared tail of the EXPIRE family: store the absolute instant and log
/// the canonical `PEXPIREAT` record so replay is time-independent.
fn apply_expire_at(db: &Db, key: &[u8], at_millis: i64) -> RespValue {
    if !db.keyspace().contains(key) {
        return RespValue::integer(0);
    }
    let at = at_millis.max(0) as u64;
    db.keyspace().expire(key, at);
    db.add_aof(cmdline("PEXPIREAT", &[key, at.to_string().as_bytes()]));
    RespValue::integer(1)
}

fn exec_expire(db: &Db, args: &[Vec<u8>]) -> RespValue {
    let seconds = match parse_i64(&args[1]) {
        Some(n) => n,
        None => return not_an_integer(),
    };
    let at = (now_millis() as i64).saturating_add(seconds.saturating_mul(1000));
    apply_expire_at(db, &args[0], at)
}

fn exec_pexpire(db: &Db, args: &[Vec<u8>]) -> RespValue {
    let millis = match parse_i64(&args[1]) {
        Some(n) => n,
        None => return not_an_integer(),
    };
    let at = (now_millis() as i64).saturating_add(millis);
    apply_expire_at(db, &args[0], at)
}

fn exec_expireat(db: &Db, args: &[Vec<u8>]) -> RespValue {
    let unix_seconds = match parse_i64(&args[1]) {
        Some(n) => n,
        None => return not_an_integer(),
    };
    apply_expire_at(db, &args[0], unix_seconds.saturating_mul(1000))
}

fn exec_pexpireat(db: &Db, args: &[Vec<u8>]) -> RespValue {
    let unix_millis = match parse_i64(&args[1]) {
        Some(n) => n,
        None => return not_an_integer(),
    };
    apply_expire_at(db, &args[0], unix_millis)
}

fn undo_expire(db: &Db, args: &[Vec<u8>]) -> Vec<CmdLine> {
    vec![ttl_restore_cmd(db, &args[0])]
}

fn exec_ttl(db: &Db, args: &[Vec<u8>]) -> RespValue {
    let key = &args[0];
    if !db.keyspace().contains(key) {
        return RespValue::integer(-2);
    }
    match db.keyspace().ttl(key) {
        None => RespValue::integer(-1),
        Some(at) => RespValue::integer((at.saturating_sub(now_millis()) / 1000) as i64),
    }
}

fn exec_pttl(db: &Db, args: &[Vec<u8>]) -> RespValue {
    let key = &args[0];
    if !db.keyspace().contains(key) {
        return RespValue::integer(-2);
    }
    match db.keyspace().ttl(key) {
        None => RespValue::integer(-1),
        Some(at) => RespValue::integer(at.saturating_sub(now_millis()) as i64),
    }
}

fn exec_persist(db: &Db, args: &[Vec<u8>]) -> RespValue {
    let key = args[0].as_slice();
    if !db.keyspace().contains(key) {
        return RespValue::integer(0);
    }
    if db.keyspace().persist(key) {
        db.add_aof(cmdline("PERSIST", &[key]));
        RespValue::integer(1)
    } else {
        RespValue::integer(0)
    }
}

fn exec_flushdb(db: &Db, _args: &[Vec<u8>]) -> RespValue {
    db.keyspace().flush();
    db.add_aof(cmdline("FLUSHDB", &[]));
    RespValue::ok()
}

pub(crate) fn register(builder: &mut CommandTableBuilder) {
    builder.register(CommandSpec {
        name: "del",
        exec: exec_del,
        keys: write_all_keys,
        undo: Some(undo_del),
        arity: -2,
    });
    builder.register(CommandSpec {
        name: "exists",
        exec: exec_exists,
        keys: read_all_keys,
        undo: None,
        arity: -2,
    });
    builder.register(CommandSpec {
        name: "type",
        exec: exec_type,
        keys: read_first_key,
        undo: None,
        arity: 2,
    });
    builder.register(CommandSpec {
        name: "keys",
        exec: exec_keys,
        keys: no_keys,
        undo: None,
        arity: 2,
    });
    builder.register(CommandSpec {
        name: "rename",
        exec: exec_rename,
        keys: prepare_rename,
        undo: Some(undo_rename),
        arity: 3,
    });
    builder.register(CommandSpec {
        name: "renamenx",
        exec: exec_renamenx,
        keys: prepare_rename,
        undo: Some(undo_rename),
        arity: 3,
    });
    builder.register(CommandSpec {
        name: "expire",
        exec: exec_expire,
        keys: write_first_key,
        undo: Some(undo_expire),
        arity: 3,
    });
    builder.register(CommandSpec {
        name: "pexpire",
        exec: exec_pexpire,
        keys: write_first_key,
        undo: Some(undo_expire),
        arity: 3,
    });
    builder.register(CommandSpec {
        name: "expireat",
        exec: exec_expireat,
        keys: write_first_key,
        undo: Some(undo_expire),
        arity: 3,
    });
    builder.register(CommandSpec {
        name: "pexpireat",
        exec: exec_pexpireat,
        keys: write_first_key,
        undo: Some(undo_expire),
        arity: 3,
    });
    builder.register(CommandSpec {
        name: "ttl",
        exec: exec_ttl,
        keys: read_first_key,
        undo: None,
        arity: 2,
    });
    builder.register(CommandSpec {
        name: "pttl",
        exec: exec_pttl,
        keys: read_first_key,
        undo: None,
        arity: 2,
    });
    builder.register(CommandSpec {
        name: "persist",
        exec: exec_persist,
        keys: write_first_key,
        undo: Some(undo_expire),
        arity: 2,
    });
    builder.register(CommandSpec {
        name: "flushdb",
        exec: exec_flushdb,
        keys: no_keys,
        undo: None,
        arity: 1,
    });
}
