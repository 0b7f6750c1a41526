use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use bytes::BytesMut;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::interval;
use tracing::{error, warn};

use crate::command::{cmdline, parse_i64, CmdLine};
use crate::error::ServerError;
use crate::resp::{RespParser, RespValue};
use crate::server::Server;

/// One committed write, tagged with the database it applies to.
#[derive(Debug)]
pub struct AofRecord {
    pub db: usize,
    pub line: CmdLine,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FsyncPolicy {
    Always,
    Everysec,
    No,
}

impl FsyncPolicy {
    pub fn parse(s: &str) -> Self {
        match s {
            "always" => FsyncPolicy::Always,
            "no" => FsyncPolicy::No,
            _ => FsyncPolicy::Everysec,
        }
    }
}

/// Handle to the append-only log. Databases send [`AofRecord`]s into the
/// channel; a single writer task serializes them in arrival order, which
/// keeps per-key record order consistent with commit order because
/// records are sent while the key's write latch is still held.
pub struct Aof {
    tx: UnboundedSender<AofRecord>,
}

impl Aof {
    /// Open (or create) the log file and start the writer task.
    pub fn open(path: &Path, policy: FsyncPolicy) -> std::io::Result<Aof> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(writer_loop(file, policy, rx));
        Ok(Aof { tx })
    }

    pub fn sender(&self) -> UnboundedSender<AofRecord> {
        self.tx.clone()
    }
}

async fn writer_loop(mut file: File, policy: FsyncPolicy, mut rx: UnboundedReceiver<AofRecord>) {
    let mut current_db = 0usize;
    let mut tick = interval(std::time::Duration::from_secs(1));
    loop {
        tokio::select! {
            record = rx.recv() => match record {
                Some(record) => {
                    if let Err(e) = append_record(&mut file, &mut current_db, &record) {
                        error!("append-only log write failed: {e}");
                    } else if policy == FsyncPolicy::Always {
                        let _ = file.sync_data();
                    }
                }
                None => {
                    // Every sender is gone; flush what we have and stop.
                    let _ = file.sync_all();
                    return;
                }
            },
            _ = tick.tick() => {
                if policy == FsyncPolicy::Everysec {
                    let _ = file.sync_data();
                }
            }
        }
    }
}

/// Write one record, preceded by a `SELECT` marker whenever the target
/// database changes.
fn append_record(file: &mut File, current_db: &mut usize, record: &AofRecord) -> std::io::Result<()> {
    if record.db != *current_db {
        let select = cmdline("SELECT", &[record.db.to_string().as_bytes()]);
        file.write_all(&RespValue::from_cmdline(&select).to_bytes())?;
        *current_db = record.db;
    }
    file.write_all(&RespValue::from_cmdline(&record.line).to_bytes())
}

/// Replay a log file through the server's normal dispatcher. Must run
/// before [`Server::attach_aof`], so replayed commands are not appended
/// again. A truncated tail ends the replay cleanly; corrupt framing is
/// an error.
pub async fn replay(path: &Path, server: &Server) -> Result<usize, ServerError> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let mut buf = BytesMut::from(&data[..]);
    let mut current_db = 0usize;
    let mut applied = 0usize;
    loop {
        match RespParser::parse(&mut buf)? {
            Some(value) => {
                let line = match value.into_cmdline() {
                    Some(line) if !line.is_empty() => line,
                    _ => continue,
                };
                if line[0].eq_ignore_ascii_case(b"select") {
                    if let Some(n) = line.get(1).and_then(|raw| parse_i64(raw)) {
                        if n >= 0 && (n as usize) < server.databases() {
                            current_db = n as usize;
                        }
                    }
                    continue;
                }
                server.db(current_db).exec(&line).await;
                applied += 1;
            }
            None => {
                if !buf.is_empty() {
                    warn!("append-only file ends mid-frame; ignoring the tail");
                }
                return Ok(applied);
            }
        }
    }
}
