use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::aof::AofRecord;
use crate::command::{parse_i64, wrong_arg_count, CmdLine, CommandTable};
use crate::config::Config;
use crate::connection::{handle_connection, Session};
use crate::db::Db;
use crate::resp::RespValue;

/// Keys sampled per shard on each active-expiration tick.
const EXPIRE_SAMPLES: usize = 20;

/// The assembled server: the frozen command table, one `Db` per logical
/// database, and the listener lifecycle.
pub struct Server {
    config: Config,
    dbs: Vec<Arc<Db>>,
    closing: AtomicBool,
}

impl Server {
    pub fn new(config: Config) -> Arc<Server> {
        let table = Arc::new(CommandTable::standard());
        let dbs = (0..config.databases.max(1))
            .map(|index| Arc::new(Db::new(index, config.shards, Arc::clone(&table))))
            .collect();
        Arc::new(Server {
            config,
            dbs,
            closing: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn databases(&self) -> usize {
        self.dbs.len()
    }

    pub fn db(&self, index: usize) -> &Arc<Db> {
        &self.dbs[index]
    }

    /// Wire every database to the append-only log sink. Called after any
    /// replay has finished so replayed commands are not logged again.
    pub fn attach_aof(&self, tx: UnboundedSender<AofRecord>) {
        for db in &self.dbs {
            db.attach_aof(tx.clone());
        }
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Execute one command line for a session. SELECT and QUIT are
    /// resolved here, since they mutate the session rather than a
    /// database; everything else goes to the session's current database.
    pub async fn exec(&self, session: &mut Session, line: CmdLine) -> RespValue {
        if line.is_empty() {
            return RespValue::error("ERR empty command");
        }
        if line[0].eq_ignore_ascii_case(b"select") {
            return self.exec_select(session, &line);
        }
        if line[0].eq_ignore_ascii_case(b"quit") {
            session.should_close = true;
            return RespValue::ok();
        }
        self.dbs[session.db_index].exec(&line).await
    }

    fn exec_select(&self, session: &mut Session, line: &CmdLine) -> RespValue {
        if line.len() != 2 {
            return wrong_arg_count("select");
        }
        match parse_i64(&line[1]) {
            Some(n) if n >= 0 && (n as usize) < self.dbs.len() => {
                session.db_index = n as usize;
                RespValue::ok()
            }
            Some(_) => RespValue::error("ERR DB index is out of range"),
            None => RespValue::error("ERR value is not an integer or out of range"),
        }
    }

    /// Bind, accept and serve until ctrl-c. On shutdown the accept loop
    /// stops taking connections, every session is signalled to close, and
    /// in-flight sessions are joined before returning.
    pub async fn run(self: Arc<Self>) -> std::io::Result<()> {
        let addr = format!("{}:{}", self.config.bind, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        info!("cinnabar listening on {addr}");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let sweeper = Arc::clone(&self);
        let sweeper_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            active_expiration_loop(sweeper, sweeper_rx).await;
        });

        let mut sessions = JoinSet::new();
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = accepted?;
                    if self.is_closing() {
                        continue;
                    }
                    debug!("connection accepted from {peer}");
                    let server = Arc::clone(&self);
                    let rx = shutdown_rx.clone();
                    sessions.spawn(async move {
                        if let Err(e) = handle_connection(server, stream, peer, rx).await {
                            debug!("connection error from {peer}: {e}");
                        }
                        debug!("connection closed: {peer}");
                    });
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("shutting down...");
                    self.closing.store(true, Ordering::SeqCst);
                    let _ = shutdown_tx.send(true);
                    break;
                }
            }
        }

        while sessions.join_next().await.is_some() {}
        info!("all sessions drained");
        Ok(())
    }
}

/// Periodically evict a bounded sample of expired keys from every
/// database, so keys that are never read again still get collected.
async fn active_expiration_loop(server: Arc<Server>, mut shutdown: watch::Receiver<bool>) {
    let period = Duration::from_millis(1000 / server.config.hz.max(1));
    loop {
        tokio::select! {
            _ = tokio::time::sleep(period) => {
                let mut evicted = 0;
                for db in &server.dbs {
                    evicted += db.keyspace().active_expire(EXPIRE_SAMPLES);
                }
                if evicted > 0 {
                    debug!(evicted, "active expiration cycle");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}
