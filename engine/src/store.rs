//! Durable state behind a dedicated sqlite worker thread.
//!
//! Two classes of writes share one channel. Settlement-critical writes
//! (admission, status transitions, archiving) carry a oneshot ack and run in
//! a single transaction each; the caller awaits the ack before reporting
//! success, so a crash cannot admit a contribution without consuming its
//! reference or vice versa. Feed appends are fire-and-forget and are dropped
//! with a warning under backpressure; they never gate round correctness.

use anyhow::Context;
use burnflip_types::{BurnRecord, PayoutRecord, Round, RoundStatus};
use rusqlite::{params, Connection};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tokio::sync::{mpsc, oneshot};
use tracing::{error, warn};

const STORE_CHANNEL_CAPACITY: usize = 256;

type Ack = oneshot::Sender<anyhow::Result<()>>;

enum StoreRequest {
    Admit {
        round: Round,
        reference: String,
        ack: Ack,
    },
    SaveRound {
        round: Round,
        ack: Ack,
    },
    Archive {
        completed: Round,
        next: Round,
        ack: Ack,
    },
    AppendBurn(BurnRecord),
    AppendPayout(PayoutRecord),
}

/// Bounds applied while loading and pruning.
#[derive(Clone, Copy, Debug)]
pub struct StoreCaps {
    pub replay_guard_cap: usize,
    pub history_cap: usize,
    pub feed_cap: usize,
}

/// State recovered from disk at startup.
pub struct LoadedState {
    /// The one open/settling round, if any.
    pub current: Option<Round>,
    /// Completed rounds, newest first.
    pub history: VecDeque<Round>,
    /// Consumed payment references, oldest first.
    pub references: Vec<String>,
    /// Burn feed, newest first.
    pub burns: Vec<BurnRecord>,
    /// Payout feed, newest first.
    pub payouts: Vec<PayoutRecord>,
}

pub struct Store {
    sender: mpsc::Sender<StoreRequest>,
}

impl Store {
    /// Opens (or creates) the store, loads all recovered state, then hands
    /// the connection to a worker thread for the lifetime of the process.
    pub fn open(path: &Path, caps: StoreCaps) -> anyhow::Result<(Self, LoadedState)> {
        let conn = Connection::open(path).context("open engine store")?;
        init_schema(&conn)?;
        let loaded = load_state(&conn, caps)?;
        drop(conn);

        let (sender, receiver) = mpsc::channel(STORE_CHANNEL_CAPACITY);
        let path = path.to_path_buf();
        std::thread::spawn(move || {
            store_worker(path, caps, receiver);
        });

        Ok((Self { sender }, loaded))
    }

    /// Registers `reference` in the replay guard and rewrites the current
    /// round, atomically. Durable before returning.
    pub async fn persist_admission(&self, round: &Round, reference: &str) -> anyhow::Result<()> {
        self.durable(|ack| StoreRequest::Admit {
            round: round.clone(),
            reference: reference.to_string(),
            ack,
        })
        .await
    }

    /// Rewrites the current round row (status flips, deferrals).
    pub async fn save_round(&self, round: &Round) -> anyhow::Result<()> {
        self.durable(|ack| StoreRequest::SaveRound {
            round: round.clone(),
            ack,
        })
        .await
    }

    /// Seals a completed round and opens the next one, atomically, pruning
    /// history beyond the cap.
    pub async fn archive(&self, completed: &Round, next: &Round) -> anyhow::Result<()> {
        self.durable(|ack| StoreRequest::Archive {
            completed: completed.clone(),
            next: next.clone(),
            ack,
        })
        .await
    }

    pub fn append_burn(&self, record: BurnRecord) {
        if self.sender.try_send(StoreRequest::AppendBurn(record)).is_err() {
            warn!("store channel full; dropping burn feed record");
        }
    }

    pub fn append_payout(&self, record: PayoutRecord) {
        if self
            .sender
            .try_send(StoreRequest::AppendPayout(record))
            .is_err()
        {
            warn!("store channel full; dropping payout feed record");
        }
    }

    async fn durable(
        &self,
        request: impl FnOnce(Ack) -> StoreRequest,
    ) -> anyhow::Result<()> {
        let (ack, done) = oneshot::channel();
        self.sender
            .send(request(ack))
            .await
            .map_err(|_| anyhow::anyhow!("store worker is gone"))?;
        done.await.context("store worker dropped the ack")?
    }
}

fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=NORMAL;
         CREATE TABLE IF NOT EXISTS rounds (
             id INTEGER PRIMARY KEY,
             status TEXT NOT NULL,
             round_json TEXT NOT NULL
         );
         CREATE TABLE IF NOT EXISTS replay_guard (
             seq INTEGER PRIMARY KEY AUTOINCREMENT,
             reference TEXT NOT NULL UNIQUE
         );
         CREATE TABLE IF NOT EXISTS burn_feed (
             seq INTEGER PRIMARY KEY AUTOINCREMENT,
             record_json TEXT NOT NULL
         );
         CREATE TABLE IF NOT EXISTS payout_feed (
             seq INTEGER PRIMARY KEY AUTOINCREMENT,
             record_json TEXT NOT NULL
         );",
    )
    .context("init engine store schema")?;
    Ok(())
}

fn load_state(conn: &Connection, caps: StoreCaps) -> anyhow::Result<LoadedState> {
    let current = {
        let mut stmt = conn.prepare(
            "SELECT round_json FROM rounds WHERE status != 'complete' ORDER BY id DESC LIMIT 1",
        )?;
        let mut rows = stmt.query([])?;
        match rows.next()? {
            Some(row) => {
                let json: String = row.get(0)?;
                Some(serde_json::from_str::<Round>(&json).context("decode current round")?)
            }
            None => None,
        }
    };

    let mut history = VecDeque::new();
    {
        let mut stmt = conn.prepare(
            "SELECT round_json FROM rounds WHERE status = 'complete' ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![caps.history_cap as i64], |row| {
            row.get::<_, String>(0)
        })?;
        for row in rows {
            let round =
                serde_json::from_str::<Round>(&row?).context("decode archived round")?;
            history.push_back(round);
        }
    }

    let references = {
        let mut stmt = conn.prepare(
            "SELECT reference FROM replay_guard ORDER BY seq DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![caps.replay_guard_cap as i64], |row| {
            row.get::<_, String>(0)
        })?;
        let mut newest_first = rows.collect::<Result<Vec<_>, _>>()?;
        newest_first.reverse();
        newest_first
    };

    let burns = load_feed::<BurnRecord>(conn, "burn_feed", caps.feed_cap)?;
    let payouts = load_feed::<PayoutRecord>(conn, "payout_feed", caps.feed_cap)?;

    Ok(LoadedState {
        current,
        history,
        references,
        burns,
        payouts,
    })
}

fn load_feed<T: serde::de::DeserializeOwned>(
    conn: &Connection,
    table: &str,
    cap: usize,
) -> anyhow::Result<Vec<T>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT record_json FROM {table} ORDER BY seq DESC LIMIT ?1"
    ))?;
    let rows = stmt.query_map(params![cap as i64], |row| row.get::<_, String>(0))?;
    let mut records = Vec::new();
    for row in rows {
        records.push(serde_json::from_str::<T>(&row?).context("decode feed record")?);
    }
    Ok(records)
}

fn store_worker(path: PathBuf, caps: StoreCaps, mut receiver: mpsc::Receiver<StoreRequest>) {
    let mut conn = match Connection::open(&path) {
        Ok(conn) => conn,
        Err(err) => {
            error!("store open failed: {err}");
            return;
        }
    };
    if let Err(err) = init_schema(&conn) {
        error!("store init failed: {err}");
        return;
    }

    while let Some(request) = receiver.blocking_recv() {
        match request {
            StoreRequest::Admit {
                round,
                reference,
                ack,
            } => {
                let result = write_admission(&mut conn, &round, &reference, caps);
                let _ = ack.send(result);
            }
            StoreRequest::SaveRound { round, ack } => {
                let result = write_round(&conn, &round);
                let _ = ack.send(result);
            }
            StoreRequest::Archive {
                completed,
                next,
                ack,
            } => {
                let result = write_archive(&mut conn, &completed, &next, caps);
                let _ = ack.send(result);
            }
            StoreRequest::AppendBurn(record) => {
                if let Err(err) = write_feed(&conn, "burn_feed", &record, caps.feed_cap) {
                    error!("burn feed write failed: {err}");
                }
            }
            StoreRequest::AppendPayout(record) => {
                if let Err(err) = write_feed(&conn, "payout_feed", &record, caps.feed_cap) {
                    error!("payout feed write failed: {err}");
                }
            }
        }
    }
}

fn write_round_in(tx: &rusqlite::Transaction<'_>, round: &Round) -> anyhow::Result<()> {
    tx.execute(
        "INSERT OR REPLACE INTO rounds (id, status, round_json) VALUES (?1, ?2, ?3)",
        params![
            round.id as i64,
            round.status.as_str(),
            serde_json::to_string(round).context("encode round")?
        ],
    )?;
    Ok(())
}

fn write_admission(
    conn: &mut Connection,
    round: &Round,
    reference: &str,
    caps: StoreCaps,
) -> anyhow::Result<()> {
    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO replay_guard (reference) VALUES (?1)",
        params![reference],
    )
    .context("register reference")?;
    tx.execute(
        "DELETE FROM replay_guard WHERE seq NOT IN \
         (SELECT seq FROM replay_guard ORDER BY seq DESC LIMIT ?1)",
        params![caps.replay_guard_cap as i64],
    )?;
    write_round_in(&tx, round)?;
    tx.commit().context("commit admission")?;
    Ok(())
}

fn write_round(conn: &Connection, round: &Round) -> anyhow::Result<()> {
    debug_assert!(round.status != RoundStatus::Complete || round.winner.is_some());
    conn.execute(
        "INSERT OR REPLACE INTO rounds (id, status, round_json) VALUES (?1, ?2, ?3)",
        params![
            round.id as i64,
            round.status.as_str(),
            serde_json::to_string(round).context("encode round")?
        ],
    )?;
    Ok(())
}

fn write_archive(
    conn: &mut Connection,
    completed: &Round,
    next: &Round,
    caps: StoreCaps,
) -> anyhow::Result<()> {
    let tx = conn.transaction()?;
    write_round_in(&tx, completed)?;
    write_round_in(&tx, next)?;
    tx.execute(
        "DELETE FROM rounds WHERE status = 'complete' AND id NOT IN \
         (SELECT id FROM rounds WHERE status = 'complete' ORDER BY id DESC LIMIT ?1)",
        params![caps.history_cap as i64],
    )?;
    tx.commit().context("commit archive")?;
    Ok(())
}

fn write_feed<T: serde::Serialize>(
    conn: &Connection,
    table: &str,
    record: &T,
    cap: usize,
) -> anyhow::Result<()> {
    conn.execute(
        &format!("INSERT INTO {table} (record_json) VALUES (?1)"),
        params![serde_json::to_string(record).context("encode feed record")?],
    )?;
    conn.execute(
        &format!(
            "DELETE FROM {table} WHERE seq NOT IN \
             (SELECT seq FROM {table} ORDER BY seq DESC LIMIT ?1)"
        ),
        params![cap as i64],
    )?;
    Ok(())
}
