mod conflict;
mod error;
mod mutations;
mod queries;
mod store;

pub use conflict::{find_batch_overlap, now_ms, validate_room_fields, validate_span};
pub use error::{Constraint, EngineError, WriteOutcome};

use std::io;
use std::path::PathBuf;

use tokio::sync::{mpsc, oneshot, Mutex, RwLock};

use crate::model::*;
use crate::wal::{Commit, Wal};

use store::{event_target, EventTarget, Tables};

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        commit: Commit,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        snapshot: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingCommit = (Commit, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches commits for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders with the shared result.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { commit, response } => {
                let mut batch = vec![(commit, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { commit, response }) => {
                            batch.push((commit, response));
                        }
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break, // channel empty, flush what we have
                    }
                }

                metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                    .record(batch.len() as f64);
                let flush_start = std::time::Instant::now();
                let result = flush_batch(&mut wal, &batch);
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                respond_batch(batch, &result);

                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingCommit]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (commit, _) in batch {
        if let Err(e) = wal.append_buffered(commit) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so buffered bytes don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: Vec<PendingCommit>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { snapshot, response } => {
            let result = Wal::write_compact_file(wal.path(), &snapshot)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { commit, response } => {
            let result = wal.append_buffered(&commit).and_then(|()| wal.flush_sync());
            let _ = response.send(result);
        }
    }
}

/// The reservation store: three tables, their constraints, and the WAL behind them.
///
/// Lock order for writers: `checkpoint` (shared), then `catalog` if the write touches
/// rooms or slots, then a room lock, then slot locks in ascending id order.
pub struct Engine {
    pub(super) tables: Tables,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Held shared by every write, exclusively by compaction.
    pub(super) checkpoint: RwLock<()>,
    /// Serializes room and slot creation so id and name uniqueness checks can't race.
    pub(super) catalog: Mutex<()>,
}

impl Engine {
    /// Open the store, replaying the WAL at `wal_path`. Must be called inside a tokio runtime.
    pub fn new(wal_path: PathBuf) -> Result<Self, EngineError> {
        let (wal, commits) =
            Wal::recover(&wal_path).map_err(|e| EngineError::WalError(e.to_string()))?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            tables: Tables::new(),
            wal_tx,
            checkpoint: RwLock::new(()),
            catalog: Mutex::new(()),
        };

        let mut events = 0usize;
        for commit in &commits {
            for event in commit {
                engine.replay_event(event)?;
                events += 1;
            }
        }
        tracing::debug!(commits = commits.len(), events, "WAL replayed");

        Ok(engine)
    }

    /// Nothing else holds these Arcs during replay, so `try_write` always succeeds.
    /// Never use blocking_write here: `new` runs inside an async context.
    fn replay_event(&self, event: &Event) -> Result<(), EngineError> {
        match event_target(event) {
            EventTarget::NewRoom => {
                self.tables.apply_room_created(event);
            }
            EventTarget::Room(room_id) => {
                let rs = self
                    .tables
                    .get_room(&room_id)
                    .ok_or(EngineError::Inconsistent(room_id))?;
                let mut guard = rs
                    .try_write()
                    .map_err(|_| EngineError::Inconsistent(room_id))?;
                self.tables.apply_to_room(&mut guard, event);
            }
            EventTarget::Slot(slot_id) => {
                let ss = self
                    .tables
                    .get_slot(&slot_id)
                    .ok_or(EngineError::Inconsistent(slot_id))?;
                let mut guard = ss
                    .try_write()
                    .map_err(|_| EngineError::Inconsistent(slot_id))?;
                self.tables.apply_to_slot(&mut guard, event);
            }
        }
        Ok(())
    }

    /// Write one commit to the WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, commit: Commit) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                commit,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// WAL-append a single slot event, then apply it under the caller's slot lock.
    pub(super) async fn persist_and_apply_slot(
        &self,
        ss: &mut SlotState,
        event: Event,
    ) -> Result<(), EngineError> {
        self.wal_append(vec![event.clone()]).await?;
        self.tables.apply_to_slot(ss, &event);
        Ok(())
    }

    /// WAL-append room-scoped events as one commit, then apply them under the room lock.
    pub(super) async fn persist_and_apply_room(
        &self,
        rs: &mut RoomState,
        commit: Commit,
    ) -> Result<(), EngineError> {
        self.wal_append(commit.clone()).await?;
        for event in &commit {
            self.tables.apply_to_room(rs, event);
        }
        Ok(())
    }
}
