use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::engine::locks::KeyedLocks;
use crate::model::*;
use crate::observability;
use crate::wal::Wal;

use super::{InMemoryStore, StoreError, TicketLedger, TrainCatalog, UserDirectory};

// ── Group-commit WAL channel ─────────────────────────────

type Ack = oneshot::Sender<io::Result<()>>;

enum WalCommand {
    Append { event: Event, response: Ack },
    Compact { events: Vec<Event>, response: Ack },
    AppendsSinceCompact { response: oneshot::Sender<u64> },
}

/// Owns the WAL. Each wakeup buffers every append already queued and fsyncs
/// them together before acknowledging any of them.
async fn wal_writer_loop(mut wal: Wal<Event>, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }

        metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        if let Err(e) = &result {
            tracing::error!(path = %wal.path().display(), "WAL flush failed: {e}");
        }
        respond_batch(batch, &result);

        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn flush_batch(wal: &mut Wal<Event>, batch: &[(Event, Ack)]) -> io::Result<()> {
    let appended = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so a half-written batch does not prefix the next one.
    let flushed = wal.flush_sync();
    appended.and(flushed)
}

fn respond_batch(batch: Vec<(Event, Ack)>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal<Event>, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result =
                Wal::write_snapshot(wal.path(), &events).and_then(|()| wal.install_snapshot());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => {}
    }
}

/// [`InMemoryStore`] behind a write-ahead log.
///
/// Every mutation is appended and fsynced (group commit) before it becomes
/// visible in memory. Writes to one train, ticket or user are serialized so the
/// log order matches the order they were applied.
pub struct JournaledStore {
    inner: InMemoryStore,
    wal_tx: mpsc::Sender<WalCommand>,
    path: PathBuf,
    trains: KeyedLocks<Prn>,
    records: KeyedLocks<Ulid>,
    /// Writers share it; compaction takes it exclusively so its snapshot
    /// contains every logged write.
    gate: RwLock<()>,
}

impl JournaledStore {
    /// Replay the log at `path` and start the writer task. Must run inside a
    /// Tokio runtime.
    pub fn open(path: &Path) -> io::Result<Self> {
        let events = Wal::<Event>::replay(path)?;
        let wal = Wal::open(path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let inner = InMemoryStore::new();
        for event in &events {
            inner.apply(event);
        }
        tracing::info!(
            path = %path.display(),
            events = events.len(),
            trains = inner.train_count(),
            tickets = inner.ticket_count(),
            users = inner.user_count(),
            "journal replayed"
        );

        Ok(Self {
            inner,
            wal_tx,
            path: path.to_path_buf(),
            trains: KeyedLocks::new(),
            records: KeyedLocks::new(),
            gate: RwLock::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn wal_append(&self, event: Event) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append { event, response: tx })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))
    }

    /// Log, then apply. Caller holds the gate and the record's key lock.
    async fn persist(&self, event: Event) -> Result<(), StoreError> {
        self.wal_append(event.clone()).await?;
        self.inner.apply(&event);
        Ok(())
    }

    /// Rewrite the log as the minimal event list for the current state.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let _gate = self.gate.write().await;
        let events = self.inner.snapshot();
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))?;
        tracing::info!(path = %self.path.display(), events = count, "journal compacted");
        Ok(())
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

#[async_trait]
impl TrainCatalog for JournaledStore {
    async fn find_by_prn(&self, prn: &Prn) -> Result<Option<Train>, StoreError> {
        Ok(self.inner.get_train(prn))
    }

    async fn find_all(&self) -> Result<Vec<Train>, StoreError> {
        Ok(self.inner.all_trains())
    }

    async fn save(&self, train: Train) -> Result<Train, StoreError> {
        let _gate = self.gate.read().await;
        let _key = self.trains.lock(&train.prn).await;
        let train = self.inner.prepare_train(train);
        self.persist(Event::TrainSaved { train: train.clone() }).await?;
        Ok(train)
    }

    async fn save_all(&self, trains: Vec<Train>) -> Result<(), StoreError> {
        for train in trains {
            TrainCatalog::save(self, train).await?;
        }
        Ok(())
    }

    async fn commit_grid(
        &self,
        prn: &Prn,
        date: NaiveDate,
        grid: SeatGrid,
    ) -> Result<SeatGrid, StoreError> {
        let _gate = self.gate.read().await;
        let _key = self.trains.lock(prn).await;
        let grid = self.inner.prepare_grid(prn, date, grid)?;
        self.persist(Event::GridCommitted {
            prn: prn.clone(),
            date,
            grid: grid.clone(),
        })
        .await?;
        Ok(grid)
    }
}

#[async_trait]
impl TicketLedger for JournaledStore {
    async fn save(&self, ticket: Ticket) -> Result<Ticket, StoreError> {
        let _gate = self.gate.read().await;
        let _key = self.records.lock(&ticket.id).await;
        self.persist(Event::TicketSaved { ticket: ticket.clone() }).await?;
        Ok(ticket)
    }

    async fn find_by_id(&self, id: TicketId) -> Result<Option<Ticket>, StoreError> {
        Ok(self.inner.get_ticket(id))
    }

    async fn delete_by_id(&self, id: TicketId) -> Result<(), StoreError> {
        let _gate = self.gate.read().await;
        let _key = self.records.lock(&id).await;
        if self.inner.get_ticket(id).is_none() {
            return Ok(());
        }
        self.persist(Event::TicketDeleted { id }).await
    }
}

#[async_trait]
impl UserDirectory for JournaledStore {
    async fn save(&self, user: User) -> Result<User, StoreError> {
        let _gate = self.gate.read().await;
        let _key = self.records.lock(&user.id).await;
        self.persist(Event::UserSaved { user: user.clone() }).await?;
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self.inner.get_user_by_email(email))
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, StoreError> {
        Ok(self.inner.get_user(id))
    }
}
