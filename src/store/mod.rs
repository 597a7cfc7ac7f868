//! Storage collaborators of the booking engine.
//!
//! The engine only talks to these traits. [`memory::InMemoryStore`] is the
//! reference implementation; [`journal::JournaledStore`] adds a durable log.

pub mod journal;
pub mod memory;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::model::*;

pub use journal::JournaledStore;
pub use memory::InMemoryStore;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Optimistic commit lost a race: the stored grid moved on since it was read.
    #[error("grid version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u64, found: u64 },
    /// A grid commit targeted a train or date the catalog does not hold.
    #[error("no seat grid stored for train {prn} on {date}")]
    GridMissing { prn: Prn, date: NaiveDate },
    #[error("WAL error: {0}")]
    Wal(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait TrainCatalog: Send + Sync {
    async fn find_by_prn(&self, prn: &Prn) -> Result<Option<Train>, StoreError>;

    async fn find_all(&self) -> Result<Vec<Train>, StoreError>;

    /// Upsert a whole train. Every stored grid the write replaces gets a fresh
    /// version so in-flight optimistic commits against it fail.
    async fn save(&self, train: Train) -> Result<Train, StoreError>;

    async fn save_all(&self, trains: Vec<Train>) -> Result<(), StoreError>;

    /// Conditionally replace one date's grid. Succeeds only when `grid.version`
    /// equals the stored version; the stored copy is then written with
    /// `version + 1` and returned.
    async fn commit_grid(
        &self,
        prn: &Prn,
        date: NaiveDate,
        grid: SeatGrid,
    ) -> Result<SeatGrid, StoreError>;
}

#[async_trait]
pub trait TicketLedger: Send + Sync {
    async fn save(&self, ticket: Ticket) -> Result<Ticket, StoreError>;

    async fn find_by_id(&self, id: TicketId) -> Result<Option<Ticket>, StoreError>;

    async fn delete_by_id(&self, id: TicketId) -> Result<(), StoreError>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn save(&self, user: User) -> Result<User, StoreError>;

    /// Case-insensitive.
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, StoreError>;
}

/// Source of "today" for past-date checks.
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

/// Local calendar date of the host.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        chrono::Local::now().date_naive()
    }
}

/// A clock pinned to one date.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }
}
