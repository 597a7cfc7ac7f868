mod allocator;
mod booking;
mod error;
pub mod locks;
pub mod route;
mod tickets;
mod trains;
mod users;

pub use allocator::allocate;
pub use booking::BookingRequest;
pub use error::BookingError;
pub use route::{Leg, RouteError, arrival_time, is_valid_route, resolve_route};

use std::sync::Arc;

use chrono::NaiveDate;
use tokio::time::Instant;

use crate::config::EngineConfig;
use crate::model::*;
use crate::observability::{self, Operation};
use crate::store::{Clock, StoreError, TicketLedger, TrainCatalog, UserDirectory};

use locks::{KeyGuard, KeyedLocks};

/// Orchestrates search, booking, cancellation and reschedule over the store
/// traits.
///
/// Every read-modify-write of a seat grid runs inside that (train, date)'s
/// section and commits through the catalog's versioned `commit_grid`, so two
/// workflows can never hand out the same seat.
pub struct BookingEngine {
    trains: Arc<dyn TrainCatalog>,
    tickets: Arc<dyn TicketLedger>,
    users: Arc<dyn UserDirectory>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    /// (train, date) grid sections.
    grid_locks: KeyedLocks<(Prn, NaiveDate)>,
    /// Serializes edits of one user's ticket list.
    user_locks: KeyedLocks<UserId>,
    /// Serializes the admin path per PRN.
    train_locks: KeyedLocks<Prn>,
    registration: tokio::sync::Mutex<()>,
}

impl BookingEngine {
    pub fn new(
        trains: Arc<dyn TrainCatalog>,
        tickets: Arc<dyn TicketLedger>,
        users: Arc<dyn UserDirectory>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        Self {
            trains,
            tickets,
            users,
            clock,
            config,
            grid_locks: KeyedLocks::new(),
            user_locks: KeyedLocks::new(),
            train_locks: KeyedLocks::new(),
            registration: tokio::sync::Mutex::new(()),
        }
    }

    /// Engine over one store that implements all three collaborators.
    pub fn with_store<S>(store: Arc<S>, clock: Arc<dyn Clock>, config: EngineConfig) -> Self
    where
        S: TrainCatalog + TicketLedger + UserDirectory + 'static,
    {
        Self::new(store.clone(), store.clone(), store, clock, config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Drop lock entries nobody holds. Returns how many were removed.
    pub fn prune_locks(&self) -> usize {
        self.grid_locks.prune() + self.user_locks.prune() + self.train_locks.prune()
    }

    // ── Shared workflow steps ────────────────────────────────

    fn deadline(&self) -> Instant {
        Instant::now() + self.config.workflow_timeout
    }

    fn check_deadline(deadline: Instant) -> Result<(), BookingError> {
        if Instant::now() >= deadline {
            return Err(BookingError::DeadlineExceeded);
        }
        Ok(())
    }

    fn require_actor(actor: Option<&Actor>) -> Result<&Actor, BookingError> {
        actor.ok_or(BookingError::Unauthenticated)
    }

    fn check_not_past(&self, date: NaiveDate) -> Result<(), BookingError> {
        if date < self.clock.today() {
            return Err(BookingError::InvalidDate(date));
        }
        Ok(())
    }

    async fn load_train(&self, prn: &Prn) -> Result<Train, BookingError> {
        self.trains
            .find_by_prn(prn)
            .await?
            .ok_or_else(|| BookingError::TrainNotFound(prn.clone()))
    }

    async fn load_user(&self, actor: &Actor) -> Result<User, BookingError> {
        self.users
            .find_by_id(actor.user_id)
            .await?
            .ok_or_else(|| BookingError::UserNotFound(actor.email.clone()))
    }

    /// A ticket the actor owns. Someone else's ticket reads as missing.
    async fn load_owned_ticket(&self, actor: &Actor, id: TicketId) -> Result<Ticket, BookingError> {
        self.tickets
            .find_by_id(id)
            .await?
            .filter(|t| t.user_id == actor.user_id)
            .ok_or(BookingError::TicketNotFound(id))
    }

    async fn lock_grid(&self, prn: &Prn, date: NaiveDate, deadline: Instant) -> Result<KeyGuard, BookingError> {
        let started = std::time::Instant::now();
        let guard = self
            .grid_locks
            .lock_until(&(prn.clone(), date), deadline)
            .await
            .map_err(|_| BookingError::DeadlineExceeded)?;
        metrics::histogram!(observability::LOCK_WAIT_SECONDS).record(started.elapsed().as_secs_f64());
        Ok(guard)
    }

    /// Read the grid, let `change` edit it, commit conditionally on the version
    /// read. A lost version race re-reads and re-runs `change`, up to
    /// `max_conflict_retries` extra times. Caller holds the grid section.
    async fn update_grid<T>(
        &self,
        prn: &Prn,
        date: NaiveDate,
        deadline: Instant,
        mut change: impl FnMut(&mut SeatGrid) -> Result<T, BookingError>,
    ) -> Result<(T, SeatGrid), BookingError> {
        let attempts = self.config.max_conflict_retries.saturating_add(1);
        for attempt in 1..=attempts {
            let train = self.load_train(prn).await?;
            let mut grid = train.seats.get(date).cloned().ok_or_else(|| BookingError::SeatGridNotFound {
                prn: prn.clone(),
                date,
            })?;
            let out = change(&mut grid)?;

            Self::check_deadline(deadline)?;
            match self.trains.commit_grid(prn, date, grid).await {
                Ok(committed) => return Ok((out, committed)),
                Err(StoreError::VersionMismatch { expected, found }) => {
                    metrics::counter!(observability::GRID_CONFLICTS_TOTAL).increment(1);
                    tracing::debug!(%prn, %date, attempt, expected, found, "grid commit lost a version race");
                }
                Err(StoreError::GridMissing { .. }) => {
                    return Err(BookingError::SeatGridNotFound { prn: prn.clone(), date });
                }
                Err(e) => return Err(e.into()),
            }
        }
        tracing::warn!(%prn, %date, attempts, "giving up on grid commit");
        Err(BookingError::Conflict { attempts })
    }
}

/// Count and time a finished workflow.
fn record<T>(operation: Operation, started: std::time::Instant, result: &Result<T, BookingError>) {
    let op = operation.label();
    let status = match result {
        Ok(_) => "ok",
        Err(e) => e.label(),
    };
    metrics::counter!(observability::WORKFLOWS_TOTAL, "operation" => op, "status" => status).increment(1);
    metrics::histogram!(observability::WORKFLOW_DURATION_SECONDS, "operation" => op)
        .record(started.elapsed().as_secs_f64());
}
