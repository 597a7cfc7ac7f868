use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;

use crate::model::*;

use super::{StoreError, TicketLedger, TrainCatalog, UserDirectory};

/// DashMap-backed trains, tickets and users.
///
/// Mutations are split into a pure `prepare_*` step that computes the record
/// to store and [`InMemoryStore::apply`], so a journal can log the exact
/// record between the two.
pub struct InMemoryStore {
    trains: DashMap<Prn, Train>,
    tickets: DashMap<TicketId, Ticket>,
    users: DashMap<UserId, User>,
    /// Lower-cased email → user id.
    emails: DashMap<String, UserId>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            trains: DashMap::new(),
            tickets: DashMap::new(),
            users: DashMap::new(),
            emails: DashMap::new(),
        }
    }

    pub fn train_count(&self) -> usize {
        self.trains.len()
    }

    pub fn ticket_count(&self) -> usize {
        self.tickets.len()
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    // ── Prepare (no side effects) ────────────────────────────

    /// The train as it will be stored: grids replacing a stored grid move past
    /// both the stored and the incoming version.
    pub fn prepare_train(&self, mut train: Train) -> Train {
        if let Some(stored) = self.trains.get(&train.prn) {
            for (date, grid) in train.seats.iter_mut() {
                if let Some(old) = stored.seats.get(date) {
                    grid.version = old.version.max(grid.version) + 1;
                }
            }
        }
        train
    }

    /// The grid as it will be stored, or why the commit is refused.
    pub fn prepare_grid(
        &self,
        prn: &Prn,
        date: NaiveDate,
        mut grid: SeatGrid,
    ) -> Result<SeatGrid, StoreError> {
        let missing = || StoreError::GridMissing {
            prn: prn.clone(),
            date,
        };
        let train = self.trains.get(prn).ok_or_else(missing)?;
        let stored = train.seats.get(date).ok_or_else(missing)?;
        if stored.version != grid.version {
            return Err(StoreError::VersionMismatch {
                expected: grid.version,
                found: stored.version,
            });
        }
        grid.version += 1;
        Ok(grid)
    }

    // ── Apply ────────────────────────────────────────────────

    /// Install the record an event carries. Used for live writes and WAL replay.
    pub fn apply(&self, event: &Event) {
        match event {
            Event::TrainSaved { train } => {
                self.trains.insert(train.prn.clone(), train.clone());
            }
            Event::GridCommitted { prn, date, grid } => {
                if let Some(mut train) = self.trains.get_mut(prn) {
                    train.seats.insert(*date, grid.clone());
                }
            }
            Event::TicketSaved { ticket } => {
                self.tickets.insert(ticket.id, ticket.clone());
            }
            Event::TicketDeleted { id } => {
                self.tickets.remove(id);
            }
            Event::UserSaved { user } => {
                let email = user.email.to_lowercase();
                if let Some(previous) = self.users.insert(user.id, user.clone()) {
                    let old_email = previous.email.to_lowercase();
                    if old_email != email {
                        self.emails.remove(&old_email);
                    }
                }
                self.emails.insert(email, user.id);
            }
        }
    }

    /// Events that rebuild the current state from nothing.
    pub fn snapshot(&self) -> Vec<Event> {
        let mut events = Vec::with_capacity(self.trains.len() + self.tickets.len() + self.users.len());
        events.extend(self.trains.iter().map(|e| Event::TrainSaved {
            train: e.value().clone(),
        }));
        events.extend(self.users.iter().map(|e| Event::UserSaved {
            user: e.value().clone(),
        }));
        events.extend(self.tickets.iter().map(|e| Event::TicketSaved {
            ticket: e.value().clone(),
        }));
        events
    }

    // ── Reads ────────────────────────────────────────────────

    pub fn get_train(&self, prn: &Prn) -> Option<Train> {
        self.trains.get(prn).map(|e| e.value().clone())
    }

    pub fn all_trains(&self) -> Vec<Train> {
        let mut trains: Vec<Train> = self.trains.iter().map(|e| e.value().clone()).collect();
        trains.sort_by(|a, b| a.prn.cmp(&b.prn));
        trains
    }

    pub fn get_ticket(&self, id: TicketId) -> Option<Ticket> {
        self.tickets.get(&id).map(|e| e.value().clone())
    }

    pub fn get_user(&self, id: UserId) -> Option<User> {
        self.users.get(&id).map(|e| e.value().clone())
    }

    pub fn get_user_by_email(&self, email: &str) -> Option<User> {
        let id = *self.emails.get(&email.to_lowercase())?;
        self.get_user(id)
    }
}

#[async_trait]
impl TrainCatalog for InMemoryStore {
    async fn find_by_prn(&self, prn: &Prn) -> Result<Option<Train>, StoreError> {
        Ok(self.get_train(prn))
    }

    async fn find_all(&self) -> Result<Vec<Train>, StoreError> {
        Ok(self.all_trains())
    }

    async fn save(&self, train: Train) -> Result<Train, StoreError> {
        let train = self.prepare_train(train);
        self.apply(&Event::TrainSaved { train: train.clone() });
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
        // Check and write under one shard lock so concurrent commits cannot both pass.
        let mut train = self.trains.get_mut(prn).ok_or_else(|| StoreError::GridMissing {
            prn: prn.clone(),
            date,
        })?;
        let stored = train.seats.get_mut(date).ok_or_else(|| StoreError::GridMissing {
            prn: prn.clone(),
            date,
        })?;
        if stored.version != grid.version {
            return Err(StoreError::VersionMismatch {
                expected: grid.version,
                found: stored.version,
            });
        }
        let mut next = grid;
        next.version += 1;
        *stored = next.clone();
        Ok(next)
    }
}

#[async_trait]
impl TicketLedger for InMemoryStore {
    async fn save(&self, ticket: Ticket) -> Result<Ticket, StoreError> {
        self.apply(&Event::TicketSaved { ticket: ticket.clone() });
        Ok(ticket)
    }

    async fn find_by_id(&self, id: TicketId) -> Result<Option<Ticket>, StoreError> {
        Ok(self.get_ticket(id))
    }

    async fn delete_by_id(&self, id: TicketId) -> Result<(), StoreError> {
        self.apply(&Event::TicketDeleted { id });
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for InMemoryStore {
    async fn save(&self, user: User) -> Result<User, StoreError> {
        self.apply(&Event::UserSaved { user: user.clone() });
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self.get_user_by_email(email))
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, StoreError> {
        Ok(self.get_user(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;
    use ulid::Ulid;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2030, 3, 14).unwrap()
    }

    fn at(h: u32) -> NaiveDateTime {
        day().and_hms_opt(h, 0, 0).unwrap()
    }

    fn train() -> Train {
        Train::new("12951", "Rajdhani").with_run(
            day(),
            vec![Stop::new("A", at(8)), Stop::new("B", at(10))],
            2,
            3,
        )
    }

    #[tokio::test]
    async fn commit_grid_bumps_version() {
        let store = InMemoryStore::new();
        TrainCatalog::save(&store, train()).await.unwrap();

        let prn = Prn::from("12951");
        let mut grid = store.get_train(&prn).unwrap().seats.get(day()).unwrap().clone();
        grid.occupy(&[Seat::new(0, 0)]).unwrap();

        let committed = store.commit_grid(&prn, day(), grid).await.unwrap();
        assert_eq!(committed.version, 1);
        let stored = store.get_train(&prn).unwrap();
        assert!(!stored.seats.get(day()).unwrap().is_free(Seat::new(0, 0)));
    }

    #[tokio::test]
    async fn stale_commit_is_rejected() {
        let store = InMemoryStore::new();
        TrainCatalog::save(&store, train()).await.unwrap();
        let prn = Prn::from("12951");
        let snapshot = store.get_train(&prn).unwrap().seats.get(day()).unwrap().clone();

        store.commit_grid(&prn, day(), snapshot.clone()).await.unwrap();
        let err = store.commit_grid(&prn, day(), snapshot).await.unwrap_err();
        assert_eq!(err, StoreError::VersionMismatch { expected: 0, found: 1 });
    }

    #[tokio::test]
    async fn commit_to_unknown_date_fails() {
        let store = InMemoryStore::new();
        TrainCatalog::save(&store, train()).await.unwrap();
        let other = NaiveDate::from_ymd_opt(2030, 3, 15).unwrap();
        let err = store
            .commit_grid(&Prn::from("12951"), other, SeatGrid::new(2, 3))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::GridMissing { .. }));
    }

    #[tokio::test]
    async fn resaving_train_invalidates_grid_snapshots() {
        let store = InMemoryStore::new();
        TrainCatalog::save(&store, train()).await.unwrap();
        let prn = Prn::from("12951");
        let snapshot = store.get_train(&prn).unwrap().seats.get(day()).unwrap().clone();

        TrainCatalog::save(&store, train()).await.unwrap();
        let err = store.commit_grid(&prn, day(), snapshot).await.unwrap_err();
        assert!(matches!(err, StoreError::VersionMismatch { expected: 0, found: 1 }));
    }

    #[tokio::test]
    async fn find_all_is_sorted_by_prn() {
        let store = InMemoryStore::new();
        store
            .save_all(vec![Train::new("300", "C"), Train::new("100", "A"), Train::new("200", "B")])
            .await
            .unwrap();
        let prns: Vec<_> = store.find_all().await.unwrap().into_iter().map(|t| t.prn).collect();
        assert_eq!(prns, vec![Prn::from("100"), Prn::from("200"), Prn::from("300")]);
    }

    #[tokio::test]
    async fn user_lookup_by_email_ignores_case() {
        let store = InMemoryStore::new();
        let user = User::new("bob@example.com", "h");
        UserDirectory::save(&store, user.clone()).await.unwrap();
        let found = store.find_by_email("BOB@Example.com").await.unwrap().unwrap();
        assert_eq!(found.id, user.id);
    }

    #[tokio::test]
    async fn changing_email_drops_old_index_entry() {
        let store = InMemoryStore::new();
        let mut user = User::new("old@example.com", "h");
        UserDirectory::save(&store, user.clone()).await.unwrap();
        user.email = "new@example.com".into();
        UserDirectory::save(&store, user.clone()).await.unwrap();
        assert!(store.find_by_email("old@example.com").await.unwrap().is_none());
        assert!(store.find_by_email("new@example.com").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn ticket_save_find_delete() {
        let store = InMemoryStore::new();
        let ticket = Ticket {
            id: Ulid::new(),
            user_id: Ulid::new(),
            train: Prn::from("12951"),
            date: day(),
            seated_on: day(),
            source: "A".into(),
            destination: "B".into(),
            arrival_at_source: at(8),
            arrival_at_destination: at(10),
            seats: vec![Seat::new(0, 0)],
        };
        TicketLedger::save(&store, ticket.clone()).await.unwrap();
        assert_eq!(TicketLedger::find_by_id(&store, ticket.id).await.unwrap(), Some(ticket.clone()));
        store.delete_by_id(ticket.id).await.unwrap();
        assert_eq!(TicketLedger::find_by_id(&store, ticket.id).await.unwrap(), None);
    }

    #[test]
    fn snapshot_rebuilds_state() {
        let store = InMemoryStore::new();
        store.apply(&Event::TrainSaved { train: train() });
        store.apply(&Event::UserSaved { user: User::new("c@d.io", "h") });

        let copy = InMemoryStore::new();
        for e in store.snapshot() {
            copy.apply(&e);
        }
        assert_eq!(copy.all_trains(), store.all_trains());
        assert_eq!(copy.user_count(), 1);
        assert!(copy.get_user_by_email("c@d.io").is_some());
    }
}
