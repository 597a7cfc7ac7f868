use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;
use ulid::Ulid;

use crate::limits::MAX_SEATS_PER_BOOKING;
use crate::model::*;
use crate::observability::{self, Operation};

use super::{BookingEngine, BookingError, allocate, record, resolve_route};

/// Book `seats` seats on `train` from `source` to `destination` on `date`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequest {
    pub train: Prn,
    pub source: String,
    pub destination: String,
    pub date: NaiveDate,
    pub seats: usize,
}

impl BookingRequest {
    pub fn new(
        train: impl Into<Prn>,
        source: impl Into<String>,
        destination: impl Into<String>,
        date: NaiveDate,
        seats: usize,
    ) -> Self {
        Self {
            train: train.into(),
            source: source.into(),
            destination: destination.into(),
            date,
            seats,
        }
    }
}

impl BookingEngine {
    pub async fn book_ticket(
        &self,
        request: &BookingRequest,
        actor: Option<&Actor>,
    ) -> Result<Ticket, BookingError> {
        let started = std::time::Instant::now();
        let result = self.book(request, actor).await;
        record(Operation::Book, started, &result);
        result
    }

    async fn book(&self, req: &BookingRequest, actor: Option<&Actor>) -> Result<Ticket, BookingError> {
        let actor = Self::require_actor(actor)?;
        if req.seats == 0 {
            return Err(BookingError::LimitExceeded("at least one seat must be requested"));
        }
        if req.seats > MAX_SEATS_PER_BOOKING {
            return Err(BookingError::LimitExceeded("too many seats in one booking"));
        }
        let deadline = self.deadline();

        let user = self.load_user(actor).await?;
        let train = self.load_train(&req.train).await?;
        let leg = resolve_route(&train, req.date, &req.source, &req.destination)?;
        let (arrival_at_source, arrival_at_destination) = (leg.departure(), leg.arrival());
        self.check_not_past(req.date)?;
        if !train.seats.contains(req.date) {
            return Err(BookingError::SeatGridNotFound {
                prn: train.prn.clone(),
                date: req.date,
            });
        }

        let section = self.lock_grid(&train.prn, req.date, deadline).await?;
        let (seats, grid) = self
            .update_grid(&train.prn, req.date, deadline, |grid| {
                let seats = allocate(grid, req.seats)?;
                grid.occupy(&seats)?;
                Ok(seats)
            })
            .await?;
        drop(section);
        metrics::counter!(observability::SEATS_ALLOCATED_TOTAL).increment(seats.len() as u64);

        // The grid is committed; from here on failures surface without rollback.
        let ticket = Ticket {
            id: Ulid::new(),
            user_id: user.id,
            train: train.prn.clone(),
            date: req.date,
            seated_on: req.date,
            source: req.source.clone(),
            destination: req.destination.clone(),
            arrival_at_source,
            arrival_at_destination,
            seats,
        };
        let ticket = self.tickets.save(ticket).await.inspect_err(|e| {
            tracing::error!(prn = %train.prn, date = %req.date, "seats committed but ticket not saved: {e}");
        })?;
        self.attach_ticket(actor, ticket.id).await?;

        info!(
            prn = %ticket.train,
            date = %ticket.date,
            ticket = %ticket.id,
            seats = ticket.seats.len(),
            free = grid.free_count(),
            "ticket booked"
        );
        Ok(ticket)
    }

    /// Append a ticket to the owner's list under the user's lock.
    async fn attach_ticket(&self, actor: &Actor, id: TicketId) -> Result<(), BookingError> {
        let _user_guard = self.user_locks.lock(&actor.user_id).await;
        let mut user = self.load_user(actor).await?;
        if !user.tickets.contains(&id) {
            user.tickets.push(id);
        }
        self.users.save(user).await?;
        Ok(())
    }
}
