use chrono::NaiveDate;
use tracing::{info, warn};

use crate::model::*;
use crate::observability::{self, Operation};

use super::{BookingEngine, BookingError, record, resolve_route};

impl BookingEngine {
    /// Cancel a ticket the actor owns and free its seats.
    pub async fn cancel_ticket(
        &self,
        ticket_id: TicketId,
        actor: Option<&Actor>,
    ) -> Result<Cancellation, BookingError> {
        let started = std::time::Instant::now();
        let result = self.cancel(ticket_id, actor).await;
        record(Operation::Cancel, started, &result);
        result
    }

    async fn cancel(&self, ticket_id: TicketId, actor: Option<&Actor>) -> Result<Cancellation, BookingError> {
        let actor = Self::require_actor(actor)?;
        let deadline = self.deadline();
        let _user_guard = self
            .user_locks
            .lock_until(&actor.user_id, deadline)
            .await
            .map_err(|_| BookingError::DeadlineExceeded)?;

        let ticket = self.load_owned_ticket(actor, ticket_id).await?;
        let released = self.release_seats(&ticket, deadline).await?;

        self.tickets.delete_by_id(ticket.id).await?;
        match self.users.find_by_id(actor.user_id).await? {
            Some(mut user) => {
                user.tickets.retain(|id| *id != ticket.id);
                self.users.save(user).await?;
            }
            None => warn!(ticket = %ticket.id, user = %actor.user_id, "cancelled ticket has no owner record"),
        }

        info!(
            prn = %ticket.train,
            date = %ticket.seated_on,
            ticket = %ticket.id,
            released = released.len(),
            "ticket cancelled"
        );
        Ok(Cancellation {
            ticket_id: ticket.id,
            train: ticket.train,
            date: ticket.seated_on,
            released,
        })
    }

    /// Free whatever of the ticket's seats the grid it was booked on still shows
    /// booked. A train or grid that no longer exists has nothing to free.
    async fn release_seats(
        &self,
        ticket: &Ticket,
        deadline: tokio::time::Instant,
    ) -> Result<Vec<Seat>, BookingError> {
        let has_grid = self
            .trains
            .find_by_prn(&ticket.train)
            .await?
            .is_some_and(|t| t.seats.contains(ticket.seated_on));
        if !has_grid {
            warn!(prn = %ticket.train, date = %ticket.seated_on, ticket = %ticket.id, "no seat grid left to release into");
            return Ok(Vec::new());
        }

        let _section = self.lock_grid(&ticket.train, ticket.seated_on, deadline).await?;
        let outcome = self
            .update_grid(&ticket.train, ticket.seated_on, deadline, |grid| {
                let booked: Vec<Seat> = ticket.seats.iter().copied().filter(|s| grid.is_booked(*s)).collect();
                grid.release(&booked)?;
                Ok(booked)
            })
            .await;
        let released = match outcome {
            Ok((released, _)) => released,
            Err(BookingError::TrainNotFound(_) | BookingError::SeatGridNotFound { .. }) => {
                warn!(prn = %ticket.train, date = %ticket.seated_on, ticket = %ticket.id, "seat grid vanished before release");
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        if released.len() < ticket.seats.len() {
            warn!(
                ticket = %ticket.id,
                expected = ticket.seats.len(),
                released = released.len(),
                "some booked seats were already free"
            );
        }
        metrics::counter!(observability::SEATS_RELEASED_TOTAL).increment(released.len() as u64);
        Ok(released)
    }

    /// Move a ticket to `new_date`. Only the travel date changes: the seats stay
    /// booked on `seated_on` and nothing is reserved on the new date.
    pub async fn reschedule_ticket(
        &self,
        ticket_id: TicketId,
        new_date: NaiveDate,
        actor: Option<&Actor>,
    ) -> Result<Rescheduled, BookingError> {
        let started = std::time::Instant::now();
        let result = self.reschedule(ticket_id, new_date, actor).await;
        record(Operation::Reschedule, started, &result);
        result
    }

    async fn reschedule(
        &self,
        ticket_id: TicketId,
        new_date: NaiveDate,
        actor: Option<&Actor>,
    ) -> Result<Rescheduled, BookingError> {
        let actor = Self::require_actor(actor)?;
        let deadline = self.deadline();
        let _user_guard = self
            .user_locks
            .lock_until(&actor.user_id, deadline)
            .await
            .map_err(|_| BookingError::DeadlineExceeded)?;

        let mut ticket = self.load_owned_ticket(actor, ticket_id).await?;
        self.check_not_past(new_date)?;
        let train = self.load_train(&ticket.train).await?;
        resolve_route(&train, new_date, &ticket.source, &ticket.destination)?;

        let from = ticket.date;
        ticket.date = new_date;
        self.tickets.save(ticket).await?;

        warn!(
            ticket = %ticket_id,
            %from,
            to = %new_date,
            "ticket rescheduled without moving its seats between grids"
        );
        Ok(Rescheduled {
            ticket_id,
            from,
            to: new_date,
        })
    }

    /// Every ticket the actor holds, in booking order.
    pub async fn list_tickets(&self, actor: Option<&Actor>) -> Result<Vec<Ticket>, BookingError> {
        let started = std::time::Instant::now();
        let result: Result<Vec<Ticket>, BookingError> = async {
            let actor = Self::require_actor(actor)?;
            let user = self.load_user(actor).await?;
            let mut tickets = Vec::with_capacity(user.tickets.len());
            for id in user.tickets {
                match self.tickets.find_by_id(id).await? {
                    Some(ticket) => tickets.push(ticket),
                    None => warn!(ticket = %id, user = %user.id, "user references a missing ticket"),
                }
            }
            Ok(tickets)
        }
        .await;
        record(Operation::ListTickets, started, &result);
        result
    }

    pub async fn find_ticket(&self, ticket_id: TicketId, actor: Option<&Actor>) -> Result<Ticket, BookingError> {
        let started = std::time::Instant::now();
        let result: Result<Ticket, BookingError> = async {
            let actor = Self::require_actor(actor)?;
            self.load_owned_ticket(actor, ticket_id).await
        }
        .await;
        record(Operation::FindTicket, started, &result);
        result
    }
}
