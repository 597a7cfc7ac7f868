use chrono::NaiveDate;

use crate::model::{GridError, Prn, TicketId};
use crate::store::StoreError;

use super::route::RouteError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BookingError {
    #[error("train {0} not found")]
    TrainNotFound(Prn),
    #[error("ticket {0} not found")]
    TicketNotFound(TicketId),
    #[error("user {0} not found")]
    UserNotFound(String),
    #[error("train {prn} has no seat grid for {date}")]
    SeatGridNotFound { prn: Prn, date: NaiveDate },
    #[error("train {0} already exists")]
    TrainAlreadyExists(Prn),
    #[error("user {0} already exists")]
    UserAlreadyExists(String),
    #[error("invalid route: {reason}")]
    InvalidRoute { reason: RouteError },
    #[error("travel date {0} is in the past")]
    InvalidDate(NaiveDate),
    #[error("not enough seats: requested {requested}, available {available}")]
    NotEnoughSeats { requested: usize, available: usize },
    #[error("no authenticated user")]
    Unauthenticated,
    #[error("seat grid kept changing; gave up after {attempts} attempts")]
    Conflict { attempts: u32 },
    #[error("workflow deadline exceeded")]
    DeadlineExceeded,
    #[error("seat grid rejected update: {0}")]
    GridRejected(GridError),
    #[error("invalid train: {0}")]
    InvalidTrain(String),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("persistence failure: {0}")]
    Persistence(#[from] StoreError),
}

impl BookingError {
    /// Stable label for the `status` metric dimension.
    pub fn label(&self) -> &'static str {
        match self {
            BookingError::TrainNotFound(_) => "train_not_found",
            BookingError::TicketNotFound(_) => "ticket_not_found",
            BookingError::UserNotFound(_) => "user_not_found",
            BookingError::SeatGridNotFound { .. } => "seat_grid_not_found",
            BookingError::TrainAlreadyExists(_) => "train_already_exists",
            BookingError::UserAlreadyExists(_) => "user_already_exists",
            BookingError::InvalidRoute { .. } => "invalid_route",
            BookingError::InvalidDate(_) => "invalid_date",
            BookingError::NotEnoughSeats { .. } => "not_enough_seats",
            BookingError::Unauthenticated => "unauthenticated",
            BookingError::Conflict { .. } => "conflict",
            BookingError::DeadlineExceeded => "deadline_exceeded",
            BookingError::GridRejected(_) => "grid_rejected",
            BookingError::InvalidTrain(_) => "invalid_train",
            BookingError::LimitExceeded(_) => "limit_exceeded",
            BookingError::Persistence(_) => "persistence",
        }
    }
}

impl From<GridError> for BookingError {
    fn from(e: GridError) -> Self {
        BookingError::GridRejected(e)
    }
}

impl From<RouteError> for BookingError {
    fn from(reason: RouteError) -> Self {
        BookingError::InvalidRoute { reason }
    }
}
