use std::collections::BTreeMap;
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::limits::*;

pub type TicketId = Ulid;
pub type UserId = Ulid;

/// Train reservation number. Unique and immutable for the lifetime of a train.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Prn(String);

impl Prn {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Prn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Prn {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Prn {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Row/column coordinate of a single seat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Seat {
    pub row: usize,
    pub col: usize,
}

impl Seat {
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }
}

impl From<(usize, usize)> for Seat {
    fn from((row, col): (usize, usize)) -> Self {
        Self { row, col }
    }
}

/// Why a grid mutation was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GridError {
    OutOfBounds(Seat),
    AlreadyBooked(Seat),
    AlreadyFree(Seat),
    Ragged { row: usize, expected: usize, found: usize },
    BadCell { row: usize, col: usize, value: u8 },
}

impl fmt::Display for GridError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GridError::OutOfBounds(s) => write!(f, "seat ({}, {}) is outside the grid", s.row, s.col),
            GridError::AlreadyBooked(s) => write!(f, "seat ({}, {}) is already booked", s.row, s.col),
            GridError::AlreadyFree(s) => write!(f, "seat ({}, {}) is not booked", s.row, s.col),
            GridError::Ragged { row, expected, found } => {
                write!(f, "row {row} has {found} seats, expected {expected}")
            }
            GridError::BadCell { row, col, value } => {
                write!(f, "cell ({row}, {col}) holds {value}, expected 0 or 1")
            }
        }
    }
}

impl std::error::Error for GridError {}

/// Seat occupancy for one train on one date, stored row-major.
///
/// `version` is bumped by the store on every committed write and is what
/// optimistic commits compare against. Serialized as a 0/1 matrix, so every
/// decoded grid went through [`SeatGrid::from_rows`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "GridRecord", into = "GridRecord")]
pub struct SeatGrid {
    rows: usize,
    cols: usize,
    cells: Vec<bool>,
    pub version: u64,
}

#[derive(Serialize, Deserialize)]
struct GridRecord {
    rows: Vec<Vec<u8>>,
    #[serde(default)]
    version: u64,
}

impl TryFrom<GridRecord> for SeatGrid {
    type Error = GridError;

    fn try_from(record: GridRecord) -> Result<Self, GridError> {
        let mut grid = SeatGrid::from_rows(record.rows)?;
        grid.version = record.version;
        Ok(grid)
    }
}

impl From<SeatGrid> for GridRecord {
    fn from(grid: SeatGrid) -> Self {
        GridRecord {
            rows: grid.to_rows(),
            version: grid.version,
        }
    }
}

impl SeatGrid {
    /// An all-free grid.
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            cells: vec![false; rows * cols],
            version: 0,
        }
    }

    /// Build from a 0/1 matrix (1 = booked).
    pub fn from_rows(rows: Vec<Vec<u8>>) -> Result<Self, GridError> {
        let cols = rows.first().map_or(0, Vec::len);
        let mut cells = Vec::with_capacity(rows.iter().map(Vec::len).sum());
        for (r, row) in rows.iter().enumerate() {
            if row.len() != cols {
                return Err(GridError::Ragged {
                    row: r,
                    expected: cols,
                    found: row.len(),
                });
            }
            for (c, &value) in row.iter().enumerate() {
                match value {
                    0 => cells.push(false),
                    1 => cells.push(true),
                    _ => return Err(GridError::BadCell { row: r, col: c, value }),
                }
            }
        }
        Ok(Self {
            rows: rows.len(),
            cols,
            cells,
            version: 0,
        })
    }

    pub fn to_rows(&self) -> Vec<Vec<u8>> {
        if self.cols == 0 {
            return vec![Vec::new(); self.rows];
        }
        self.cells
            .chunks(self.cols)
            .map(|row| row.iter().map(|&b| u8::from(b)).collect())
            .collect()
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn capacity(&self) -> usize {
        self.cells.len()
    }

    pub fn free_count(&self) -> usize {
        self.cells.iter().filter(|booked| !**booked).count()
    }

    /// Row-major index → seat.
    pub fn seat_at(&self, index: usize) -> Seat {
        Seat::new(index / self.cols, index % self.cols)
    }

    fn index_of(&self, seat: Seat) -> Option<usize> {
        (seat.row < self.rows && seat.col < self.cols).then(|| seat.row * self.cols + seat.col)
    }

    pub fn is_free(&self, seat: Seat) -> bool {
        self.index_of(seat).is_some_and(|i| !self.cells[i])
    }

    pub fn is_booked(&self, seat: Seat) -> bool {
        self.index_of(seat).is_some_and(|i| self.cells[i])
    }

    /// Occupancy bits in row-major order (`true` = booked).
    pub fn cells(&self) -> &[bool] {
        &self.cells
    }

    /// Mark every seat booked. All-or-nothing: fails without touching the grid
    /// if any seat is out of range or already booked.
    pub fn occupy(&mut self, seats: &[Seat]) -> Result<(), GridError> {
        let mut indexes = Vec::with_capacity(seats.len());
        for &seat in seats {
            let i = self.index_of(seat).ok_or(GridError::OutOfBounds(seat))?;
            if self.cells[i] || indexes.contains(&i) {
                return Err(GridError::AlreadyBooked(seat));
            }
            indexes.push(i);
        }
        for i in indexes {
            self.cells[i] = true;
        }
        Ok(())
    }

    /// Mark every seat free. All-or-nothing, mirror of [`SeatGrid::occupy`].
    pub fn release(&mut self, seats: &[Seat]) -> Result<(), GridError> {
        let mut indexes = Vec::with_capacity(seats.len());
        for &seat in seats {
            let i = self.index_of(seat).ok_or(GridError::OutOfBounds(seat))?;
            if !self.cells[i] || indexes.contains(&i) {
                return Err(GridError::AlreadyFree(seat));
            }
            indexes.push(i);
        }
        for i in indexes {
            self.cells[i] = false;
        }
        Ok(())
    }
}

/// A station on a train's route with the train's arrival time there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stop {
    pub station: String,
    pub arrival: NaiveDateTime,
}

impl Stop {
    pub fn new(station: impl Into<String>, arrival: NaiveDateTime) -> Self {
        Self {
            station: station.into(),
            arrival,
        }
    }
}

/// Values keyed by travel date. A missing date means "not scheduled", never "empty".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatePartition<T>(BTreeMap<NaiveDate, T>);

impl<T> Default for DatePartition<T> {
    fn default() -> Self {
        Self(BTreeMap::new())
    }
}

impl<T> DatePartition<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, date: NaiveDate) -> Option<&T> {
        self.0.get(&date)
    }

    pub fn get_mut(&mut self, date: NaiveDate) -> Option<&mut T> {
        self.0.get_mut(&date)
    }

    pub fn insert(&mut self, date: NaiveDate, value: T) -> Option<T> {
        self.0.insert(date, value)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.0.contains_key(&date)
    }

    /// Dates in ascending order.
    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.0.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NaiveDate, &T)> {
        self.0.iter().map(|(d, v)| (*d, v))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (NaiveDate, &mut T)> {
        self.0.iter_mut().map(|(d, v)| (*d, v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<T> FromIterator<(NaiveDate, T)> for DatePartition<T> {
    fn from_iter<I: IntoIterator<Item = (NaiveDate, T)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// The train aggregate: per-date seat grids and per-date stop lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Train {
    pub prn: Prn,
    pub name: String,
    #[serde(default)]
    pub seats: DatePartition<SeatGrid>,
    #[serde(default)]
    pub schedules: DatePartition<Vec<Stop>>,
}

impl Train {
    pub fn new(prn: impl Into<Prn>, name: impl Into<String>) -> Self {
        Self {
            prn: prn.into(),
            name: name.into(),
            seats: DatePartition::new(),
            schedules: DatePartition::new(),
        }
    }

    /// Add (or replace) a date: its stop list and an all-free grid.
    pub fn with_run(mut self, date: NaiveDate, stops: Vec<Stop>, rows: usize, cols: usize) -> Self {
        self.schedules.insert(date, stops);
        self.seats.insert(date, SeatGrid::new(rows, cols));
        self
    }

    /// Structural checks applied on the admin path before a train is stored.
    pub fn validate(&self) -> Result<(), String> {
        if self.prn.as_str().trim().is_empty() {
            return Err("train PRN must not be empty".into());
        }
        if self.prn.as_str().len() > MAX_NAME_LEN || self.name.len() > MAX_NAME_LEN {
            return Err("train PRN or name too long".into());
        }
        if self.schedules.len() > MAX_SCHEDULED_DATES || self.seats.len() > MAX_SCHEDULED_DATES {
            return Err("too many scheduled dates".into());
        }
        for (date, stops) in self.schedules.iter() {
            if stops.len() < 2 {
                return Err(format!("schedule for {date} needs at least two stops"));
            }
            if stops.len() > MAX_STOPS_PER_SCHEDULE {
                return Err(format!("schedule for {date} has too many stops"));
            }
            if let Some(pair) = stops.windows(2).find(|w| w[0].arrival >= w[1].arrival) {
                return Err(format!(
                    "schedule for {date}: arrival at {} is not after {}",
                    pair[1].station, pair[0].station
                ));
            }
        }
        for (date, grid) in self.seats.iter() {
            if grid.rows() == 0 || grid.cols() == 0 {
                return Err(format!("seat grid for {date} is empty"));
            }
            if grid.rows() > MAX_GRID_ROWS || grid.cols() > MAX_GRID_COLS {
                return Err(format!("seat grid for {date} exceeds {MAX_GRID_ROWS}x{MAX_GRID_COLS}"));
            }
            if grid.rows().checked_mul(grid.cols()) != Some(grid.capacity()) {
                return Err(format!("seat grid for {date} does not match its dimensions"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub user_id: UserId,
    pub train: Prn,
    /// Travel date. Reschedule changes it.
    pub date: NaiveDate,
    /// Date whose grid holds `seats`. Set once at booking.
    pub seated_on: NaiveDate,
    pub source: String,
    pub destination: String,
    pub arrival_at_source: NaiveDateTime,
    pub arrival_at_destination: NaiveDateTime,
    pub seats: Vec<Seat>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub password_hash: String,
    pub tickets: Vec<TicketId>,
}

impl User {
    pub fn new(email: impl Into<String>, password_hash: impl Into<String>) -> Self {
        Self {
            id: Ulid::new(),
            email: email.into().to_lowercase(),
            password_hash: password_hash.into(),
            tickets: Vec::new(),
        }
    }
}

/// The authenticated caller of a workflow. Built by the transport layer per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: UserId,
    pub email: String,
}

impl Actor {
    pub fn new(user_id: UserId, email: impl Into<String>) -> Self {
        Self {
            user_id,
            email: email.into(),
        }
    }
}

impl From<&User> for Actor {
    fn from(user: &User) -> Self {
        Self::new(user.id, user.email.clone())
    }
}

/// Journal record format. One variant per store mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    TrainSaved {
        train: Train,
    },
    GridCommitted {
        prn: Prn,
        date: NaiveDate,
        grid: SeatGrid,
    },
    TicketSaved {
        ticket: Ticket,
    },
    TicketDeleted {
        id: TicketId,
    },
    UserSaved {
        user: User,
    },
}

// ── Workflow result types ─────────────────────────────────────────

/// One row of a train search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrainSummary {
    pub prn: Prn,
    pub name: String,
    pub departure: NaiveDateTime,
    pub arrival: NaiveDateTime,
    pub free_seats: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cancellation {
    pub ticket_id: TicketId,
    pub train: Prn,
    /// Grid date the seats were released on.
    pub date: NaiveDate,
    pub released: Vec<Seat>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rescheduled {
    pub ticket_id: TicketId,
    pub from: NaiveDate,
    pub to: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct BulkInsert {
    pub added: Vec<Prn>,
    pub skipped: Vec<Prn>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2030, 1, d).unwrap()
    }

    fn at(h: u32) -> NaiveDateTime {
        date(1).and_hms_opt(h, 0, 0).unwrap()
    }

    #[test]
    fn grid_from_rows_roundtrips_matrix() {
        let rows = vec![vec![0, 1, 0], vec![1, 1, 0]];
        let grid = SeatGrid::from_rows(rows.clone()).unwrap();
        assert_eq!(grid.rows(), 2);
        assert_eq!(grid.cols(), 3);
        assert_eq!(grid.free_count(), 3);
        assert_eq!(grid.to_rows(), rows);
    }

    #[test]
    fn grid_rejects_ragged_rows() {
        let err = SeatGrid::from_rows(vec![vec![0, 0], vec![0]]).unwrap_err();
        assert_eq!(err, GridError::Ragged { row: 1, expected: 2, found: 1 });
    }

    #[test]
    fn grid_rejects_non_binary_cells() {
        let err = SeatGrid::from_rows(vec![vec![0, 2]]).unwrap_err();
        assert!(matches!(err, GridError::BadCell { row: 0, col: 1, value: 2 }));
    }

    #[test]
    fn occupy_is_all_or_nothing() {
        let mut grid = SeatGrid::new(2, 2);
        grid.occupy(&[Seat::new(1, 1)]).unwrap();

        let err = grid.occupy(&[Seat::new(0, 0), Seat::new(1, 1)]).unwrap_err();
        assert_eq!(err, GridError::AlreadyBooked(Seat::new(1, 1)));
        assert!(grid.is_free(Seat::new(0, 0))); // untouched
        assert_eq!(grid.free_count(), 3);
    }

    #[test]
    fn occupy_rejects_duplicates_and_out_of_range() {
        let mut grid = SeatGrid::new(2, 2);
        assert!(grid.occupy(&[Seat::new(0, 0), Seat::new(0, 0)]).is_err());
        assert_eq!(
            grid.occupy(&[Seat::new(2, 0)]),
            Err(GridError::OutOfBounds(Seat::new(2, 0)))
        );
        assert_eq!(grid.free_count(), 4);
    }

    #[test]
    fn release_reverses_occupy() {
        let mut grid = SeatGrid::new(3, 4);
        let before = grid.clone();
        let seats = [Seat::new(0, 3), Seat::new(1, 0)];
        grid.occupy(&seats).unwrap();
        assert_eq!(grid.free_count(), 10);
        grid.release(&seats).unwrap();
        assert_eq!(grid, before);
        assert_eq!(grid.release(&seats), Err(GridError::AlreadyFree(Seat::new(0, 3))));
    }

    #[test]
    fn seat_at_is_row_major() {
        let grid = SeatGrid::new(3, 4);
        assert_eq!(grid.seat_at(0), Seat::new(0, 0));
        assert_eq!(grid.seat_at(5), Seat::new(1, 1));
        assert_eq!(grid.seat_at(11), Seat::new(2, 3));
    }

    #[test]
    fn date_partition_missing_date_is_none() {
        let mut p: DatePartition<u8> = DatePartition::new();
        p.insert(date(2), 7);
        assert_eq!(p.get(date(2)), Some(&7));
        assert_eq!(p.get(date(3)), None);
        assert!(!p.contains(date(1)));
    }

    #[test]
    fn date_partition_iterates_in_date_order() {
        let p: DatePartition<u8> = [(date(9), 1), (date(2), 2), (date(5), 3)].into_iter().collect();
        let dates: Vec<_> = p.dates().collect();
        assert_eq!(dates, vec![date(2), date(5), date(9)]);
    }

    #[test]
    fn train_validate_rejects_non_increasing_schedule() {
        let train = Train::new("12951", "Rajdhani").with_run(
            date(1),
            vec![Stop::new("A", at(10)), Stop::new("B", at(10))],
            2,
            2,
        );
        let err = train.validate().unwrap_err();
        assert!(err.contains("not after"), "{err}");
    }

    #[test]
    fn train_validate_rejects_oversized_grid() {
        let mut train = Train::new("1", "X");
        train.seats.insert(date(1), SeatGrid::new(MAX_GRID_ROWS + 1, 1));
        assert!(train.validate().is_err());
    }

    #[test]
    fn train_validate_accepts_well_formed_train() {
        let train = Train::new("12951", "Rajdhani").with_run(
            date(1),
            vec![Stop::new("A", at(8)), Stop::new("B", at(9)), Stop::new("C", at(11))],
            3,
            4,
        );
        assert!(train.validate().is_ok());
    }

    #[test]
    fn user_email_is_normalised() {
        let user = User::new("Alice@Example.COM", "hash");
        assert_eq!(user.email, "alice@example.com");
    }

    #[test]
    fn train_deserializes_from_seed_json() {
        let json = r#"{
            "prn": "12951",
            "name": "Rajdhani",
            "seats": {"2030-01-01": {"rows": [[0, 1]]}},
            "schedules": {"2030-01-01": [
                {"station": "A", "arrival": "2030-01-01T08:00:00"},
                {"station": "B", "arrival": "2030-01-01T09:30:00"}
            ]}
        }"#;
        let train: Train = serde_json::from_str(json).unwrap();
        assert_eq!(train.prn, Prn::from("12951"));
        let grid = train.seats.get(date(1)).unwrap();
        assert_eq!(grid.free_count(), 1);
        assert_eq!(grid.version, 0);
        assert_eq!(train.schedules.get(date(1)).unwrap()[1].station, "B");
    }

    #[test]
    fn grid_json_goes_through_matrix_checks() {
        let grid: SeatGrid = serde_json::from_str(r#"{"rows": [[0, 1, 0], [1, 0, 0]], "version": 7}"#).unwrap();
        assert_eq!((grid.rows(), grid.cols(), grid.free_count(), grid.version), (2, 3, 4, 7));
        assert_eq!(
            serde_json::to_value(&grid).unwrap(),
            serde_json::json!({"rows": [[0, 1, 0], [1, 0, 0]], "version": 7})
        );

        assert!(serde_json::from_str::<SeatGrid>(r#"{"rows": [[0, 0], [0]]}"#).is_err());
        assert!(serde_json::from_str::<SeatGrid>(r#"{"rows": [[0, 3]]}"#).is_err());
        // Raw dimensions are not part of the format.
        assert!(serde_json::from_str::<SeatGrid>(r#"{"rows": 4294967296, "cols": 4294967296, "cells": []}"#).is_err());
    }

    #[test]
    fn train_validate_rejects_grid_wider_than_limit() {
        let train = Train {
            prn: Prn::from("1"),
            name: "Wide".into(),
            seats: [(date(1), SeatGrid::from_rows(vec![vec![0; MAX_GRID_COLS + 1]]).unwrap())]
                .into_iter()
                .collect(),
            schedules: DatePartition::new(),
        };
        let err = train.validate().unwrap_err();
        assert!(err.contains("exceeds"), "{err}");
    }

    #[test]
    fn bundled_seed_file_is_valid() {
        let trains: Vec<Train> = serde_json::from_str(include_str!("../seed/trains.json")).unwrap();
        assert_eq!(trains.len(), 2);
        for train in &trains {
            train.validate().unwrap();
        }
        assert_eq!(trains[1].seats.get(date(10)).unwrap().free_count(), 4);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::GridCommitted {
            prn: Prn::from("12951"),
            date: date(4),
            grid: SeatGrid::new(2, 3),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
